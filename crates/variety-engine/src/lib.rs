//! # Variety Engine
//!
//! Self-adjusting variety filters and amplifiers for a five-level control
//! hierarchy.
//!
//! This crate provides [`VarietyEngine`], which ties together:
//! - Filters on the four upward boundaries (aggregate and transform signals)
//! - Amplifiers on the four downward boundaries (expand directives)
//! - Metrics collection (entropy, volume and velocity per level)
//! - A balance monitor that classifies each level and corrects the boundaries
//!
//! Every component is an actor under one-for-one supervision.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use variety_core::{Event, Level, LocalBus};
//! use variety_engine::{EngineConfig, VarietyEngine};
//!
//! let engine = VarietyEngine::new(EngineConfig::default(), Arc::new(LocalBus::new()));
//! engine.start()?;
//!
//! engine.publish_event(Level::S1, Event::new("error", "billing"));
//! engine.adjust_filter_threshold("s1_to_s2", 0.6).await?;
//!
//! let report = engine.get_balance_status().await?;
//! println!("health {:.2}", report.health);
//! ```

pub mod adjust;
pub mod amplifier;
pub mod config;
mod engine;
mod error;
pub mod filter;
mod mailbox;
pub mod metrics;
pub mod monitor;
pub mod registry;
pub mod supervisor;

pub use adjust::{Adjustment, AdjustmentSink, RecordingSink};
pub use amplifier::{AmplifierHandle, AmplifierSnapshot};
pub use config::{
    AmplifierConfig, ConfigWarning, EngineConfig, FilterConfig, MetricsConfig, MonitorConfig,
    SupervisorConfig,
};
pub use engine::VarietyEngine;
pub use error::{EngineError, EngineResult};
pub use filter::{FilterHandle, FilterSnapshot};
pub use metrics::{MetricsCollector, VarietyMetrics};
pub use monitor::{Alert, BalanceReport, BalanceState, BalanceStatus};
pub use registry::BoundaryRegistry;
