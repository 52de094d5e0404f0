//! # Variety Simulation
//!
//! Drives synthetic load through a running [`VarietyEngine`] so the
//! filters, amplifiers and balance monitor can be watched reacting to it.
//!
//! Stand-in hierarchy levels record escalations instead of acting on them;
//! each scenario ends with a [`report::Outcome`] that can be printed as
//! plain-text tables.
//!
//! [`VarietyEngine`]: variety_engine::VarietyEngine

pub mod driver;
pub mod report;
pub mod scenarios;

pub use driver::Driver;
pub use report::Outcome;
pub use scenarios::{ScenarioConfig, run_burst, run_flood, run_steady};
