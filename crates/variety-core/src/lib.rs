//! # Variety Core
//!
//! Core types, traits and errors for variety engineering across a
//! five-level control hierarchy.
//!
//! Each level must receive neither more variety than it can absorb nor less
//! than it needs to act. Filters attenuate what moves up, amplifiers expand
//! what moves down; this crate holds the vocabulary they share.
//!
//! ## Key Traits
//!
//! - [`MessageBus`]: Topic-addressed publish/subscribe channel
//! - [`LevelEscalation`]: Direct entry point a level exposes for escalations
//!
//! ## Key Types
//!
//! - [`Level`] and [`Boundary`]: The hierarchy and the eight boundaries in it
//! - [`Event`]: A raw signal published by a level
//! - [`Pattern`]: An aggregated group of events
//! - [`VarietyMessage`]: A unit of variety crossing a boundary
//! - [`Envelope`]: The `{kind, payload}` bus envelope

pub mod bus;
pub mod envelope;
pub mod error;
pub mod escalation;
pub mod level;
pub mod message;
pub mod pattern;

// Re-export main types
pub use bus::*;
pub use envelope::*;
pub use error::*;
pub use escalation::*;
pub use level::*;
pub use message::*;
pub use pattern::*;
