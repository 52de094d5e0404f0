//! Error types for the variety subsystem
//!
//! Nothing here is fatal to the hierarchy. Malformed input never becomes an
//! error value (it is coerced to defaults where it is parsed), and component
//! crashes are handled by the supervisor rather than returned to callers.

use std::time::Duration;

use thiserror::Error;

use crate::level::Level;

/// Top-level error type for variety operations
#[derive(Debug, Error)]
pub enum VarietyError {
    #[error("Invalid boundary: {0}")]
    InvalidBoundary(String),

    #[error("Escalation to {level} timed out after {}ms", .timeout.as_millis())]
    EscalationTimeout { level: Level, timeout: Duration },

    #[error("Escalation error: {0}")]
    Escalation(#[from] EscalationError),

    #[error("Component unavailable: {0}")]
    ComponentUnavailable(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Errors reported by a hierarchy level's escalation entry point
#[derive(Debug, Error)]
pub enum EscalationError {
    #[error("Escalation rejected: {0}")]
    Rejected(String),

    #[error("Escalation target unavailable: {0}")]
    Unavailable(String),
}

/// Result type alias for variety operations
pub type VarietyResult<T> = Result<T, VarietyError>;
