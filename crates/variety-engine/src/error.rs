//! Error types for the engine lifecycle

use thiserror::Error;

use variety_core::VarietyError;

/// Errors that can occur while running the engine
#[derive(Debug, Error)]
pub enum EngineError {
    /// Engine already started
    #[error("Engine already started")]
    AlreadyStarted,

    /// Engine not started
    #[error("Engine not started")]
    NotStarted,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Channel error (mpsc/oneshot)
    #[error("Channel error: {0}")]
    Channel(String),

    /// Error from a variety operation
    #[error(transparent)]
    Variety(#[from] VarietyError),
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Config(e.to_string())
    }
}

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
