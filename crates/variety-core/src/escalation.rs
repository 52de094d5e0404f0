//! Synchronous escalation into the next hierarchy level
//!
//! Anomaly and oscillation patterns, and policy considerations of very high
//! severity, must not wait for a subscriber to get round to them. Filters
//! call the destination level's entry point directly, bounded by a timeout.
//! A timed-out call is logged and abandoned; the message still travels the
//! normal bus path.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{EscalationError, VarietyError, VarietyResult};
use crate::level::Level;
use crate::message::VarietyMessage;
use crate::pattern::{Pattern, PatternType};

/// Default bound on an escalation call
pub const DEFAULT_ESCALATION_TIMEOUT: Duration = Duration::from_millis(1000);

/// Direct entry point a hierarchy level exposes for escalations
///
/// Implementations must accept the message and return quickly.
#[async_trait]
pub trait LevelEscalation: Send + Sync {
    /// Dampen an anomaly or oscillation observed in `context`
    async fn dampen(&self, context: &str, pattern: &Pattern) -> Result<(), EscalationError>;

    /// Consider a high-severity input for immediate policy synthesis
    async fn synthesize_policy(&self, message: &VarietyMessage) -> Result<(), EscalationError>;
}

/// Static map from level to its escalation entry point
#[derive(Clone)]
pub struct EscalationRegistry {
    targets: HashMap<Level, Arc<dyn LevelEscalation>>,
    timeout: Duration,
}

impl EscalationRegistry {
    pub fn new(timeout: Duration) -> Self {
        Self {
            targets: HashMap::new(),
            timeout,
        }
    }

    /// Register the entry point for a level, replacing any previous one
    pub fn register(&mut self, level: Level, target: Arc<dyn LevelEscalation>) {
        self.targets.insert(level, target);
    }

    pub fn with_target(mut self, level: Level, target: Arc<dyn LevelEscalation>) -> Self {
        self.register(level, target);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn has_target(&self, level: Level) -> bool {
        self.targets.contains_key(&level)
    }

    /// Escalate a pattern to `level`'s dampening entry point
    ///
    /// Returns `Ok(false)` when the level has no entry point registered.
    pub async fn dampen(&self, level: Level, pattern: &Pattern) -> VarietyResult<bool> {
        let Some(target) = self.targets.get(&level) else {
            debug!(level = %level, "No escalation target registered, skipping dampen");
            return Ok(false);
        };

        match tokio::time::timeout(self.timeout, target.dampen(&pattern.context, pattern)).await {
            Ok(result) => result.map(|_| true).map_err(VarietyError::from),
            Err(_) => {
                warn!(
                    level = %level,
                    context = %pattern.context,
                    pattern_type = %pattern.pattern_type,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Dampen escalation timed out"
                );
                Err(VarietyError::EscalationTimeout {
                    level,
                    timeout: self.timeout,
                })
            }
        }
    }

    /// Escalate a message to `level`'s policy synthesis entry point
    pub async fn synthesize_policy(&self, level: Level, message: &VarietyMessage) -> VarietyResult<bool> {
        let Some(target) = self.targets.get(&level) else {
            debug!(level = %level, "No escalation target registered, skipping policy escalation");
            return Ok(false);
        };

        match tokio::time::timeout(self.timeout, target.synthesize_policy(message)).await {
            Ok(result) => result.map(|_| true).map_err(VarietyError::from),
            Err(_) => {
                warn!(
                    level = %level,
                    context = %message.context,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Policy escalation timed out"
                );
                Err(VarietyError::EscalationTimeout {
                    level,
                    timeout: self.timeout,
                })
            }
        }
    }
}

impl Default for EscalationRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_ESCALATION_TIMEOUT)
    }
}

impl std::fmt::Debug for EscalationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut levels: Vec<_> = self.targets.keys().copied().collect();
        levels.sort();
        f.debug_struct("EscalationRegistry")
            .field("levels", &levels)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// A call received by [`RecordingEscalation`]
#[derive(Debug, Clone, PartialEq)]
pub enum EscalationCall {
    Dampen {
        context: String,
        pattern_type: PatternType,
        significance: f64,
    },
    Policy {
        context: String,
        significance: f64,
    },
}

/// Escalation target that records every call
///
/// Useful as a stand-in hierarchy level in tests and simulations. A delay
/// can be configured to exercise caller-side timeouts.
#[derive(Debug, Default)]
pub struct RecordingEscalation {
    calls: Mutex<Vec<EscalationCall>>,
    delay: Option<Duration>,
}

impl RecordingEscalation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Respond only after `delay`
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            delay: Some(delay),
        }
    }

    pub fn calls(&self) -> Vec<EscalationCall> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
    }

    async fn respond(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl LevelEscalation for RecordingEscalation {
    async fn dampen(&self, context: &str, pattern: &Pattern) -> Result<(), EscalationError> {
        // Record before any delay so timed-out calls are still visible
        self.calls.lock().push(EscalationCall::Dampen {
            context: context.to_string(),
            pattern_type: pattern.pattern_type,
            significance: pattern.significance,
        });
        self.respond().await;
        Ok(())
    }

    async fn synthesize_policy(&self, message: &VarietyMessage) -> Result<(), EscalationError> {
        self.calls.lock().push(EscalationCall::Policy {
            context: message.context.clone(),
            significance: message.significance,
        });
        self.respond().await;
        Ok(())
    }
}
