//! Balance classification and scoring

use std::fmt::{self, Display};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use variety_core::Level;

use crate::adjust::Adjustment;
use crate::metrics::VarietyMetrics;

/// Volume ratio a critical overload must also exceed
pub const CRITICAL_VOLUME_RATIO: f64 = 1.5;

/// Entropy velocity beyond which a level is unstable
pub const INSTABILITY_VELOCITY: f64 = 0.5;

/// Non-balanced levels tolerated before a global rebalance
pub const MAX_IMBALANCED_LEVELS: usize = 2;

/// Balance state of one level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalanceState {
    #[default]
    Balanced,
    Overloaded,
    Underloaded,
    Unstable,
    CriticalOverload,
}

impl BalanceState {
    pub fn as_str(self) -> &'static str {
        match self {
            BalanceState::Balanced => "balanced",
            BalanceState::Overloaded => "overloaded",
            BalanceState::Underloaded => "underloaded",
            BalanceState::Unstable => "unstable",
            BalanceState::CriticalOverload => "critical_overload",
        }
    }

    pub fn is_balanced(self) -> bool {
        self == BalanceState::Balanced
    }

    /// Contribution to the system health score
    pub fn score(self) -> f64 {
        match self {
            BalanceState::Balanced => 1.0,
            BalanceState::Unstable => 0.7,
            BalanceState::Underloaded => 0.5,
            BalanceState::Overloaded => 0.3,
            BalanceState::CriticalOverload => 0.1,
        }
    }

    fn base_magnitude(self) -> Option<f64> {
        match self {
            BalanceState::Balanced => None,
            BalanceState::CriticalOverload => Some(2.0),
            BalanceState::Overloaded => Some(1.3),
            BalanceState::Underloaded => Some(0.7),
            BalanceState::Unstable => Some(1.0),
        }
    }
}

impl Display for BalanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify one level's metrics (first matching rule wins)
pub fn classify(entropy_ratio: f64, volume_ratio: f64, velocity: f64, threshold: f64) -> BalanceState {
    if entropy_ratio > 1.0 + 2.0 * threshold && volume_ratio > CRITICAL_VOLUME_RATIO {
        BalanceState::CriticalOverload
    } else if entropy_ratio > 1.0 + threshold || volume_ratio > 1.0 + threshold {
        BalanceState::Overloaded
    } else if entropy_ratio < 1.0 - threshold {
        BalanceState::Underloaded
    } else if velocity.abs() > INSTABILITY_VELOCITY {
        BalanceState::Unstable
    } else {
        BalanceState::Balanced
    }
}

/// Mean score over all levels; 1.0 when there are none
pub fn health<I: IntoIterator<Item = BalanceState>>(states: I) -> f64 {
    let (sum, n) = states
        .into_iter()
        .fold((0.0, 0usize), |(sum, n), s| (sum + s.score(), n + 1));
    if n == 0 { 1.0 } else { sum / n as f64 }
}

/// Whether the system as a whole needs rebalancing
pub fn needs_rebalance<I: IntoIterator<Item = BalanceState>>(states: I) -> bool {
    let mut imbalanced = 0;
    for state in states {
        if state == BalanceState::CriticalOverload {
            return true;
        }
        if !state.is_balanced() {
            imbalanced += 1;
        }
    }
    imbalanced > MAX_IMBALANCED_LEVELS
}

/// `base × (1 + |entropy_ratio − 1|)`; `None` for balanced levels
pub fn adjustment_magnitude(state: BalanceState, entropy_ratio: f64) -> Option<f64> {
    state
        .base_magnitude()
        .map(|base| base * (1.0 + (entropy_ratio - 1.0).abs()))
}

/// Status of one level at one evaluation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BalanceStatus {
    pub level: Level,
    pub status: BalanceState,
    pub entropy_ratio: f64,
    pub volume_ratio: f64,
    pub velocity: f64,
    pub timestamp: DateTime<Utc>,
}

impl BalanceStatus {
    pub fn evaluate(metrics: &VarietyMetrics, threshold: f64) -> Self {
        Self {
            level: metrics.level,
            status: classify(
                metrics.entropy.ratio,
                metrics.volume.ratio,
                metrics.velocity,
                threshold,
            ),
            entropy_ratio: metrics.entropy.ratio,
            volume_ratio: metrics.volume.ratio,
            velocity: metrics.velocity,
            timestamp: Utc::now(),
        }
    }

    pub fn initial(level: Level) -> Self {
        Self {
            level,
            status: BalanceState::Balanced,
            entropy_ratio: 1.0,
            volume_ratio: 1.0,
            velocity: 0.0,
            timestamp: Utc::now(),
        }
    }

    /// Corrections for this level, empty when balanced or at the top level
    pub fn adjustments(&self) -> Vec<Adjustment> {
        let Some(magnitude) = adjustment_magnitude(self.status, self.entropy_ratio) else {
            return Vec::new();
        };
        let filter = self.level.upward_filter();
        let amplifier = self.level.inbound_amplifier();
        match self.status {
            BalanceState::Overloaded | BalanceState::CriticalOverload => filter
                .map(|boundary| Adjustment::AdjustFiltering { boundary, magnitude })
                .into_iter()
                .collect(),
            BalanceState::Underloaded => amplifier
                .map(|boundary| Adjustment::AdjustAmplification { boundary, magnitude })
                .into_iter()
                .collect(),
            BalanceState::Unstable => filter
                .map(|boundary| Adjustment::DampenFilter { boundary })
                .into_iter()
                .chain(amplifier.map(|boundary| Adjustment::DampenAmplifier { boundary }))
                .collect(),
            BalanceState::Balanced => Vec::new(),
        }
    }
}

/// Record of a level entering a non-balanced state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub level: Level,
    pub status: BalanceState,
    pub entropy_ratio: f64,
    pub volume_ratio: f64,
    pub velocity: f64,
    pub message: String,
}

impl Alert {
    pub fn new(status: &BalanceStatus) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: status.timestamp,
            level: status.level,
            status: status.status,
            entropy_ratio: status.entropy_ratio,
            volume_ratio: status.volume_ratio,
            velocity: status.velocity,
            message: format!(
                "Level {} {}: entropy ratio {:.2}, volume ratio {:.2}, velocity {:.2}",
                status.level,
                status.status,
                status.entropy_ratio,
                status.volume_ratio,
                status.velocity
            ),
        }
    }
}
