//! Corrective adjustments issued by the balance monitor

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use variety_core::Boundary;

/// A correction aimed at one boundary
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Adjustment {
    /// Multiply a filter's filtering level
    AdjustFiltering { boundary: Boundary, magnitude: f64 },
    /// Multiply an amplifier's factor
    AdjustAmplification { boundary: Boundary, magnitude: f64 },
    DampenFilter { boundary: Boundary },
    DampenAmplifier { boundary: Boundary },
}

impl Adjustment {
    pub fn boundary(&self) -> Boundary {
        match self {
            Adjustment::AdjustFiltering { boundary, .. }
            | Adjustment::AdjustAmplification { boundary, .. }
            | Adjustment::DampenFilter { boundary }
            | Adjustment::DampenAmplifier { boundary } => *boundary,
        }
    }
}

/// Receiver of monitor adjustments
///
/// Delivery is fire-and-forget: implementations must not block and report
/// nothing back.
pub trait AdjustmentSink: Send + Sync {
    fn dispatch(&self, adjustment: Adjustment);
}

/// Sink that records every adjustment, for tests
#[derive(Debug, Default)]
pub struct RecordingSink {
    adjustments: Mutex<Vec<Adjustment>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn adjustments(&self) -> Vec<Adjustment> {
        self.adjustments.lock().clone()
    }

    pub fn clear(&self) {
        self.adjustments.lock().clear();
    }
}

impl AdjustmentSink for RecordingSink {
    fn dispatch(&self, adjustment: Adjustment) {
        self.adjustments.lock().push(adjustment);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adjustment_serializes_tagged() {
        let adj = Adjustment::AdjustFiltering {
            boundary: Boundary::S3ToS4,
            magnitude: 1.3,
        };
        let json = serde_json::to_value(adj).unwrap();
        assert_eq!(json["action"], "adjust_filtering");
        assert_eq!(json["boundary"], "s3_to_s4");
        assert_eq!(adj.boundary(), Boundary::S3ToS4);
    }

    #[test]
    fn test_recording_sink() {
        let sink = RecordingSink::new();
        sink.dispatch(Adjustment::DampenFilter {
            boundary: Boundary::S1ToS2,
        });
        assert_eq!(sink.adjustments().len(), 1);
        sink.clear();
        assert!(sink.adjustments().is_empty());
    }
}
