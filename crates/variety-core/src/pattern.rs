//! Patterns produced by event aggregation

use std::fmt::{self, Display};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::envelope::{Envelope, EnvelopeKind};
use crate::message::{Event, Urgency};

/// Maximum number of sample events carried by a pattern
pub const MAX_SAMPLE_EVENTS: usize = 3;

/// Category assigned to an aggregated group of events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternType {
    Anomaly,
    Resource,
    Coordination,
    Oscillation,
    Operational,
}

impl PatternType {
    pub fn as_str(self) -> &'static str {
        match self {
            PatternType::Anomaly => "anomaly",
            PatternType::Resource => "resource",
            PatternType::Coordination => "coordination",
            PatternType::Oscillation => "oscillation",
            PatternType::Operational => "operational",
        }
    }

    /// Whether patterns of this type skip the bus queue and go straight to
    /// the destination level's dampening entry point
    pub fn escalates(self) -> bool {
        matches!(self, PatternType::Anomaly | PatternType::Oscillation)
    }

    /// Parse a pattern type name, `None` if unrecognised
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "anomaly" => Some(PatternType::Anomaly),
            "resource" => Some(PatternType::Resource),
            "coordination" => Some(PatternType::Coordination),
            "oscillation" => Some(PatternType::Oscillation),
            "operational" => Some(PatternType::Operational),
            _ => None,
        }
    }
}

impl Display for PatternType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An aggregated group of same-typed events within one context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    pub context: String,
    pub pattern_type: PatternType,
    /// Type shared by the aggregated events
    pub event_type: String,
    pub event_count: usize,
    pub significance: f64,
    pub urgency: Urgency,
    /// Up to [`MAX_SAMPLE_EVENTS`] of the aggregated events
    pub sample_events: Vec<Event>,
    pub timestamp: DateTime<Utc>,
}

impl Pattern {
    pub fn to_envelope(&self) -> Envelope {
        Envelope::from_serializable(EnvelopeKind::Pattern, self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escalating_types() {
        assert!(PatternType::Anomaly.escalates());
        assert!(PatternType::Oscillation.escalates());
        assert!(!PatternType::Resource.escalates());
        assert!(!PatternType::Coordination.escalates());
        assert!(!PatternType::Operational.escalates());
    }

    #[test]
    fn test_parse_roundtrip() {
        for t in [
            PatternType::Anomaly,
            PatternType::Resource,
            PatternType::Coordination,
            PatternType::Oscillation,
            PatternType::Operational,
        ] {
            assert_eq!(PatternType::parse(t.as_str()), Some(t));
        }
        assert_eq!(PatternType::parse("weird"), None);
    }

    #[test]
    fn test_pattern_envelope_fields() {
        let pattern = Pattern {
            context: "billing".to_string(),
            pattern_type: PatternType::Anomaly,
            event_type: "error".to_string(),
            event_count: 20,
            significance: 1.0,
            urgency: Urgency::Critical,
            sample_events: vec![Event::new("error", "billing")],
            timestamp: Utc::now(),
        };
        let envelope = pattern.to_envelope();
        assert_eq!(envelope.kind, EnvelopeKind::Pattern);
        assert_eq!(envelope.payload["pattern_type"], "anomaly");
        assert_eq!(envelope.payload["context"], "billing");
        assert_eq!(envelope.decode::<Pattern>(), Some(pattern));
    }
}
