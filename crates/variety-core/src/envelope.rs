//! The bus message envelope: `{kind, payload}`

use std::fmt::{self, Display};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

/// Semantic type of an envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EnvelopeKind {
    RawEvent,
    Pattern,
    ResourceNeed,
    EnvironmentalTrend,
    PolicyConsideration,
    Directive,
    MetricsUpdate,
    BalanceUpdate,
}

impl EnvelopeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EnvelopeKind::RawEvent => "raw-event",
            EnvelopeKind::Pattern => "pattern",
            EnvelopeKind::ResourceNeed => "resource-need",
            EnvelopeKind::EnvironmentalTrend => "environmental-trend",
            EnvelopeKind::PolicyConsideration => "policy-consideration",
            EnvelopeKind::Directive => "directive",
            EnvelopeKind::MetricsUpdate => "metrics-update",
            EnvelopeKind::BalanceUpdate => "balance-update",
        }
    }
}

impl Display for EnvelopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message on the bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub kind: EnvelopeKind,
    #[serde(default)]
    pub payload: Map<String, Value>,
}

impl Envelope {
    pub fn new(kind: EnvelopeKind, payload: Map<String, Value>) -> Self {
        Self { kind, payload }
    }

    /// Serialize a value into the payload
    ///
    /// Values that do not serialize to an object are stored under `value`.
    pub fn from_serializable<T: Serialize>(kind: EnvelopeKind, value: &T) -> Self {
        let payload = match serde_json::to_value(value) {
            Ok(Value::Object(map)) => map,
            Ok(other) => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                map
            }
            Err(e) => {
                warn!(kind = %kind, error = %e, "Failed to serialize envelope payload");
                Map::new()
            }
        };
        Self { kind, payload }
    }

    /// Deserialize the payload, or `None` if it does not fit `T`
    pub fn decode<T: DeserializeOwned>(&self) -> Option<T> {
        serde_json::from_value(Value::Object(self.payload.clone())).ok()
    }

    /// Raw payload as a JSON value
    pub fn payload_value(&self) -> Value {
        Value::Object(self.payload.clone())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_kind_serializes_kebab_case() {
        let json = serde_json::to_value(EnvelopeKind::EnvironmentalTrend).unwrap();
        assert_eq!(json, json!("environmental-trend"));
        assert_eq!(EnvelopeKind::BalanceUpdate.to_string(), "balance-update");
    }

    #[test]
    fn test_from_serializable_wraps_scalars() {
        let envelope = Envelope::from_serializable(EnvelopeKind::MetricsUpdate, &3);
        assert_eq!(envelope.payload.get("value"), Some(&json!(3)));
    }

    #[test]
    fn test_decode_mismatch_is_none() {
        #[derive(Deserialize)]
        struct Needs {
            #[allow(dead_code)]
            required: u32,
        }
        let envelope = Envelope::new(EnvelopeKind::Pattern, Map::new());
        assert!(envelope.decode::<Needs>().is_none());
    }
}
