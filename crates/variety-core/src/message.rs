//! Raw events and the messages that cross boundaries

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::envelope::{Envelope, EnvelopeKind};

/// Context used when an event or message arrives without one
pub const DEFAULT_CONTEXT: &str = "default";

/// Event type used when an event arrives without one
pub const UNKNOWN_EVENT_TYPE: &str = "unknown";

/// Significance assumed when a message arrives without one
pub const DEFAULT_SIGNIFICANCE: f64 = 0.5;

/// A fine-grained signal published by a hierarchy level
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event type, e.g. `error` or `resource_request`
    #[serde(rename = "type", default = "unknown_event_type")]
    pub event_type: String,
    /// Grouping key (subsystem, tenant, ...)
    #[serde(default = "default_context")]
    pub context: String,
    /// Opaque structured data
    #[serde(default)]
    pub data: Value,
}

fn unknown_event_type() -> String {
    UNKNOWN_EVENT_TYPE.to_string()
}

fn default_context() -> String {
    DEFAULT_CONTEXT.to_string()
}

impl Event {
    pub fn new(event_type: impl Into<String>, context: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            context: context.into(),
            data: Value::Null,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    /// Build an event from loosely structured input
    ///
    /// Never fails: a missing or non-string `type` becomes `unknown`, a
    /// missing `context` becomes `default`, and anything that is not an
    /// object is kept whole as the event data.
    pub fn coerce(value: &Value) -> Self {
        let Some(map) = value.as_object() else {
            debug!("coercing non-object event input");
            return Self::new(UNKNOWN_EVENT_TYPE, DEFAULT_CONTEXT).with_data(value.clone());
        };

        let event_type = map
            .get("type")
            .or_else(|| map.get("event_type"))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| {
                debug!("event without type, defaulting to unknown");
                UNKNOWN_EVENT_TYPE
            });
        let context = map
            .get("context")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_CONTEXT);
        let data = match map.get("data") {
            Some(data) => data.clone(),
            None => {
                let rest: Map<String, Value> = map
                    .iter()
                    .filter(|(k, _)| !matches!(k.as_str(), "type" | "event_type" | "context"))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                if rest.is_empty() { Value::Null } else { Value::Object(rest) }
            }
        };

        Self {
            event_type: event_type.to_string(),
            context: context.to_string(),
            data,
        }
    }

    /// Wrap this event for publication on a level topic
    pub fn to_envelope(&self) -> Envelope {
        Envelope::from_serializable(EnvelopeKind::RawEvent, self)
    }
}

/// Semantic type of a boundary-crossing message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageType {
    RawEvent,
    Pattern,
    ResourceRequest,
    Trend,
    PolicyConsideration,
    Directive,
}

impl MessageType {
    /// Message type carried by an envelope kind, if it carries one
    pub fn from_kind(kind: EnvelopeKind) -> Option<Self> {
        match kind {
            EnvelopeKind::RawEvent => Some(MessageType::RawEvent),
            EnvelopeKind::Pattern => Some(MessageType::Pattern),
            EnvelopeKind::ResourceNeed => Some(MessageType::ResourceRequest),
            EnvelopeKind::EnvironmentalTrend => Some(MessageType::Trend),
            EnvelopeKind::PolicyConsideration => Some(MessageType::PolicyConsideration),
            EnvelopeKind::Directive => Some(MessageType::Directive),
            EnvelopeKind::MetricsUpdate | EnvelopeKind::BalanceUpdate => None,
        }
    }

    /// Envelope kind used to publish this message type
    pub fn kind(self) -> EnvelopeKind {
        match self {
            MessageType::RawEvent => EnvelopeKind::RawEvent,
            MessageType::Pattern => EnvelopeKind::Pattern,
            MessageType::ResourceRequest => EnvelopeKind::ResourceNeed,
            MessageType::Trend => EnvelopeKind::EnvironmentalTrend,
            MessageType::PolicyConsideration => EnvelopeKind::PolicyConsideration,
            MessageType::Directive => EnvelopeKind::Directive,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::RawEvent => "raw-event",
            MessageType::Pattern => "pattern",
            MessageType::ResourceRequest => "resource-request",
            MessageType::Trend => "trend",
            MessageType::PolicyConsideration => "policy-consideration",
            MessageType::Directive => "directive",
        }
    }
}

/// Ordinal urgency derived from a 0.0-1.0 score
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Low,
    Normal,
    High,
    Critical,
}

impl Urgency {
    pub fn from_score(score: f64) -> Self {
        if score >= 0.9 {
            Urgency::Critical
        } else if score >= 0.7 {
            Urgency::High
        } else if score >= 0.4 {
            Urgency::Normal
        } else {
            Urgency::Low
        }
    }

    /// Representative score for this urgency
    pub fn score(self) -> f64 {
        match self {
            Urgency::Low => 0.2,
            Urgency::Normal => 0.5,
            Urgency::High => 0.8,
            Urgency::Critical => 1.0,
        }
    }
}

/// A unit of variety crossing a boundary
///
/// Built by a filter or amplifier when it decides to forward, then
/// published and never modified again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarietyMessage {
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub context: String,
    #[serde(default)]
    pub payload: Map<String, Value>,
    /// Confidence that this message matters (0.0-1.0)
    pub significance: f64,
    pub urgency: Urgency,
    pub timestamp: DateTime<Utc>,
}

impl VarietyMessage {
    /// Create a message; urgency is derived from significance
    pub fn new(message_type: MessageType, context: impl Into<String>, significance: f64) -> Self {
        let significance = clamp_unit(significance);
        Self {
            message_type,
            context: context.into(),
            payload: Map::new(),
            significance,
            urgency: Urgency::from_score(significance),
            timestamp: Utc::now(),
        }
    }

    pub fn with_payload(mut self, payload: Map<String, Value>) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_urgency(mut self, urgency: Urgency) -> Self {
        self.urgency = urgency;
        self
    }

    /// Read a message out of an envelope, defaulting whatever is missing
    ///
    /// Returns `None` only for envelope kinds that carry no message at all
    /// (metrics and balance updates).
    pub fn from_envelope(envelope: &Envelope) -> Option<Self> {
        let message_type = MessageType::from_kind(envelope.kind)?;
        let payload = &envelope.payload;

        let context = payload
            .get("context")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_CONTEXT)
            .to_string();
        let significance = payload
            .get("significance")
            .and_then(Value::as_f64)
            .filter(|s| s.is_finite())
            .map(clamp_unit)
            .unwrap_or(DEFAULT_SIGNIFICANCE);
        let urgency = payload
            .get("urgency")
            .and_then(|u| serde_json::from_value::<Urgency>(u.clone()).ok())
            .unwrap_or_else(|| Urgency::from_score(significance));
        let timestamp = payload
            .get("timestamp")
            .and_then(|t| serde_json::from_value::<DateTime<Utc>>(t.clone()).ok())
            .unwrap_or_else(Utc::now);

        // Nested payloads (a published VarietyMessage) are unwrapped so the
        // fields a transform reads sit at the top level.
        let inner = match payload.get("payload") {
            Some(Value::Object(inner)) => {
                let mut merged = inner.clone();
                for (k, v) in payload {
                    if k != "payload" {
                        merged.entry(k.clone()).or_insert_with(|| v.clone());
                    }
                }
                merged
            }
            _ => payload.clone(),
        };

        Some(Self {
            message_type,
            context,
            payload: inner,
            significance,
            urgency,
            timestamp,
        })
    }

    /// Wrap this message for publication
    pub fn to_envelope(&self) -> Envelope {
        Envelope::from_serializable(self.message_type.kind(), self)
    }

    /// Read a numeric payload field clamped to 0.0-1.0
    pub fn payload_score(&self, key: &str) -> Option<f64> {
        self.payload
            .get(key)
            .and_then(Value::as_f64)
            .filter(|v| v.is_finite())
            .map(clamp_unit)
    }

    /// Read a string payload field
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }
}

/// Clamp a score into 0.0-1.0, mapping NaN to 0.0
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) }
}
