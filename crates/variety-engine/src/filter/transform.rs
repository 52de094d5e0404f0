//! One-to-one message transforms for the upper filter boundaries

use serde_json::{Map, Value, json};

use variety_core::{
    Boundary, EnvelopeKind, MessageType, PatternType, VarietyMessage, clamp_unit,
};

/// A boundary-specific mapping from an upstream message to a downstream one
pub trait MessageTransform: Send + Sync {
    /// Envelope kind this transform consumes
    fn input(&self) -> EnvelopeKind;

    /// Score compared against `threshold × filtering_level`
    fn relevance(&self, message: &VarietyMessage) -> f64;

    /// Build the downstream message
    fn transform(&self, message: &VarietyMessage, relevance: f64) -> VarietyMessage;

    /// Whether the message must also be escalated directly to the next level
    fn escalates(&self, _message: &VarietyMessage) -> bool {
        false
    }
}

/// The transform a filter boundary applies, or `None` for the aggregating one
pub fn transform_for(boundary: Boundary) -> Option<Box<dyn MessageTransform>> {
    match boundary {
        Boundary::S2ToS3 => Some(Box::new(PatternToResourceNeed)),
        Boundary::S3ToS4 => Some(Box::new(ResourceNeedToTrend)),
        Boundary::S4ToS5 => Some(Box::new(TrendToPolicy)),
        _ => None,
    }
}

/// Key a message is counted under in the metrics collector
///
/// Payload subtypes are carried through every transform so a message that
/// passes a boundary unchanged keeps its key.
pub fn variety_key(message: &VarietyMessage) -> String {
    ["pattern_type", "directive_type"]
        .iter()
        .find_map(|k| message.payload_str(k))
        .unwrap_or(message.message_type.as_str())
        .to_string()
}

fn carry(message: &VarietyMessage, keys: &[&str]) -> Map<String, Value> {
    keys.iter()
        .filter_map(|k| message.payload.get(*k).map(|v| (k.to_string(), v.clone())))
        .collect()
}

/// How urgently each pattern type needs resources
pub fn pattern_urgency(pattern_type: Option<PatternType>) -> f64 {
    match pattern_type {
        Some(PatternType::Anomaly) => 0.9,
        Some(PatternType::Resource) => 0.8,
        Some(PatternType::Oscillation) => 0.7,
        Some(PatternType::Coordination) => 0.6,
        Some(PatternType::Operational) | None => 0.3,
    }
}

/// S2→S3: coordination patterns become resource needs
pub struct PatternToResourceNeed;

impl PatternToResourceNeed {
    fn pattern_type(message: &VarietyMessage) -> Option<PatternType> {
        message.payload_str("pattern_type").and_then(PatternType::parse)
    }
}

impl MessageTransform for PatternToResourceNeed {
    fn input(&self) -> EnvelopeKind {
        EnvelopeKind::Pattern
    }

    fn relevance(&self, message: &VarietyMessage) -> f64 {
        0.6 * pattern_urgency(Self::pattern_type(message)) + 0.4 * message.significance
    }

    fn transform(&self, message: &VarietyMessage, relevance: f64) -> VarietyMessage {
        let urgency_score = pattern_urgency(Self::pattern_type(message));
        let mut payload = carry(message, &["pattern_type", "event_type", "event_count", "scope"]);
        payload.insert("urgency_score".to_string(), json!(urgency_score));
        payload.insert("source_significance".to_string(), json!(message.significance));
        VarietyMessage::new(MessageType::ResourceRequest, message.context.clone(), relevance)
            .with_payload(payload)
    }
}

/// S3→S4: resource needs become environmental trends
pub struct ResourceNeedToTrend;

impl ResourceNeedToTrend {
    fn urgency_score(message: &VarietyMessage) -> f64 {
        message
            .payload_score("urgency_score")
            .unwrap_or_else(|| message.urgency.score())
    }
}

impl MessageTransform for ResourceNeedToTrend {
    fn input(&self) -> EnvelopeKind {
        EnvelopeKind::ResourceNeed
    }

    fn relevance(&self, message: &VarietyMessage) -> f64 {
        0.5 * message.significance + 0.5 * Self::urgency_score(message)
    }

    fn transform(&self, message: &VarietyMessage, relevance: f64) -> VarietyMessage {
        let mut payload = carry(message, &["pattern_type", "event_type"]);
        payload.insert("trend_type".to_string(), json!("resource-pressure"));
        payload.insert("severity".to_string(), json!(clamp_unit(relevance)));
        payload.insert(
            "scope".to_string(),
            message
                .payload
                .get("scope")
                .cloned()
                .unwrap_or_else(|| json!("subsystem")),
        );
        payload.insert(
            "viability_impact".to_string(),
            json!(Self::urgency_score(message)),
        );
        VarietyMessage::new(MessageType::Trend, message.context.clone(), relevance)
            .with_payload(payload)
    }
}

/// Severity above which a trend goes straight to policy synthesis
pub const POLICY_ESCALATION_SEVERITY: f64 = 0.9;

/// Numeric weight of a trend's scope
pub fn scope_score(scope: Option<&Value>) -> f64 {
    match scope {
        Some(Value::String(s)) => match s.as_str() {
            "local" => 0.3,
            "subsystem" => 0.6,
            "system" => 1.0,
            _ => 0.5,
        },
        Some(Value::Number(n)) => n.as_f64().map(clamp_unit).unwrap_or(0.5),
        _ => 0.5,
    }
}

/// S4→S5: environmental trends become policy considerations
pub struct TrendToPolicy;

impl TrendToPolicy {
    fn severity(message: &VarietyMessage) -> f64 {
        message
            .payload_score("severity")
            .unwrap_or(message.significance)
    }

    fn viability_impact(message: &VarietyMessage) -> f64 {
        message.payload_score("viability_impact").unwrap_or(0.5)
    }
}

impl MessageTransform for TrendToPolicy {
    fn input(&self) -> EnvelopeKind {
        EnvelopeKind::EnvironmentalTrend
    }

    fn relevance(&self, message: &VarietyMessage) -> f64 {
        0.5 * Self::severity(message)
            + 0.2 * scope_score(message.payload.get("scope"))
            + 0.3 * Self::viability_impact(message)
    }

    fn transform(&self, message: &VarietyMessage, relevance: f64) -> VarietyMessage {
        let mut payload = carry(message, &["pattern_type", "trend_type", "scope"]);
        payload.insert("severity".to_string(), json!(Self::severity(message)));
        payload.insert(
            "viability_impact".to_string(),
            json!(Self::viability_impact(message)),
        );
        payload.insert("relevance".to_string(), json!(relevance));
        VarietyMessage::new(
            MessageType::PolicyConsideration,
            message.context.clone(),
            relevance,
        )
        .with_payload(payload)
    }

    fn escalates(&self, message: &VarietyMessage) -> bool {
        Self::severity(message) > POLICY_ESCALATION_SEVERITY
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(message_type: MessageType, significance: f64, payload: Value) -> VarietyMessage {
        let payload = match payload {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        VarietyMessage::new(message_type, "plant", significance).with_payload(payload)
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_boundaries_with_transforms() {
        assert!(transform_for(Boundary::S1ToS2).is_none());
        assert_eq!(
            transform_for(Boundary::S2ToS3).unwrap().input(),
            EnvelopeKind::Pattern
        );
        assert_eq!(
            transform_for(Boundary::S3ToS4).unwrap().input(),
            EnvelopeKind::ResourceNeed
        );
        assert_eq!(
            transform_for(Boundary::S4ToS5).unwrap().input(),
            EnvelopeKind::EnvironmentalTrend
        );
        assert!(transform_for(Boundary::S2ToS1).is_none());
    }

    #[test]
    fn test_pattern_relevance_blend() {
        let t = PatternToResourceNeed;
        let anomaly = message(MessageType::Pattern, 1.0, json!({"pattern_type": "anomaly"}));
        assert!(approx(t.relevance(&anomaly), 0.6 * 0.9 + 0.4));

        let unknown = message(MessageType::Pattern, 0.5, json!({}));
        assert!(approx(t.relevance(&unknown), 0.6 * 0.3 + 0.2));

        let out = t.transform(&anomaly, 0.94);
        assert_eq!(out.message_type, MessageType::ResourceRequest);
        assert_eq!(out.context, "plant");
        assert_eq!(out.payload_str("pattern_type"), Some("anomaly"));
        assert_eq!(out.payload_score("urgency_score"), Some(0.9));
        assert!(approx(out.significance, 0.94));
    }

    #[test]
    fn test_resource_need_relevance() {
        let t = ResourceNeedToTrend;
        let need = message(MessageType::ResourceRequest, 0.6, json!({"urgency_score": 0.8}));
        assert!(approx(t.relevance(&need), 0.7));

        // Falls back to the message urgency
        let bare = message(MessageType::ResourceRequest, 0.95, json!({}));
        assert!(approx(t.relevance(&bare), 0.5 * 0.95 + 0.5 * 1.0));

        let trend = t.transform(&need, 0.7);
        assert_eq!(trend.message_type, MessageType::Trend);
        assert_eq!(trend.payload_score("severity"), Some(0.7));
        assert_eq!(trend.payload_str("scope"), Some("subsystem"));
    }

    #[test]
    fn test_scope_scores() {
        assert_eq!(scope_score(Some(&json!("local"))), 0.3);
        assert_eq!(scope_score(Some(&json!("subsystem"))), 0.6);
        assert_eq!(scope_score(Some(&json!("system"))), 1.0);
        assert_eq!(scope_score(Some(&json!(0.8))), 0.8);
        assert_eq!(scope_score(Some(&json!("galactic"))), 0.5);
        assert_eq!(scope_score(None), 0.5);
    }

    #[test]
    fn test_policy_relevance_and_escalation() {
        let t = TrendToPolicy;
        let severe = message(
            MessageType::Trend,
            0.5,
            json!({"severity": 0.95, "scope": "system", "viability_impact": 1.0}),
        );
        assert!(approx(t.relevance(&severe), 0.5 * 0.95 + 0.2 + 0.3));
        assert!(t.escalates(&severe));

        let mild = message(MessageType::Trend, 0.9, json!({"scope": "local"}));
        assert!(approx(t.relevance(&mild), 0.45 + 0.06 + 0.15));
        assert!(!t.escalates(&mild));
    }

    #[test]
    fn test_variety_key_follows_subtype() {
        let pattern = message(MessageType::Pattern, 0.5, json!({"pattern_type": "oscillation"}));
        assert_eq!(variety_key(&pattern), "oscillation");
        let directive = message(MessageType::Directive, 0.5, json!({"directive_type": "reallocate"}));
        assert_eq!(variety_key(&directive), "reallocate");
        let plain = message(MessageType::Trend, 0.5, json!({}));
        assert_eq!(variety_key(&plain), "trend");
    }
}
