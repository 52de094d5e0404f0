//! Per-boundary amplifier state and the expansion heuristic

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use variety_core::{Boundary, MessageType, VarietyMessage};

pub const MIN_AMPLIFICATION_FACTOR: f64 = 0.5;
pub const MAX_AMPLIFICATION_FACTOR: f64 = 5.0;
/// Multiplier applied when damping oscillations
pub const DAMPEN_FACTOR: f64 = 0.8;

/// How a variant differs from its directive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariantKind {
    /// Staggered in time across the expansion window
    Temporal,
    /// Scoped to a sub-context
    Contextual,
    /// Scaled intensity
    Parametric,
}

impl VariantKind {
    const CYCLE: [VariantKind; 3] = [
        VariantKind::Temporal,
        VariantKind::Contextual,
        VariantKind::Parametric,
    ];

    pub fn for_index(index: usize) -> Self {
        Self::CYCLE[index % Self::CYCLE.len()]
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AmplifierStats {
    pub directives_received: u64,
    /// Directives expanded into more than one variant
    pub expanded: u64,
    /// Directives below threshold forwarded as a single variant
    pub passed_through: u64,
    pub variants_published: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AmplifierSnapshot {
    pub boundary: Boundary,
    pub amplification_factor: f64,
    pub threshold: f64,
    pub buffered: usize,
    pub stats: AmplifierStats,
}

/// Mutable state owned by one amplifier actor
#[derive(Debug)]
pub struct AmplifierState {
    boundary: Boundary,
    amplification_factor: f64,
    threshold: f64,
    window: Duration,
    buffer: Vec<VarietyMessage>,
    stats: AmplifierStats,
}

impl AmplifierState {
    pub fn new(boundary: Boundary, threshold: f64, window: Duration) -> Self {
        Self {
            boundary,
            amplification_factor: 1.0,
            threshold: if threshold.is_nan() { 0.5 } else { threshold.clamp(0.01, 1.0) },
            window,
            buffer: Vec::new(),
            stats: AmplifierStats::default(),
        }
    }

    pub fn boundary(&self) -> Boundary {
        self.boundary
    }

    pub fn amplification_factor(&self) -> f64 {
        self.amplification_factor
    }

    pub fn stats(&self) -> AmplifierStats {
        self.stats
    }

    pub fn snapshot(&self) -> AmplifierSnapshot {
        AmplifierSnapshot {
            boundary: self.boundary,
            amplification_factor: self.amplification_factor,
            threshold: self.threshold,
            buffered: self.buffer.len(),
            stats: self.stats,
        }
    }

    pub fn ingest(&mut self, directive: VarietyMessage) {
        self.stats.directives_received += 1;
        self.buffer.push(directive);
    }

    /// Number of variants a directive of this significance expands into
    pub fn variant_count(&self, significance: f64) -> usize {
        if significance >= self.threshold {
            (self.amplification_factor.round() as usize).max(1)
        } else {
            1
        }
    }

    /// Expand one directive
    ///
    /// Variant `i` of `n` cycles through temporal, contextual and parametric
    /// kinds and carries weight `1/n` plus the original payload.
    pub fn expand(&self, directive: &VarietyMessage) -> Vec<VarietyMessage> {
        let n = self.variant_count(directive.significance);
        let window_ms = self.window.as_millis() as u64;

        (0..n)
            .map(|i| {
                let kind = VariantKind::for_index(i);
                let mut payload = directive.payload.clone();
                payload.insert("variant".to_string(), json!(kind));
                payload.insert("variant_index".to_string(), json!(i));
                payload.insert("variant_count".to_string(), json!(n));
                payload.insert("weight".to_string(), json!(1.0 / n as f64));
                payload
                    .entry("directive_type".to_string())
                    .or_insert_with(|| Value::from(MessageType::Directive.as_str()));
                match kind {
                    VariantKind::Temporal => {
                        payload.insert("phase".to_string(), json!(i));
                        payload.insert("offset_ms".to_string(), json!(i as u64 * window_ms / n as u64));
                    }
                    VariantKind::Contextual => {
                        payload.insert(
                            "scope".to_string(),
                            json!(format!("{}/{}", directive.context, i)),
                        );
                    }
                    VariantKind::Parametric => {
                        payload.insert(
                            "intensity".to_string(),
                            json!(directive.significance * (n - i) as f64 / n as f64),
                        );
                    }
                }
                VarietyMessage::new(
                    MessageType::Directive,
                    directive.context.clone(),
                    directive.significance,
                )
                .with_urgency(directive.urgency)
                .with_payload(payload)
            })
            .collect()
    }

    /// Expand and drain every buffered directive
    pub fn tick(&mut self) -> Vec<VarietyMessage> {
        let directives = std::mem::take(&mut self.buffer);
        let mut variants = Vec::new();
        for directive in &directives {
            let expanded = self.expand(directive);
            if expanded.len() > 1 {
                self.stats.expanded += 1;
            } else {
                self.stats.passed_through += 1;
            }
            self.stats.variants_published += expanded.len() as u64;
            variants.extend(expanded);
        }
        variants
    }

    /// Set the factor, clamped to its bounds
    pub fn set_factor(&mut self, value: f64) {
        if value.is_nan() {
            debug!(boundary = %self.boundary, "Ignoring NaN amplification factor");
            return;
        }
        self.amplification_factor = value.clamp(MIN_AMPLIFICATION_FACTOR, MAX_AMPLIFICATION_FACTOR);
    }

    /// Multiply the factor, clamped to its bounds
    pub fn adjust_amplification(&mut self, magnitude: f64) {
        if !magnitude.is_finite() || magnitude <= 0.0 {
            debug!(boundary = %self.boundary, magnitude, "Ignoring invalid amplification magnitude");
            return;
        }
        self.amplification_factor = (self.amplification_factor * magnitude)
            .clamp(MIN_AMPLIFICATION_FACTOR, MAX_AMPLIFICATION_FACTOR);
    }

    /// Reduce the factor; never raises it
    pub fn dampen_oscillations(&mut self) {
        if self.amplification_factor > MIN_AMPLIFICATION_FACTOR {
            self.amplification_factor =
                (self.amplification_factor * DAMPEN_FACTOR).max(MIN_AMPLIFICATION_FACTOR);
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Map;

    use super::*;

    fn state() -> AmplifierState {
        AmplifierState::new(Boundary::S3ToS2, 0.5, Duration::from_millis(2000))
    }

    fn directive(significance: f64) -> VarietyMessage {
        let mut payload = Map::new();
        payload.insert("directive_type".to_string(), json!("reallocate"));
        payload.insert("target".to_string(), json!("pump-7"));
        VarietyMessage::new(MessageType::Directive, "plant", significance).with_payload(payload)
    }

    #[test]
    fn test_factor_stays_bounded() {
        let mut s = state();
        for m in [9.0, 9.0, 0.01, 0.01, 2.0, 100.0, 0.5] {
            s.adjust_amplification(m);
            let f = s.amplification_factor();
            assert!((MIN_AMPLIFICATION_FACTOR..=MAX_AMPLIFICATION_FACTOR).contains(&f));
        }
        s.set_factor(42.0);
        assert_eq!(s.amplification_factor(), MAX_AMPLIFICATION_FACTOR);
        s.set_factor(-1.0);
        assert_eq!(s.amplification_factor(), MIN_AMPLIFICATION_FACTOR);
    }

    #[test]
    fn test_dampen_never_increases() {
        let mut s = state();
        s.set_factor(3.0);
        let mut last = s.amplification_factor();
        for _ in 0..20 {
            s.dampen_oscillations();
            assert!(s.amplification_factor() <= last);
            last = s.amplification_factor();
        }
        assert_eq!(s.amplification_factor(), MIN_AMPLIFICATION_FACTOR);
    }

    #[test]
    fn test_variant_count_is_deterministic() {
        let mut s = state();
        s.set_factor(3.4);
        assert_eq!(s.variant_count(0.9), 3);
        assert_eq!(s.variant_count(0.9), 3);
        assert_eq!(s.variant_count(0.2), 1);
        s.set_factor(0.5);
        assert_eq!(s.variant_count(0.9), 1);
    }

    #[test]
    fn test_expansion_cycles_variant_kinds() {
        let mut s = state();
        s.set_factor(4.0);
        let variants = s.expand(&directive(0.8));
        assert_eq!(variants.len(), 4);

        let kinds: Vec<&str> = variants
            .iter()
            .map(|v| v.payload_str("variant").unwrap())
            .collect();
        assert_eq!(kinds, ["temporal", "contextual", "parametric", "temporal"]);

        let weights: f64 = variants
            .iter()
            .map(|v| v.payload["weight"].as_f64().unwrap())
            .sum();
        assert!((weights - 1.0).abs() < 1e-9);

        assert_eq!(variants[3].payload["offset_ms"], json!(1500));
        assert_eq!(variants[1].payload_str("scope"), Some("plant/1"));
        assert!((variants[2].payload["intensity"].as_f64().unwrap() - 0.4).abs() < 1e-9);
        for v in &variants {
            assert_eq!(v.payload_str("directive_type"), Some("reallocate"));
            assert_eq!(v.payload_str("target"), Some("pump-7"));
        }
    }

    #[test]
    fn test_tick_drains_buffer() {
        let mut s = state();
        s.set_factor(2.0);
        s.ingest(directive(0.9));
        s.ingest(directive(0.1));
        let variants = s.tick();
        assert_eq!(variants.len(), 3);
        let stats = s.stats();
        assert_eq!(stats.directives_received, 2);
        assert_eq!(stats.expanded, 1);
        assert_eq!(stats.passed_through, 1);
        assert_eq!(stats.variants_published, 3);
        assert!(s.tick().is_empty());
    }
}
