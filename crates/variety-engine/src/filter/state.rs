//! Per-boundary filter state

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::debug;

use variety_core::{Boundary, Event, Pattern, VarietyMessage};

use super::aggregate::{candidate_patterns, select_patterns};
use super::transform::MessageTransform;

/// Hard lower bound on `filtering_level`
pub const MIN_FILTERING_LEVEL: f64 = 0.5;
/// Hard upper bound on `filtering_level`
pub const MAX_FILTERING_LEVEL: f64 = 3.0;
/// Ceiling for routine pressure relief
pub const ROUTINE_FILTERING_CEILING: f64 = 2.0;
/// Ceiling when breaking oscillations
pub const DAMPEN_FILTERING_CEILING: f64 = 2.5;
/// Ceiling on the threshold when breaking oscillations
pub const DAMPEN_THRESHOLD_CEILING: f64 = 0.9;
pub const FILTERING_STEP: f64 = 1.2;
pub const THRESHOLD_STEP: f64 = 1.1;
/// Smallest threshold a setter accepts
pub const MIN_THRESHOLD: f64 = 0.01;

/// Running counters of a filter
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterStats {
    pub events_received: u64,
    pub forwarded: u64,
    pub filtered: u64,
    pub escalations: u64,
    pub escalation_failures: u64,
}

impl FilterStats {
    /// Share of received events that produced output
    pub fn ratio(&self) -> f64 {
        if self.events_received == 0 {
            0.0
        } else {
            self.forwarded as f64 / self.events_received as f64
        }
    }
}

/// Point-in-time view of a filter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterSnapshot {
    pub boundary: Boundary,
    pub filtering_level: f64,
    pub threshold: f64,
    pub buffered: usize,
    pub stats: FilterStats,
    pub ratio: f64,
}

/// Result of handing one message to a transforming filter
#[derive(Debug, Clone)]
pub struct TransformOutcome {
    /// The downstream message, present when the relevance gate passed
    pub forward: Option<VarietyMessage>,
    /// Message to escalate directly, independent of the gate
    pub escalate: Option<VarietyMessage>,
    pub relevance: f64,
}

/// Mutable state owned by one filter actor
#[derive(Debug)]
pub struct FilterState {
    boundary: Boundary,
    filtering_level: f64,
    threshold: f64,
    window: Duration,
    buffer: HashMap<String, Vec<(Instant, Event)>>,
    stats: FilterStats,
}

impl FilterState {
    pub fn new(boundary: Boundary, threshold: f64, window: Duration) -> Self {
        Self {
            boundary,
            filtering_level: 1.0,
            threshold: clamp_threshold(threshold),
            window,
            buffer: HashMap::new(),
            stats: FilterStats::default(),
        }
    }

    pub fn boundary(&self) -> Boundary {
        self.boundary
    }

    pub fn filtering_level(&self) -> f64 {
        self.filtering_level
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn stats(&self) -> FilterStats {
        self.stats
    }

    pub fn buffered(&self) -> usize {
        self.buffer.values().map(Vec::len).sum()
    }

    pub fn snapshot(&self) -> FilterSnapshot {
        FilterSnapshot {
            boundary: self.boundary,
            filtering_level: self.filtering_level,
            threshold: self.threshold,
            buffered: self.buffered(),
            stats: self.stats,
            ratio: self.stats.ratio(),
        }
    }

    /// Buffer a raw event under its context
    pub fn ingest(&mut self, event: Event, now: Instant) {
        self.stats.events_received += 1;
        self.buffer
            .entry(event.context.clone())
            .or_default()
            .push((now, event));
    }

    /// Aggregate every context bucket and drain the buffer
    ///
    /// Returns the surviving patterns, at most `round(10 / filtering_level)`
    /// per context, ordered by context then significance.
    pub fn tick(&mut self, now: Instant) -> Vec<Pattern> {
        self.prune(now);

        let mut contexts: Vec<String> = self.buffer.keys().cloned().collect();
        contexts.sort();

        let mut published = Vec::new();
        for context in contexts {
            let Some(events) = self.buffer.remove(&context) else {
                continue;
            };
            let candidates = candidate_patterns(&context, &events, self.threshold, now);
            let selected = select_patterns(candidates, self.filtering_level);

            let covered: usize = selected.iter().map(|p| p.event_count).sum();
            self.stats.filtered += (events.len() - covered) as u64;
            self.stats.forwarded += selected.len() as u64;
            published.extend(selected);
        }
        published
    }

    /// Drop buffered events older than the aggregation window
    fn prune(&mut self, now: Instant) {
        let window = self.window;
        let mut dropped = 0u64;
        self.buffer.retain(|_, events| {
            let before = events.len();
            events.retain(|(t, _)| now.saturating_duration_since(*t) < window);
            dropped += (before - events.len()) as u64;
            !events.is_empty()
        });
        if dropped > 0 {
            self.stats.filtered += dropped;
            debug!(boundary = %self.boundary, dropped, "Pruned stale events");
        }
    }

    /// Gate and transform a single upstream message
    pub fn transform(
        &mut self,
        transform: &dyn MessageTransform,
        message: &VarietyMessage,
    ) -> TransformOutcome {
        self.stats.events_received += 1;
        let relevance = transform.relevance(message);
        let passes = relevance >= self.threshold * self.filtering_level;
        let escalates = transform.escalates(message);

        let output = (passes || escalates).then(|| transform.transform(message, relevance));
        if passes {
            self.stats.forwarded += 1;
        } else {
            self.stats.filtered += 1;
        }

        let escalate = if escalates { output.clone() } else { None };
        TransformOutcome {
            forward: if passes { output } else { None },
            escalate,
            relevance,
        }
    }

    pub fn record_escalation(&mut self, succeeded: bool) {
        self.stats.escalations += 1;
        if !succeeded {
            self.stats.escalation_failures += 1;
        }
    }

    /// Set the threshold, clamped to `[MIN_THRESHOLD, 1.0]`
    pub fn set_threshold(&mut self, value: f64) {
        if value.is_nan() {
            debug!(boundary = %self.boundary, "Ignoring NaN threshold");
            return;
        }
        self.threshold = clamp_threshold(value);
    }

    /// Multiply the filtering level, clamped to the hard bounds
    pub fn adjust_filtering(&mut self, magnitude: f64) {
        if !magnitude.is_finite() || magnitude <= 0.0 {
            debug!(boundary = %self.boundary, magnitude, "Ignoring invalid filtering magnitude");
            return;
        }
        self.filtering_level =
            (self.filtering_level * magnitude).clamp(MIN_FILTERING_LEVEL, MAX_FILTERING_LEVEL);
    }

    /// Routine pressure relief; never lowers the level
    pub fn increase_filtering(&mut self) {
        self.filtering_level = raise_towards(self.filtering_level, FILTERING_STEP, ROUTINE_FILTERING_CEILING);
    }

    /// Break a feedback loop by filtering harder and raising the threshold
    pub fn dampen_oscillations(&mut self) {
        self.filtering_level = raise_towards(self.filtering_level, FILTERING_STEP, DAMPEN_FILTERING_CEILING);
        self.threshold = raise_towards(self.threshold, THRESHOLD_STEP, DAMPEN_THRESHOLD_CEILING);
    }
}

fn clamp_threshold(value: f64) -> f64 {
    if value.is_nan() {
        return 0.5;
    }
    value.clamp(MIN_THRESHOLD, 1.0)
}

/// Multiply by `step` without passing `ceiling`; values already above stay put
fn raise_towards(value: f64, step: f64, ceiling: f64) -> f64 {
    if value >= ceiling {
        value
    } else {
        (value * step).min(ceiling)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use variety_core::{MessageType, PatternType};

    use super::*;
    use crate::filter::transform::{PatternToResourceNeed, TrendToPolicy};

    fn state() -> FilterState {
        FilterState::new(Boundary::S1ToS2, 0.5, Duration::from_millis(5000))
    }

    #[test]
    fn test_adjust_filtering_stays_bounded() {
        let mut s = state();
        for m in [10.0, 0.01, 3.0, 0.3, 7.5, 1.0, 0.0001, 4.0] {
            s.adjust_filtering(m);
            assert!(s.filtering_level() >= MIN_FILTERING_LEVEL);
            assert!(s.filtering_level() <= MAX_FILTERING_LEVEL);
        }
        s.adjust_filtering(f64::NAN);
        s.adjust_filtering(-2.0);
        assert!(s.filtering_level() <= MAX_FILTERING_LEVEL);
    }

    #[test]
    fn test_increase_filtering_is_monotone_and_capped() {
        let mut s = state();
        let mut last = s.filtering_level();
        for _ in 0..20 {
            s.increase_filtering();
            assert!(s.filtering_level() >= last);
            assert!(s.filtering_level() <= ROUTINE_FILTERING_CEILING);
            last = s.filtering_level();
        }
        assert_eq!(s.filtering_level(), ROUTINE_FILTERING_CEILING);

        // Already above the routine ceiling: unchanged
        s.adjust_filtering(1.4);
        let high = s.filtering_level();
        s.increase_filtering();
        assert_eq!(s.filtering_level(), high);
    }

    #[test]
    fn test_dampen_oscillations_ceilings() {
        let mut s = state();
        for _ in 0..20 {
            s.dampen_oscillations();
        }
        assert_eq!(s.filtering_level(), DAMPEN_FILTERING_CEILING);
        assert_eq!(s.threshold(), DAMPEN_THRESHOLD_CEILING);

        s.set_threshold(0.95);
        s.dampen_oscillations();
        assert_eq!(s.threshold(), 0.95);
    }

    #[test]
    fn test_set_threshold_clamps() {
        let mut s = state();
        s.set_threshold(4.0);
        assert_eq!(s.threshold(), 1.0);
        s.set_threshold(-1.0);
        assert_eq!(s.threshold(), MIN_THRESHOLD);
        s.set_threshold(f64::NAN);
        assert_eq!(s.threshold(), MIN_THRESHOLD);
    }

    #[test]
    fn test_tick_drains_and_counts() {
        let mut s = FilterState::new(Boundary::S1ToS2, 0.7, Duration::from_millis(5000));
        let now = Instant::now();
        for _ in 0..20 {
            s.ingest(Event::new("error", "billing"), now);
        }
        s.ingest(Event::new("login", "web"), now);

        let patterns = s.tick(now);
        // the lone login is a full bucket on its own
        assert_eq!(patterns.len(), 2);
        assert_eq!(patterns[0].context, "billing");
        assert_eq!(patterns[0].pattern_type, PatternType::Anomaly);
        assert_eq!(s.buffered(), 0);
        assert_eq!(s.stats().events_received, 21);
        assert_eq!(s.stats().forwarded, 2);

        assert!(s.tick(now).is_empty());
    }

    #[test]
    fn test_stale_events_are_pruned_before_aggregation() {
        let mut s = state();
        let start = Instant::now();
        for _ in 0..5 {
            s.ingest(Event::new("error", "ops"), start);
        }
        let later = start + Duration::from_millis(6000);
        assert!(s.tick(later).is_empty());
        assert_eq!(s.stats().filtered, 5);
    }

    #[test]
    fn test_pattern_cap_per_context() {
        let mut s = FilterState::new(Boundary::S1ToS2, 0.01, Duration::from_millis(5000));
        s.adjust_filtering(0.5);
        let now = Instant::now();
        for i in 0..40 {
            s.ingest(Event::new(format!("kind-{}", i), "ctx"), now);
        }
        // 40 singleton groups; floor 0.25 keeps all, cap round(10 / 0.5)
        let patterns = s.tick(now);
        assert_eq!(patterns.len(), 20);
        assert_eq!(s.stats().filtered, 20);
    }

    #[test]
    fn test_transform_gate() {
        let mut s = FilterState::new(Boundary::S2ToS3, 0.5, Duration::from_millis(10_000));
        let t = PatternToResourceNeed;

        let strong = VarietyMessage::new(MessageType::Pattern, "a", 0.9).with_payload(
            json!({"pattern_type": "anomaly"}).as_object().cloned().unwrap(),
        );
        let outcome = s.transform(&t, &strong);
        assert!(outcome.forward.is_some());
        assert!(outcome.escalate.is_none());

        s.adjust_filtering(2.0);
        let weak = VarietyMessage::new(MessageType::Pattern, "a", 0.2).with_payload(
            json!({"pattern_type": "operational"}).as_object().cloned().unwrap(),
        );
        // 0.18 + 0.08 < 0.5 × 2.0
        assert!(s.transform(&t, &weak).forward.is_none());

        let stats = s.stats();
        assert_eq!(stats.events_received, 2);
        assert_eq!(stats.forwarded, 1);
        assert_eq!(stats.filtered, 1);
        assert_eq!(stats.ratio(), 0.5);
    }

    #[test]
    fn test_severe_trend_escalates_even_when_gated() {
        let mut s = FilterState::new(Boundary::S4ToS5, 1.0, Duration::from_millis(10_000));
        s.adjust_filtering(3.0);
        let trend = VarietyMessage::new(MessageType::Trend, "grid", 0.5).with_payload(
            json!({"severity": 0.95, "scope": "local", "viability_impact": 0.1})
                .as_object()
                .cloned()
                .unwrap(),
        );
        let outcome = s.transform(&TrendToPolicy, &trend);
        assert!(outcome.forward.is_none());
        let escalated = outcome.escalate.unwrap();
        assert_eq!(escalated.message_type, MessageType::PolicyConsideration);
    }
}
