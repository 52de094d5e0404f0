//! Event aggregation for the lowest boundary
//!
//! Pure functions over a context bucket of timestamped events. The actor
//! decides when to call them; time is always passed in.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;

use variety_core::{Event, MAX_SAMPLE_EVENTS, Pattern, PatternType, Urgency};

/// Events within this age count as recent
pub const RECENCY_HORIZON: Duration = Duration::from_millis(2000);

/// Span an event burst is measured over
pub const OSCILLATION_SPAN: Duration = Duration::from_millis(1000);

/// A burst is more than this many events within one span
pub const OSCILLATION_BURST: usize = 10;

const FREQUENCY_WEIGHT: f64 = 0.7;
const RECENCY_WEIGHT: f64 = 0.3;

/// Patterns kept per context at filtering level 1.0
const BASE_PATTERN_CAP: f64 = 10.0;

/// Classify a group of same-typed events (first match wins)
pub fn classify(event_type: &str, timestamps: &[Instant]) -> PatternType {
    match event_type {
        "error" | "failure" | "exception" => PatternType::Anomaly,
        "resource_request" | "allocation" => PatternType::Resource,
        "sync_required" | "coordination" => PatternType::Coordination,
        _ if is_burst(timestamps) => PatternType::Oscillation,
        _ => PatternType::Operational,
    }
}

/// More than [`OSCILLATION_BURST`] events inside any [`OSCILLATION_SPAN`]
pub fn is_burst(timestamps: &[Instant]) -> bool {
    if timestamps.len() <= OSCILLATION_BURST {
        return false;
    }
    let mut sorted = timestamps.to_vec();
    sorted.sort();
    let mut start = 0;
    for end in 0..sorted.len() {
        while sorted[end].duration_since(sorted[start]) >= OSCILLATION_SPAN {
            start += 1;
        }
        if end - start + 1 > OSCILLATION_BURST {
            return true;
        }
    }
    false
}

/// Fraction of timestamps within [`RECENCY_HORIZON`] of `now`
pub fn recency_weight(timestamps: &[Instant], now: Instant) -> f64 {
    if timestamps.is_empty() {
        return 0.0;
    }
    let recent = timestamps
        .iter()
        .filter(|t| now.saturating_duration_since(**t) <= RECENCY_HORIZON)
        .count();
    recent as f64 / timestamps.len() as f64
}

pub fn significance(frequency: f64, recency: f64) -> f64 {
    FREQUENCY_WEIGHT * frequency + RECENCY_WEIGHT * recency
}

/// Maximum patterns published per context at a filtering level
pub fn pattern_cap(filtering_level: f64) -> usize {
    (BASE_PATTERN_CAP / filtering_level).round() as usize
}

/// Group a context bucket by event type and build every candidate pattern
///
/// A group is a candidate when its share of the bucket reaches `threshold`.
pub fn candidate_patterns(
    context: &str,
    events: &[(Instant, Event)],
    threshold: f64,
    now: Instant,
) -> Vec<Pattern> {
    if events.is_empty() {
        return Vec::new();
    }

    let mut groups: BTreeMap<&str, Vec<&(Instant, Event)>> = BTreeMap::new();
    for entry in events {
        groups.entry(entry.1.event_type.as_str()).or_default().push(entry);
    }

    let total = events.len() as f64;
    groups
        .into_iter()
        .filter_map(|(event_type, group)| {
            let frequency = group.len() as f64 / total;
            if frequency < threshold {
                return None;
            }
            let timestamps: Vec<Instant> = group.iter().map(|(t, _)| *t).collect();
            let significance = significance(frequency, recency_weight(&timestamps, now));
            Some(Pattern {
                context: context.to_string(),
                pattern_type: classify(event_type, &timestamps),
                event_type: event_type.to_string(),
                event_count: group.len(),
                significance,
                urgency: Urgency::from_score(significance),
                sample_events: group
                    .iter()
                    .take(MAX_SAMPLE_EVENTS)
                    .map(|(_, e)| e.clone())
                    .collect(),
                timestamp: Utc::now(),
            })
        })
        .collect()
}

/// Load-based filtering of candidates
///
/// Keeps candidates with significance at or above `0.5 × filtering_level`,
/// most significant first, capped at [`pattern_cap`].
pub fn select_patterns(mut candidates: Vec<Pattern>, filtering_level: f64) -> Vec<Pattern> {
    let floor = 0.5 * filtering_level;
    candidates.retain(|p| p.significance >= floor);
    candidates.sort_by(|a, b| {
        b.significance
            .total_cmp(&a.significance)
            .then_with(|| a.event_type.cmp(&b.event_type))
    });
    candidates.truncate(pattern_cap(filtering_level));
    candidates
}
