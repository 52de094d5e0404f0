//! Variety flow statistics
//!
//! Every boundary records each message it consumes and produces. Counters
//! are per-key atomics in a `DashMap`, so the hot path never takes a global
//! lock. Statistics are computed from the counters on read.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{Instrument, debug, info, info_span};

use variety_core::{Direction, Envelope, EnvelopeKind, Level, MessageBus, Topic};

use crate::config::MetricsConfig;
use crate::supervisor::tick_interval;

/// Entropy of the inbound and outbound type distributions, in bits
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EntropyStats {
    pub inbound: f64,
    pub outbound: f64,
    pub ratio: f64,
}

/// Message counts in each direction
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VolumeStats {
    pub input: u64,
    pub output: u64,
    pub ratio: f64,
}

/// Flow statistics for one level
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VarietyMetrics {
    pub level: Level,
    pub entropy: EntropyStats,
    pub volume: VolumeStats,
    /// Change in entropy ratio since the previous sampling window
    pub velocity: f64,
}

impl VarietyMetrics {
    /// Metrics of a level nothing has been recorded for
    pub fn identity(level: Level) -> Self {
        Self {
            level,
            entropy: EntropyStats {
                inbound: 0.0,
                outbound: 0.0,
                ratio: 1.0,
            },
            volume: VolumeStats {
                input: 0,
                output: 0,
                ratio: 1.0,
            },
            velocity: 0.0,
        }
    }
}

/// Shannon entropy in bits of a count distribution
pub fn shannon_entropy<I: IntoIterator<Item = u64>>(counts: I) -> f64 {
    let counts: Vec<u64> = counts.into_iter().filter(|c| *c > 0).collect();
    let total: u64 = counts.iter().sum();
    if total == 0 {
        return 0.0;
    }
    let total = total as f64;
    let h: f64 = counts
        .iter()
        .map(|&c| {
            let p = c as f64 / total;
            -p * p.log2()
        })
        .sum();
    // -0.0 for a single type
    h.max(0.0)
}

pub fn entropy_ratio(inbound: f64, outbound: f64) -> f64 {
    if inbound <= 0.0 && outbound <= 0.0 {
        1.0
    } else if inbound <= 0.0 {
        1.0 + outbound
    } else {
        outbound / inbound
    }
}

pub fn volume_ratio(input: u64, output: u64) -> f64 {
    match (input, output) {
        (0, 0) => 1.0,
        (0, out) => out as f64,
        (inp, out) => out as f64 / inp as f64,
    }
}

type CounterKey = (Level, Direction, String);

/// Thread-safe counters for all levels
pub struct MetricsCollector {
    counters: DashMap<CounterKey, AtomicU64>,
    /// Entropy ratio per level at the last window rotation
    previous_ratio: DashMap<Level, f64>,
    retain_fraction: f64,
    windows: AtomicU64,
}

impl MetricsCollector {
    pub fn new(retain_fraction: f64) -> Self {
        Self {
            counters: DashMap::new(),
            previous_ratio: DashMap::new(),
            retain_fraction: if retain_fraction.is_finite() {
                retain_fraction.clamp(0.0, 1.0)
            } else {
                1.0
            },
            windows: AtomicU64::new(0),
        }
    }

    pub fn record_message(&self, level: Level, direction: Direction, message_type: &str) {
        self.record_many(level, direction, message_type, 1);
    }

    pub fn record_many(&self, level: Level, direction: Direction, message_type: &str, count: u64) {
        if count == 0 {
            return;
        }
        let key = (level, direction, message_type.to_string());
        // Fast path: existing key under a shared shard lock
        if let Some(counter) = self.counters.get(&key) {
            counter.fetch_add(count, Ordering::Relaxed);
            return;
        }
        self.counters
            .entry(key)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(count, Ordering::Relaxed);
    }

    fn distributions(&self) -> HashMap<(Level, Direction), Vec<u64>> {
        let mut dist: HashMap<(Level, Direction), Vec<u64>> = HashMap::new();
        for entry in self.counters.iter() {
            let (level, direction, _) = entry.key();
            let count = entry.value().load(Ordering::Relaxed);
            dist.entry((*level, *direction)).or_default().push(count);
        }
        dist
    }

    fn compute(&self, level: Level, dist: &HashMap<(Level, Direction), Vec<u64>>) -> VarietyMetrics {
        let inbound = dist.get(&(level, Direction::Inbound));
        let outbound = dist.get(&(level, Direction::Outbound));
        if inbound.is_none() && outbound.is_none() {
            let mut metrics = VarietyMetrics::identity(level);
            if let Some(prev) = self.previous_ratio.get(&level) {
                metrics.velocity = 1.0 - *prev;
            }
            return metrics;
        }

        let counts = |d: Option<&Vec<u64>>| d.map(|v| v.clone()).unwrap_or_default();
        let inbound = counts(inbound);
        let outbound = counts(outbound);
        let h_in = shannon_entropy(inbound.iter().copied());
        let h_out = shannon_entropy(outbound.iter().copied());
        let ratio = entropy_ratio(h_in, h_out);
        let input: u64 = inbound.iter().sum();
        let output: u64 = outbound.iter().sum();

        let velocity = self
            .previous_ratio
            .get(&level)
            .map(|prev| ratio - *prev)
            .unwrap_or(0.0);

        VarietyMetrics {
            level,
            entropy: EntropyStats {
                inbound: h_in,
                outbound: h_out,
                ratio,
            },
            volume: VolumeStats {
                input,
                output,
                ratio: volume_ratio(input, output),
            },
            velocity,
        }
    }

    pub fn get_metrics(&self, level: Level) -> VarietyMetrics {
        self.compute(level, &self.distributions())
    }

    /// Metrics for all five levels
    pub fn get_all_metrics(&self) -> BTreeMap<Level, VarietyMetrics> {
        let dist = self.distributions();
        Level::ALL
            .into_iter()
            .map(|level| (level, self.compute(level, &dist)))
            .collect()
    }

    /// Close the current sampling window
    ///
    /// Returns the metrics as they stood at the end of the window. Their
    /// entropy ratios become the baseline for the next window's velocity and
    /// every counter decays by the retain fraction.
    pub fn rotate_window(&self) -> BTreeMap<Level, VarietyMetrics> {
        let snapshot = self.get_all_metrics();
        for (level, metrics) in &snapshot {
            self.previous_ratio.insert(*level, metrics.entropy.ratio);
        }

        if self.retain_fraction < 1.0 {
            for entry in self.counters.iter() {
                let current = entry.value().load(Ordering::Relaxed);
                decay(entry.value(), current, self.retain_fraction);
            }
            self.counters.retain(|_, v| v.load(Ordering::Relaxed) > 0);
        }

        self.windows.fetch_add(1, Ordering::Relaxed);
        snapshot
    }

    /// Number of windows closed so far
    pub fn windows_closed(&self) -> u64 {
        self.windows.load(Ordering::Relaxed)
    }

    /// Clear all counters and window history
    pub fn reset(&self) {
        self.counters.clear();
        self.previous_ratio.clear();
    }
}

/// Take the decayed share of `observed` off a counter
///
/// Subtracting rather than storing keeps increments that land after the
/// counter was read.
fn decay(counter: &AtomicU64, observed: u64, retain_fraction: f64) {
    let kept = (observed as f64 * retain_fraction).floor() as u64;
    counter.fetch_sub(observed.saturating_sub(kept), Ordering::Relaxed);
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new(MetricsConfig::default().retain_fraction)
    }
}

impl std::fmt::Debug for MetricsCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsCollector")
            .field("counters", &self.counters.len())
            .field("retain_fraction", &self.retain_fraction)
            .field("windows", &self.windows_closed())
            .finish()
    }
}

/// Payload of a `metrics-update` envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsUpdate {
    pub window: u64,
    pub levels: Vec<VarietyMetrics>,
}

impl MetricsUpdate {
    pub fn to_envelope(&self) -> Envelope {
        Envelope::from_serializable(EnvelopeKind::MetricsUpdate, self)
    }
}

/// Commands accepted by the metrics sampler
#[derive(Debug)]
pub enum SamplerCommand {
    /// Close the window now and reply with its metrics
    Rotate(oneshot::Sender<BTreeMap<Level, VarietyMetrics>>),
    /// Panic inside the actor (restart testing)
    InjectFault,
}

/// Actor that closes sampling windows on a timer
pub(crate) struct MetricsSampler {
    collector: Arc<MetricsCollector>,
    bus: Arc<dyn MessageBus>,
    window: Duration,
    commands: mpsc::Receiver<SamplerCommand>,
    shutdown_rx: broadcast::Receiver<()>,
}

impl MetricsSampler {
    pub(crate) fn new(
        collector: Arc<MetricsCollector>,
        bus: Arc<dyn MessageBus>,
        window: Duration,
        commands: mpsc::Receiver<SamplerCommand>,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            collector,
            bus,
            window,
            commands,
            shutdown_rx,
        }
    }

    pub(crate) async fn run(self) {
        let span = info_span!("metrics_sampler", window_ms = self.window.as_millis() as u64);
        self.run_inner().instrument(span).await
    }

    async fn run_inner(mut self) {
        info!("Metrics sampler started");
        let mut ticker = tick_interval(self.window);

        loop {
            tokio::select! {
                _ = self.shutdown_rx.recv() => {
                    info!("Metrics sampler shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    self.rotate();
                }
                command = self.commands.recv() => match command {
                    Some(SamplerCommand::Rotate(reply)) => {
                        let snapshot = self.rotate();
                        let _ = reply.send(snapshot);
                    }
                    Some(SamplerCommand::InjectFault) => panic!("injected fault in metrics sampler"),
                    None => break,
                },
            }
        }
    }

    fn rotate(&self) -> BTreeMap<Level, VarietyMetrics> {
        let snapshot = self.collector.rotate_window();
        let update = MetricsUpdate {
            window: self.collector.windows_closed(),
            levels: snapshot.values().copied().collect(),
        };
        let reached = self.bus.publish(&Topic::metrics(), update.to_envelope());
        debug!(window = update.window, reached, "Published metrics update");
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_shannon_entropy() {
        assert_eq!(shannon_entropy(Vec::<u64>::new()), 0.0);
        assert_eq!(shannon_entropy([7]), 0.0);
        assert!(approx(shannon_entropy([5, 5]), 1.0));
        assert!(approx(shannon_entropy([50, 25, 25]), 1.5));
    }

    #[test]
    fn test_ratio_edge_cases() {
        assert_eq!(entropy_ratio(0.0, 0.0), 1.0);
        assert_eq!(entropy_ratio(0.0, 1.5), 2.5);
        assert_eq!(entropy_ratio(2.0, 1.0), 0.5);
        assert_eq!(volume_ratio(0, 0), 1.0);
        assert_eq!(volume_ratio(0, 4), 4.0);
        assert_eq!(volume_ratio(100, 160), 1.6);
    }

    #[test]
    fn test_identity_defaults_for_empty_levels() {
        let collector = MetricsCollector::default();
        let all = collector.get_all_metrics();
        assert_eq!(all.len(), 5);
        for (level, metrics) in all {
            assert_eq!(metrics, VarietyMetrics::identity(level));
        }
    }

    #[test]
    fn test_entropy_identity_for_identical_distributions() {
        let collector = MetricsCollector::default();
        for (t, n) in [("a", 4), ("b", 2), ("c", 2)] {
            collector.record_many(Level::S2, Direction::Inbound, t, n);
            collector.record_many(Level::S2, Direction::Outbound, t, n);
        }
        let metrics = collector.get_metrics(Level::S2);
        assert!(approx(metrics.entropy.ratio, 1.0));
        assert_eq!(metrics.volume.input, 8);
        assert_eq!(metrics.volume.output, 8);
    }

    #[test]
    fn test_volume_overload_counts() {
        let collector = MetricsCollector::default();
        collector.record_many(Level::S3, Direction::Inbound, "resource-need", 100);
        collector.record_many(Level::S3, Direction::Outbound, "resource-need", 160);
        let metrics = collector.get_metrics(Level::S3);
        assert!(approx(metrics.volume.ratio, 1.6));
        assert!(approx(metrics.entropy.ratio, 1.0));
    }

    #[test]
    fn test_velocity_across_windows() {
        let collector = MetricsCollector::new(1.0);
        collector.record_many(Level::S1, Direction::Inbound, "a", 2);
        collector.record_many(Level::S1, Direction::Inbound, "b", 2);
        collector.record_many(Level::S1, Direction::Outbound, "a", 2);
        collector.record_many(Level::S1, Direction::Outbound, "b", 2);
        assert_eq!(collector.get_metrics(Level::S1).velocity, 0.0);

        collector.rotate_window();
        // Outbound collapses towards a single type
        collector.record_many(Level::S1, Direction::Outbound, "a", 60);
        let metrics = collector.get_metrics(Level::S1);
        assert!(metrics.velocity < -0.5);
        assert!(approx(metrics.velocity, metrics.entropy.ratio - 1.0));
    }

    #[test]
    fn test_rotation_decays_counters() {
        let collector = MetricsCollector::new(0.5);
        collector.record_many(Level::S1, Direction::Inbound, "a", 10);
        collector.record_message(Level::S1, Direction::Outbound, "b");
        collector.rotate_window();

        let metrics = collector.get_metrics(Level::S1);
        assert_eq!(metrics.volume.input, 5);
        assert_eq!(metrics.volume.output, 0);
        assert_eq!(collector.windows_closed(), 1);
    }

    #[test]
    fn test_decay_keeps_increments_after_read() {
        let counter = AtomicU64::new(10);
        let observed = counter.load(Ordering::Relaxed);
        // Recorded between the read and the decay
        counter.fetch_add(3, Ordering::Relaxed);
        decay(&counter, observed, 0.5);
        assert_eq!(counter.load(Ordering::Relaxed), 8);

        decay(&counter, 8, 1.5);
        assert_eq!(counter.load(Ordering::Relaxed), 8);
    }

    #[test]
    fn test_reset_clears_everything() {
        let collector = MetricsCollector::default();
        collector.record_many(Level::S4, Direction::Inbound, "trend", 3);
        collector.rotate_window();
        collector.reset();
        assert_eq!(collector.get_metrics(Level::S4), VarietyMetrics::identity(Level::S4));
    }

    #[test]
    fn test_concurrent_recording() {
        let collector = Arc::new(MetricsCollector::default());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let collector = Arc::clone(&collector);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        collector.record_message(Level::S1, Direction::Inbound, "tick");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(collector.get_metrics(Level::S1).volume.input, 8000);
    }

    #[tokio::test]
    async fn test_sampler_publishes_updates() {
        let bus: Arc<dyn MessageBus> = Arc::new(variety_core::LocalBus::new());
        let mut updates = bus.subscribe(&Topic::metrics());
        let collector = Arc::new(MetricsCollector::new(1.0));
        collector.record_message(Level::S2, Direction::Inbound, "pattern");

        let (tx, rx) = mpsc::channel(4);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let sampler = MetricsSampler::new(
            collector.clone(),
            bus.clone(),
            Duration::from_secs(3600),
            rx,
            shutdown_rx,
        );
        let task = tokio::spawn(sampler.run());

        let (reply_tx, reply_rx) = oneshot::channel();
        tx.send(SamplerCommand::Rotate(reply_tx)).await.unwrap();
        let snapshot = reply_rx.await.unwrap();
        assert_eq!(snapshot[&Level::S2].volume.input, 1);

        let envelope = updates.recv().await.unwrap();
        assert_eq!(envelope.kind, EnvelopeKind::MetricsUpdate);
        let update: MetricsUpdate = envelope.decode().unwrap();
        assert_eq!(update.window, 1);
        assert_eq!(update.levels.len(), 5);

        shutdown_tx.send(()).unwrap();
        task.await.unwrap();
    }
}
