//! The variety engine coordinator
//!
//! [`VarietyEngine`] starts one filter per upward boundary, one amplifier
//! per downward boundary, the metrics sampler and the balance monitor, each
//! under its own supervisor, and is the single entry point operators and
//! hierarchy levels use to inspect and tune them.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

use variety_core::{Boundary, EscalationRegistry, Event, Level, LevelEscalation, MessageBus, Topic};

use crate::amplifier::{AmplifierActor, AmplifierHandle, AmplifierSnapshot};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::filter::{FilterActor, FilterHandle, FilterSnapshot};
use crate::mailbox::Mailbox;
use crate::metrics::{MetricsCollector, MetricsSampler, SamplerCommand, VarietyMetrics};
use crate::monitor::{BalanceMonitor, BalanceReport, MonitorHandle};
use crate::registry::{BoundaryRegistry, amplifier_boundary, filter_boundary};
use crate::supervisor::Supervisor;

/// Handles to the running components of one `start()`
struct Runtime {
    registry: Arc<BoundaryRegistry>,
    monitor: MonitorHandle,
    sampler: Mailbox<SamplerCommand>,
    supervisor: Supervisor,
}

/// Self-adjusting variety layer for a five-level hierarchy
///
/// Create with [`new`](Self::new), register escalation entry points with
/// [`with_escalation`](Self::with_escalation), then [`start`](Self::start).
pub struct VarietyEngine {
    config: EngineConfig,
    bus: Arc<dyn MessageBus>,
    metrics: Arc<MetricsCollector>,
    escalation: EscalationRegistry,
    shutdown_tx: broadcast::Sender<()>,
    runtime: RwLock<Option<Arc<Runtime>>>,
    started: AtomicBool,
}

impl VarietyEngine {
    pub fn new(config: EngineConfig, bus: Arc<dyn MessageBus>) -> Self {
        for warning in config.validate() {
            warn!(%warning, "Engine configuration warning");
        }
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            metrics: Arc::new(MetricsCollector::new(config.metrics.retain_fraction)),
            escalation: EscalationRegistry::new(config.escalation_timeout),
            config,
            bus,
            shutdown_tx,
            runtime: RwLock::new(None),
            started: AtomicBool::new(false),
        }
    }

    /// Register the escalation entry point of a hierarchy level
    ///
    /// Filters capture the registry when they start, so targets registered
    /// after [`start`](Self::start) are only seen after a restart.
    pub fn with_escalation(mut self, level: Level, target: Arc<dyn LevelEscalation>) -> Self {
        self.escalation.register(level, target);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn bus(&self) -> Arc<dyn MessageBus> {
        Arc::clone(&self.bus)
    }

    pub fn metrics(&self) -> Arc<MetricsCollector> {
        Arc::clone(&self.metrics)
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Start every component
    ///
    /// Bus subscriptions are in place when this returns.
    #[instrument(skip(self))]
    pub fn start(&self) -> EngineResult<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(EngineError::AlreadyStarted);
        }

        let capacity = self.config.command_channel_capacity;
        let supervisor = Supervisor::new(self.config.supervisor.clone(), self.shutdown_tx.clone());

        // Handles first, so the monitor's sink can reach every boundary
        let mut registry = BoundaryRegistry::new();
        let mut filter_mailboxes = Vec::new();
        for boundary in Boundary::FILTERS {
            let (mailbox, _) = Mailbox::new(format!("filter:{boundary}"), capacity);
            registry.insert_filter(FilterHandle::new(boundary, mailbox.clone()));
            filter_mailboxes.push((boundary, mailbox));
        }
        let mut amplifier_mailboxes = Vec::new();
        for boundary in Boundary::AMPLIFIERS {
            let (mailbox, _) = Mailbox::new(format!("amplifier:{boundary}"), capacity);
            registry.insert_amplifier(AmplifierHandle::new(boundary, mailbox.clone()));
            amplifier_mailboxes.push((boundary, mailbox));
        }
        let registry = Arc::new(registry);

        for (boundary, mailbox) in filter_mailboxes {
            let config = self.config.filter(boundary);
            let bus = Arc::clone(&self.bus);
            let metrics = Arc::clone(&self.metrics);
            let escalation = self.escalation.clone();
            supervisor.supervise(mailbox.name().to_string(), move |shutdown_rx| {
                FilterActor::new(
                    boundary,
                    &config,
                    Arc::clone(&bus),
                    Arc::clone(&metrics),
                    escalation.clone(),
                    mailbox.reopen(),
                    shutdown_rx,
                )
                .run()
            });
        }

        for (boundary, mailbox) in amplifier_mailboxes {
            let config = self.config.amplifier(boundary);
            let bus = Arc::clone(&self.bus);
            let metrics = Arc::clone(&self.metrics);
            supervisor.supervise(mailbox.name().to_string(), move |shutdown_rx| {
                AmplifierActor::new(
                    boundary,
                    &config,
                    Arc::clone(&bus),
                    Arc::clone(&metrics),
                    mailbox.reopen(),
                    shutdown_rx,
                )
                .run()
            });
        }

        let (sampler, _) = Mailbox::new("metrics_sampler", capacity);
        {
            let mailbox = sampler.clone();
            let collector = Arc::clone(&self.metrics);
            let bus = Arc::clone(&self.bus);
            let window = self.config.metrics.sample_window;
            let first = AtomicBool::new(true);
            supervisor.supervise("metrics_sampler", move |shutdown_rx| {
                if !first.swap(false, Ordering::SeqCst) {
                    // A restarted collector starts from empty counters
                    collector.reset();
                }
                MetricsSampler::new(
                    Arc::clone(&collector),
                    Arc::clone(&bus),
                    window,
                    mailbox.reopen(),
                    shutdown_rx,
                )
                .run()
            });
        }

        let (monitor_mailbox, _) = Mailbox::new("balance_monitor", capacity);
        {
            let mailbox = monitor_mailbox.clone();
            let config = self.config.monitor.clone();
            let collector = Arc::clone(&self.metrics);
            let bus = Arc::clone(&self.bus);
            let sink = Arc::clone(&registry);
            supervisor.supervise("balance_monitor", move |shutdown_rx| {
                BalanceMonitor::new(
                    config.clone(),
                    Arc::clone(&collector),
                    Arc::clone(&bus),
                    sink.clone(),
                    mailbox.reopen(),
                    shutdown_rx,
                )
                .run()
            });
        }

        *self.runtime.write() = Some(Arc::new(Runtime {
            registry,
            monitor: MonitorHandle::new(monitor_mailbox),
            sampler,
            supervisor,
        }));

        info!(
            filters = Boundary::FILTERS.len(),
            amplifiers = Boundary::AMPLIFIERS.len(),
            "Variety engine started"
        );
        Ok(())
    }

    /// Stop every component and wait for them to finish
    ///
    /// Metric counters are cleared, so a later `start()` measures afresh.
    #[instrument(skip(self))]
    pub async fn stop(&self) -> EngineResult<()> {
        if !self.started.load(Ordering::SeqCst) {
            return Ok(());
        }
        let runtime = self.runtime.write().take();
        if let Some(runtime) = runtime {
            runtime.supervisor.shutdown().await;
        }
        // The next start measures from empty counters
        self.metrics.reset();
        self.started.store(false, Ordering::SeqCst);
        info!("Variety engine stopped");
        Ok(())
    }

    fn runtime(&self) -> EngineResult<Arc<Runtime>> {
        self.runtime
            .read()
            .as_ref()
            .map(Arc::clone)
            .ok_or(EngineError::NotStarted)
    }

    /// Current metrics for every level
    pub fn get_variety_metrics(&self) -> BTreeMap<Level, VarietyMetrics> {
        self.metrics.get_all_metrics()
    }

    /// Latest balance report from the monitor
    pub async fn get_balance_status(&self) -> EngineResult<BalanceReport> {
        Ok(self.runtime()?.monitor.status().await?)
    }

    /// Evaluate balance now instead of waiting for the next check
    pub async fn force_balance_check(&self) -> EngineResult<BalanceReport> {
        Ok(self.runtime()?.monitor.check().await?)
    }

    /// Close the current sampling window now
    pub async fn rotate_metrics(&self) -> EngineResult<BTreeMap<Level, VarietyMetrics>> {
        Ok(self.runtime()?.sampler.request(SamplerCommand::Rotate).await?)
    }

    /// Set a filter's base threshold, e.g. `adjust_filter_threshold("s1_to_s2", 0.6)`
    pub async fn adjust_filter_threshold(&self, boundary: &str, value: f64) -> EngineResult<()> {
        let handle = self.filter(boundary)?;
        handle.set_threshold(value).await?;
        debug!(boundary = %handle.boundary(), value, "Filter threshold adjusted");
        Ok(())
    }

    /// Set an amplifier's factor, e.g. `adjust_amplification_factor("s5_to_s4", 2.0)`
    pub async fn adjust_amplification_factor(&self, boundary: &str, value: f64) -> EngineResult<()> {
        let handle = self.amplifier(boundary)?;
        handle.set_factor(value).await?;
        debug!(boundary = %handle.boundary(), value, "Amplification factor adjusted");
        Ok(())
    }

    pub async fn filter_state(&self, boundary: &str) -> EngineResult<FilterSnapshot> {
        Ok(self.filter(boundary)?.snapshot().await?)
    }

    pub async fn amplifier_state(&self, boundary: &str) -> EngineResult<AmplifierSnapshot> {
        Ok(self.amplifier(boundary)?.snapshot().await?)
    }

    /// Handle for a filter; the identifier is checked before the engine state
    pub fn filter(&self, boundary: &str) -> EngineResult<FilterHandle> {
        filter_boundary(boundary)?;
        let runtime = self.runtime()?;
        Ok(runtime.registry.resolve_filter(boundary)?.clone())
    }

    /// Handle for an amplifier; the identifier is checked before the engine state
    pub fn amplifier(&self, boundary: &str) -> EngineResult<AmplifierHandle> {
        amplifier_boundary(boundary)?;
        let runtime = self.runtime()?;
        Ok(runtime.registry.resolve_amplifier(boundary)?.clone())
    }

    /// Publish an event as `level` would; returns the subscribers reached
    pub fn publish_event(&self, level: Level, event: Event) -> usize {
        self.bus.publish(&Topic::level(level), event.to_envelope())
    }

    /// Tick every filter bottom-up, then every amplifier top-down
    ///
    /// Returns the number of messages published.
    pub async fn flush(&self) -> EngineResult<usize> {
        let runtime = self.runtime()?;
        let mut published = 0;
        for filter in runtime.registry.filters() {
            published += filter.tick().await?;
        }
        for amplifier in runtime.registry.amplifiers() {
            published += amplifier.tick().await?;
        }
        Ok(published)
    }

    /// Restarts per component since the last `start()`
    pub fn restart_counts(&self) -> BTreeMap<String, u32> {
        self.runtime
            .read()
            .as_ref()
            .map(|r| r.supervisor.restart_counts())
            .unwrap_or_default()
    }

    #[doc(hidden)]
    pub fn inject_fault(&self, component: &str) -> EngineResult<()> {
        let runtime = self.runtime()?;
        match component {
            "balance_monitor" => runtime.monitor.inject_fault()?,
            "metrics_sampler" => runtime.sampler.try_send(SamplerCommand::InjectFault)?,
            other => match other.parse::<Boundary>()? {
                b if b.is_filter() => runtime.registry.resolve_filter(other)?.inject_fault()?,
                _ => runtime.registry.resolve_amplifier(other)?.inject_fault()?,
            },
        }
        Ok(())
    }
}

impl std::fmt::Debug for VarietyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VarietyEngine")
            .field("started", &self.is_started())
            .field("metrics", &self.metrics)
            .finish()
    }
}

impl Drop for VarietyEngine {
    fn drop(&mut self) {
        if self.is_started() {
            // Actors exit on their own once the signal arrives
            let _ = self.shutdown_tx.send(());
        }
    }
}
