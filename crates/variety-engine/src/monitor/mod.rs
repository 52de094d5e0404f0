//! Balance monitor
//!
//! Re-evaluates every level on its own timer and on each `metrics-update`
//! from the sampler, records alerts and hands corrections to an
//! [`AdjustmentSink`] without waiting on them.

pub mod balance;
pub mod state;

pub use balance::{
    Alert, BalanceState, BalanceStatus, adjustment_magnitude, classify, health, needs_rebalance,
};
pub use state::{BalanceReport, BalanceUpdate, Evaluation, MonitorState};

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{Instrument, debug, info, info_span, warn};

use variety_core::{Envelope, EnvelopeKind, Level, MessageBus, Topic, VarietyResult};

use crate::adjust::AdjustmentSink;
use crate::config::MonitorConfig;
use crate::mailbox::{Mailbox, next_envelope};
use crate::metrics::{MetricsCollector, MetricsUpdate, VarietyMetrics};
use crate::supervisor::tick_interval;

/// Commands accepted by the balance monitor
#[derive(Debug)]
pub enum MonitorCommand {
    /// Evaluate now against live metrics and reply with the report
    Check(oneshot::Sender<BalanceReport>),
    Status(oneshot::Sender<BalanceReport>),
    /// Panic inside the actor (restart testing)
    InjectFault,
}

#[derive(Clone)]
pub struct MonitorHandle {
    mailbox: Mailbox<MonitorCommand>,
}

impl MonitorHandle {
    pub(crate) fn new(mailbox: Mailbox<MonitorCommand>) -> Self {
        Self { mailbox }
    }

    pub async fn status(&self) -> VarietyResult<BalanceReport> {
        self.mailbox.request(MonitorCommand::Status).await
    }

    pub async fn check(&self) -> VarietyResult<BalanceReport> {
        self.mailbox.request(MonitorCommand::Check).await
    }

    #[doc(hidden)]
    pub fn inject_fault(&self) -> VarietyResult<()> {
        self.mailbox.try_send(MonitorCommand::InjectFault)
    }
}

impl std::fmt::Debug for MonitorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorHandle")
            .field("mailbox", &self.mailbox.name())
            .finish()
    }
}

pub(crate) struct BalanceMonitor {
    state: MonitorState,
    config: MonitorConfig,
    collector: Arc<MetricsCollector>,
    bus: Arc<dyn MessageBus>,
    sink: Arc<dyn AdjustmentSink>,
    commands: mpsc::Receiver<MonitorCommand>,
    updates: Option<broadcast::Receiver<Envelope>>,
    shutdown_rx: broadcast::Receiver<()>,
}

impl BalanceMonitor {
    pub(crate) fn new(
        config: MonitorConfig,
        collector: Arc<MetricsCollector>,
        bus: Arc<dyn MessageBus>,
        sink: Arc<dyn AdjustmentSink>,
        commands: mpsc::Receiver<MonitorCommand>,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            state: MonitorState::new(config.clone()),
            updates: Some(bus.subscribe(&Topic::metrics())),
            config,
            collector,
            bus,
            sink,
            commands,
            shutdown_rx,
        }
    }

    pub(crate) async fn run(self) {
        let span = info_span!("balance_monitor");
        self.run_inner().instrument(span).await
    }

    async fn run_inner(mut self) {
        let period = self.config.check_interval;
        info!(
            check_interval_ms = period.as_millis() as u64,
            alert_threshold = self.config.alert_threshold,
            "Balance monitor started"
        );
        let mut ticker = tick_interval(period);

        loop {
            tokio::select! {
                _ = self.shutdown_rx.recv() => {
                    info!("Balance monitor shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let metrics = self.collector.get_all_metrics();
                    self.evaluate(&metrics);
                }
                envelope = next_envelope(&mut self.updates, "balance_monitor") => {
                    if envelope.kind != EnvelopeKind::MetricsUpdate {
                        continue;
                    }
                    match envelope.decode::<MetricsUpdate>() {
                        Some(update) => {
                            let metrics: BTreeMap<Level, VarietyMetrics> =
                                update.levels.into_iter().map(|m| (m.level, m)).collect();
                            self.observe(&metrics);
                        }
                        None => debug!("Ignoring undecodable metrics update"),
                    }
                }
                command = self.commands.recv() => match command {
                    Some(MonitorCommand::Check(reply)) => {
                        let metrics = self.collector.get_all_metrics();
                        self.evaluate(&metrics);
                        let _ = reply.send(self.state.report());
                    }
                    Some(MonitorCommand::Status(reply)) => {
                        let _ = reply.send(self.state.report());
                    }
                    Some(MonitorCommand::InjectFault) => panic!("injected fault in balance monitor"),
                    None => break,
                },
            }
        }
    }

    fn evaluate(&mut self, metrics: &BTreeMap<Level, VarietyMetrics>) {
        let evaluation = self.state.evaluate(metrics);
        self.apply(evaluation);
    }

    fn observe(&mut self, metrics: &BTreeMap<Level, VarietyMetrics>) {
        let evaluation = self.state.observe(metrics);
        self.apply(evaluation);
    }

    fn apply(&self, evaluation: Evaluation) {

        for alert in &evaluation.new_alerts {
            warn!(
                level = %alert.level,
                status = %alert.status,
                entropy_ratio = alert.entropy_ratio,
                volume_ratio = alert.volume_ratio,
                velocity = alert.velocity,
                "{}",
                alert.message
            );
        }
        if evaluation.rebalance {
            info!(
                health = evaluation.health,
                adjustments = evaluation.adjustments.len(),
                "Critical imbalance, rebalancing"
            );
        }
        for adjustment in &evaluation.adjustments {
            debug!(boundary = %adjustment.boundary(), ?adjustment, "Dispatching adjustment");
            self.sink.dispatch(*adjustment);
        }

        self.bus.publish(&Topic::balance(), evaluation.to_envelope());
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use variety_core::{Boundary, Direction, LocalBus};

    use super::*;
    use crate::adjust::{Adjustment, RecordingSink};

    fn spawn_monitor(
        collector: Arc<MetricsCollector>,
        sink: Arc<RecordingSink>,
        bus: Arc<dyn MessageBus>,
    ) -> (MonitorHandle, broadcast::Sender<()>) {
        let (shutdown_tx, _) = broadcast::channel(1);
        let (mailbox, rx) = Mailbox::new("balance_monitor", 16);
        let config = MonitorConfig {
            check_interval: Duration::from_secs(3600),
            ..MonitorConfig::default()
        };
        let monitor = BalanceMonitor::new(config, collector, bus, sink, rx, shutdown_tx.subscribe());
        tokio::spawn(monitor.run());
        (MonitorHandle::new(mailbox), shutdown_tx)
    }

    #[tokio::test]
    async fn test_check_classifies_and_dispatches() {
        let bus: Arc<dyn MessageBus> = Arc::new(LocalBus::new());
        let collector = Arc::new(MetricsCollector::new(1.0));
        collector.record_many(Level::S3, Direction::Inbound, "resource-need", 100);
        collector.record_many(Level::S3, Direction::Outbound, "resource-need", 160);
        let sink = Arc::new(RecordingSink::new());
        let mut balance = bus.subscribe(&Topic::balance());
        let (handle, shutdown_tx) = spawn_monitor(collector, sink.clone(), bus);

        let report = handle.check().await.unwrap();
        assert_eq!(report.levels[&Level::S3].status, BalanceState::Overloaded);
        assert_eq!(report.recent_alerts.len(), 1);
        assert_eq!(report.checks_performed, 1);
        assert_eq!(
            sink.adjustments(),
            vec![Adjustment::AdjustFiltering {
                boundary: Boundary::S3ToS4,
                magnitude: 1.3
            }]
        );

        let envelope = balance.recv().await.unwrap();
        assert_eq!(envelope.kind, EnvelopeKind::BalanceUpdate);
        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_metrics_update_triggers_evaluation() {
        let bus: Arc<dyn MessageBus> = Arc::new(LocalBus::new());
        let sink = Arc::new(RecordingSink::new());
        let (handle, shutdown_tx) =
            spawn_monitor(Arc::new(MetricsCollector::default()), sink.clone(), bus.clone());
        let mut balance = bus.subscribe(&Topic::balance());

        let mut unstable = VarietyMetrics::identity(Level::S1);
        unstable.velocity = 0.8;
        let update = MetricsUpdate {
            window: 1,
            levels: vec![unstable],
        };
        bus.publish(&Topic::metrics(), update.to_envelope());

        balance.recv().await.unwrap();
        let report = handle.status().await.unwrap();
        assert_eq!(report.levels[&Level::S1].status, BalanceState::Unstable);
        assert_eq!(
            sink.adjustments(),
            vec![
                Adjustment::DampenFilter {
                    boundary: Boundary::S1ToS2
                },
                Adjustment::DampenAmplifier {
                    boundary: Boundary::S2ToS1
                }
            ]
        );
        let _ = shutdown_tx.send(());
    }
}
