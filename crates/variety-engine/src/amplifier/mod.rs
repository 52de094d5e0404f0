//! Downward amplifiers
//!
//! The structural inverse of the filters: each amplifier buffers directives
//! arriving from the level above and, on its tick, expands each into
//! `round(amplification_factor)` weighted variants for the level below.

pub mod state;

pub use state::{
    AmplifierSnapshot, AmplifierState, AmplifierStats, DAMPEN_FACTOR, MAX_AMPLIFICATION_FACTOR,
    MIN_AMPLIFICATION_FACTOR, VariantKind,
};

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{Instrument, debug, info, info_span};

use variety_core::{
    Boundary, Direction, Envelope, EnvelopeKind, MessageBus, Topic, VarietyMessage, VarietyResult,
};

use crate::config::AmplifierConfig;
use crate::filter::variety_key;
use crate::mailbox::{Mailbox, next_envelope};
use crate::metrics::MetricsCollector;
use crate::supervisor::tick_interval;

/// Commands accepted by an amplifier actor
#[derive(Debug)]
pub enum AmplifierCommand {
    Ingest(Envelope),
    /// Expand buffered directives now; replies with the variant count
    Tick(oneshot::Sender<usize>),
    SetFactor(f64),
    AdjustAmplification(f64),
    DampenOscillations,
    Snapshot(oneshot::Sender<AmplifierSnapshot>),
    /// Panic inside the actor (restart testing)
    InjectFault,
}

/// Cloneable handle to a running amplifier
#[derive(Clone)]
pub struct AmplifierHandle {
    boundary: Boundary,
    mailbox: Mailbox<AmplifierCommand>,
}

impl AmplifierHandle {
    pub(crate) fn new(boundary: Boundary, mailbox: Mailbox<AmplifierCommand>) -> Self {
        Self { boundary, mailbox }
    }

    pub fn boundary(&self) -> Boundary {
        self.boundary
    }

    pub fn ingest(&self, envelope: Envelope) -> VarietyResult<()> {
        self.mailbox.try_send(AmplifierCommand::Ingest(envelope))
    }

    pub async fn tick(&self) -> VarietyResult<usize> {
        self.mailbox.request(AmplifierCommand::Tick).await
    }

    pub async fn set_factor(&self, value: f64) -> VarietyResult<()> {
        self.mailbox.send(AmplifierCommand::SetFactor(value)).await
    }

    pub fn adjust_amplification(&self, magnitude: f64) -> VarietyResult<()> {
        self.mailbox
            .try_send(AmplifierCommand::AdjustAmplification(magnitude))
    }

    pub fn dampen_oscillations(&self) -> VarietyResult<()> {
        self.mailbox.try_send(AmplifierCommand::DampenOscillations)
    }

    pub async fn snapshot(&self) -> VarietyResult<AmplifierSnapshot> {
        self.mailbox.request(AmplifierCommand::Snapshot).await
    }

    #[doc(hidden)]
    pub fn inject_fault(&self) -> VarietyResult<()> {
        self.mailbox.try_send(AmplifierCommand::InjectFault)
    }
}

impl std::fmt::Debug for AmplifierHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AmplifierHandle")
            .field("boundary", &self.boundary)
            .finish()
    }
}

pub(crate) struct AmplifierActor {
    state: AmplifierState,
    period: Duration,
    bus: Arc<dyn MessageBus>,
    metrics: Arc<MetricsCollector>,
    commands: mpsc::Receiver<AmplifierCommand>,
    directives: Option<broadcast::Receiver<Envelope>>,
    shutdown_rx: broadcast::Receiver<()>,
}

impl AmplifierActor {
    pub(crate) fn new(
        boundary: Boundary,
        config: &AmplifierConfig,
        bus: Arc<dyn MessageBus>,
        metrics: Arc<MetricsCollector>,
        commands: mpsc::Receiver<AmplifierCommand>,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            state: AmplifierState::new(boundary, config.threshold, config.tick_interval),
            period: config.tick_interval,
            directives: Some(bus.subscribe(&Topic::level(boundary.source()))),
            bus,
            metrics,
            commands,
            shutdown_rx,
        }
    }

    pub(crate) async fn run(self) {
        let span = info_span!("amplifier", boundary = %self.state.boundary());
        self.run_inner().instrument(span).await
    }

    async fn run_inner(mut self) {
        let name = self.state.boundary().as_str();
        info!(period_ms = self.period.as_millis() as u64, "Amplifier started");
        let mut ticker = tick_interval(self.period);

        loop {
            tokio::select! {
                _ = self.shutdown_rx.recv() => {
                    info!("Amplifier shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    self.tick();
                }
                envelope = next_envelope(&mut self.directives, name) => {
                    self.ingest(envelope);
                }
                command = self.commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
            }
        }
    }

    fn handle(&mut self, command: AmplifierCommand) {
        match command {
            AmplifierCommand::Ingest(envelope) => self.ingest(envelope),
            AmplifierCommand::Tick(reply) => {
                let published = self.tick();
                let _ = reply.send(published);
            }
            AmplifierCommand::SetFactor(value) => {
                self.state.set_factor(value);
                info!(amplification_factor = self.state.amplification_factor(), "Factor set");
            }
            AmplifierCommand::AdjustAmplification(magnitude) => {
                self.state.adjust_amplification(magnitude);
                info!(
                    magnitude,
                    amplification_factor = self.state.amplification_factor(),
                    "Amplification adjusted"
                );
            }
            AmplifierCommand::DampenOscillations => {
                self.state.dampen_oscillations();
                info!(
                    amplification_factor = self.state.amplification_factor(),
                    "Oscillations dampened"
                );
            }
            AmplifierCommand::Snapshot(reply) => {
                let _ = reply.send(self.state.snapshot());
            }
            AmplifierCommand::InjectFault => {
                panic!("injected fault in amplifier {}", self.state.boundary())
            }
        }
    }

    fn ingest(&mut self, envelope: Envelope) {
        if envelope.kind != EnvelopeKind::Directive {
            return;
        }
        let Some(directive) = VarietyMessage::from_envelope(&envelope) else {
            return;
        };
        self.metrics.record_message(
            self.state.boundary().metrics_level(),
            Direction::Inbound,
            &variety_key(&directive),
        );
        self.state.ingest(directive);
    }

    fn tick(&mut self) -> usize {
        let boundary = self.state.boundary();
        let variants = self.state.tick();
        let topic = Topic::level(boundary.destination());
        for variant in &variants {
            self.metrics.record_message(
                boundary.metrics_level(),
                Direction::Outbound,
                &variety_key(variant),
            );
            self.bus.publish(&topic, variant.to_envelope());
        }
        if !variants.is_empty() {
            debug!(variants = variants.len(), "Directives amplified");
        }
        variants.len()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{Map, json};
    use variety_core::{Level, LocalBus, MessageType};

    use super::*;

    #[tokio::test]
    async fn test_directive_fans_out_downward() {
        let bus: Arc<dyn MessageBus> = Arc::new(LocalBus::new());
        let metrics = Arc::new(MetricsCollector::new(1.0));
        let (shutdown_tx, _) = broadcast::channel(1);
        let (mailbox, rx) = Mailbox::new("s4_to_s3", 16);
        let config = AmplifierConfig {
            threshold: 0.5,
            tick_interval: Duration::from_secs(3600),
        };
        let actor = AmplifierActor::new(
            Boundary::S4ToS3,
            &config,
            bus.clone(),
            metrics.clone(),
            rx,
            shutdown_tx.subscribe(),
        );
        tokio::spawn(actor.run());
        let handle = AmplifierHandle::new(Boundary::S4ToS3, mailbox);
        let mut level3 = bus.subscribe(&Topic::level(Level::S3));

        handle.set_factor(3.0).await.unwrap();
        let mut payload = Map::new();
        payload.insert("directive_type".to_string(), json!("rebalance"));
        let directive =
            VarietyMessage::new(MessageType::Directive, "plant", 0.8).with_payload(payload);
        handle.ingest(directive.to_envelope()).unwrap();
        // A pattern on the same topic is not a directive
        handle
            .ingest(Envelope::new(EnvelopeKind::Pattern, Map::new()))
            .unwrap();

        assert_eq!(handle.tick().await.unwrap(), 3);
        for _ in 0..3 {
            let envelope = level3.recv().await.unwrap();
            assert_eq!(envelope.kind, EnvelopeKind::Directive);
            assert_eq!(envelope.payload["directive_type"], json!("rebalance"));
        }

        let m = metrics.get_metrics(Level::S3);
        assert_eq!(m.volume.input, 1);
        assert_eq!(m.volume.output, 3);
        assert_eq!(m.entropy.ratio, 1.0);

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.stats.directives_received, 1);
        assert_eq!(snapshot.amplification_factor, 3.0);
        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_adjust_and_dampen_commands() {
        let bus: Arc<dyn MessageBus> = Arc::new(LocalBus::new());
        let (shutdown_tx, _) = broadcast::channel(1);
        let (mailbox, rx) = Mailbox::new("s2_to_s1", 16);
        let actor = AmplifierActor::new(
            Boundary::S2ToS1,
            &AmplifierConfig::default(),
            bus,
            Arc::new(MetricsCollector::default()),
            rx,
            shutdown_tx.subscribe(),
        );
        tokio::spawn(actor.run());
        let handle = AmplifierHandle::new(Boundary::S2ToS1, mailbox);

        handle.adjust_amplification(2.5).unwrap();
        handle.dampen_oscillations().unwrap();
        let snapshot = handle.snapshot().await.unwrap();
        assert!((snapshot.amplification_factor - 2.0).abs() < 1e-9);
        let _ = shutdown_tx.send(());
    }
}
