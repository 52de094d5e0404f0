//! Upward filters
//!
//! One actor per filter boundary. The lowest boundary aggregates raw events
//! into patterns on a timer; the upper boundaries transform each incoming
//! message one-to-one behind a relevance gate. Both share [`FilterState`].
//!
//! Anomaly and oscillation patterns, and policy-bound trends above the
//! severity cutoff, are additionally escalated straight to the destination
//! level through the [`EscalationRegistry`]. Escalation failures are logged
//! and counted; the bus copy is already out by then.

pub mod aggregate;
pub mod state;
pub mod transform;

pub use state::{FilterSnapshot, FilterState, FilterStats, TransformOutcome};
pub use transform::{MessageTransform, transform_for, variety_key};

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Instant;
use tracing::{Instrument, debug, info, info_span, warn};

use variety_core::{
    Boundary, Direction, Envelope, EnvelopeKind, EscalationRegistry, Event, MessageBus, Topic,
    VarietyMessage, VarietyResult,
};

use crate::config::FilterConfig;
use crate::mailbox::{Mailbox, next_envelope};
use crate::metrics::MetricsCollector;
use crate::supervisor::tick_interval;

/// Commands accepted by a filter actor
#[derive(Debug)]
pub enum FilterCommand {
    /// Deliver an envelope as if it arrived on a subscribed topic
    Ingest(Envelope),
    /// Run an aggregation cycle now; replies with the number published
    Tick(oneshot::Sender<usize>),
    SetThreshold(f64),
    AdjustFiltering(f64),
    IncreaseFiltering,
    DampenOscillations,
    Snapshot(oneshot::Sender<FilterSnapshot>),
    /// Panic inside the actor (restart testing)
    InjectFault,
}

/// Cloneable handle to a running filter
#[derive(Clone)]
pub struct FilterHandle {
    boundary: Boundary,
    mailbox: Mailbox<FilterCommand>,
}

impl FilterHandle {
    pub(crate) fn new(boundary: Boundary, mailbox: Mailbox<FilterCommand>) -> Self {
        Self { boundary, mailbox }
    }

    pub fn boundary(&self) -> Boundary {
        self.boundary
    }

    pub fn ingest(&self, envelope: Envelope) -> VarietyResult<()> {
        self.mailbox.try_send(FilterCommand::Ingest(envelope))
    }

    pub fn ingest_event(&self, event: Event) -> VarietyResult<()> {
        self.ingest(event.to_envelope())
    }

    pub async fn tick(&self) -> VarietyResult<usize> {
        self.mailbox.request(FilterCommand::Tick).await
    }

    pub async fn set_threshold(&self, value: f64) -> VarietyResult<()> {
        self.mailbox.send(FilterCommand::SetThreshold(value)).await
    }

    pub fn adjust_filtering(&self, magnitude: f64) -> VarietyResult<()> {
        self.mailbox.try_send(FilterCommand::AdjustFiltering(magnitude))
    }

    pub fn increase_filtering(&self) -> VarietyResult<()> {
        self.mailbox.try_send(FilterCommand::IncreaseFiltering)
    }

    pub fn dampen_oscillations(&self) -> VarietyResult<()> {
        self.mailbox.try_send(FilterCommand::DampenOscillations)
    }

    pub async fn snapshot(&self) -> VarietyResult<FilterSnapshot> {
        self.mailbox.request(FilterCommand::Snapshot).await
    }

    #[doc(hidden)]
    pub fn inject_fault(&self) -> VarietyResult<()> {
        self.mailbox.try_send(FilterCommand::InjectFault)
    }
}

impl std::fmt::Debug for FilterHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterHandle")
            .field("boundary", &self.boundary)
            .finish()
    }
}

enum FilterMode {
    Aggregate,
    Transform(Box<dyn MessageTransform>),
}

impl FilterMode {
    fn accepts(&self) -> EnvelopeKind {
        match self {
            FilterMode::Aggregate => EnvelopeKind::RawEvent,
            FilterMode::Transform(t) => t.input(),
        }
    }
}

/// Filter actor; owns its state for the life of one incarnation
pub(crate) struct FilterActor {
    state: FilterState,
    mode: FilterMode,
    period: Duration,
    bus: Arc<dyn MessageBus>,
    metrics: Arc<MetricsCollector>,
    escalation: EscalationRegistry,
    commands: mpsc::Receiver<FilterCommand>,
    primary: Option<broadcast::Receiver<Envelope>>,
    cross_cutting: Option<broadcast::Receiver<Envelope>>,
    shutdown_rx: broadcast::Receiver<()>,
}

impl FilterActor {
    /// Build a fresh incarnation, subscribing to the source level's topics
    pub(crate) fn new(
        boundary: Boundary,
        config: &FilterConfig,
        bus: Arc<dyn MessageBus>,
        metrics: Arc<MetricsCollector>,
        escalation: EscalationRegistry,
        commands: mpsc::Receiver<FilterCommand>,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Self {
        let source = boundary.source();
        let mode = match transform_for(boundary) {
            Some(t) => FilterMode::Transform(t),
            None => FilterMode::Aggregate,
        };
        Self {
            state: FilterState::new(boundary, config.threshold, config.aggregation_window),
            mode,
            period: config.aggregation_window,
            primary: Some(bus.subscribe(&Topic::level(source))),
            cross_cutting: Topic::cross_cutting(source).map(|t| bus.subscribe(&t)),
            bus,
            metrics,
            escalation,
            commands,
            shutdown_rx,
        }
    }

    pub(crate) async fn run(self) {
        let span = info_span!("filter", boundary = %self.state.boundary());
        self.run_inner().instrument(span).await
    }

    async fn run_inner(mut self) {
        let name = self.state.boundary().as_str();
        info!(period_ms = self.period.as_millis() as u64, "Filter started");
        let mut ticker = tick_interval(self.period);

        loop {
            tokio::select! {
                _ = self.shutdown_rx.recv() => {
                    info!("Filter shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    self.tick().await;
                }
                envelope = next_envelope(&mut self.primary, name) => {
                    self.ingest(envelope).await;
                }
                envelope = next_envelope(&mut self.cross_cutting, name) => {
                    self.ingest(envelope).await;
                }
                command = self.commands.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => break,
                },
            }
        }
    }

    async fn handle(&mut self, command: FilterCommand) {
        match command {
            FilterCommand::Ingest(envelope) => self.ingest(envelope).await,
            FilterCommand::Tick(reply) => {
                let published = self.tick().await;
                let _ = reply.send(published);
            }
            FilterCommand::SetThreshold(value) => {
                self.state.set_threshold(value);
                info!(threshold = self.state.threshold(), "Threshold set");
            }
            FilterCommand::AdjustFiltering(magnitude) => {
                self.state.adjust_filtering(magnitude);
                info!(
                    magnitude,
                    filtering_level = self.state.filtering_level(),
                    "Filtering adjusted"
                );
            }
            FilterCommand::IncreaseFiltering => {
                self.state.increase_filtering();
                debug!(filtering_level = self.state.filtering_level(), "Filtering increased");
            }
            FilterCommand::DampenOscillations => {
                self.state.dampen_oscillations();
                info!(
                    filtering_level = self.state.filtering_level(),
                    threshold = self.state.threshold(),
                    "Oscillations dampened"
                );
            }
            FilterCommand::Snapshot(reply) => {
                let _ = reply.send(self.state.snapshot());
            }
            FilterCommand::InjectFault => panic!("injected fault in filter {}", self.state.boundary()),
        }
    }

    async fn ingest(&mut self, envelope: Envelope) {
        if envelope.kind != self.mode.accepts() {
            return;
        }
        let boundary = self.state.boundary();
        let level = boundary.metrics_level();

        match &self.mode {
            FilterMode::Aggregate => {
                let event = Event::coerce(&envelope.payload_value());
                self.metrics
                    .record_message(level, Direction::Inbound, &event.event_type);
                self.state.ingest(event, Instant::now());
            }
            FilterMode::Transform(transform) => {
                let Some(message) = VarietyMessage::from_envelope(&envelope) else {
                    return;
                };
                self.metrics
                    .record_message(level, Direction::Inbound, &variety_key(&message));
                let outcome = self.state.transform(transform.as_ref(), &message);

                if let Some(forward) = &outcome.forward {
                    self.publish(forward.to_envelope(), &variety_key(forward));
                } else {
                    debug!(context = %message.context, relevance = outcome.relevance, "Message filtered");
                }
                if let Some(escalate) = outcome.escalate {
                    let result = self
                        .escalation
                        .synthesize_policy(boundary.destination(), &escalate)
                        .await;
                    self.note_escalation(result, &escalate.context);
                }
            }
        }
    }

    async fn tick(&mut self) -> usize {
        if !matches!(self.mode, FilterMode::Aggregate) {
            let stats = self.state.stats();
            debug!(
                received = stats.events_received,
                forwarded = stats.forwarded,
                filtered = stats.filtered,
                "Filter idle tick"
            );
            return 0;
        }

        let patterns = self.state.tick(Instant::now());
        let destination = self.state.boundary().destination();
        for pattern in &patterns {
            self.publish(pattern.to_envelope(), pattern.pattern_type.as_str());
        }
        for pattern in patterns.iter().filter(|p| p.pattern_type.escalates()) {
            let result = self.escalation.dampen(destination, pattern).await;
            self.note_escalation(result, &pattern.context);
        }
        if !patterns.is_empty() {
            debug!(published = patterns.len(), "Aggregation cycle complete");
        }
        patterns.len()
    }

    fn publish(&self, envelope: Envelope, key: &str) {
        let boundary = self.state.boundary();
        self.metrics
            .record_message(boundary.metrics_level(), Direction::Outbound, key);
        self.bus.publish(&Topic::level(boundary.destination()), envelope);
    }

    fn note_escalation(&mut self, result: VarietyResult<bool>, context: &str) {
        match result {
            Ok(true) => self.state.record_escalation(true),
            Ok(false) => {}
            Err(e) => {
                warn!(context, error = %e, "Escalation failed");
                self.state.record_escalation(false);
            }
        }
    }
}
