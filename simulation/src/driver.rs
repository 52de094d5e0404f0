//! Engine harness shared by every scenario

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde_json::{Map, Value, json};
use tracing::debug;

use variety_core::{
    Boundary, Event, Level, LocalBus, MessageBus, MessageType, RecordingEscalation, Topic,
    VarietyMessage,
};
use variety_engine::{EngineConfig, VarietyEngine};

use crate::report::Outcome;

/// How long a round waits for the level 1 filter to see what was published
const SETTLE_TIMEOUT: Duration = Duration::from_secs(2);

/// A started engine plus recording stand-ins for levels 2 and 5
pub struct Driver {
    engine: VarietyEngine,
    level2: Arc<RecordingEscalation>,
    level5: Arc<RecordingEscalation>,
    rng: StdRng,
    raw_published: u64,
    rounds: usize,
}

impl Driver {
    pub fn start(config: EngineConfig, seed: u64) -> Result<Self> {
        let level2 = Arc::new(RecordingEscalation::new());
        let level5 = Arc::new(RecordingEscalation::new());
        let engine = VarietyEngine::new(config, Arc::new(LocalBus::new()))
            .with_escalation(Level::S2, level2.clone())
            .with_escalation(Level::S5, level5.clone());
        engine.start().context("starting variety engine")?;

        Ok(Self {
            engine,
            level2,
            level5,
            rng: StdRng::seed_from_u64(seed),
            raw_published: 0,
            rounds: 0,
        })
    }

    pub fn engine(&self) -> &VarietyEngine {
        &self.engine
    }

    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    /// Publish a raw event as level 1 would
    pub fn raw_event(&mut self, event_type: &str, context: &str, data: Value) {
        self.engine
            .publish_event(Level::S1, Event::new(event_type, context).with_data(data));
        self.raw_published += 1;
    }

    /// Publish a directive as level 5 would
    pub fn directive(&self, directive_type: &str, context: &str, significance: f64) {
        let mut payload = Map::new();
        payload.insert("directive_type".to_string(), json!(directive_type));
        let directive = VarietyMessage::new(MessageType::Directive, context, significance)
            .with_payload(payload);
        self.engine
            .bus()
            .publish(&Topic::level(Level::S5), directive.to_envelope());
    }

    /// Set every amplifier's factor
    pub async fn amplify_all(&self, factor: f64) -> Result<()> {
        for boundary in Boundary::AMPLIFIERS {
            self.engine
                .adjust_amplification_factor(boundary.as_str(), factor)
                .await?;
        }
        Ok(())
    }

    /// Wait for ingestion, flush every component, close the metrics window
    /// and run a balance check
    pub async fn round(&mut self) -> Result<()> {
        self.settle().await?;
        let published = self.engine.flush().await?;
        self.engine.rotate_metrics().await?;
        let report = self.engine.force_balance_check().await?;
        self.rounds += 1;
        debug!(
            round = self.rounds,
            published,
            health = report.health,
            "Round complete"
        );
        Ok(())
    }

    async fn settle(&self) -> Result<()> {
        let expected = self.raw_published;
        let filter = self.engine.filter(Boundary::S1ToS2.as_str())?;
        tokio::time::timeout(SETTLE_TIMEOUT, async {
            loop {
                let snapshot = filter.snapshot().await?;
                if snapshot.stats.events_received >= expected {
                    return anyhow::Ok(());
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .context("level 1 filter did not receive every event")?
    }

    /// Collect the final state and stop the engine
    pub async fn finish(self) -> Result<Outcome> {
        let mut filters = Vec::new();
        for boundary in Boundary::FILTERS {
            filters.push(self.engine.filter_state(boundary.as_str()).await?);
        }
        let mut amplifiers = Vec::new();
        for boundary in Boundary::AMPLIFIERS {
            amplifiers.push(self.engine.amplifier_state(boundary.as_str()).await?);
        }
        let outcome = Outcome {
            rounds: self.rounds,
            metrics: self.engine.get_variety_metrics(),
            balance: self.engine.get_balance_status().await?,
            filters,
            amplifiers,
            escalations: self
                .level2
                .calls()
                .into_iter()
                .map(|c| (Level::S2, c))
                .chain(self.level5.calls().into_iter().map(|c| (Level::S5, c)))
                .collect(),
            restarts: self.engine.restart_counts(),
        };
        self.engine.stop().await?;
        Ok(outcome)
    }
}
