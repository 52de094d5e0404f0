//! Load scenarios
//!
//! Every scenario runs a fixed number of rounds. A round publishes its load,
//! then flushes the engine and runs a balance check, so results do not
//! depend on the configured timers.

use anyhow::Result;
use rand::Rng;
use rand::seq::IndexedRandom;
use serde_json::json;
use tracing::info;

use variety_engine::EngineConfig;

use crate::driver::Driver;
use crate::report::Outcome;

const CONTEXTS: [&str; 4] = ["billing", "inventory", "shipping", "support"];

/// Event types that stay below the aggregation threshold on their own
const BACKGROUND_TYPES: [&str; 4] = ["heartbeat", "sync_required", "resource_request", "audit"];

#[derive(Debug, Clone)]
pub struct ScenarioConfig {
    pub rounds: usize,
    /// Raw events per context per round
    pub events_per_context: usize,
    pub seed: u64,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            rounds: 5,
            events_per_context: 8,
            seed: 7,
        }
    }
}

/// Mostly routine requests per context plus one directive per round
fn steady_load(driver: &mut Driver, events_per_context: usize) {
    for context in CONTEXTS {
        for seq in 0..events_per_context {
            let event_type = if driver.rng().random_bool(0.75) {
                "request"
            } else {
                BACKGROUND_TYPES.choose(driver.rng()).copied().unwrap_or("heartbeat")
            };
            driver.raw_event(event_type, context, json!({ "seq": seq }));
        }
    }
    let context = CONTEXTS.choose(driver.rng()).copied().unwrap_or("billing");
    let significance = driver.rng().random_range(0.3..0.9);
    driver.directive("review", context, significance);
}

/// Balanced mixed load
pub async fn run_steady(engine: EngineConfig, scenario: &ScenarioConfig) -> Result<Outcome> {
    info!(rounds = scenario.rounds, "Running steady scenario");
    let mut driver = Driver::start(engine, scenario.seed)?;
    // Stay under the burst size so routine traffic aggregates as operational
    let per_context = scenario.events_per_context.min(10);
    for _ in 0..scenario.rounds {
        steady_load(&mut driver, per_context);
        driver.round().await?;
    }
    driver.finish().await
}

/// Steady load with an error burst into one context halfway through
pub async fn run_burst(
    engine: EngineConfig,
    scenario: &ScenarioConfig,
    context: &str,
    errors: usize,
) -> Result<Outcome> {
    info!(rounds = scenario.rounds, context, errors, "Running burst scenario");
    let mut driver = Driver::start(engine, scenario.seed)?;
    let burst_round = scenario.rounds / 2;
    for round in 0..scenario.rounds {
        steady_load(&mut driver, scenario.events_per_context.min(10));
        if round == burst_round {
            for seq in 0..errors {
                driver.raw_event("error", context, json!({ "seq": seq, "code": 500 }));
            }
        }
        driver.round().await?;
    }
    driver.finish().await
}

/// Saturate both directions
///
/// Level 1 receives far more distinct event types than any pattern can
/// cover, while amplified directives fan out on the way down.
pub async fn run_flood(
    engine: EngineConfig,
    scenario: &ScenarioConfig,
    amplification: f64,
) -> Result<Outcome> {
    info!(rounds = scenario.rounds, amplification, "Running flood scenario");
    let mut driver = Driver::start(engine, scenario.seed)?;
    driver.amplify_all(amplification).await?;

    for _ in 0..scenario.rounds {
        for context in CONTEXTS {
            for seq in 0..scenario.events_per_context * 4 {
                let kind = driver.rng().random_range(0..16);
                driver.raw_event(&format!("signal_{kind}"), context, json!({ "seq": seq }));
            }
        }
        for context in CONTEXTS {
            driver.directive("expand", context, 0.9);
        }
        driver.round().await?;
    }
    driver.finish().await
}

#[cfg(test)]
mod tests {
    use variety_core::{EscalationCall, Level, PatternType};
    use variety_engine::BalanceState;

    use super::*;

    fn scenario(rounds: usize) -> ScenarioConfig {
        ScenarioConfig {
            rounds,
            events_per_context: 8,
            seed: 42,
        }
    }

    #[tokio::test]
    async fn test_burst_escalates_anomaly() {
        let outcome = run_burst(EngineConfig::testing(), &scenario(2), "billing", 20)
            .await
            .unwrap();
        assert!(outcome.escalations.iter().any(|(level, call)| {
            *level == Level::S2
                && matches!(
                    call,
                    EscalationCall::Dampen { context, pattern_type: PatternType::Anomaly, .. }
                        if context == "billing"
                )
        }));
        assert!(outcome.restarts.is_empty());
    }

    #[tokio::test]
    async fn test_steady_run_reports_every_component() {
        let outcome = run_steady(EngineConfig::testing(), &scenario(3)).await.unwrap();
        assert_eq!(outcome.rounds, 3);
        assert_eq!(outcome.filters.len(), 4);
        assert_eq!(outcome.amplifiers.len(), 4);
        assert_eq!(outcome.filters[0].stats.events_received, 3 * 4 * 8);
        // Forced checks, plus any metrics updates already evaluated
        assert!(outcome.balance.checks_performed >= 3);
        assert!(outcome.restarts.is_empty());
    }

    #[tokio::test]
    async fn test_flood_unbalances_level1() {
        let outcome = run_flood(EngineConfig::testing(), &scenario(1), 3.0).await.unwrap();
        let s1 = &outcome.balance.levels[&Level::S1];
        assert_ne!(s1.status, BalanceState::Balanced);
        assert!(!outcome.balance.recent_alerts.is_empty());
    }
}
