//! Per-level balance state machine

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};

use variety_core::{Envelope, EnvelopeKind, Level};

use super::balance::{Alert, BalanceStatus, health, needs_rebalance};
use crate::adjust::Adjustment;
use crate::config::MonitorConfig;
use crate::metrics::VarietyMetrics;

/// Outcome of one evaluation
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub statuses: Vec<BalanceStatus>,
    pub new_alerts: Vec<Alert>,
    pub adjustments: Vec<Adjustment>,
    /// The global rebalance trigger fired
    pub rebalance: bool,
    pub health: f64,
}

impl Evaluation {
    /// The `balance-update` envelope for this evaluation
    pub fn to_envelope(&self) -> Envelope {
        Envelope::from_serializable(
            EnvelopeKind::BalanceUpdate,
            &BalanceUpdate {
                health: self.health,
                rebalance: self.rebalance,
                levels: self.statuses.clone(),
                new_alerts: self.new_alerts.len(),
            },
        )
    }
}

/// Payload of a `balance-update` envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceUpdate {
    pub health: f64,
    pub rebalance: bool,
    pub levels: Vec<BalanceStatus>,
    pub new_alerts: usize,
}

/// Balance status as exposed to operators
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceReport {
    pub levels: BTreeMap<Level, BalanceStatus>,
    pub health: f64,
    /// Most recent alerts, oldest first
    pub recent_alerts: Vec<Alert>,
    pub history_len: usize,
    pub checks_performed: u64,
    pub rebalances_triggered: u64,
}

/// State owned by the balance monitor
#[derive(Debug)]
pub struct MonitorState {
    config: MonitorConfig,
    current: BTreeMap<Level, BalanceStatus>,
    /// Consecutive non-balanced evaluations per level
    streaks: BTreeMap<Level, u32>,
    history: VecDeque<BalanceStatus>,
    alerts: VecDeque<Alert>,
    checks_performed: u64,
    rebalances_triggered: u64,
}

impl MonitorState {
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            current: Level::ALL
                .into_iter()
                .map(|l| (l, BalanceStatus::initial(l)))
                .collect(),
            streaks: BTreeMap::new(),
            history: VecDeque::new(),
            alerts: VecDeque::new(),
            checks_performed: 0,
            rebalances_triggered: 0,
            config,
        }
    }

    /// Run a scheduled balance check
    ///
    /// Classifies every level and decides which corrections to issue. A
    /// level's correction is dispatched when it enters a non-balanced
    /// state, when it has stayed non-balanced for `sustained_checks`
    /// checks, and for every non-balanced level while the global rebalance
    /// trigger holds. Levels without metrics read as identity.
    pub fn evaluate(&mut self, metrics: &BTreeMap<Level, VarietyMetrics>) -> Evaluation {
        self.classify_all(metrics, true)
    }

    /// Re-classify on a live metrics update
    ///
    /// Transitions and the global trigger act as in [`evaluate`], but the
    /// update is not a check: it neither extends a non-balanced streak nor
    /// counts toward `checks_performed`. A balanced reading still ends a
    /// streak.
    ///
    /// [`evaluate`]: MonitorState::evaluate
    pub fn observe(&mut self, metrics: &BTreeMap<Level, VarietyMetrics>) -> Evaluation {
        self.classify_all(metrics, false)
    }

    fn classify_all(&mut self, metrics: &BTreeMap<Level, VarietyMetrics>, check: bool) -> Evaluation {
        let mut statuses = Vec::with_capacity(Level::ALL.len());
        let mut new_alerts = Vec::new();
        let mut due = Vec::new();

        for level in Level::ALL {
            let m = metrics
                .get(&level)
                .copied()
                .unwrap_or_else(|| VarietyMetrics::identity(level));
            let status = BalanceStatus::evaluate(&m, self.config.alert_threshold);
            let previous = self
                .current
                .get(&level)
                .map(|s| s.status)
                .unwrap_or_default();

            let streak = self.streaks.entry(level).or_insert(0);
            if status.status.is_balanced() {
                *streak = 0;
            } else if check {
                *streak += 1;
            }
            let sustained = check && *streak >= self.config.sustained_checks.max(1);

            if !status.status.is_balanced() && status.status != previous {
                new_alerts.push(Alert::new(&status));
                due.push(level);
            } else if sustained {
                due.push(level);
            }

            self.current.insert(level, status);
            statuses.push(status);
        }

        let rebalance = needs_rebalance(statuses.iter().map(|s| s.status));
        if rebalance {
            self.rebalances_triggered += 1;
        }

        // Each level owns distinct boundaries, so no correction repeats
        let adjustments = statuses
            .iter()
            .filter(|s| rebalance || due.contains(&s.level))
            .flat_map(BalanceStatus::adjustments)
            .collect();

        for status in &statuses {
            push_bounded(&mut self.history, *status, self.config.history_limit);
        }
        for alert in &new_alerts {
            push_bounded(&mut self.alerts, alert.clone(), self.config.alert_limit);
        }
        if check {
            self.checks_performed += 1;
        }

        Evaluation {
            health: health(statuses.iter().map(|s| s.status)),
            statuses,
            new_alerts,
            adjustments,
            rebalance,
        }
    }

    pub fn report(&self) -> BalanceReport {
        let skip = self.alerts.len().saturating_sub(self.config.surfaced_alerts);
        BalanceReport {
            levels: self.current.clone(),
            health: health(self.current.values().map(|s| s.status)),
            recent_alerts: self.alerts.iter().skip(skip).cloned().collect(),
            history_len: self.history.len(),
            checks_performed: self.checks_performed,
            rebalances_triggered: self.rebalances_triggered,
        }
    }

    pub fn history(&self) -> impl Iterator<Item = &BalanceStatus> {
        self.history.iter()
    }
}

fn push_bounded<T>(log: &mut VecDeque<T>, item: T, limit: usize) {
    log.push_back(item);
    while log.len() > limit {
        log.pop_front();
    }
}

#[cfg(test)]
mod tests {
    use variety_core::{Boundary, Direction};

    use super::*;
    use crate::monitor::balance::BalanceState;
    use crate::metrics::MetricsCollector;

    fn overloaded_level3() -> BTreeMap<Level, VarietyMetrics> {
        let collector = MetricsCollector::default();
        collector.record_many(Level::S3, Direction::Inbound, "resource-need", 100);
        collector.record_many(Level::S3, Direction::Outbound, "resource-need", 160);
        collector.get_all_metrics()
    }

    #[test]
    fn test_volume_overload_dispatches_filtering() {
        let mut state = MonitorState::new(MonitorConfig::default());
        let eval = state.evaluate(&overloaded_level3());

        let s3 = eval.statuses.iter().find(|s| s.level == Level::S3).unwrap();
        assert_eq!(s3.status, BalanceState::Overloaded);
        assert_eq!(eval.new_alerts.len(), 1);
        assert!(!eval.rebalance);
        assert_eq!(
            eval.adjustments,
            vec![Adjustment::AdjustFiltering {
                boundary: Boundary::S3ToS4,
                magnitude: 1.3 * (1.0 + (s3.entropy_ratio - 1.0).abs()),
            }]
        );
    }

    #[test]
    fn test_reevaluation_is_idempotent() {
        let mut state = MonitorState::new(MonitorConfig::default());
        let metrics = overloaded_level3();
        let first = state.evaluate(&metrics);
        let second = state.evaluate(&metrics);

        let status = |e: &Evaluation| {
            e.statuses
                .iter()
                .map(|s| s.status)
                .collect::<Vec<_>>()
        };
        assert_eq!(status(&first), status(&second));
        assert!(second.new_alerts.is_empty());
        assert!(second.adjustments.is_empty());
        assert_eq!(state.report().recent_alerts.len(), 1);
    }

    #[test]
    fn test_sustained_imbalance_reissues_correction() {
        let mut state = MonitorState::new(MonitorConfig::default());
        let metrics = overloaded_level3();
        assert_eq!(state.evaluate(&metrics).adjustments.len(), 1);
        assert!(state.evaluate(&metrics).adjustments.is_empty());
        // Third consecutive non-balanced check
        assert_eq!(state.evaluate(&metrics).adjustments.len(), 1);
        assert_eq!(state.evaluate(&metrics).adjustments.len(), 1);
    }

    #[test]
    fn test_metrics_updates_do_not_extend_streak() {
        let mut state = MonitorState::new(MonitorConfig::default());
        let metrics = overloaded_level3();
        assert_eq!(state.evaluate(&metrics).adjustments.len(), 1);
        assert!(state.observe(&metrics).adjustments.is_empty());
        assert!(state.observe(&metrics).adjustments.is_empty());
        assert!(state.evaluate(&metrics).adjustments.is_empty());
        // Third scheduled check, updates in between did not count
        assert_eq!(state.evaluate(&metrics).adjustments.len(), 1);
        assert_eq!(state.report().checks_performed, 3);
        assert_eq!(state.report().recent_alerts.len(), 1);
    }

    #[test]
    fn test_metrics_update_still_reports_transitions() {
        let mut state = MonitorState::new(MonitorConfig::default());
        let eval = state.observe(&overloaded_level3());
        assert_eq!(eval.new_alerts.len(), 1);
        assert_eq!(eval.adjustments.len(), 1);
        assert_eq!(state.report().checks_performed, 0);
    }

    #[test]
    fn test_recovery_resets_streak_and_allows_new_alert() {
        let mut state = MonitorState::new(MonitorConfig::default());
        let metrics = overloaded_level3();
        state.evaluate(&metrics);
        state.evaluate(&BTreeMap::new());
        let again = state.evaluate(&metrics);
        assert_eq!(again.new_alerts.len(), 1);
        assert_eq!(state.report().recent_alerts.len(), 2);
    }

    #[test]
    fn test_critical_overload_triggers_rebalance() {
        let collector = MetricsCollector::default();
        collector.record_many(Level::S2, Direction::Inbound, "pattern", 50);
        for (t, n) in [("a", 50), ("b", 25), ("c", 25)] {
            collector.record_many(Level::S2, Direction::Outbound, t, n);
        }
        let mut state = MonitorState::new(MonitorConfig::default());
        let eval = state.evaluate(&collector.get_all_metrics());

        let s2 = eval.statuses.iter().find(|s| s.level == Level::S2).unwrap();
        assert!((s2.entropy_ratio - 2.5).abs() < 1e-9);
        assert!((s2.volume_ratio - 2.0).abs() < 1e-9);
        assert_eq!(s2.status, BalanceState::CriticalOverload);
        assert!(eval.rebalance);
        assert_eq!(
            eval.adjustments,
            vec![Adjustment::AdjustFiltering {
                boundary: Boundary::S2ToS3,
                magnitude: 2.0 * 2.5,
            }]
        );
        assert_eq!(state.report().rebalances_triggered, 1);
        assert!((eval.health - (4.0 + 0.1) / 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_history_and_alerts_are_bounded() {
        let config = MonitorConfig {
            history_limit: 12,
            alert_limit: 4,
            surfaced_alerts: 2,
            ..MonitorConfig::default()
        };
        let mut state = MonitorState::new(config);
        let metrics = overloaded_level3();
        for _ in 0..5 {
            state.evaluate(&metrics);
            state.evaluate(&BTreeMap::new());
        }
        let report = state.report();
        assert_eq!(report.history_len, 12);
        assert_eq!(report.recent_alerts.len(), 2);
        assert_eq!(report.checks_performed, 10);
        assert_eq!(state.history().count(), 12);
    }

    #[test]
    fn test_balance_update_envelope() {
        let mut state = MonitorState::new(MonitorConfig::default());
        let envelope = state.evaluate(&overloaded_level3()).to_envelope();
        assert_eq!(envelope.kind, EnvelopeKind::BalanceUpdate);
        let update: BalanceUpdate = envelope.decode().unwrap();
        assert_eq!(update.levels.len(), 5);
        assert_eq!(update.new_alerts, 1);
    }
}
