//! Plain-text rendering of a scenario outcome

use std::collections::BTreeMap;
use std::fmt::{self, Display, Write};

use variety_core::{EscalationCall, Level};
use variety_engine::{AmplifierSnapshot, BalanceReport, FilterSnapshot, VarietyMetrics};

/// Final state of the engine after a scenario
#[derive(Debug, Clone)]
pub struct Outcome {
    pub rounds: usize,
    pub metrics: BTreeMap<Level, VarietyMetrics>,
    pub balance: BalanceReport,
    pub filters: Vec<FilterSnapshot>,
    pub amplifiers: Vec<AmplifierSnapshot>,
    /// Escalations received by the stand-in levels
    pub escalations: Vec<(Level, EscalationCall)>,
    pub restarts: BTreeMap<String, u32>,
}

impl Outcome {
    pub fn metrics_table(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{:<6}{:>8}{:>8}{:>9}{:>9}{:>9}{:>9}{:>9}",
            "level", "in", "out", "H(in)", "H(out)", "entropy", "volume", "veloc."
        );
        for m in self.metrics.values() {
            let _ = writeln!(
                out,
                "{:<6}{:>8}{:>8}{:>9.3}{:>9.3}{:>9.3}{:>9.3}{:>9.3}",
                m.level.to_string(),
                m.volume.input,
                m.volume.output,
                m.entropy.inbound,
                m.entropy.outbound,
                m.entropy.ratio,
                m.volume.ratio,
                m.velocity
            );
        }
        out
    }

    pub fn balance_table(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "health {:.2}  checks {}  rebalances {}",
            self.balance.health, self.balance.checks_performed, self.balance.rebalances_triggered
        );
        for status in self.balance.levels.values() {
            let _ = writeln!(out, "  {:<4}{}", status.level.to_string(), status.status);
        }
        out
    }

    pub fn component_table(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{:<10}{:>10}{:>10}{:>10}{:>10}{:>10}{:>8}",
            "filter", "level", "threshold", "received", "forwarded", "filtered", "escal."
        );
        for f in &self.filters {
            let _ = writeln!(
                out,
                "{:<10}{:>10.2}{:>10.2}{:>10}{:>10}{:>10}{:>8}",
                f.boundary.as_str(),
                f.filtering_level,
                f.threshold,
                f.stats.events_received,
                f.stats.forwarded,
                f.stats.filtered,
                f.stats.escalations
            );
        }
        let _ = writeln!(
            out,
            "{:<10}{:>10}{:>10}{:>10}{:>10}",
            "amplifier", "factor", "received", "expanded", "variants"
        );
        for a in &self.amplifiers {
            let _ = writeln!(
                out,
                "{:<10}{:>10.2}{:>10}{:>10}{:>10}",
                a.boundary.as_str(),
                a.amplification_factor,
                a.stats.directives_received,
                a.stats.expanded,
                a.stats.variants_published
            );
        }
        out
    }

    pub fn alert_list(&self) -> String {
        let mut out = String::new();
        if self.balance.recent_alerts.is_empty() {
            out.push_str("  (none)\n");
        }
        for alert in &self.balance.recent_alerts {
            let _ = writeln!(out, "  {} {}", alert.timestamp.format("%H:%M:%S%.3f"), alert.message);
        }
        for (level, call) in &self.escalations {
            let line = match call {
                EscalationCall::Dampen { context, pattern_type, significance } => format!(
                    "  escalated to {level}: dampen {pattern_type} in {context} ({significance:.2})"
                ),
                EscalationCall::Policy { context, significance } => format!(
                    "  escalated to {level}: policy for {context} ({significance:.2})"
                ),
            };
            out.push_str(&line);
            out.push('\n');
        }
        for (component, restarts) in &self.restarts {
            let _ = writeln!(out, "  {component} restarted {restarts} time(s)");
        }
        out
    }
}

impl Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "== Metrics after {} round(s) ==", self.rounds)?;
        write!(f, "{}", self.metrics_table())?;
        writeln!(f, "\n== Balance ==")?;
        write!(f, "{}", self.balance_table())?;
        writeln!(f, "\n== Components ==")?;
        write!(f, "{}", self.component_table())?;
        writeln!(f, "\n== Alerts and escalations ==")?;
        write!(f, "{}", self.alert_list())
    }
}
