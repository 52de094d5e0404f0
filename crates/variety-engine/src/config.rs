//! Configuration for the variety engine
//!
//! All durations serialize as whole milliseconds so a config file reads
//! `"aggregation_window": 5000`.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use variety_core::{Boundary, DEFAULT_ESCALATION_TIMEOUT};

use crate::error::{EngineError, EngineResult};

/// Default aggregation window for the S1→S2 filter
pub const DEFAULT_AGGREGATION_WINDOW: Duration = Duration::from_millis(5000);

/// Default tick for the transforming filters (S2→S3 and up)
pub const DEFAULT_TRANSFORM_TICK: Duration = Duration::from_millis(10_000);

/// Default amplifier expansion tick
pub const DEFAULT_AMPLIFIER_TICK: Duration = Duration::from_millis(2000);

/// Default balance check interval
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_millis(10_000);

/// Default metrics sampling window
pub const DEFAULT_SAMPLE_WINDOW: Duration = Duration::from_millis(10_000);

/// Default balance alert threshold
pub const DEFAULT_ALERT_THRESHOLD: f64 = 0.3;

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

/// Per-boundary filter configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Significance cutoff (0, 1]
    pub threshold: f64,
    /// Aggregation window; also the tick period
    #[serde(with = "duration_ms")]
    pub aggregation_window: Duration,
}

impl FilterConfig {
    /// Defaults for a filter boundary
    pub fn for_boundary(boundary: Boundary) -> Self {
        let (threshold, aggregation_window) = match boundary {
            Boundary::S1ToS2 => (0.5, DEFAULT_AGGREGATION_WINDOW),
            Boundary::S2ToS3 => (0.5, DEFAULT_TRANSFORM_TICK),
            Boundary::S3ToS4 => (0.6, DEFAULT_TRANSFORM_TICK),
            _ => (0.8, DEFAULT_TRANSFORM_TICK),
        };
        Self {
            threshold,
            aggregation_window,
        }
    }
}

/// Per-boundary amplifier configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AmplifierConfig {
    /// Directives at or above this significance are expanded
    pub threshold: f64,
    /// Expansion tick
    #[serde(with = "duration_ms")]
    pub tick_interval: Duration,
}

impl Default for AmplifierConfig {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            tick_interval: DEFAULT_AMPLIFIER_TICK,
        }
    }
}

/// Metrics collector configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Sampling window; velocity compares consecutive windows
    #[serde(with = "duration_ms")]
    pub sample_window: Duration,
    /// Fraction of each counter kept when a window closes (1.0 = cumulative)
    pub retain_fraction: f64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            sample_window: DEFAULT_SAMPLE_WINDOW,
            retain_fraction: 0.5,
        }
    }
}

/// Balance monitor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(with = "duration_ms")]
    pub check_interval: Duration,
    pub alert_threshold: f64,
    /// Consecutive non-balanced checks after which a level's correction is
    /// re-issued every cycle
    ///
    /// Only timer and forced checks count; evaluations prompted by a
    /// `metrics-update` neither extend nor start a streak.
    pub sustained_checks: u32,
    /// Status history entries kept
    pub history_limit: usize,
    /// Alerts kept
    pub alert_limit: usize,
    /// Alerts surfaced by the status API
    pub surfaced_alerts: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            check_interval: DEFAULT_CHECK_INTERVAL,
            alert_threshold: DEFAULT_ALERT_THRESHOLD,
            sustained_checks: 3,
            history_limit: 100,
            alert_limit: 100,
            surfaced_alerts: 10,
        }
    }
}

/// Restart policy for supervised components
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Restarts allowed per component before it is abandoned
    pub max_restarts: u32,
    /// First restart delay; doubles per restart up to 2^6 times this
    #[serde(with = "duration_ms")]
    pub backoff_base: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_restarts: 10,
            backoff_base: Duration::from_millis(100),
        }
    }
}

/// Configuration for a [`VarietyEngine`](crate::VarietyEngine)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub filters: BTreeMap<Boundary, FilterConfig>,
    pub amplifiers: BTreeMap<Boundary, AmplifierConfig>,
    pub metrics: MetricsConfig,
    pub monitor: MonitorConfig,
    pub supervisor: SupervisorConfig,
    /// Bound on synchronous escalation calls
    #[serde(with = "duration_ms")]
    pub escalation_timeout: Duration,
    /// Capacity of each component's command channel
    pub command_channel_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            filters: Boundary::FILTERS
                .into_iter()
                .map(|b| (b, FilterConfig::for_boundary(b)))
                .collect(),
            amplifiers: Boundary::AMPLIFIERS
                .into_iter()
                .map(|b| (b, AmplifierConfig::default()))
                .collect(),
            metrics: MetricsConfig::default(),
            monitor: MonitorConfig::default(),
            supervisor: SupervisorConfig::default(),
            escalation_timeout: DEFAULT_ESCALATION_TIMEOUT,
            command_channel_capacity: 1024,
        }
    }
}

impl EngineConfig {
    /// Short windows for interactive runs and demos
    pub fn responsive() -> Self {
        let mut config = Self::default();
        for filter in config.filters.values_mut() {
            filter.aggregation_window = Duration::from_millis(1000);
        }
        for amplifier in config.amplifiers.values_mut() {
            amplifier.tick_interval = Duration::from_millis(500);
        }
        config.metrics.sample_window = Duration::from_millis(2000);
        config.monitor.check_interval = Duration::from_millis(2000);
        config.escalation_timeout = Duration::from_millis(250);
        config
    }

    /// Timers long enough that tests drive every tick by hand
    pub fn testing() -> Self {
        let idle = Duration::from_secs(3600);
        let mut config = Self::default();
        for filter in config.filters.values_mut() {
            filter.aggregation_window = idle;
        }
        for amplifier in config.amplifiers.values_mut() {
            amplifier.tick_interval = idle;
        }
        config.metrics.sample_window = idle;
        config.metrics.retain_fraction = 1.0;
        config.monitor.check_interval = idle;
        config.supervisor.backoff_base = Duration::from_millis(10);
        config.escalation_timeout = Duration::from_millis(200);
        config
    }

    /// Load a JSON config file
    pub fn from_json_file(path: impl AsRef<Path>) -> EngineResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|e| EngineError::Config(format!("{}: {}", path.as_ref().display(), e)))?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> EngineResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json_pretty(&self) -> EngineResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Filter settings for a boundary, falling back to its defaults
    pub fn filter(&self, boundary: Boundary) -> FilterConfig {
        self.filters
            .get(&boundary)
            .cloned()
            .unwrap_or_else(|| FilterConfig::for_boundary(boundary))
    }

    /// Amplifier settings for a boundary, falling back to defaults
    pub fn amplifier(&self, boundary: Boundary) -> AmplifierConfig {
        self.amplifiers.get(&boundary).cloned().unwrap_or_default()
    }

    pub fn with_monitor(mut self, monitor: MonitorConfig) -> Self {
        self.monitor = monitor;
        self
    }

    pub fn with_metrics(mut self, metrics: MetricsConfig) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_filter(mut self, boundary: Boundary, filter: FilterConfig) -> Self {
        self.filters.insert(boundary, filter);
        self
    }

    pub fn with_amplifier(mut self, boundary: Boundary, amplifier: AmplifierConfig) -> Self {
        self.amplifiers.insert(boundary, amplifier);
        self
    }

    pub fn with_escalation_timeout(mut self, timeout: Duration) -> Self {
        self.escalation_timeout = timeout;
        self
    }

    /// Check configuration invariants
    ///
    /// An empty list means the configuration is valid. Out-of-range values
    /// are still clamped at runtime.
    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        for (boundary, filter) in &self.filters {
            if !boundary.is_filter() {
                warnings.push(ConfigWarning::WrongBoundaryDirection(*boundary));
            }
            if !(filter.threshold > 0.0 && filter.threshold <= 1.0) {
                warnings.push(ConfigWarning::ThresholdOutOfRange(*boundary));
            }
            if filter.aggregation_window.is_zero() {
                warnings.push(ConfigWarning::ZeroInterval(boundary.as_str()));
            }
        }

        for (boundary, amplifier) in &self.amplifiers {
            if !boundary.is_amplifier() {
                warnings.push(ConfigWarning::WrongBoundaryDirection(*boundary));
            }
            if !(amplifier.threshold > 0.0 && amplifier.threshold <= 1.0) {
                warnings.push(ConfigWarning::ThresholdOutOfRange(*boundary));
            }
            if amplifier.tick_interval.is_zero() {
                warnings.push(ConfigWarning::ZeroInterval(boundary.as_str()));
            }
        }

        if self.metrics.sample_window.is_zero() {
            warnings.push(ConfigWarning::ZeroInterval("metrics"));
        }
        if !(0.0..=1.0).contains(&self.metrics.retain_fraction) {
            warnings.push(ConfigWarning::RetainFractionOutOfRange);
        }
        if self.monitor.check_interval.is_zero() {
            warnings.push(ConfigWarning::ZeroInterval("monitor"));
        }
        if !(self.monitor.alert_threshold > 0.0 && self.monitor.alert_threshold < 1.0) {
            warnings.push(ConfigWarning::AlertThresholdOutOfRange);
        }
        if self.command_channel_capacity == 0 {
            warnings.push(ConfigWarning::ZeroChannelCapacity);
        }

        warnings
    }

    /// Check if the configuration is valid (no warnings)
    pub fn is_valid(&self) -> bool {
        self.validate().is_empty()
    }
}

/// Configuration warnings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigWarning {
    /// Filter settings keyed by an amplifier boundary or vice versa
    WrongBoundaryDirection(Boundary),
    /// Threshold outside (0, 1]
    ThresholdOutOfRange(Boundary),
    /// A timer period of zero
    ZeroInterval(&'static str),
    /// Metrics retain fraction outside [0, 1]
    RetainFractionOutOfRange,
    /// Alert threshold outside (0, 1)
    AlertThresholdOutOfRange,
    /// Command channel capacity of zero
    ZeroChannelCapacity,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigWarning::WrongBoundaryDirection(b) => {
                write!(f, "{} configured with settings for the other direction", b)
            }
            ConfigWarning::ThresholdOutOfRange(b) => write!(f, "{} threshold outside (0, 1]", b),
            ConfigWarning::ZeroInterval(name) => {
                write!(f, "{} interval is zero, running at the 1 ms floor", name)
            }
            ConfigWarning::RetainFractionOutOfRange => {
                write!(f, "metrics retain_fraction outside [0, 1]")
            }
            ConfigWarning::AlertThresholdOutOfRange => {
                write!(f, "monitor alert_threshold outside (0, 1)")
            }
            ConfigWarning::ZeroChannelCapacity => write!(f, "command_channel_capacity is zero"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.filters.len(), 4);
        assert_eq!(config.amplifiers.len(), 4);
        assert_eq!(config.filter(Boundary::S1ToS2).aggregation_window, Duration::from_millis(5000));
        assert_eq!(config.filter(Boundary::S4ToS5).threshold, 0.8);
        assert_eq!(config.monitor.check_interval, Duration::from_millis(10_000));
        assert_eq!(config.monitor.alert_threshold, 0.3);
        assert_eq!(config.monitor.history_limit, 100);
        assert_eq!(config.monitor.surfaced_alerts, 10);
    }

    #[test]
    fn test_preset_configs_are_valid() {
        assert!(EngineConfig::default().is_valid());
        assert!(EngineConfig::responsive().is_valid());
        assert!(EngineConfig::testing().is_valid());
    }

    #[test]
    fn test_invalid_config_detected() {
        let mut config = EngineConfig::default();
        config.filters.get_mut(&Boundary::S1ToS2).unwrap().threshold = 0.0;
        config.monitor.alert_threshold = 1.5;
        config.amplifiers.insert(Boundary::S1ToS2, AmplifierConfig::default());

        let warnings = config.validate();
        assert!(warnings.contains(&ConfigWarning::ThresholdOutOfRange(Boundary::S1ToS2)));
        assert!(warnings.contains(&ConfigWarning::AlertThresholdOutOfRange));
        assert!(warnings.contains(&ConfigWarning::WrongBoundaryDirection(Boundary::S1ToS2)));
    }

    #[test]
    fn test_json_roundtrip_uses_milliseconds() {
        let config = EngineConfig::default();
        let json = config.to_json_pretty().unwrap();
        assert!(json.contains("\"aggregation_window\": 5000"));
        assert!(json.contains("\"s1_to_s2\""));

        let back = EngineConfig::from_json_str(&json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_missing_boundary_falls_back_to_defaults() {
        let mut config = EngineConfig::default();
        config.filters.clear();
        assert_eq!(config.filter(Boundary::S3ToS4), FilterConfig::for_boundary(Boundary::S3ToS4));
        config.amplifiers.clear();
        assert_eq!(config.amplifier(Boundary::S2ToS1), AmplifierConfig::default());
    }

    #[test]
    fn test_malformed_json_is_config_error() {
        let err = EngineConfig::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }
}
