//! Logging configuration
//!
//! A [`LogConfig`] is a base level, a console format, an optional rolling
//! file, and per-component overrides so one part of the engine (say the
//! balance monitor) can be traced at `debug` while the rest stays quiet.

use std::collections::BTreeMap;
use std::fmt::{self, Display};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Engine components that can be given their own log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    Core,
    Filter,
    Amplifier,
    Metrics,
    Monitor,
    Supervisor,
    Engine,
    Simulation,
}

impl Component {
    pub const ALL: [Component; 8] = [
        Component::Core,
        Component::Filter,
        Component::Amplifier,
        Component::Metrics,
        Component::Monitor,
        Component::Supervisor,
        Component::Engine,
        Component::Simulation,
    ];

    /// The `tracing` target prefix of the component's module
    pub fn target(self) -> &'static str {
        match self {
            Component::Core => "variety_core",
            Component::Filter => "variety_engine::filter",
            Component::Amplifier => "variety_engine::amplifier",
            Component::Metrics => "variety_engine::metrics",
            Component::Monitor => "variety_engine::monitor",
            Component::Supervisor => "variety_engine::supervisor",
            Component::Engine => "variety_engine::engine",
            Component::Simulation => "variety_simulation",
        }
    }
}

impl Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.target())
    }
}

/// How records are written to stderr/stdout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "format", rename_all = "snake_case")]
pub enum ConsoleFormat {
    Off,
    /// One JSON object per line
    #[default]
    Json,
    /// Human-readable, one record per line
    Compact { ansi: bool },
    /// Human-readable, multi-line with span context
    Pretty { ansi: bool },
}

impl ConsoleFormat {
    pub fn is_enabled(self) -> bool {
        self != ConsoleFormat::Off
    }
}

/// Main logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Base level; `RUST_LOG` overrides the whole filter when set
    pub level: String,
    pub console: ConsoleFormat,
    /// Rolling JSONL file output
    #[serde(default)]
    pub file: Option<FileConfig>,
    #[serde(default)]
    pub json: JsonFields,
    #[serde(default)]
    pub components: BTreeMap<Component, String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            console: ConsoleFormat::Json,
            file: None,
            json: JsonFields::default(),
            components: BTreeMap::new(),
        }
    }
}

impl LogConfig {
    /// Verbose pretty console output
    pub fn development() -> Self {
        Self {
            level: "debug".to_string(),
            console: ConsoleFormat::Pretty { ansi: true },
            ..Default::default()
        }
    }

    /// JSONL file output only, rotated daily
    pub fn production(log_dir: PathBuf) -> Self {
        Self {
            console: ConsoleFormat::Off,
            file: Some(FileConfig {
                directory: log_dir,
                ..FileConfig::default()
            }),
            ..Default::default()
        }
    }

    /// Warnings only, compact and uncoloured
    pub fn testing() -> Self {
        Self {
            level: "warn".to_string(),
            console: ConsoleFormat::Compact { ansi: false },
            ..Default::default()
        }
    }

    /// Quiet except for the components that take and apply corrections
    pub fn tuning() -> Self {
        Self {
            level: "warn".to_string(),
            console: ConsoleFormat::Compact { ansi: true },
            ..Default::default()
        }
        .with_component(Component::Monitor, "debug")
        .with_component(Component::Filter, "info")
        .with_component(Component::Amplifier, "info")
    }

    pub fn with_component(mut self, component: Component, level: impl Into<String>) -> Self {
        self.components.insert(component, level.into());
        self
    }

    /// The directive string handed to `EnvFilter`
    pub fn filter_directives(&self) -> String {
        let mut directives = self.level.clone();
        for (component, level) in &self.components {
            directives.push(',');
            directives.push_str(component.target());
            directives.push('=');
            directives.push_str(level);
        }
        directives
    }
}

/// Rolling file output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileConfig {
    pub directory: PathBuf,
    pub prefix: String,
    pub rotation: FileRotation,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("./logs"),
            prefix: "variety".to_string(),
            rotation: FileRotation::Daily,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FileRotation {
    #[default]
    Daily,
    Hourly,
    /// One file, truncated at startup
    Never,
}

/// Which extras a JSON record carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonFields {
    /// Event fields at the top level instead of under `fields`
    pub flatten: bool,
    /// The full span stack (boundary, component) on every record
    pub spans: bool,
    pub location: bool,
}

impl Default for JsonFields {
    fn default() -> Self {
        Self {
            flatten: true,
            spans: true,
            location: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets() {
        assert_eq!(LogConfig::default().console, ConsoleFormat::Json);
        assert_eq!(LogConfig::development().level, "debug");
        assert!(!LogConfig::production(PathBuf::from("/var/log/variety"))
            .console
            .is_enabled());
        assert_eq!(
            LogConfig::testing().console,
            ConsoleFormat::Compact { ansi: false }
        );
    }

    #[test]
    fn test_component_overrides_in_directives() {
        assert_eq!(LogConfig::default().filter_directives(), "info");
        assert_eq!(
            LogConfig::tuning().filter_directives(),
            "warn,variety_engine::filter=info,variety_engine::amplifier=info,variety_engine::monitor=debug"
        );
    }

    #[test]
    fn test_config_from_json() {
        let config: LogConfig = serde_json::from_str(
            r#"{
                "level": "info",
                "console": {"format": "pretty", "ansi": false},
                "components": {"supervisor": "trace"}
            }"#,
        )
        .unwrap();
        assert_eq!(config.console, ConsoleFormat::Pretty { ansi: false });
        assert!(config.file.is_none());
        assert_eq!(config.json, JsonFields::default());
        assert_eq!(
            config.filter_directives(),
            "info,variety_engine::supervisor=trace"
        );
    }
}
