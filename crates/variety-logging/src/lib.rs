//! Structured logging setup for the variety engine
//!
//! Every component logs through `tracing` with structured fields
//! (`boundary`, `level`, `context`, ...) inside a span named after the
//! actor. This crate decides where those records go.
//!
//! ```ignore
//! use variety_logging::{Component, LogConfig, VarietySubscriberBuilder};
//!
//! // JSON lines on the console
//! VarietySubscriberBuilder::new().init();
//!
//! // Only the balance monitor at debug
//! VarietySubscriberBuilder::new()
//!     .with_config(LogConfig::testing().with_component(Component::Monitor, "debug"))
//!     .init();
//! ```

pub mod config;

pub use config::{Component, ConsoleFormat, FileConfig, FileRotation, JsonFields, LogConfig};

use std::fs::{self, File};

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, Layer, Registry};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Builder for the global subscriber
pub struct VarietySubscriberBuilder {
    config: LogConfig,
}

impl VarietySubscriberBuilder {
    pub fn new() -> Self {
        Self {
            config: LogConfig::default(),
        }
    }

    pub fn with_config(mut self, config: LogConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the base level, keeping component overrides
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.config.level = level.into();
        self
    }

    /// Turn console output off, or back on as JSON lines
    pub fn with_console(mut self, enabled: bool) -> Self {
        self.config.console = match (enabled, self.config.console) {
            (false, _) => ConsoleFormat::Off,
            (true, ConsoleFormat::Off) => ConsoleFormat::Json,
            (true, format) => format,
        };
        self
    }

    pub fn with_file_output(mut self, config: FileConfig) -> Self {
        self.config.file = Some(config);
        self
    }

    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    /// Install the subscriber globally
    ///
    /// Keep the returned guard alive for as long as file output is wanted.
    ///
    /// # Panics
    ///
    /// Panics if a global subscriber has already been set.
    pub fn init(self) -> Option<WorkerGuard> {
        let (layers, filter, guard) = self.build();
        Registry::default().with(layers).with(filter).init();
        guard
    }

    /// Install the subscriber unless one is already set
    pub fn try_init(self) -> Result<Option<WorkerGuard>, TryInitError> {
        let (layers, filter, guard) = self.build();
        Registry::default().with(layers).with(filter).try_init()?;
        Ok(guard)
    }

    fn build(self) -> (Vec<BoxedLayer>, EnvFilter, Option<WorkerGuard>) {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.config.filter_directives()));

        let mut layers: Vec<BoxedLayer> = Vec::new();
        if let Some(layer) = console_layer(&self.config) {
            layers.push(layer);
        }

        let mut guard = None;
        if let Some(file) = &self.config.file {
            match file_writer(file) {
                Ok((writer, file_guard)) => {
                    layers.push(json_layer(self.config.json, Some(writer)));
                    guard = Some(file_guard);
                }
                Err(e) => eprintln!(
                    "variety-logging: cannot open log file in {}: {}",
                    file.directory.display(),
                    e
                ),
            }
        }

        (layers, filter, guard)
    }
}

impl Default for VarietySubscriberBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn console_layer(config: &LogConfig) -> Option<BoxedLayer> {
    let layer = match config.console {
        ConsoleFormat::Off => return None,
        ConsoleFormat::Json => json_layer(config.json, None),
        ConsoleFormat::Compact { ansi } => tracing_subscriber::fmt::layer()
            .compact()
            .with_ansi(ansi)
            .with_target(false)
            .boxed(),
        ConsoleFormat::Pretty { ansi } => tracing_subscriber::fmt::layer()
            .pretty()
            .with_ansi(ansi)
            .with_target(true)
            .boxed(),
    };
    Some(layer)
}

fn json_layer(fields: JsonFields, writer: Option<NonBlocking>) -> BoxedLayer {
    let layer = tracing_subscriber::fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(fields.spans)
        .flatten_event(fields.flatten)
        .with_file(fields.location)
        .with_line_number(fields.location);

    match writer {
        Some(writer) => layer.with_writer(writer).boxed(),
        None => layer.boxed(),
    }
}

fn file_writer(config: &FileConfig) -> std::io::Result<(NonBlocking, WorkerGuard)> {
    fs::create_dir_all(&config.directory)?;
    let rotation = match config.rotation {
        FileRotation::Never => {
            let path = config.directory.join(format!("{}.log", config.prefix));
            return Ok(tracing_appender::non_blocking(File::create(path)?));
        }
        FileRotation::Daily => Rotation::DAILY,
        FileRotation::Hourly => Rotation::HOURLY,
    };
    let appender = RollingFileAppender::new(rotation, &config.directory, &config.prefix);
    Ok(tracing_appender::non_blocking(appender))
}

/// JSON lines on the console at `info`
pub fn init_default() {
    VarietySubscriberBuilder::new().init();
}

/// Pretty console output at `debug`
pub fn init_development() {
    VarietySubscriberBuilder::new()
        .with_config(LogConfig::development())
        .init();
}

/// Warnings only; safe to call from every test
pub fn init_testing() {
    let _ = VarietySubscriberBuilder::new()
        .with_config(LogConfig::testing())
        .try_init();
}
