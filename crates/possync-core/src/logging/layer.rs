//! `tracing` layer that mirrors events into the device's JSONL file.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, Layer};

use super::entry::LogEntry;
use super::writer::DeviceLogWriter;

pub struct JsonlLayer {
    writer: Arc<DeviceLogWriter>,
}

impl JsonlLayer {
    pub fn new(log_dir: impl AsRef<Path>, device: impl Into<String>) -> std::io::Result<Self> {
        Ok(Self {
            writer: Arc::new(DeviceLogWriter::new(log_dir, device)?),
        })
    }

    pub fn log_path(&self) -> &Path {
        self.writer.path()
    }
}

impl<S> Layer<S> for JsonlLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let mut entry = LogEntry::new(
            metadata.level().as_str().to_lowercase(),
            self.writer.device(),
            metadata.target(),
            visitor.message.unwrap_or_default(),
        );
        entry.fields = visitor.fields;
        if let Some(scope) = ctx.event_scope(event) {
            entry.spans = scope.from_root().map(|span| span.name().to_string()).collect();
        }

        // Dropped on write failure.
        let _ = self.writer.write(&entry);
    }
}

#[derive(Default)]
struct FieldVisitor {
    message: Option<String>,
    fields: Map<String, Value>,
}

impl FieldVisitor {
    fn put(&mut self, field: &Field, value: Value) {
        if field.name() == "message" {
            self.message = Some(match value {
                Value::String(s) => s,
                other => other.to_string(),
            });
        } else {
            self.fields.insert(field.name().to_string(), value);
        }
    }
}

impl Visit for FieldVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let mut buf = String::new();
        let _ = write!(buf, "{:?}", value);
        self.put(field, Value::String(buf));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.put(field, Value::String(value.to_string()));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.put(field, value.into());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.put(field, value.into());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.put(field, value.into());
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        if let Some(n) = serde_json::Number::from_f64(value) {
            self.put(field, Value::Number(n));
        }
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.put(field, Value::String(value.to_string()));
    }
}

/// Installs the global subscriber: env filter, console output and an
/// optional JSONL file per device.
pub struct LoggingBuilder {
    filter: String,
    log_dir: Option<PathBuf>,
    device: String,
    console: bool,
}

impl LoggingBuilder {
    /// `filter` is the default directive, overridden by `RUST_LOG`.
    pub fn new(filter: impl Into<String>) -> Self {
        Self {
            filter: filter.into(),
            log_dir: None,
            device: "device".to_string(),
            console: true,
        }
    }

    pub fn jsonl(mut self, log_dir: impl Into<PathBuf>, device: impl Into<String>) -> Self {
        self.log_dir = Some(log_dir.into());
        self.device = device.into();
        self
    }

    pub fn no_console(mut self) -> Self {
        self.console = false;
        self
    }

    /// Build the JSONL layer alone, for manual composition.
    pub fn build_layer(&self) -> std::io::Result<Option<JsonlLayer>> {
        self.log_dir
            .as_ref()
            .map(|dir| JsonlLayer::new(dir, &self.device))
            .transpose()
    }

    /// Install as the global default. Returns false if a subscriber was
    /// already installed.
    pub fn init(self) -> std::io::Result<bool> {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.filter));
        let console = self
            .console
            .then(|| tracing_subscriber::fmt::layer().with_target(false).with_writer(std::io::stderr));
        let jsonl = self.build_layer()?;

        Ok(tracing_subscriber::registry()
            .with(filter)
            .with(console)
            .with(jsonl)
            .try_init()
            .is_ok())
    }
}
