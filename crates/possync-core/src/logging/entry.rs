//! One line of a device's JSONL log.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::now_iso;

/// A tracing event as written to disk.
///
/// Lines are self-contained, so `jq` or the CLI can read a file while the
/// writer is still appending to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Millisecond UTC timestamp
    pub ts: String,
    pub level: String,
    pub device: String,
    /// Module path, e.g. `possync_core::sync::engine`
    pub target: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub fields: Map<String, Value>,
    /// Enclosing spans, outermost first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub spans: Vec<String>,
}

impl LogEntry {
    pub fn new(
        level: impl Into<String>,
        device: impl Into<String>,
        target: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            ts: now_iso(),
            level: level.into(),
            device: device.into(),
            target: target.into(),
            message: message.into(),
            fields: Map::new(),
            spans: Vec::new(),
        }
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Table the event is about, for entries logged per table.
    pub fn table(&self) -> Option<&str> {
        self.field("table").and_then(Value::as_str)
    }

    /// Serialize as a single line, without the trailing newline.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl FromStr for LogEntry {
    type Err = serde_json::Error;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        serde_json::from_str(line)
    }
}
