//! Per-device JSONL logging.
//!
//! Each device appends to `<log_dir>/raw/<date>_<device>.jsonl`, so logs
//! from several tills can be collected into one directory and merged with
//! [`read_entries`]. Failed cycles across every device:
//!
//! ```text
//! jq 'select(.message == "Sync cycle failed")' logs/raw/*.jsonl
//! ```
//!
//! Installed by the CLI through [`LoggingBuilder`]:
//! `LoggingBuilder::new("possync_core=info").jsonl("./logs", "till-1").init()`.

pub mod entry;
pub mod layer;
pub mod writer;

pub use entry::LogEntry;
pub use layer::{JsonlLayer, LoggingBuilder};
pub use writer::{read_entries, DeviceLogWriter};
