//! Append-only JSONL writer, one file per device per day.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use super::entry::LogEntry;

/// Appends entries to `<log_dir>/raw/<date>_<device>.jsonl`.
pub struct DeviceLogWriter {
    device: String,
    writer: Mutex<BufWriter<File>>,
    path: PathBuf,
}

impl DeviceLogWriter {
    /// Open (or create) today's log file for `device`.
    pub fn new(log_dir: impl AsRef<Path>, device: impl Into<String>) -> io::Result<Self> {
        let device = device.into();
        let raw_dir = log_dir.as_ref().join("raw");
        fs::create_dir_all(&raw_dir)?;

        let date = chrono::Local::now().format("%Y-%m-%d");
        let path = raw_dir.join(format!("{}_{}.jsonl", date, device));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            device,
            writer: Mutex::new(BufWriter::new(file)),
            path,
        })
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry as a single line and flush.
    pub fn write(&self, entry: &LogEntry) -> io::Result<()> {
        let line = entry
            .encode()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let mut writer = self.writer.lock();
        writeln!(writer, "{}", line)?;
        writer.flush()
    }

    pub fn flush(&self) -> io::Result<()> {
        self.writer.lock().flush()
    }
}

impl Drop for DeviceLogWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

/// Every parseable entry under `<log_dir>/raw`, sorted by timestamp.
///
/// Lines that fail to parse are skipped.
pub fn read_entries(log_dir: impl AsRef<Path>) -> io::Result<Vec<LogEntry>> {
    let raw_dir = log_dir.as_ref().join("raw");
    if !raw_dir.exists() {
        return Ok(Vec::new());
    }

    let mut entries = Vec::new();
    for dir_entry in fs::read_dir(&raw_dir)? {
        let path = dir_entry?.path();
        if path.extension().is_some_and(|e| e == "jsonl") {
            let content = fs::read_to_string(&path)?;
            entries.extend(
                content
                    .lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .filter_map(|l| l.parse::<LogEntry>().ok()),
            );
        }
    }
    entries.sort_by(|a, b| a.ts.cmp(&b.ts));
    Ok(entries)
}
