//! Configuration for the sync engine and the command-line shell.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{SyncError, SyncResult};

/// Default interval between periodic sync cycles (5 minutes)
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_millis(300_000);
/// Default number of rows per push upsert / pull apply batch
pub const DEFAULT_BATCH_SIZE: usize = 100;
/// Pull cursor used before the first successful cycle
pub const DEFAULT_LOW_WATER_MARK: &str = "1970-01-01";

/// File name of the app config inside the data directory
pub const CONFIG_FILE: &str = "config.json";

/// Tunables for [`SyncEngine`](crate::SyncEngine)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Interval between timer-triggered cycles
    #[serde(rename = "interval_ms", with = "duration_ms")]
    pub interval: Duration,
    /// Rows per batch, for both push and pull
    pub batch_size: usize,
    /// Pull low-water mark used until the first successful cycle
    pub low_water_mark: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_SYNC_INTERVAL,
            batch_size: DEFAULT_BATCH_SIZE,
            low_water_mark: DEFAULT_LOW_WATER_MARK.to_string(),
        }
    }
}

impl SyncConfig {
    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> SyncResult<()> {
        if self.batch_size == 0 {
            return Err(SyncError::Config("batch_size must be at least 1".into()));
        }
        if self.interval.is_zero() {
            return Err(SyncError::Config("interval_ms must be positive".into()));
        }
        Ok(())
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }
}

/// Connection settings for the remote record store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Base URL of the backend, e.g. `https://xyz.example.co`
    pub url: Option<String>,
    /// Public API key sent with every request
    pub api_key: Option<String>,
    /// Timeout of the reachability probe
    pub probe_timeout_ms: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            url: None,
            api_key: None,
            probe_timeout_ms: 3_000,
        }
    }
}

impl RemoteConfig {
    pub fn is_configured(&self) -> bool {
        self.url.as_deref().is_some_and(|u| !u.trim().is_empty())
    }
}

/// Application configuration persisted as `config.json` in the data dir
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Database file name, relative to the data directory
    pub database_file: String,
    /// Name stamped into JSONL log file names
    pub device_name: String,
    pub remote: RemoteConfig,
    pub sync: SyncConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_file: "pos_local.db".to_string(),
            device_name: "device".to_string(),
            remote: RemoteConfig::default(),
            sync: SyncConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load `config.json` from `data_dir`, falling back to defaults when the
    /// file does not exist.
    pub fn load(data_dir: impl AsRef<Path>) -> SyncResult<Self> {
        let path = data_dir.as_ref().join(CONFIG_FILE);
        if !path.exists() {
            debug!(?path, "No config file, using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(&path)?;
        let config: AppConfig = serde_json::from_str(&raw)?;
        config.sync.validate()?;
        Ok(config)
    }

    /// Write the config as pretty JSON into `data_dir`.
    pub fn save(&self, data_dir: impl AsRef<Path>) -> SyncResult<PathBuf> {
        let data_dir = data_dir.as_ref();
        std::fs::create_dir_all(data_dir)?;
        let path = data_dir.join(CONFIG_FILE);
        std::fs::write(&path, serde_json::to_string_pretty(self)?)?;
        Ok(path)
    }

    pub fn database_path(&self, data_dir: impl AsRef<Path>) -> PathBuf {
        data_dir.as_ref().join(&self.database_file)
    }
}

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
