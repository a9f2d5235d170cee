//! Engine status, cycle outcomes and broadcast events.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  SyncStatus: engine lifecycle                                   │
//! │  Uninitialized → Initializing → Idle ⇄ Syncing                  │
//! │                                                                 │
//! │  SyncEvent: notifications for UI / status surfaces              │
//! │  ├── StatusChanged: lifecycle transition                        │
//! │  ├── CycleCompleted: push + pull finished, cursor advanced      │
//! │  ├── CycleSkipped: offline, or another cycle in flight          │
//! │  └── CycleFailed: cycle aborted, cursor untouched               │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of the sync engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Schema not bootstrapped yet (or the last attempt failed)
    #[default]
    Uninitialized,
    /// Opening the store and applying the schema
    Initializing,
    /// Ready; no cycle running
    Idle,
    /// A push/pull cycle is running
    Syncing,
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncStatus::Uninitialized => write!(f, "Uninitialized"),
            SyncStatus::Initializing => write!(f, "Initializing"),
            SyncStatus::Idle => write!(f, "Idle"),
            SyncStatus::Syncing => write!(f, "Syncing"),
        }
    }
}

/// Why a requested cycle did not run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Reachability reported no connection
    Offline,
    /// Another cycle was already running
    InProgress,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Offline => write!(f, "offline"),
            SkipReason::InProgress => write!(f, "sync already in progress"),
        }
    }
}

/// Row counts of one completed cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleReport {
    pub started_at: String,
    /// Completion time; becomes the next pull low-water mark
    pub completed_at: String,
    /// Rows pushed per table
    pub pushed: BTreeMap<String, usize>,
    /// Rows pulled per table
    pub pulled: BTreeMap<String, usize>,
}

impl CycleReport {
    pub fn new(started_at: String) -> Self {
        Self {
            started_at,
            ..Default::default()
        }
    }

    pub fn total_pushed(&self) -> usize {
        self.pushed.values().sum()
    }

    pub fn total_pulled(&self) -> usize {
        self.pulled.values().sum()
    }

    pub(crate) fn record_push(&mut self, table: &str, rows: usize) {
        *self.pushed.entry(table.to_string()).or_default() += rows;
    }

    pub(crate) fn record_pull(&mut self, table: &str, rows: usize) {
        *self.pulled.entry(table.to_string()).or_default() += rows;
    }
}

/// Result of a [`sync_data`](crate::SyncEngine::sync_data) call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Completed(CycleReport),
    Skipped(SkipReason),
    /// The cycle aborted on a remote or data error; already-applied batches
    /// stay applied and the cursor did not move
    Failed(String),
}

impl SyncOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, SyncOutcome::Completed(_))
    }
}

/// Events emitted by the sync engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEvent {
    StatusChanged { status: SyncStatus },
    CycleCompleted { report: CycleReport },
    CycleSkipped { reason: SkipReason },
    CycleFailed { message: String },
}
