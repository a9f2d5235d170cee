//! SyncEngine - reconciles the local store with the remote record store
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use possync_core::{LocalStore, ManualReachability, MemoryRemote, SyncConfig, SyncEngine};
//!
//! let store = Arc::new(LocalStore::new("~/.possync/data/pos_local.db"));
//! let engine = Arc::new(SyncEngine::new(
//!     store,
//!     Arc::new(MemoryRemote::new()),
//!     Arc::new(ManualReachability::default()),
//!     SyncConfig::default(),
//! )?);
//!
//! // Immediate cycle, then one every five minutes
//! engine.start_sync().await?;
//!
//! // Later
//! engine.stop_sync();
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use futures::future::try_join_all;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{broadcast, OnceCell};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::adapter::{strip_columns, ChangeTracking, RowKey, TableAdapter};
use super::events::{CycleReport, SkipReason, SyncEvent, SyncOutcome, SyncStatus};
use super::tables::builtin_adapters;
use crate::config::SyncConfig;
use crate::error::SyncResult;
use crate::reachability::Reachability;
use crate::remote::{Filter, Order, RemoteQuery, RemoteStore};
use crate::schema::{BootstrapReport, SchemaRegistry, TableSchema};
use crate::store::LocalStore;
use crate::types::{now_iso, Row, IS_SYNCED, SYNCED_AT};

/// Default capacity for event broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Armed periodic timer
struct Timer {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Releases the in-progress flag when a cycle ends, however it ends.
struct CycleGuard<'a>(&'a AtomicBool);

impl<'a> CycleGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| CycleGuard(flag))
    }
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Offline-first sync engine
///
/// Owns the local store handle, the table list and the periodic timer.
/// Share it as `Arc<SyncEngine>`; the timer and the reachability follower
/// only hold weak references.
pub struct SyncEngine {
    store: Arc<LocalStore>,
    schema: SchemaRegistry,
    adapters: Vec<Arc<dyn TableAdapter>>,
    remote: Arc<dyn RemoteStore>,
    reachability: Arc<dyn Reachability>,
    config: SyncConfig,
    init: OnceCell<BootstrapReport>,
    in_progress: AtomicBool,
    /// Pull low-water mark; `None` until the first successful cycle
    last_sync: Mutex<Option<String>>,
    timer: Mutex<Option<Timer>>,
    status: Mutex<SyncStatus>,
    event_tx: broadcast::Sender<SyncEvent>,
}

impl SyncEngine {
    /// Create an engine over the built-in tables.
    pub fn new(
        store: Arc<LocalStore>,
        remote: Arc<dyn RemoteStore>,
        reachability: Arc<dyn Reachability>,
        config: SyncConfig,
    ) -> SyncResult<Self> {
        config.validate()?;
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Ok(Self {
            store,
            schema: SchemaRegistry::builtin(),
            adapters: builtin_adapters(),
            remote,
            reachability,
            config,
            init: OnceCell::new(),
            in_progress: AtomicBool::new(false),
            last_sync: Mutex::new(None),
            timer: Mutex::new(None),
            status: Mutex::new(SyncStatus::Uninitialized),
            event_tx,
        })
    }

    /// Replace the table list. Schema tables are created in order; adapters
    /// are synced in order.
    pub fn with_tables(mut self, schema: SchemaRegistry, adapters: Vec<Arc<dyn TableAdapter>>) -> Self {
        self.schema = schema;
        self.adapters = adapters;
        self
    }

    /// Add one syncable table after the built-in ones.
    pub fn register(mut self, table: TableSchema, adapter: Arc<dyn TableAdapter>) -> Self {
        self.schema.push(table);
        self.adapters.push(adapter);
        self
    }

    pub fn store(&self) -> &Arc<LocalStore> {
        &self.store
    }

    pub fn remote(&self) -> &Arc<dyn RemoteStore> {
        &self.remote
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn status(&self) -> SyncStatus {
        *self.status.lock()
    }

    /// Subscribe to engine events
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.event_tx.subscribe()
    }

    /// Completion time of the last successful cycle.
    pub fn last_sync(&self) -> Option<String> {
        self.last_sync.lock().clone()
    }

    /// Whether the periodic timer is armed.
    pub fn is_armed(&self) -> bool {
        self.timer.lock().is_some()
    }

    /// Bootstrap report of the successful initialization, if any.
    pub fn bootstrap_report(&self) -> Option<&BootstrapReport> {
        self.init.get()
    }

    fn set_status(&self, status: SyncStatus) {
        let mut current = self.status.lock();
        if *current != status {
            *current = status;
            drop(current);
            let _ = self.event_tx.send(SyncEvent::StatusChanged { status });
        }
    }

    fn skipped(&self, reason: SkipReason) -> SyncOutcome {
        debug!(%reason, "Sync cycle skipped");
        let _ = self.event_tx.send(SyncEvent::CycleSkipped { reason });
        SyncOutcome::Skipped(reason)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Lifecycle
    // ═══════════════════════════════════════════════════════════════════════

    /// Open the local store and apply the schema, at most once.
    ///
    /// Concurrent callers wait for the same initialization. A failed
    /// attempt leaves the engine uninitialized so the next call retries.
    pub async fn ensure_initialized(&self) -> SyncResult<()> {
        self.init
            .get_or_try_init(|| async {
                info!(tables = self.schema.tables().len(), "Initializing local store");
                self.set_status(SyncStatus::Initializing);
                let result = self
                    .store
                    .initialize()
                    .and_then(|_| self.schema.bootstrap(&self.store));
                match result {
                    Ok(report) => {
                        info!(
                            applied = report.migrations_applied,
                            skipped = report.migrations_skipped,
                            "Local store ready"
                        );
                        self.set_status(SyncStatus::Idle);
                        Ok(report)
                    }
                    Err(e) => {
                        error!(error = %e, "Local store initialization failed");
                        self.set_status(SyncStatus::Uninitialized);
                        Err(e)
                    }
                }
            })
            .await?;
        Ok(())
    }

    /// Run one cycle now, then arm the periodic timer.
    ///
    /// Calling it again replaces the armed timer; timers never stack.
    pub async fn start_sync(self: &Arc<Self>) -> SyncResult<SyncOutcome> {
        self.ensure_initialized().await?;
        let outcome = self.sync_data().await?;
        self.arm_timer();
        Ok(outcome)
    }

    fn arm_timer(self: &Arc<Self>) {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let weak: Weak<SyncEngine> = Arc::downgrade(self);
        let period = self.config.interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let Some(engine) = weak.upgrade() else { break };
                if let Err(e) = engine.sync_data().await {
                    error!(error = %e, "Periodic sync failed");
                }
            }
            debug!("Sync timer stopped");
        });

        if let Some(previous) = self.timer.lock().replace(Timer { cancel, handle }) {
            previous.cancel.cancel();
            debug!("Replaced armed sync timer");
        }
        info!(interval_ms = period.as_millis() as u64, "Sync timer armed");
    }

    /// Disarm the periodic timer. A cycle already running finishes.
    ///
    /// Returns whether a timer was armed.
    pub fn stop_sync(&self) -> bool {
        match self.timer.lock().take() {
            Some(timer) => {
                timer.cancel.cancel();
                info!("Sync timer disarmed");
                true
            }
            None => false,
        }
    }

    /// Disarm the timer and wait for a timer-driven cycle in flight.
    pub async fn shutdown(&self) {
        let timer = self.timer.lock().take();
        if let Some(timer) = timer {
            timer.cancel.cancel();
            if let Err(e) = timer.handle.await {
                warn!(error = %e, "Sync timer task ended abnormally");
            }
        }
        info!("Sync engine shut down");
    }

    /// Arm the timer on every transition to connected and disarm it on
    /// every transition to disconnected.
    pub fn follow_reachability(self: &Arc<Self>) -> JoinHandle<()> {
        let mut rx = self.reachability.subscribe();
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let connected = rx.borrow_and_update().connected;
                let Some(engine) = weak.upgrade() else { break };
                if connected {
                    info!("Network connected, starting sync");
                    if let Err(e) = engine.start_sync().await {
                        error!(error = %e, "Failed to start sync");
                    }
                } else {
                    info!("Network disconnected, stopping sync");
                    engine.stop_sync();
                }
            }
        })
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Cycle
    // ═══════════════════════════════════════════════════════════════════════

    /// Run one push-then-pull cycle.
    ///
    /// Returns `Skipped` when offline or when another cycle is running.
    /// Remote and row-level failures end the cycle as `Failed`; only
    /// local-store failures are returned as errors. The pull cursor
    /// advances only after both phases complete.
    pub async fn sync_data(&self) -> SyncResult<SyncOutcome> {
        let Some(_guard) = CycleGuard::acquire(&self.in_progress) else {
            return Ok(self.skipped(SkipReason::InProgress));
        };

        if !self.reachability.fetch_status().await.connected {
            return Ok(self.skipped(SkipReason::Offline));
        }

        self.ensure_initialized().await?;

        let since = self
            .last_sync
            .lock()
            .clone()
            .unwrap_or_else(|| self.config.low_water_mark.clone());

        info!(%since, "Starting sync cycle");
        self.set_status(SyncStatus::Syncing);
        let mut report = CycleReport::new(now_iso());
        let result = async {
            self.push_local_changes(&mut report).await?;
            self.pull_remote_changes(&since, &mut report).await
        }
        .await;
        self.set_status(SyncStatus::Idle);

        match result {
            Ok(()) => {
                report.completed_at = now_iso();
                *self.last_sync.lock() = Some(report.completed_at.clone());
                info!(
                    pushed = report.total_pushed(),
                    pulled = report.total_pulled(),
                    "Sync completed"
                );
                let _ = self.event_tx.send(SyncEvent::CycleCompleted {
                    report: report.clone(),
                });
                Ok(SyncOutcome::Completed(report))
            }
            Err(e) => {
                let _ = self.event_tx.send(SyncEvent::CycleFailed {
                    message: e.to_string(),
                });
                if e.is_local() {
                    error!(error = %e, "Sync cycle failed on local store");
                    Err(e)
                } else {
                    warn!(error = %e, "Sync cycle failed");
                    Ok(SyncOutcome::Failed(e.to_string()))
                }
            }
        }
    }

    /// Push phase: send dirty (or all, for untracked tables) rows in
    /// batches, clearing dirty flags after each accepted batch.
    ///
    /// Stops at the first rejected batch; earlier batches stay synced.
    pub async fn push_local_changes(&self, report: &mut CycleReport) -> SyncResult<()> {
        for adapter in &self.adapters {
            let table = adapter.name();
            let tracking = adapter.tracking();
            let rows = match tracking {
                ChangeTracking::DirtyFlag => adapter.get_unsynced(&self.store).await?,
                ChangeTracking::FullTable => adapter.get_local(&self.store).await?,
            };
            if rows.is_empty() {
                continue;
            }
            debug!(table, rows = rows.len(), "Pushing local changes");

            for batch in rows.chunks(self.config.batch_size) {
                let keys = batch
                    .iter()
                    .map(|row| RowKey::from_row(table, adapter.key(), row))
                    .collect::<SyncResult<Vec<_>>>()?;
                let revisions: Vec<Option<Value>> = batch
                    .iter()
                    .map(|row| {
                        adapter
                            .revision_column()
                            .map(|column| row.get(column).cloned().unwrap_or(Value::Null))
                    })
                    .collect();
                let payload: Vec<Row> = batch
                    .iter()
                    .map(|row| strip_columns(row, adapter.local_only_columns()))
                    .collect();

                self.remote.upsert(table, payload, adapter.key()).await?;

                if tracking == ChangeTracking::DirtyFlag {
                    let synced_at = now_iso();
                    try_join_all(keys.iter().zip(&revisions).map(|(key, revision)| {
                        adapter.mark_synced(&self.store, key, revision.as_ref(), &synced_at)
                    }))
                    .await?;
                }
                report.record_push(table, batch.len());
            }
        }
        Ok(())
    }

    /// Pull phase: fetch rows changed after `since` (everything, for tables
    /// without a revision column) and upsert them locally as synced.
    pub async fn pull_remote_changes(&self, since: &str, report: &mut CycleReport) -> SyncResult<()> {
        for adapter in &self.adapters {
            let table = adapter.name();
            let query = match adapter.revision_column() {
                Some(column) => RemoteQuery::all()
                    .filter(Filter::gt(column, since))
                    .order_by(Order::asc(column)),
                None => RemoteQuery::all(),
            };

            let rows = self.remote.select(table, &query).await?;
            if rows.is_empty() {
                continue;
            }
            debug!(table, rows = rows.len(), "Pulled remote changes");

            let tracked = adapter.has_is_synced();
            for batch in rows.chunks(self.config.batch_size) {
                let pulled_at = now_iso();
                try_join_all(batch.iter().cloned().map(|mut row| {
                    if tracked {
                        row.insert(IS_SYNCED.to_string(), 1.into());
                        row.insert(SYNCED_AT.to_string(), pulled_at.clone().into());
                    }
                    adapter.upsert_local(&self.store, row)
                }))
                .await?;
                report.record_pull(table, batch.len());
            }
        }
        Ok(())
    }

    /// Rows waiting to be pushed, per flag-tracked table.
    pub async fn pending_changes(&self) -> SyncResult<Vec<(&'static str, usize)>> {
        self.ensure_initialized().await?;
        let mut pending = Vec::new();
        for adapter in &self.adapters {
            if adapter.tracking() == ChangeTracking::DirtyFlag {
                let count = adapter.get_unsynced(&self.store).await?.len();
                pending.push((adapter.name(), count));
            }
        }
        Ok(pending)
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.get_mut().take() {
            timer.cancel.cancel();
        }
    }
}
