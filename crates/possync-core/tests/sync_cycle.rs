//! End-to-end sync cycle tests
//!
//! Drive a real SQLite store against the in-process remote backend.
//!
//! ## What These Tests Verify
//!
//! - Idempotent schema bootstrap across restarts
//! - At most one cycle in flight
//! - Dirty-flag lifecycle and batch partitioning (including partial failure)
//! - Last-write-wins on pull and cursor monotonicity
//! - Offline no-op and local-error propagation
//! - First-user promotion, soft delete, full-table assignment push
//! - Periodic timer replace/stop semantics

use std::sync::Arc;
use std::time::Duration;

use possync_core::remote::RemoteCall;
use possync_core::{
    now_iso, AccountService, AssignmentRole, BranchRepo, LocalStore, ManualReachability,
    MemoryRemote, NetworkStatus, RemoteStore, Role, Row, SkipReason, SyncConfig, SyncEngine,
    SyncError, SyncOutcome, SyncStatus,
};
use serde_json::{json, Value};
use tempfile::tempdir;

struct Harness {
    engine: Arc<SyncEngine>,
    remote: Arc<MemoryRemote>,
    reach: Arc<ManualReachability>,
    store: Arc<LocalStore>,
}

impl Harness {
    async fn new() -> Self {
        Self::with(MemoryRemote::new(), SyncConfig::default()).await
    }

    async fn with(remote: MemoryRemote, config: SyncConfig) -> Self {
        let store = Arc::new(LocalStore::in_memory());
        let remote = Arc::new(remote);
        let reach = Arc::new(ManualReachability::default());
        let engine = Arc::new(
            SyncEngine::new(store.clone(), remote.clone(), reach.clone(), config).unwrap(),
        );
        engine.ensure_initialized().await.unwrap();
        Self {
            engine,
            remote,
            reach,
            store,
        }
    }

    fn insert_dirty_profiles(&self, n: usize) {
        for i in 0..n {
            self.store
                .execute(
                    "INSERT INTO profiles (id, email, role, updated_at, is_synced) VALUES (?, ?, 'user', ?, 0)",
                    &[
                        format!("p{:03}", i).into(),
                        format!("user{}@pos", i).into(),
                        "2024-01-01T00:00:00.000Z".to_string().into(),
                    ],
                )
                .unwrap();
        }
    }

    fn count(&self, sql: &str) -> i64 {
        self.store.query_scalar(sql, &[]).unwrap()
    }

    fn selects(&self) -> usize {
        self.remote
            .calls()
            .iter()
            .filter(|c| matches!(c, RemoteCall::Select { .. }))
            .count()
    }
}

fn row(v: Value) -> Row {
    v.as_object().cloned().unwrap()
}

// ============================================================================
// Bootstrap
// ============================================================================

#[tokio::test]
async fn test_bootstrap_is_idempotent_across_restarts() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("pos_local.db");

    for _ in 0..3 {
        let engine = SyncEngine::new(
            Arc::new(LocalStore::new(&path)),
            Arc::new(MemoryRemote::new()),
            Arc::new(ManualReachability::default()),
            SyncConfig::default(),
        )
        .unwrap();
        engine.ensure_initialized().await.unwrap();
        engine.ensure_initialized().await.unwrap();
        assert_eq!(engine.status(), SyncStatus::Idle);

        let columns = engine
            .store()
            .query("PRAGMA table_info(branches)", &[])
            .unwrap();
        assert_eq!(columns.len(), 8);
    }
}

#[tokio::test]
async fn test_unopenable_store_stays_uninitialized() {
    let dir = tempdir().unwrap();
    let blocker = dir.path().join("not_a_dir");
    std::fs::write(&blocker, b"file").unwrap();

    let engine = SyncEngine::new(
        Arc::new(LocalStore::new(blocker.join("pos_local.db"))),
        Arc::new(MemoryRemote::new()),
        Arc::new(ManualReachability::default()),
        SyncConfig::default(),
    )
    .unwrap();

    for _ in 0..2 {
        let err = engine.sync_data().await.unwrap_err();
        assert!(err.is_local());
        assert_eq!(engine.status(), SyncStatus::Uninitialized);
    }
}

// ============================================================================
// Cycle guard and reachability
// ============================================================================

#[tokio::test]
async fn test_concurrent_trigger_runs_one_cycle() {
    let h = Harness::with(
        MemoryRemote::new().with_latency(Duration::from_millis(50)),
        SyncConfig::default(),
    )
    .await;
    h.insert_dirty_profiles(1);

    let (a, b) = tokio::join!(h.engine.sync_data(), h.engine.sync_data());
    let outcomes = [a.unwrap(), b.unwrap()];

    assert_eq!(outcomes.iter().filter(|o| o.is_completed()).count(), 1);
    assert!(outcomes.contains(&SyncOutcome::Skipped(SkipReason::InProgress)));
    assert_eq!(h.remote.upsert_sizes("profiles"), vec![1]);
    assert_eq!(h.selects(), 3);
}

#[tokio::test]
async fn test_offline_cycle_is_a_no_op() {
    let h = Harness::new().await;
    h.insert_dirty_profiles(2);
    h.reach.set_connected(false);

    let outcome = h.engine.sync_data().await.unwrap();
    assert_eq!(outcome, SyncOutcome::Skipped(SkipReason::Offline));
    assert!(h.remote.calls().is_empty());
    assert_eq!(h.count("SELECT COUNT(*) FROM profiles WHERE is_synced = 0"), 2);
    assert!(h.engine.last_sync().is_none());
}

#[tokio::test]
async fn test_failed_cycle_releases_guard() {
    let h = Harness::new().await;
    h.remote.fail_selects(true);
    assert!(matches!(
        h.engine.sync_data().await.unwrap(),
        SyncOutcome::Failed(_)
    ));

    h.remote.fail_selects(false);
    assert!(h.engine.sync_data().await.unwrap().is_completed());
    assert_eq!(h.engine.status(), SyncStatus::Idle);
}

// ============================================================================
// Push
// ============================================================================

#[tokio::test]
async fn test_dirty_flag_lifecycle() {
    let h = Harness::new().await;
    let branches = BranchRepo::new(h.store.clone());
    for name in ["North", "South", "East"] {
        branches.create(name, None).unwrap();
    }
    assert_eq!(h.count("SELECT COUNT(*) FROM branches WHERE is_synced = 0"), 3);

    let push_start = now_iso();
    assert!(h.engine.sync_data().await.unwrap().is_completed());

    let rows = h.store.query("SELECT is_synced, synced_at FROM branches", &[]).unwrap();
    assert_eq!(rows.len(), 3);
    for r in rows {
        assert_eq!(r["is_synced"], json!(1));
        let synced_at = r["synced_at"].as_str().unwrap();
        assert!(synced_at >= push_start.as_str(), "{} < {}", synced_at, push_start);
    }

    // Bookkeeping columns stay local
    for remote_row in h.remote.rows("branches") {
        assert!(!remote_row.contains_key("is_synced"));
        assert!(!remote_row.contains_key("synced_at"));
    }
}

#[tokio::test]
async fn test_250_rows_push_in_three_batches() {
    let h = Harness::new().await;
    h.insert_dirty_profiles(250);

    let outcome = h.engine.sync_data().await.unwrap();
    let SyncOutcome::Completed(report) = &outcome else {
        panic!("expected completed cycle, got {:?}", outcome);
    };
    assert_eq!(report.pushed["profiles"], 250);
    assert_eq!(h.remote.upsert_sizes("profiles"), vec![100, 100, 50]);
    assert_eq!(h.count("SELECT COUNT(*) FROM profiles WHERE is_synced = 1"), 250);
}

#[tokio::test]
async fn test_second_batch_failure_keeps_first_batch_synced() {
    let h = Harness::new().await;
    h.insert_dirty_profiles(250);
    h.remote.fail_upsert("profiles", 2);

    let outcome = h.engine.sync_data().await.unwrap();
    assert!(matches!(outcome, SyncOutcome::Failed(_)));
    assert!(h.engine.last_sync().is_none());

    assert_eq!(h.remote.upsert_sizes("profiles"), vec![100, 100]);
    assert_eq!(h.count("SELECT COUNT(*) FROM profiles WHERE is_synced = 1"), 100);
    assert_eq!(
        h.count("SELECT COUNT(*) FROM profiles WHERE is_synced = 0 AND id >= 'p200'"),
        50
    );

    // Next cycle retries the remainder only
    h.remote.clear_calls();
    assert!(h.engine.sync_data().await.unwrap().is_completed());
    assert_eq!(h.remote.upsert_sizes("profiles"), vec![100, 50]);
    assert_eq!(h.count("SELECT COUNT(*) FROM profiles WHERE is_synced = 0"), 0);
}

#[tokio::test]
async fn test_assignments_are_pushed_whole_every_cycle() {
    let h = Harness::new().await;
    let branches = BranchRepo::new(h.store.clone());
    let branch = branches.create("Main", None).unwrap();
    branches.assign(&branch.id, "u1", AssignmentRole::Manager).unwrap();
    branches.assign(&branch.id, "u2", AssignmentRole::User).unwrap();

    h.engine.sync_data().await.unwrap();
    h.engine.sync_data().await.unwrap();

    assert_eq!(h.remote.upsert_sizes("branch_assignments"), vec![2, 2]);
    assert_eq!(h.remote.rows("branch_assignments").len(), 2);
}

// ============================================================================
// Pull
// ============================================================================

#[tokio::test]
async fn test_newer_remote_version_wins() {
    let h = Harness::new().await;
    h.store
        .execute(
            "INSERT INTO profiles (id, email, name, role, updated_at, is_synced)
             VALUES ('p1', 'a@pos', 'local', 'user', '2024-01-01T00:00:00.000Z', 1)",
            &[],
        )
        .unwrap();
    h.remote.seed(
        "profiles",
        [row(json!({
            "id": "p1", "email": "a@pos", "name": "remote", "role": "manager",
            "updated_at": "2024-06-01T00:00:00.000Z"
        }))],
    );

    assert!(h.engine.sync_data().await.unwrap().is_completed());

    let local = h.store.query("SELECT name, role, is_synced FROM profiles", &[]).unwrap();
    assert_eq!(local[0]["name"], json!("remote"));
    assert_eq!(local[0]["role"], json!("manager"));
    assert_eq!(local[0]["is_synced"], json!(1));
}

#[tokio::test]
async fn test_older_remote_version_does_not_clobber() {
    let h = Harness::new().await;
    h.store
        .execute(
            "INSERT INTO branches (id, name, updated_at, is_synced)
             VALUES ('b1', 'fresh', '2024-06-01 12:00:00', 1)",
            &[],
        )
        .unwrap();
    h.remote.seed(
        "branches",
        [row(json!({"id": "b1", "name": "stale", "updated_at": "2024-01-01T00:00:00+00:00"}))],
    );

    h.engine.sync_data().await.unwrap();
    let local = h.store.query("SELECT name FROM branches", &[]).unwrap();
    assert_eq!(local[0]["name"], json!("fresh"));
}

#[tokio::test]
async fn test_cursor_only_moves_after_full_cycle() {
    let h = Harness::new().await;
    assert!(h.engine.sync_data().await.unwrap().is_completed());
    let first = h.engine.last_sync().unwrap();

    h.remote.seed(
        "branches",
        [row(json!({"id": "late", "name": "Late", "updated_at": "2999-01-01T00:00:00.000Z"}))],
    );
    h.remote.fail_selects(true);
    assert!(matches!(h.engine.sync_data().await.unwrap(), SyncOutcome::Failed(_)));
    assert_eq!(h.engine.last_sync().as_deref(), Some(first.as_str()));
    assert_eq!(h.count("SELECT COUNT(*) FROM branches"), 0);

    h.remote.fail_selects(false);
    assert!(h.engine.sync_data().await.unwrap().is_completed());
    assert!(h.engine.last_sync().unwrap() >= first);
    assert_eq!(h.count("SELECT COUNT(*) FROM branches WHERE id = 'late'"), 1);
}

#[tokio::test]
async fn test_malformed_remote_row_fails_cycle_without_error() {
    let h = Harness::new().await;
    h.remote.seed(
        "profiles",
        [row(json!({"id": "x", "email": "x@pos", "role": "owner", "updated_at": "2024-01-01"}))],
    );

    let outcome = h.engine.sync_data().await.unwrap();
    assert!(matches!(outcome, SyncOutcome::Failed(ref msg) if msg.contains("profiles")));
    assert!(h.engine.last_sync().is_none());
}

#[tokio::test]
async fn test_soft_delete_travels_both_ways() {
    let h = Harness::new().await;
    let branches = BranchRepo::new(h.store.clone());
    let kept = branches.create("Kept", None).unwrap();
    let gone = branches.create("Gone", None).unwrap();
    h.engine.sync_data().await.unwrap();

    branches.delete(&gone.id).unwrap();
    h.engine.sync_data().await.unwrap();
    let remote_gone = h
        .remote
        .rows("branches")
        .into_iter()
        .find(|r| r["id"] == json!(gone.id))
        .unwrap();
    assert_eq!(remote_gone["deleted"], json!(true));

    // Another device deletes the other branch
    h.remote
        .update(
            "branches",
            row(json!({"deleted": true, "updated_at": "2999-01-01T00:00:00.000Z"})),
            &[possync_core::Filter::eq("id", kept.id.clone())],
        )
        .await
        .unwrap();
    h.engine.sync_data().await.unwrap();
    assert!(branches.list().unwrap().is_empty());
    assert!(branches.get(&kept.id).unwrap().unwrap().deleted);
}

#[tokio::test]
async fn test_edit_during_push_stays_dirty_and_is_pushed_next_cycle() {
    let h = Harness::with(
        MemoryRemote::new().with_latency(Duration::from_millis(100)),
        SyncConfig::default(),
    )
    .await;
    let branches = BranchRepo::new(h.store.clone());
    let branch = branches.create("Old", None).unwrap();

    let engine = h.engine.clone();
    let cycle = tokio::spawn(async move { engine.sync_data().await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    branches.update(&branch.id, Some("New"), None).unwrap();
    assert!(cycle.await.unwrap().unwrap().is_completed());

    let local = branches.get(&branch.id).unwrap().unwrap();
    assert_eq!(local.name, "New");
    assert_eq!(h.count("SELECT COUNT(*) FROM branches WHERE is_synced = 0"), 1);

    assert!(h.engine.sync_data().await.unwrap().is_completed());
    let remote = h
        .remote
        .rows("branches")
        .into_iter()
        .find(|r| r["id"] == json!(branch.id))
        .unwrap();
    assert_eq!(remote["name"], json!("New"));
    assert_eq!(h.count("SELECT COUNT(*) FROM branches WHERE is_synced = 0"), 0);
}

// ============================================================================
// Accounts
// ============================================================================

#[tokio::test]
async fn test_first_user_becomes_admin() {
    let h = Harness::new().await;
    let accounts = AccountService::new(h.remote.clone(), h.remote.clone(), h.store.clone());

    let (_, first) = accounts.sign_up("owner@pos", "pw", "Owner").await.unwrap();
    let (_, second) = accounts.sign_up("clerk@pos", "pw", "Clerk").await.unwrap();
    assert_eq!(first.role, Role::Admin);
    assert_eq!(second.role, Role::User);

    // Already synced; nothing to push
    let pending = h.engine.pending_changes().await.unwrap();
    assert!(pending.iter().all(|(_, n)| *n == 0));
}

// ============================================================================
// Timer
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_timer_fires_each_interval_and_restart_replaces_it() {
    let interval = Duration::from_secs(300);
    let h = Harness::with(MemoryRemote::new(), SyncConfig::default().with_interval(interval)).await;

    h.engine.start_sync().await.unwrap();
    assert_eq!(h.selects(), 3);

    tokio::time::sleep(interval + Duration::from_millis(10)).await;
    assert_eq!(h.selects(), 6);

    // Restart: immediate cycle, then a single timer
    h.engine.start_sync().await.unwrap();
    assert_eq!(h.selects(), 9);
    tokio::time::sleep(interval + Duration::from_millis(10)).await;
    assert_eq!(h.selects(), 12);

    assert!(h.engine.stop_sync());
    tokio::time::sleep(interval * 3).await;
    assert_eq!(h.selects(), 12);
}

#[tokio::test(start_paused = true)]
async fn test_reachability_arms_and_disarms_timer() {
    let h = Harness::new().await;
    h.reach.set_connected(false);
    let follower = h.engine.follow_reachability();

    h.reach.set_connected(true);
    for _ in 0..50 {
        if h.engine.is_armed() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    assert!(h.engine.is_armed());

    h.reach.set_connected(false);
    for _ in 0..50 {
        if !h.engine.is_armed() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    assert!(!h.engine.is_armed());

    follower.abort();
    h.engine.shutdown().await;
}

#[tokio::test]
async fn test_network_status_helpers() {
    assert!(NetworkStatus::online().connected);
    assert!(!NetworkStatus::offline().connected);
    let err: SyncError = possync_core::RemoteError::NotConfigured.into();
    assert!(!err.is_local());
}
