//! Benchmarks for PosSync cycles
//!
//! Run with: cargo bench -p possync-core
//!
//! Baselines for:
//! - Push of N dirty rows (batched upsert + mark synced)
//! - Pull of N remote rows into an empty store
//! - Local last-write-wins upsert

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use possync_core::sync::{ProfilesAdapter, TableAdapter};
use possync_core::{
    LocalStore, ManualReachability, MemoryRemote, Row, SchemaRegistry, SyncConfig, SyncEngine,
};
use serde_json::json;

fn profile_row(i: usize) -> Row {
    json!({
        "id": format!("p{}", i),
        "email": format!("user{}@pos", i),
        "role": "user",
        "updated_at": "2024-01-01T00:00:00.000Z",
    })
    .as_object()
    .cloned()
    .unwrap()
}

fn engine(remote: Arc<MemoryRemote>) -> (SyncEngine, Arc<LocalStore>) {
    let store = Arc::new(LocalStore::in_memory());
    let engine = SyncEngine::new(
        store.clone(),
        remote,
        Arc::new(ManualReachability::default()),
        SyncConfig::default(),
    )
    .unwrap();
    (engine, store)
}

// ============================================================================
// Cycle Benchmarks
// ============================================================================

fn bench_push(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("push");

    for rows in [100usize, 1_000] {
        group.throughput(Throughput::Elements(rows as u64));
        group.bench_with_input(BenchmarkId::from_parameter(rows), &rows, |b, &rows| {
            b.to_async(&runtime).iter_batched(
                || {
                    let (engine, store) = engine(Arc::new(MemoryRemote::new()));
                    store.initialize().unwrap();
                    SchemaRegistry::builtin().bootstrap(&store).unwrap();
                    for i in 0..rows {
                        store
                            .execute(
                                "INSERT INTO profiles (id, email, role, is_synced) VALUES (?, ?, 'user', 0)",
                                &[format!("p{}", i).into(), format!("u{}@pos", i).into()],
                            )
                            .unwrap();
                    }
                    engine
                },
                |engine| async move { black_box(engine.sync_data().await.unwrap()) },
                criterion::BatchSize::SmallInput,
            )
        });
    }
    group.finish();
}

fn bench_pull(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("pull");

    for rows in [100usize, 1_000] {
        group.throughput(Throughput::Elements(rows as u64));
        group.bench_with_input(BenchmarkId::from_parameter(rows), &rows, |b, &rows| {
            b.to_async(&runtime).iter_batched(
                || {
                    let remote = Arc::new(MemoryRemote::new());
                    remote.seed("profiles", (0..rows).map(profile_row));
                    engine(remote).0
                },
                |engine| async move { black_box(engine.sync_data().await.unwrap()) },
                criterion::BatchSize::SmallInput,
            )
        });
    }
    group.finish();
}

// ============================================================================
// Local Upsert Benchmarks
// ============================================================================

fn bench_local_upsert(c: &mut Criterion) {
    let store = LocalStore::in_memory();
    store.initialize().unwrap();
    SchemaRegistry::builtin().bootstrap(&store).unwrap();
    let row = profile_row(1);

    c.bench_function("upsert_local_profile", |b| {
        b.iter(|| {
            futures::executor::block_on(ProfilesAdapter.upsert_local(&store, black_box(row.clone())))
                .unwrap()
        })
    });
}

criterion_group!(benches, bench_push, bench_pull, bench_local_upsert);
criterion_main!(benches);
