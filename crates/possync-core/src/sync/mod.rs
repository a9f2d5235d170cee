//! Push/pull reconciliation between the local store and the remote store
//!
//! ## Overview
//!
//! Every write lands in the local SQLite store first. A sync cycle then
//! pushes local changes and pulls remote ones, table by table, in the order
//! the adapters are registered.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  SyncEngine                                                     │
//! │  ├── ensure_initialized   open store + bootstrap schema (once)  │
//! │  ├── start_sync           one cycle now, then every interval    │
//! │  ├── stop_sync            disarm timer, in-flight cycle ends    │
//! │  └── sync_data            guarded single cycle                  │
//! │                                                                 │
//! │  Cycle                                                          │
//! │  ├── push  dirty rows (or whole table) → remote upsert          │
//! │  │         batch accepted → mark rows synced                    │
//! │  └── pull  updated_at > cursor, ascending → local upsert        │
//! │            cursor advances after both phases succeed            │
//! │                                                                 │
//! │  TableAdapter (per table)                                       │
//! │  ├── ProfilesAdapter          dirty flag, key id                │
//! │  ├── BranchesAdapter          dirty flag, key id, soft delete   │
//! │  └── BranchAssignmentsAdapter full table, key (branch, user)    │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Failure semantics
//!
//! A rejected push batch or failed pull stops the cycle. Batches accepted
//! before the failure stay marked synced; the cursor keeps its old value,
//! so the next cycle re-pulls from the same point.

pub mod adapter;
pub mod engine;
pub mod events;
pub mod tables;

pub use adapter::{ChangeTracking, RowKey, SqlTable, TableAdapter};
pub use engine::SyncEngine;
pub use events::{CycleReport, SkipReason, SyncEvent, SyncOutcome, SyncStatus};
pub use tables::{builtin_adapters, BranchAssignmentsAdapter, BranchesAdapter, ProfilesAdapter};
