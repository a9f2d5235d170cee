//! PosSync Core Library
//!
//! Offline-first synchronization between an on-device SQLite store and a
//! remote multi-tenant record store.
//!
//! ## Overview
//!
//! Point-of-sale devices keep working when the network drops. Every write
//! goes to the local store and is flagged dirty; a sync cycle later pushes
//! dirty rows and pulls rows that changed remotely since the last
//! successful cycle.
//!
//! ## Core Principles
//!
//! - **Local-first**: reads and writes never wait on the network
//! - **Batched push**: 100-row upserts, dirty flags cleared per accepted batch
//! - **Incremental pull**: `updated_at` low-water mark, last write wins
//! - **Single cycle**: at most one cycle runs at a time; offline is a no-op
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use possync_core::{BranchRepo, LocalStore, ManualReachability, MemoryRemote, SyncConfig, SyncEngine};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(LocalStore::new("pos_local.db"));
//!     let engine = Arc::new(SyncEngine::new(
//!         store.clone(),
//!         Arc::new(MemoryRemote::new()),
//!         Arc::new(ManualReachability::default()),
//!         SyncConfig::default(),
//!     )?);
//!     engine.ensure_initialized().await?;
//!
//!     // Works offline
//!     BranchRepo::new(store).create("Downtown", Some("1 Main St"))?;
//!
//!     // Push, pull, then every five minutes
//!     engine.start_sync().await?;
//!     Ok(())
//! }
//! ```

pub mod accounts;
pub mod config;
pub mod error;
pub mod logging;
pub mod reachability;
pub mod remote;
pub mod repo;
pub mod schema;
pub mod store;
pub mod sync;
pub mod types;

// Re-exports
pub use accounts::AccountService;
pub use config::{AppConfig, RemoteConfig, SyncConfig};
pub use error::{RemoteError, SyncError, SyncResult};
pub use reachability::{ManualReachability, NetworkStatus, Reachability, TcpProbe};
pub use remote::{AuthBackend, Filter, MemoryRemote, Order, RemoteQuery, RemoteStore, RestRemote};
pub use repo::{BranchRepo, ProfileRepo};
pub use schema::{BootstrapReport, Migration, SchemaRegistry, TableSchema};
pub use store::LocalStore;
pub use sync::{
    ChangeTracking, CycleReport, SkipReason, SyncEngine, SyncEvent, SyncOutcome, SyncStatus,
    TableAdapter,
};
pub use types::*;
