//! Schema registry: table DDL plus forward-only, re-runnable migrations.
//!
//! There is no migration history table. Every `create` statement uses
//! `CREATE TABLE IF NOT EXISTS` and runs on each bootstrap; every migration
//! runs on each bootstrap too, and a failure (typically "duplicate column")
//! is taken to mean it was already applied. Only the final schema shape
//! matters.

use tracing::{debug, info};

use crate::error::SyncResult;
use crate::store::LocalStore;

/// One forward-only schema change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    pub description: &'static str,
    pub statement: &'static str,
}

/// Creation statement and migrations for one table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub name: &'static str,
    pub create: &'static str,
    pub migrations: &'static [Migration],
}

/// Outcome of a bootstrap pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootstrapReport {
    /// Tables whose create statement ran
    pub tables: Vec<&'static str>,
    /// Migrations that executed without error
    pub migrations_applied: usize,
    /// Migrations that failed and were treated as already applied
    pub migrations_skipped: usize,
}

pub const PROFILES: TableSchema = TableSchema {
    name: "profiles",
    create: "CREATE TABLE IF NOT EXISTS profiles (
      id TEXT PRIMARY KEY,
      email TEXT NOT NULL,
      name TEXT,
      role TEXT CHECK(role IN ('admin', 'manager', 'user')) DEFAULT 'user',
      created_at TEXT DEFAULT CURRENT_TIMESTAMP,
      updated_at TEXT DEFAULT CURRENT_TIMESTAMP,
      synced_at TEXT,
      is_synced INTEGER DEFAULT 0
    )",
    migrations: &[],
};

pub const BRANCHES: TableSchema = TableSchema {
    name: "branches",
    create: "CREATE TABLE IF NOT EXISTS branches (
      id TEXT PRIMARY KEY,
      name TEXT NOT NULL,
      address TEXT,
      created_at TEXT DEFAULT CURRENT_TIMESTAMP,
      updated_at TEXT DEFAULT CURRENT_TIMESTAMP,
      synced_at TEXT,
      is_synced INTEGER DEFAULT 0
    )",
    migrations: &[
        Migration {
            description: "Add address column if missing",
            statement: "ALTER TABLE branches ADD COLUMN address TEXT",
        },
        Migration {
            description: "Add synced_at column if missing",
            statement: "ALTER TABLE branches ADD COLUMN synced_at TEXT",
        },
        Migration {
            description: "Add is_synced column if missing",
            statement: "ALTER TABLE branches ADD COLUMN is_synced INTEGER DEFAULT 0",
        },
        Migration {
            description: "Add deleted soft-delete flag",
            statement: "ALTER TABLE branches ADD COLUMN deleted INTEGER DEFAULT 0",
        },
    ],
};

pub const BRANCH_ASSIGNMENTS: TableSchema = TableSchema {
    name: "branch_assignments",
    create: "CREATE TABLE IF NOT EXISTS branch_assignments (
      branch_id TEXT NOT NULL,
      user_id TEXT NOT NULL,
      role TEXT CHECK(role IN ('manager', 'user')) NOT NULL,
      assigned_at TEXT DEFAULT CURRENT_TIMESTAMP,
      PRIMARY KEY (branch_id, user_id)
    )",
    migrations: &[],
};

/// Ordered list of table descriptors
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaRegistry {
    tables: Vec<TableSchema>,
}

impl SchemaRegistry {
    pub fn new(tables: Vec<TableSchema>) -> Self {
        Self { tables }
    }

    /// Registry holding the profiles, branches and branch assignment tables.
    pub fn builtin() -> Self {
        Self::new(vec![PROFILES, BRANCHES, BRANCH_ASSIGNMENTS])
    }

    /// Append a table; it is bootstrapped after the ones already registered.
    pub fn register(mut self, table: TableSchema) -> Self {
        self.push(table);
        self
    }

    pub fn push(&mut self, table: TableSchema) {
        self.tables.push(table);
    }

    pub fn tables(&self) -> &[TableSchema] {
        &self.tables
    }

    /// Create every table and apply every migration, best-effort.
    ///
    /// A failing `create` is fatal. A failing migration is logged and
    /// skipped; later migrations and tables still run.
    pub fn bootstrap(&self, store: &LocalStore) -> SyncResult<BootstrapReport> {
        let mut report = BootstrapReport::default();

        for table in &self.tables {
            store.execute_batch(table.create)?;
            report.tables.push(table.name);

            for migration in table.migrations {
                match store.execute_batch(migration.statement) {
                    Ok(()) => {
                        debug!(table = table.name, migration = migration.description, "Migration applied");
                        report.migrations_applied += 1;
                    }
                    Err(e) => {
                        debug!(
                            table = table.name,
                            migration = migration.description,
                            error = %e,
                            "Migration skipped (already applied)"
                        );
                        report.migrations_skipped += 1;
                    }
                }
            }
        }

        info!(
            tables = report.tables.len(),
            applied = report.migrations_applied,
            skipped = report.migrations_skipped,
            "Schema bootstrap complete"
        );
        Ok(report)
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
