//! Per-table sync strategy.
//!
//! An adapter tells the engine how one table participates in sync: its
//! name (identical locally and remotely), its natural key, whether it keeps
//! a dirty flag, and how to read and write its rows in the local store.
//! Adding a syncable entity means writing one adapter; the engine's push
//! and pull algorithm stays generic.
//!
//! Adapters hold no state. Every method receives the store it operates on
//! and must be safe to call concurrently for distinct rows.

use std::fmt;

use async_trait::async_trait;
use rusqlite::types::Value as SqlValue;
use serde_json::Value;

use crate::error::{SyncError, SyncResult};
use crate::store::{json_to_sql, text, LocalStore};
use crate::types::{Row, IS_SYNCED, SYNCED_AT};

/// How local changes of a table are detected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeTracking {
    /// Rows carry `is_synced`; only dirty rows are pushed
    DirtyFlag,
    /// No dirty tracking; every local row is pushed on every cycle
    FullTable,
}

/// Natural key of one row, in the adapter's key column order
#[derive(Debug, Clone, PartialEq)]
pub struct RowKey(Vec<(&'static str, Value)>);

impl RowKey {
    /// Extract the key columns of `row`; every key column must be present
    /// and non-null.
    pub fn from_row(table: &str, key: &[&'static str], row: &Row) -> SyncResult<Self> {
        key.iter()
            .map(|col| match row.get(*col) {
                Some(v) if !v.is_null() => Ok((*col, v.clone())),
                _ => Err(SyncError::MalformedRow {
                    table: table.to_string(),
                    reason: format!("missing key column {}", col),
                }),
            })
            .collect::<SyncResult<Vec<_>>>()
            .map(RowKey)
    }

    pub fn columns(&self) -> impl Iterator<Item = &(&'static str, Value)> {
        self.0.iter()
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|(col, v)| match v {
                Value::String(s) => format!("{}={}", col, s),
                other => format!("{}={}", col, other),
            })
            .collect();
        f.write_str(&parts.join(","))
    }
}

/// Sync strategy for one table
#[async_trait]
pub trait TableAdapter: Send + Sync {
    /// Table identifier, identical in the local store and on the remote
    fn name(&self) -> &'static str;

    /// Column(s) forming the conflict key for upserts
    fn key(&self) -> &'static [&'static str];

    fn tracking(&self) -> ChangeTracking;

    fn has_is_synced(&self) -> bool {
        self.tracking() == ChangeTracking::DirtyFlag
    }

    /// Column used as pull low-water mark. `None` means every pull is a
    /// full scan.
    fn revision_column(&self) -> Option<&'static str> {
        None
    }

    /// Local bookkeeping columns stripped from rows before they are pushed
    fn local_only_columns(&self) -> &'static [&'static str] {
        &[IS_SYNCED, SYNCED_AT]
    }

    /// Write one remote row into the local store. Idempotent.
    async fn upsert_local(&self, store: &LocalStore, row: Row) -> SyncResult<()>;

    /// Clear the dirty flag of one pushed row (flag-tracked tables only).
    ///
    /// `revision` is the value of the revision column as it was pushed. A
    /// row whose revision moved on since then stays dirty.
    async fn mark_synced(
        &self,
        _store: &LocalStore,
        _key: &RowKey,
        _revision: Option<&Value>,
        _synced_at: &str,
    ) -> SyncResult<()> {
        Ok(())
    }

    /// Every row with the dirty flag set (flag-tracked tables only).
    async fn get_unsynced(&self, _store: &LocalStore) -> SyncResult<Vec<Row>> {
        Ok(Vec::new())
    }

    /// Every local row (full-table tables only).
    async fn get_local(&self, _store: &LocalStore) -> SyncResult<Vec<Row>> {
        Ok(Vec::new())
    }
}

/// Column layout of a SQL table, with the generic statements adapters
/// are built from.
#[derive(Debug, Clone, Copy)]
pub struct SqlTable {
    pub name: &'static str,
    pub key: &'static [&'static str],
    pub columns: &'static [&'static str],
    /// Column compared for last-write-wins on upsert
    pub revision: Option<&'static str>,
}

impl SqlTable {
    /// Insert `row`, or merge it into the existing row with the same key.
    ///
    /// Only columns known to the table and present in `row` are written, so
    /// a partial remote row never nulls out local columns. With a revision
    /// column, an existing row is only replaced when the incoming revision
    /// is not older.
    pub fn upsert(&self, store: &LocalStore, row: &Row) -> SyncResult<()> {
        RowKey::from_row(self.name, self.key, row)?;

        let cols: Vec<&str> = self
            .columns
            .iter()
            .copied()
            .filter(|c| row.contains_key(*c))
            .collect();
        let params: Vec<SqlValue> = cols.iter().map(|c| json_to_sql(&row[*c])).collect();
        let updates: Vec<String> = cols
            .iter()
            .filter(|c| !self.key.contains(*c))
            .map(|c| format!("{c} = excluded.{c}"))
            .collect();

        let placeholders = vec!["?"; cols.len()].join(", ");
        let mut sql = format!(
            "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT({}) DO ",
            self.name,
            cols.join(", "),
            placeholders,
            self.key.join(", "),
        );
        if updates.is_empty() {
            sql.push_str("NOTHING");
        } else {
            sql.push_str("UPDATE SET ");
            sql.push_str(&updates.join(", "));
            if let Some(rev) = self.revision.filter(|r| cols.contains(r)) {
                sql.push_str(&format!(
                    " WHERE COALESCE(julianday(excluded.{rev}) >= julianday({table}.{rev}), 1)",
                    table = self.name
                ));
            }
        }

        store.execute(&sql, &params)?;
        Ok(())
    }

    pub fn select_all(&self, store: &LocalStore) -> SyncResult<Vec<Row>> {
        store.query(&format!("SELECT * FROM {}", self.name), &[])
    }

    pub fn select_unsynced(&self, store: &LocalStore) -> SyncResult<Vec<Row>> {
        store.query(
            &format!("SELECT * FROM {} WHERE COALESCE({}, 0) = 0", self.name, IS_SYNCED),
            &[],
        )
    }

    pub fn count_unsynced(&self, store: &LocalStore) -> SyncResult<usize> {
        let n = store.query_scalar(
            &format!("SELECT COUNT(*) FROM {} WHERE COALESCE({}, 0) = 0", self.name, IS_SYNCED),
            &[],
        )?;
        Ok(n.max(0) as usize)
    }

    /// Flag the row as synced, if its revision still equals `revision`.
    /// Returns whether a row was updated.
    pub fn mark_synced(
        &self,
        store: &LocalStore,
        key: &RowKey,
        revision: Option<&Value>,
        synced_at: &str,
    ) -> SyncResult<bool> {
        let (mut clause, mut params) = key_clause(key);
        params.insert(0, text(synced_at));
        if let (Some(column), Some(value)) = (self.revision, revision) {
            clause.push_str(&format!(" AND {} IS ?", column));
            params.push(json_to_sql(value));
        }
        let updated = store.execute(
            &format!(
                "UPDATE {} SET {} = 1, {} = ? WHERE {}",
                self.name, IS_SYNCED, SYNCED_AT, clause
            ),
            &params,
        )?;
        Ok(updated > 0)
    }
}

/// `a = ? AND b = ?` plus its parameters.
pub fn key_clause(key: &RowKey) -> (String, Vec<SqlValue>) {
    let mut parts = Vec::new();
    let mut params = Vec::new();
    for (col, value) in key.columns() {
        parts.push(format!("{} = ?", col));
        params.push(json_to_sql(value));
    }
    (parts.join(" AND "), params)
}

/// Copy of `row` without the given columns.
pub fn strip_columns(row: &Row, columns: &[&str]) -> Row {
    row.iter()
        .filter(|(col, _)| !columns.contains(&col.as_str()))
        .map(|(col, v)| (col.clone(), v.clone()))
        .collect()
}
