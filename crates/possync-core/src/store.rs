//! On-device relational store backed by SQLite.
//!
//! The store owns the single database file and its connection. Statements
//! run synchronously; callers in async code never hold the connection lock
//! across an `.await`.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{SyncError, SyncResult};
use crate::types::Row;

/// Where the database lives
#[derive(Debug, Clone)]
enum Location {
    File(PathBuf),
    Memory,
}

/// Handle to the on-device database.
///
/// Construction is cheap and never touches the disk; the file is opened by
/// [`LocalStore::initialize`], once per store.
pub struct LocalStore {
    location: Location,
    conn: Mutex<Option<Connection>>,
    initialized: AtomicBool,
}

impl LocalStore {
    /// Store backed by the file at `path` (created on first initialize).
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            location: Location::File(path.as_ref().to_path_buf()),
            conn: Mutex::new(None),
            initialized: AtomicBool::new(false),
        }
    }

    /// Store backed by a private in-memory database.
    pub fn in_memory() -> Self {
        Self {
            location: Location::Memory,
            conn: Mutex::new(None),
            initialized: AtomicBool::new(false),
        }
    }

    /// Path of the database file, `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        match &self.location {
            Location::File(p) => Some(p),
            Location::Memory => None,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Open (or create) the database. Subsequent calls are no-ops.
    pub fn initialize(&self) -> SyncResult<()> {
        let mut guard = self.conn.lock();
        if guard.is_some() {
            return Ok(());
        }

        let conn = match &self.location {
            Location::File(path) => {
                if let Some(parent) = path.parent() {
                    if !parent.as_os_str().is_empty() {
                        std::fs::create_dir_all(parent)?;
                    }
                }
                info!(?path, "Opening local database");
                Connection::open(path)?
            }
            Location::Memory => {
                debug!("Opening in-memory database");
                Connection::open_in_memory()?
            }
        };

        *guard = Some(conn);
        self.initialized.store(true, Ordering::Release);
        Ok(())
    }

    /// Run a mutating statement. Returns the number of affected rows.
    pub fn execute(&self, sql: &str, params: &[SqlValue]) -> SyncResult<usize> {
        self.with_conn(|conn| Ok(conn.execute(sql, params_from_iter(params.iter()))?))
    }

    /// Run a batch of statements without parameters.
    pub fn execute_batch(&self, sql: &str) -> SyncResult<()> {
        self.with_conn(|conn| Ok(conn.execute_batch(sql)?))
    }

    /// Run a read statement and return every row, in order.
    pub fn query(&self, sql: &str, params: &[SqlValue]) -> SyncResult<Vec<Row>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
            let mut rows = stmt.query(params_from_iter(params.iter()))?;

            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                let mut map = Row::new();
                for (idx, name) in columns.iter().enumerate() {
                    map.insert(name.clone(), sql_to_json(row.get_ref(idx)?));
                }
                out.push(map);
            }
            Ok(out)
        })
    }

    /// Like [`LocalStore::query`], deserializing each row into `T`.
    pub fn query_as<T: DeserializeOwned>(
        &self,
        sql: &str,
        params: &[SqlValue],
    ) -> SyncResult<Vec<T>> {
        self.query(sql, params)?
            .into_iter()
            .map(|row| serde_json::from_value(Value::Object(row)).map_err(SyncError::from))
            .collect()
    }

    /// Single `i64` result of an aggregate query such as `COUNT(*)`.
    pub fn query_scalar(&self, sql: &str, params: &[SqlValue]) -> SyncResult<i64> {
        self.with_conn(|conn| {
            Ok(conn.query_row(sql, params_from_iter(params.iter()), |row| row.get(0))?)
        })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> SyncResult<T>) -> SyncResult<T> {
        let guard = self.conn.lock();
        let conn = guard.as_ref().ok_or(SyncError::NotInitialized)?;
        f(conn)
    }
}

/// Convert a JSON scalar into a SQLite value.
///
/// Booleans become 0/1; nested arrays and objects are stored as JSON text.
pub fn json_to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

/// Convert a SQLite value into a JSON scalar.
pub fn sql_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::Array(b.iter().map(|byte| Value::from(*byte)).collect()),
    }
}

/// Shorthand for building a text parameter.
pub fn text(s: impl Into<String>) -> SqlValue {
    SqlValue::Text(s.into())
}
