//! Remote record store and authentication ports.
//!
//! The backend is a multi-tenant row store reachable over request/response
//! calls. The sync engine only needs three operations from it:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  RemoteStore                                                    │
//! │  ├── select(table, query)          filter + order + limit       │
//! │  ├── upsert(table, rows, key)      merge on conflict key        │
//! │  └── update(table, patch, filters) patch matching rows          │
//! │                                                                 │
//! │  AuthBackend                                                    │
//! │  ├── sign_up / sign_in  -> Session                              │
//! │  └── sign_out(session)                                          │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Two implementations ship with the crate: [`MemoryRemote`] (in-process,
//! scriptable, used by tests and demos) and [`RestRemote`] (PostgREST /
//! GoTrue compatible HTTP backend).

use std::cmp::Ordering;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::RemoteError;
use crate::types::{parse_timestamp, Row, Session};

pub mod memory;
pub mod rest;

pub use memory::{MemoryRemote, RemoteCall};
pub use rest::RestRemote;

/// Row filter understood by every backend
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// `column = value`
    Eq(String, Value),
    /// `column > value`
    Gt(String, Value),
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq(column.into(), value.into())
    }

    pub fn gt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Gt(column.into(), value.into())
    }

    /// Evaluate the filter against a row held in memory.
    pub fn matches(&self, row: &Row) -> bool {
        match self {
            Filter::Eq(col, expected) => row
                .get(col)
                .is_some_and(|v| compare_values(v, expected) == Some(Ordering::Equal)),
            Filter::Gt(col, bound) => row
                .get(col)
                .is_some_and(|v| compare_values(v, bound) == Some(Ordering::Greater)),
        }
    }
}

/// Sort order of a select
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

impl Order {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            ascending: true,
        }
    }
}

/// Parameters of a select call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemoteQuery {
    pub filters: Vec<Filter>,
    pub order: Option<Order>,
    pub limit: Option<usize>,
}

impl RemoteQuery {
    /// Full table scan
    pub fn all() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn order_by(mut self, order: Order) -> Self {
        self.order = Some(order);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Remote row store
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Rows of `table` matching `query`, in the requested order.
    async fn select(&self, table: &str, query: &RemoteQuery) -> Result<Vec<Row>, RemoteError>;

    /// Insert or merge `rows`, matching existing rows on `conflict_key`.
    async fn upsert(
        &self,
        table: &str,
        rows: Vec<Row>,
        conflict_key: &[&str],
    ) -> Result<Vec<Row>, RemoteError>;

    /// Apply `patch` to every row matching all `filters`.
    async fn update(
        &self,
        table: &str,
        patch: Row,
        filters: &[Filter],
    ) -> Result<Vec<Row>, RemoteError>;
}

/// Session-based authentication
#[async_trait]
pub trait AuthBackend: Send + Sync {
    async fn sign_up(&self, email: &str, password: &str, name: &str)
        -> Result<Session, RemoteError>;

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, RemoteError>;

    async fn sign_out(&self, session: &Session) -> Result<(), RemoteError>;
}

/// Order two scalar values the way the backend would.
///
/// Timestamps compare chronologically (mixed ISO-8601 shapes included),
/// numbers numerically, everything else as text. `None` when the values
/// have no meaningful order (e.g. null against a string).
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::Null, _) | (_, Value::Null) => None,
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::String(x), Value::String(y)) => match (parse_timestamp(x), parse_timestamp(y)) {
            (Some(tx), Some(ty)) => Some(tx.cmp(&ty)),
            _ => Some(x.cmp(y)),
        },
        (Value::Bool(x), Value::Number(n)) | (Value::Number(n), Value::Bool(x)) => {
            let as_num = i64::from(*x);
            let ord = as_num.cmp(&n.as_i64()?);
            Some(if matches!(a, Value::Bool(_)) { ord } else { ord.reverse() })
        }
        _ => Some(a.to_string().cmp(&b.to_string())),
    }
}
