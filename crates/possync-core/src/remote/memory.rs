//! In-process remote backend.
//!
//! Behaves like the hosted record store closely enough to drive the sync
//! engine end to end: upserts merge on the conflict key, selects filter and
//! order, and every call is recorded. Failures can be scripted per call so
//! partial-batch behavior is reproducible.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;
use ulid::Ulid;

use super::{compare_values, AuthBackend, Filter, RemoteQuery, RemoteStore};
use crate::error::RemoteError;
use crate::types::{Row, Session};

/// One recorded backend call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    Select { table: String },
    Upsert { table: String, rows: usize },
    Update { table: String },
}

impl RemoteCall {
    pub fn table(&self) -> &str {
        match self {
            RemoteCall::Select { table }
            | RemoteCall::Upsert { table, .. }
            | RemoteCall::Update { table } => table,
        }
    }
}

struct User {
    id: String,
    email: String,
    password: String,
}

#[derive(Default)]
struct Faults {
    /// 1-based upsert call numbers per table that must fail
    upserts: HashMap<String, HashSet<usize>>,
    /// Upsert calls seen so far per table
    upsert_counts: HashMap<String, usize>,
    /// Every select fails while set
    selects: bool,
}

/// In-memory multi-table record store with session auth
#[derive(Default)]
pub struct MemoryRemote {
    tables: Mutex<HashMap<String, Vec<Row>>>,
    users: Mutex<Vec<User>>,
    sessions: Mutex<HashSet<String>>,
    calls: Mutex<Vec<RemoteCall>>,
    faults: Mutex<Faults>,
    latency: Option<Duration>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every call by `latency` before it is served.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Insert rows directly, bypassing call recording.
    pub fn seed(&self, table: &str, rows: impl IntoIterator<Item = Row>) {
        self.tables
            .lock()
            .entry(table.to_string())
            .or_default()
            .extend(rows);
    }

    /// Snapshot of a table's rows in insertion order.
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.tables.lock().get(table).cloned().unwrap_or_default()
    }

    /// Every call served (or failed) so far.
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.calls.lock().clone()
    }

    /// Row counts of each upsert to `table`, in call order.
    pub fn upsert_sizes(&self, table: &str) -> Vec<usize> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                RemoteCall::Upsert { table: t, rows } if t == table => Some(*rows),
                _ => None,
            })
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    /// Make the `nth` (1-based) upsert to `table` fail, counting from now on
    /// across the remote's lifetime.
    pub fn fail_upsert(&self, table: &str, nth: usize) {
        self.faults
            .lock()
            .upserts
            .entry(table.to_string())
            .or_default()
            .insert(nth);
    }

    /// Make every select fail (or succeed again).
    pub fn fail_selects(&self, fail: bool) {
        self.faults.lock().selects = fail;
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn record(&self, call: RemoteCall) {
        self.calls.lock().push(call);
    }
}

fn same_key(existing: &Row, incoming: &Row, key: &[&str]) -> bool {
    key.iter().all(|col| match (existing.get(*col), incoming.get(*col)) {
        (Some(a), Some(b)) => compare_values(a, b) == Some(std::cmp::Ordering::Equal),
        _ => false,
    })
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn select(&self, table: &str, query: &RemoteQuery) -> Result<Vec<Row>, RemoteError> {
        self.simulate_latency().await;
        self.record(RemoteCall::Select {
            table: table.to_string(),
        });

        if self.faults.lock().selects {
            return Err(RemoteError::Status {
                status: 503,
                message: format!("select on {} unavailable", table),
            });
        }

        let mut rows: Vec<Row> = self
            .rows(table)
            .into_iter()
            .filter(|row| query.filters.iter().all(|f| f.matches(row)))
            .collect();

        if let Some(order) = &query.order {
            rows.sort_by(|a, b| {
                let ord = match (a.get(&order.column), b.get(&order.column)) {
                    (Some(x), Some(y)) => compare_values(x, y).unwrap_or(std::cmp::Ordering::Equal),
                    _ => std::cmp::Ordering::Equal,
                };
                if order.ascending {
                    ord
                } else {
                    ord.reverse()
                }
            });
        }
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }

        debug!(table, rows = rows.len(), "Memory remote select");
        Ok(rows)
    }

    async fn upsert(
        &self,
        table: &str,
        rows: Vec<Row>,
        conflict_key: &[&str],
    ) -> Result<Vec<Row>, RemoteError> {
        self.simulate_latency().await;
        self.record(RemoteCall::Upsert {
            table: table.to_string(),
            rows: rows.len(),
        });

        {
            let mut faults = self.faults.lock();
            let count = faults.upsert_counts.entry(table.to_string()).or_default();
            *count += 1;
            let n = *count;
            if faults.upserts.get(table).is_some_and(|set| set.contains(&n)) {
                return Err(RemoteError::Rejected {
                    table: table.to_string(),
                    message: format!("scripted failure on upsert #{}", n),
                });
            }
        }

        if let Some(row) = rows
            .iter()
            .find(|row| conflict_key.iter().any(|col| row.get(*col).map_or(true, Value::is_null)))
        {
            return Err(RemoteError::Rejected {
                table: table.to_string(),
                message: format!("row missing conflict key {:?}: {:?}", conflict_key, row),
            });
        }

        let mut tables = self.tables.lock();
        let stored = tables.entry(table.to_string()).or_default();
        let mut written = Vec::with_capacity(rows.len());
        for incoming in rows {
            match stored.iter_mut().find(|existing| same_key(existing, &incoming, conflict_key)) {
                Some(existing) => {
                    for (col, value) in incoming {
                        existing.insert(col, value);
                    }
                    written.push(existing.clone());
                }
                None => {
                    stored.push(incoming.clone());
                    written.push(incoming);
                }
            }
        }

        debug!(table, rows = written.len(), "Memory remote upsert");
        Ok(written)
    }

    async fn update(
        &self,
        table: &str,
        patch: Row,
        filters: &[Filter],
    ) -> Result<Vec<Row>, RemoteError> {
        self.simulate_latency().await;
        self.record(RemoteCall::Update {
            table: table.to_string(),
        });

        let mut tables = self.tables.lock();
        let mut updated = Vec::new();
        if let Some(stored) = tables.get_mut(table) {
            for row in stored.iter_mut().filter(|row| filters.iter().all(|f| f.matches(row))) {
                for (col, value) in &patch {
                    row.insert(col.clone(), value.clone());
                }
                updated.push(row.clone());
            }
        }
        Ok(updated)
    }
}

#[async_trait]
impl AuthBackend for MemoryRemote {
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        _name: &str,
    ) -> Result<Session, RemoteError> {
        self.simulate_latency().await;
        let mut users = self.users.lock();
        if users.iter().any(|u| u.email.eq_ignore_ascii_case(email)) {
            return Err(RemoteError::Rejected {
                table: "auth.users".to_string(),
                message: format!("User already registered: {}", email),
            });
        }
        let user = User {
            id: Ulid::new().to_string(),
            email: email.to_string(),
            password: password.to_string(),
        };
        let session = issue_session(&user);
        self.sessions.lock().insert(session.access_token.clone());
        users.push(user);
        Ok(session)
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, RemoteError> {
        self.simulate_latency().await;
        let users = self.users.lock();
        let user = users
            .iter()
            .find(|u| u.email.eq_ignore_ascii_case(email) && u.password == password)
            .ok_or_else(|| RemoteError::Unauthorized("Invalid login credentials".to_string()))?;
        let session = issue_session(user);
        self.sessions.lock().insert(session.access_token.clone());
        Ok(session)
    }

    async fn sign_out(&self, session: &Session) -> Result<(), RemoteError> {
        self.simulate_latency().await;
        if self.sessions.lock().remove(&session.access_token) {
            Ok(())
        } else {
            Err(RemoteError::Unauthorized("Session not found".to_string()))
        }
    }
}

fn issue_session(user: &User) -> Session {
    Session {
        user_id: user.id.clone(),
        email: user.email.clone(),
        access_token: format!("mem-{}", Ulid::new()),
        refresh_token: None,
    }
}
