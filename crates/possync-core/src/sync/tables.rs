//! Adapters for the built-in tables.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::adapter::{ChangeTracking, RowKey, SqlTable, TableAdapter};
use crate::error::{SyncError, SyncResult};
use crate::store::LocalStore;
use crate::types::{AssignmentRole, Role, Row, UPDATED_AT};

const PROFILES: SqlTable = SqlTable {
    name: "profiles",
    key: &["id"],
    columns: &[
        "id",
        "email",
        "name",
        "role",
        "created_at",
        "updated_at",
        "synced_at",
        "is_synced",
    ],
    revision: Some(UPDATED_AT),
};

const BRANCHES: SqlTable = SqlTable {
    name: "branches",
    key: &["id"],
    columns: &[
        "id",
        "name",
        "address",
        "deleted",
        "created_at",
        "updated_at",
        "synced_at",
        "is_synced",
    ],
    revision: Some(UPDATED_AT),
};

const BRANCH_ASSIGNMENTS: SqlTable = SqlTable {
    name: "branch_assignments",
    key: &["branch_id", "user_id"],
    columns: &["branch_id", "user_id", "role", "assigned_at"],
    revision: None,
};

/// Reject a row whose `role` column is present but not a known role.
fn check_role<R: FromStr<Err = String>>(table: &str, row: &Row) -> SyncResult<()> {
    match row.get("role") {
        None | Some(Value::Null) => Ok(()),
        Some(Value::String(s)) => R::from_str(s).map(|_| ()).map_err(|reason| {
            SyncError::MalformedRow {
                table: table.to_string(),
                reason,
            }
        }),
        Some(other) => Err(SyncError::MalformedRow {
            table: table.to_string(),
            reason: format!("role must be a string, got {}", other),
        }),
    }
}

/// Normalize a boolean column to 0/1; PostgREST sends `true`/`false`.
fn flag_to_int(row: &mut Row, column: &str) {
    if let Some(Value::Bool(b)) = row.get(column) {
        let n = i64::from(*b);
        row.insert(column.to_string(), Value::from(n));
    }
}

/// `profiles`: dirty-flag tracked, keyed by `id`
#[derive(Debug, Default, Clone, Copy)]
pub struct ProfilesAdapter;

#[async_trait]
impl TableAdapter for ProfilesAdapter {
    fn name(&self) -> &'static str {
        PROFILES.name
    }

    fn key(&self) -> &'static [&'static str] {
        PROFILES.key
    }

    fn tracking(&self) -> ChangeTracking {
        ChangeTracking::DirtyFlag
    }

    fn revision_column(&self) -> Option<&'static str> {
        Some(UPDATED_AT)
    }

    async fn upsert_local(&self, store: &LocalStore, mut row: Row) -> SyncResult<()> {
        check_role::<Role>(PROFILES.name, &row)?;
        flag_to_int(&mut row, "is_synced");
        PROFILES.upsert(store, &row)
    }

    async fn mark_synced(
        &self,
        store: &LocalStore,
        key: &RowKey,
        revision: Option<&Value>,
        synced_at: &str,
    ) -> SyncResult<()> {
        PROFILES.mark_synced(store, key, revision, synced_at)?;
        Ok(())
    }

    async fn get_unsynced(&self, store: &LocalStore) -> SyncResult<Vec<Row>> {
        PROFILES.select_unsynced(store)
    }
}

/// `branches`: dirty-flag tracked, keyed by `id`, soft-deleted via `deleted`
#[derive(Debug, Default, Clone, Copy)]
pub struct BranchesAdapter;

#[async_trait]
impl TableAdapter for BranchesAdapter {
    fn name(&self) -> &'static str {
        BRANCHES.name
    }

    fn key(&self) -> &'static [&'static str] {
        BRANCHES.key
    }

    fn tracking(&self) -> ChangeTracking {
        ChangeTracking::DirtyFlag
    }

    fn revision_column(&self) -> Option<&'static str> {
        Some(UPDATED_AT)
    }

    async fn upsert_local(&self, store: &LocalStore, mut row: Row) -> SyncResult<()> {
        flag_to_int(&mut row, "deleted");
        flag_to_int(&mut row, "is_synced");
        BRANCHES.upsert(store, &row)
    }

    async fn mark_synced(
        &self,
        store: &LocalStore,
        key: &RowKey,
        revision: Option<&Value>,
        synced_at: &str,
    ) -> SyncResult<()> {
        BRANCHES.mark_synced(store, key, revision, synced_at)?;
        Ok(())
    }

    async fn get_unsynced(&self, store: &LocalStore) -> SyncResult<Vec<Row>> {
        let mut rows = BRANCHES.select_unsynced(store)?;
        // Remote column is boolean.
        for row in &mut rows {
            if let Some(Value::Number(n)) = row.get("deleted") {
                let deleted = n.as_i64().unwrap_or(0) != 0;
                row.insert("deleted".to_string(), Value::Bool(deleted));
            }
        }
        Ok(rows)
    }
}

/// `branch_assignments`: no dirty flag, keyed by `(branch_id, user_id)`.
///
/// Every local row is pushed on every cycle and the table is never pulled
/// incrementally.
#[derive(Debug, Default, Clone, Copy)]
pub struct BranchAssignmentsAdapter;

#[async_trait]
impl TableAdapter for BranchAssignmentsAdapter {
    fn name(&self) -> &'static str {
        BRANCH_ASSIGNMENTS.name
    }

    fn key(&self) -> &'static [&'static str] {
        BRANCH_ASSIGNMENTS.key
    }

    fn tracking(&self) -> ChangeTracking {
        ChangeTracking::FullTable
    }

    fn local_only_columns(&self) -> &'static [&'static str] {
        &[]
    }

    async fn upsert_local(&self, store: &LocalStore, row: Row) -> SyncResult<()> {
        check_role::<AssignmentRole>(BRANCH_ASSIGNMENTS.name, &row)?;
        BRANCH_ASSIGNMENTS.upsert(store, &row)
    }

    async fn get_local(&self, store: &LocalStore) -> SyncResult<Vec<Row>> {
        BRANCH_ASSIGNMENTS.select_all(store)
    }
}

/// Adapters for the built-in tables, in sync order.
pub fn builtin_adapters() -> Vec<Arc<dyn TableAdapter>> {
    vec![
        Arc::new(ProfilesAdapter),
        Arc::new(BranchesAdapter),
        Arc::new(BranchAssignmentsAdapter),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaRegistry;
    use serde_json::json;

    fn store() -> LocalStore {
        let store = LocalStore::in_memory();
        store.initialize().unwrap();
        SchemaRegistry::builtin().bootstrap(&store).unwrap();
        store
    }

    fn row(v: Value) -> Row {
        v.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_profile_with_unknown_role_is_malformed() {
        let store = store();
        let err = ProfilesAdapter
            .upsert_local(&store, row(json!({"id": "p", "email": "a@b", "role": "owner"})))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::MalformedRow { .. }));
        assert!(!err.is_local());
    }

    #[tokio::test]
    async fn test_profile_dirty_lifecycle() {
        let store = store();
        store
            .execute(
                "INSERT INTO profiles (id, email, role, is_synced) VALUES ('p1', 'a@b', 'user', 0)",
                &[],
            )
            .unwrap();
        let dirty = ProfilesAdapter.get_unsynced(&store).await.unwrap();
        assert_eq!(dirty.len(), 1);

        let key = RowKey::from_row("profiles", ProfilesAdapter.key(), &dirty[0]).unwrap();
        ProfilesAdapter
            .mark_synced(&store, &key, dirty[0].get("updated_at"), "2024-01-01T00:00:00.000Z")
            .await
            .unwrap();
        assert!(ProfilesAdapter.get_unsynced(&store).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_branch_deleted_flag_roundtrip() {
        let store = store();
        BranchesAdapter
            .upsert_local(
                &store,
                row(json!({"id": "b1", "name": "Main", "deleted": true, "is_synced": false})),
            )
            .await
            .unwrap();
        let stored = store.query("SELECT deleted, is_synced FROM branches", &[]).unwrap();
        assert_eq!(stored[0]["deleted"], json!(1));
        assert_eq!(stored[0]["is_synced"], json!(0));

        let outgoing = BranchesAdapter.get_unsynced(&store).await.unwrap();
        assert_eq!(outgoing[0]["deleted"], json!(true));
    }

    #[tokio::test]
    async fn test_assignments_are_full_table() {
        let store = store();
        let adapter = BranchAssignmentsAdapter;
        assert_eq!(adapter.tracking(), ChangeTracking::FullTable);
        assert!(!adapter.has_is_synced());
        assert_eq!(adapter.revision_column(), None);

        for user in ["u1", "u2"] {
            adapter
                .upsert_local(&store, row(json!({"branch_id": "b1", "user_id": user, "role": "user"})))
                .await
                .unwrap();
        }
        // Same key again: replaced, not duplicated.
        adapter
            .upsert_local(&store, row(json!({"branch_id": "b1", "user_id": "u1", "role": "manager"})))
            .await
            .unwrap();

        let rows = adapter.get_local(&store).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert!(adapter.get_unsynced(&store).await.unwrap().is_empty());

        let err = adapter
            .upsert_local(&store, row(json!({"branch_id": "b1", "user_id": "u3", "role": "admin"})))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::MalformedRow { .. }));
    }

    #[test]
    fn test_builtin_order() {
        let names: Vec<_> = builtin_adapters().iter().map(|a| a.name()).collect();
        assert_eq!(names, vec!["profiles", "branches", "branch_assignments"]);
    }
}
