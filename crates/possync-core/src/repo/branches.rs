use std::sync::Arc;

use rusqlite::types::Value as SqlValue;
use tracing::info;
use ulid::Ulid;

use crate::error::{SyncError, SyncResult};
use crate::store::{text, LocalStore};
use crate::types::{now_iso, AssignmentRole, Branch, BranchAssignment};

fn opt_text(value: Option<&str>) -> SqlValue {
    value.map(text).unwrap_or(SqlValue::Null)
}

/// Local reads and dirty writes of `branches` and `branch_assignments`.
///
/// Deleting a branch sets its `deleted` flag; the flag reaches the remote
/// store through the normal push like any other edit.
#[derive(Clone)]
pub struct BranchRepo {
    store: Arc<LocalStore>,
}

impl BranchRepo {
    pub fn new(store: Arc<LocalStore>) -> Self {
        Self { store }
    }

    pub fn create(&self, name: &str, address: Option<&str>) -> SyncResult<Branch> {
        let id = Ulid::new().to_string().to_lowercase();
        let now = now_iso();
        self.store.execute(
            "INSERT INTO branches (id, name, address, deleted, created_at, updated_at, is_synced)
             VALUES (?, ?, ?, 0, ?, ?, 0)",
            &[text(&id), text(name), opt_text(address), text(&now), text(&now)],
        )?;
        info!(%id, name, "Branch created");
        self.require(&id)
    }

    /// Branch by id, soft-deleted ones included.
    pub fn get(&self, id: &str) -> SyncResult<Option<Branch>> {
        Ok(self
            .store
            .query_as("SELECT * FROM branches WHERE id = ?", &[text(id)])?
            .into_iter()
            .next())
    }

    fn require(&self, id: &str) -> SyncResult<Branch> {
        self.get(id)?
            .ok_or_else(|| SyncError::NotFound(format!("branch {}", id)))
    }

    fn require_live(&self, id: &str) -> SyncResult<Branch> {
        let branch = self.require(id)?;
        if branch.deleted {
            return Err(SyncError::NotFound(format!("branch {} (deleted)", id)));
        }
        Ok(branch)
    }

    /// Branches that are not soft-deleted, by name.
    pub fn list(&self) -> SyncResult<Vec<Branch>> {
        self.store.query_as(
            "SELECT * FROM branches WHERE COALESCE(deleted, 0) = 0 ORDER BY name",
            &[],
        )
    }

    pub fn update(&self, id: &str, name: Option<&str>, address: Option<&str>) -> SyncResult<Branch> {
        let current = self.require_live(id)?;
        let name = name.unwrap_or(&current.name);
        let address = address.or(current.address.as_deref());
        self.store.execute(
            "UPDATE branches SET name = ?, address = ?, updated_at = ?, is_synced = 0 WHERE id = ?",
            &[text(name), opt_text(address), text(now_iso()), text(id)],
        )?;
        self.require(id)
    }

    /// Soft-delete. Deleting an already deleted branch is a no-op.
    pub fn delete(&self, id: &str) -> SyncResult<()> {
        let branch = self.require(id)?;
        if branch.deleted {
            return Ok(());
        }
        self.store.execute(
            "UPDATE branches SET deleted = 1, updated_at = ?, is_synced = 0 WHERE id = ?",
            &[text(now_iso()), text(id)],
        )?;
        info!(%id, "Branch deleted");
        Ok(())
    }

    /// Create or replace the assignment of `user_id` to `branch_id`.
    pub fn assign(
        &self,
        branch_id: &str,
        user_id: &str,
        role: AssignmentRole,
    ) -> SyncResult<BranchAssignment> {
        self.require_live(branch_id)?;
        let assigned_at = now_iso();
        self.store.execute(
            "INSERT OR REPLACE INTO branch_assignments (branch_id, user_id, role, assigned_at)
             VALUES (?, ?, ?, ?)",
            &[text(branch_id), text(user_id), text(role.as_str()), text(&assigned_at)],
        )?;
        Ok(BranchAssignment {
            branch_id: branch_id.to_string(),
            user_id: user_id.to_string(),
            role,
            assigned_at: Some(assigned_at),
        })
    }

    pub fn assignments(&self, branch_id: &str) -> SyncResult<Vec<BranchAssignment>> {
        self.store.query_as(
            "SELECT * FROM branch_assignments WHERE branch_id = ? ORDER BY user_id",
            &[text(branch_id)],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaRegistry;

    fn repo() -> BranchRepo {
        let store = Arc::new(LocalStore::in_memory());
        store.initialize().unwrap();
        SchemaRegistry::builtin().bootstrap(&store).unwrap();
        BranchRepo::new(store)
    }

    #[test]
    fn test_create_is_dirty() {
        let repo = repo();
        let branch = repo.create("Downtown", Some("1 Main St")).unwrap();
        assert_eq!(branch.id.len(), 26);
        assert!(!branch.is_synced);
        assert!(!branch.deleted);
        assert_eq!(repo.list().unwrap(), vec![branch]);
    }

    #[test]
    fn test_update_keeps_unset_fields() {
        let repo = repo();
        let branch = repo.create("Old", Some("Addr")).unwrap();
        let updated = repo.update(&branch.id, Some("New"), None).unwrap();
        assert_eq!(updated.name, "New");
        assert_eq!(updated.address.as_deref(), Some("Addr"));
    }

    #[test]
    fn test_soft_delete_hides_from_list() {
        let repo = repo();
        let branch = repo.create("Gone", None).unwrap();
        repo.delete(&branch.id).unwrap();
        repo.delete(&branch.id).unwrap();

        assert!(repo.list().unwrap().is_empty());
        let stored = repo.get(&branch.id).unwrap().unwrap();
        assert!(stored.deleted);
        assert!(!stored.is_synced);
        assert!(matches!(
            repo.update(&branch.id, Some("x"), None),
            Err(SyncError::NotFound(_))
        ));
        assert!(matches!(repo.delete("missing"), Err(SyncError::NotFound(_))));
    }

    #[test]
    fn test_assign_replaces_by_key() {
        let repo = repo();
        let branch = repo.create("B", None).unwrap();
        repo.assign(&branch.id, "u1", AssignmentRole::User).unwrap();
        repo.assign(&branch.id, "u1", AssignmentRole::Manager).unwrap();
        repo.assign(&branch.id, "u2", AssignmentRole::User).unwrap();

        let assignments = repo.assignments(&branch.id).unwrap();
        assert_eq!(assignments.len(), 2);
        assert_eq!(assignments[0].role, AssignmentRole::Manager);

        repo.delete(&branch.id).unwrap();
        assert!(repo.assign(&branch.id, "u3", AssignmentRole::User).is_err());
    }
}
