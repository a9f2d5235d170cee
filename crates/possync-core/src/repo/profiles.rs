use std::sync::Arc;

use tracing::info;

use crate::error::{SyncError, SyncResult};
use crate::store::{text, LocalStore};
use crate::types::{now_iso, Profile, Role};

/// Local reads and dirty writes of `profiles`
#[derive(Clone)]
pub struct ProfileRepo {
    store: Arc<LocalStore>,
}

impl ProfileRepo {
    pub fn new(store: Arc<LocalStore>) -> Self {
        Self { store }
    }

    pub fn get(&self, id: &str) -> SyncResult<Option<Profile>> {
        Ok(self
            .store
            .query_as("SELECT * FROM profiles WHERE id = ?", &[text(id)])?
            .into_iter()
            .next())
    }

    fn require(&self, id: &str) -> SyncResult<Profile> {
        self.get(id)?
            .ok_or_else(|| SyncError::NotFound(format!("profile {}", id)))
    }

    /// Profiles ordered by email, optionally restricted to one role.
    pub fn list(&self, role: Option<Role>) -> SyncResult<Vec<Profile>> {
        match role {
            Some(role) => self.store.query_as(
                "SELECT * FROM profiles WHERE role = ? ORDER BY email",
                &[text(role.as_str())],
            ),
            None => self
                .store
                .query_as("SELECT * FROM profiles ORDER BY email", &[]),
        }
    }

    pub fn update_name(&self, id: &str, name: &str) -> SyncResult<Profile> {
        let changed = self.store.execute(
            "UPDATE profiles SET name = ?, updated_at = ?, is_synced = 0 WHERE id = ?",
            &[text(name), text(now_iso()), text(id)],
        )?;
        if changed == 0 {
            return Err(SyncError::NotFound(format!("profile {}", id)));
        }
        self.require(id)
    }

    /// Change `target`'s role. Only an admin may do this.
    pub fn set_role(&self, actor_id: &str, target_id: &str, role: Role) -> SyncResult<Profile> {
        let actor = self.require(actor_id)?;
        if actor.role != Role::Admin {
            return Err(SyncError::PermissionDenied(format!(
                "{} is {}, only admins can change roles",
                actor.email, actor.role
            )));
        }
        self.require(target_id)?;
        self.store.execute(
            "UPDATE profiles SET role = ?, updated_at = ?, is_synced = 0 WHERE id = ?",
            &[text(role.as_str()), text(now_iso()), text(target_id)],
        )?;
        info!(profile = target_id, %role, "Profile role changed");
        self.require(target_id)
    }

    /// Write a profile the remote store already holds.
    pub fn save_synced(&self, profile: &Profile) -> SyncResult<()> {
        let now = now_iso();
        self.store.execute(
            "INSERT OR REPLACE INTO profiles
             (id, email, name, role, created_at, updated_at, synced_at, is_synced)
             VALUES (?, ?, ?, ?, ?, ?, ?, 1)",
            &[
                text(&profile.id),
                text(&profile.email),
                profile.name.clone().map(text).unwrap_or(rusqlite::types::Value::Null),
                text(profile.role.as_str()),
                text(profile.created_at.clone().unwrap_or_else(|| now.clone())),
                text(profile.updated_at.clone().unwrap_or_else(|| now.clone())),
                text(now),
            ],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaRegistry;

    fn repo() -> ProfileRepo {
        let store = Arc::new(LocalStore::in_memory());
        store.initialize().unwrap();
        SchemaRegistry::builtin().bootstrap(&store).unwrap();
        let repo = ProfileRepo::new(store);
        for (id, email, role) in [
            ("a", "admin@pos", Role::Admin),
            ("u", "user@pos", Role::User),
        ] {
            repo.save_synced(&Profile {
                id: id.into(),
                email: email.into(),
                name: None,
                role,
                created_at: None,
                updated_at: None,
                synced_at: None,
                is_synced: true,
            })
            .unwrap();
        }
        repo
    }

    #[test]
    fn test_save_synced_is_clean() {
        let repo = repo();
        let admin = repo.get("a").unwrap().unwrap();
        assert!(admin.is_synced);
        assert!(admin.synced_at.is_some());
        assert_eq!(repo.list(Some(Role::User)).unwrap().len(), 1);
        assert_eq!(repo.list(None).unwrap().len(), 2);
    }

    #[test]
    fn test_update_name_marks_dirty() {
        let repo = repo();
        let updated = repo.update_name("u", "Uma").unwrap();
        assert_eq!(updated.name.as_deref(), Some("Uma"));
        assert!(!updated.is_synced);
        assert!(matches!(repo.update_name("zz", "x"), Err(SyncError::NotFound(_))));
    }

    #[test]
    fn test_only_admin_sets_roles() {
        let repo = repo();
        let err = repo.set_role("u", "a", Role::User).unwrap_err();
        assert!(matches!(err, SyncError::PermissionDenied(_)));

        let promoted = repo.set_role("a", "u", Role::Manager).unwrap();
        assert_eq!(promoted.role, Role::Manager);
        assert!(!promoted.is_synced);
    }
}
