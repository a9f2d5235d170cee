//! Sign-up, sign-in and sign-out on top of the auth backend.
//!
//! The first account ever registered against a backend becomes `admin`;
//! every later one starts as `user`. The profile is written remotely
//! first and then mirrored locally as already synced.

use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};

use crate::error::{RemoteError, SyncError, SyncResult};
use crate::remote::{AuthBackend, RemoteQuery, RemoteStore};
use crate::repo::ProfileRepo;
use crate::store::LocalStore;
use crate::sync::adapter::strip_columns;
use crate::types::{now_iso, Profile, Role, Session, IS_SYNCED, SYNCED_AT};

fn auth_error(e: RemoteError) -> SyncError {
    SyncError::Auth(e.to_string())
}

pub struct AccountService {
    auth: Arc<dyn AuthBackend>,
    remote: Arc<dyn RemoteStore>,
    profiles: ProfileRepo,
}

impl AccountService {
    /// `store` must already be initialized.
    pub fn new(auth: Arc<dyn AuthBackend>, remote: Arc<dyn RemoteStore>, store: Arc<LocalStore>) -> Self {
        Self {
            auth,
            remote,
            profiles: ProfileRepo::new(store),
        }
    }

    /// Register a new account and create its profile.
    pub async fn sign_up(&self, email: &str, password: &str, name: &str) -> SyncResult<(Session, Profile)> {
        let session = self.auth.sign_up(email, password, name).await.map_err(auth_error)?;

        let existing = self
            .remote
            .select("profiles", &RemoteQuery::all().limit(1))
            .await?;
        let role = if existing.is_empty() {
            Role::Admin
        } else {
            Role::User
        };

        let now = now_iso();
        let profile = Profile {
            id: session.user_id.clone(),
            email: email.to_string(),
            name: Some(name.to_string()),
            role,
            created_at: Some(now.clone()),
            updated_at: Some(now),
            synced_at: None,
            is_synced: true,
        };

        let Value::Object(row) = serde_json::to_value(&profile)? else {
            return Err(SyncError::MalformedRow {
                table: "profiles".to_string(),
                reason: "profile did not serialize to an object".to_string(),
            });
        };
        let row = strip_columns(&row, &[IS_SYNCED, SYNCED_AT]);
        self.remote.upsert("profiles", vec![row], &["id"]).await?;
        self.profiles.save_synced(&profile)?;

        info!(user = %profile.id, %role, "Account created");
        Ok((session, profile))
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> SyncResult<Session> {
        let session = self.auth.sign_in(email, password).await.map_err(auth_error)?;
        info!(user = %session.user_id, "Signed in");
        Ok(session)
    }

    pub async fn sign_out(&self, session: &Session) -> SyncResult<()> {
        if let Err(e) = self.auth.sign_out(session).await {
            warn!(error = %e, "Remote sign-out failed");
            return Err(auth_error(e));
        }
        info!(user = %session.user_id, "Signed out");
        Ok(())
    }

    /// Local profile of the signed-in user, if it has been synced down.
    pub fn current_profile(&self, session: &Session) -> SyncResult<Option<Profile>> {
        self.profiles.get(&session.user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MemoryRemote;
    use crate::schema::SchemaRegistry;

    fn service() -> (AccountService, Arc<MemoryRemote>) {
        let store = Arc::new(LocalStore::in_memory());
        store.initialize().unwrap();
        SchemaRegistry::builtin().bootstrap(&store).unwrap();
        let remote = Arc::new(MemoryRemote::new());
        (AccountService::new(remote.clone(), remote.clone(), store), remote)
    }

    #[tokio::test]
    async fn test_sign_up_writes_both_sides() {
        let (accounts, remote) = service();
        let (session, profile) = accounts.sign_up("a@pos", "pw", "Ann").await.unwrap();

        let remote_rows = remote.rows("profiles");
        assert_eq!(remote_rows.len(), 1);
        assert!(!remote_rows[0].contains_key(IS_SYNCED));
        assert_eq!(remote_rows[0]["role"], Value::from("admin"));

        let local = accounts.current_profile(&session).unwrap().unwrap();
        assert_eq!(local.role, profile.role);
        assert!(local.is_synced);
    }

    #[tokio::test]
    async fn test_bad_credentials_are_auth_errors() {
        let (accounts, _) = service();
        accounts.sign_up("a@pos", "pw", "Ann").await.unwrap();
        let err = accounts.sign_in("a@pos", "wrong").await.unwrap_err();
        assert!(matches!(err, SyncError::Auth(_)));

        let dup = accounts.sign_up("a@pos", "pw", "Ann").await.unwrap_err();
        assert!(matches!(dup, SyncError::Auth(_)));
    }

    #[tokio::test]
    async fn test_sign_out_twice_fails() {
        let (accounts, _) = service();
        accounts.sign_up("b@pos", "pw", "Bo").await.unwrap();
        let session = accounts.sign_in("b@pos", "pw").await.unwrap();
        accounts.sign_out(&session).await.unwrap();
        assert!(accounts.sign_out(&session).await.is_err());
    }
}
