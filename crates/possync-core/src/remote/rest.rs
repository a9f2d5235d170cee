//! HTTP backend speaking the PostgREST row API and the GoTrue auth API.
//!
//! ```text
//! GET    /rest/v1/<table>?select=*&updated_at=gt.<ts>&order=updated_at.asc
//! POST   /rest/v1/<table>?on_conflict=branch_id,user_id   (merge-duplicates)
//! PATCH  /rest/v1/<table>?id=eq.<id>
//! POST   /auth/v1/signup
//! POST   /auth/v1/token?grant_type=password
//! POST   /auth/v1/logout
//! ```

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::{AuthBackend, Filter, RemoteQuery, RemoteStore};
use crate::config::RemoteConfig;
use crate::error::RemoteError;
use crate::types::{Row, Session};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// PostgREST/GoTrue client
pub struct RestRemote {
    client: Client,
    base_url: String,
    api_key: String,
    session: RwLock<Option<Session>>,
}

#[derive(Deserialize)]
struct AuthUser {
    id: String,
    #[serde(default)]
    email: Option<String>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    user: AuthUser,
}

/// Sign-up answers with a session when email confirmation is off, and with
/// the bare user otherwise.
#[derive(Deserialize)]
#[serde(untagged)]
enum SignUpResponse {
    Session(TokenResponse),
    User(AuthUser),
}

impl RestRemote {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| RemoteError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            session: RwLock::new(None),
        })
    }

    pub fn from_config(config: &RemoteConfig) -> Result<Self, RemoteError> {
        let url = config
            .url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .ok_or(RemoteError::NotConfigured)?;
        Self::new(url, config.api_key.clone().unwrap_or_default())
    }

    /// Use `session`'s access token for subsequent requests.
    pub fn set_session(&self, session: Option<Session>) {
        *self.session.write() = session;
    }

    pub fn session(&self) -> Option<Session> {
        self.session.read().clone()
    }

    fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.base_url, path)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        let bearer = self
            .session
            .read()
            .as_ref()
            .map(|s| s.access_token.clone())
            .unwrap_or_else(|| self.api_key.clone());
        builder
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", bearer))
    }

    async fn send(&self, table: &str, builder: RequestBuilder) -> Result<Response, RemoteError> {
        let response = builder
            .send()
            .await
            .map_err(|e| RemoteError::Transport(e.to_string()))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = response.text().await.unwrap_or_default();
        Err(match status.as_u16() {
            401 | 403 => RemoteError::Unauthorized(message),
            400 | 409 | 422 => RemoteError::Rejected {
                table: table.to_string(),
                message,
            },
            code => RemoteError::Status {
                status: code,
                message,
            },
        })
    }

    async fn rows(response: Response) -> Result<Vec<Row>, RemoteError> {
        let body: Value = response
            .json()
            .await
            .map_err(|e| RemoteError::InvalidResponse(e.to_string()))?;
        match body {
            Value::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    Value::Object(map) => Ok(map),
                    other => Err(RemoteError::InvalidResponse(format!(
                        "expected row object, got {}",
                        other
                    ))),
                })
                .collect(),
            Value::Object(map) => Ok(vec![map]),
            Value::Null => Ok(Vec::new()),
            other => Err(RemoteError::InvalidResponse(format!(
                "expected row array, got {}",
                other
            ))),
        }
    }
}

/// Render a scalar the way PostgREST expects it inside `op.value`.
fn filter_literal(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

/// Query-string pairs for a select.
pub fn select_params(query: &RemoteQuery) -> Vec<(String, String)> {
    let mut params = vec![("select".to_string(), "*".to_string())];
    params.extend(filter_params(&query.filters));
    if let Some(order) = &query.order {
        let dir = if order.ascending { "asc" } else { "desc" };
        params.push(("order".to_string(), format!("{}.{}", order.column, dir)));
    }
    if let Some(limit) = query.limit {
        params.push(("limit".to_string(), limit.to_string()));
    }
    params
}

/// Query-string pairs for row filters.
pub fn filter_params(filters: &[Filter]) -> Vec<(String, String)> {
    filters
        .iter()
        .map(|f| match f {
            Filter::Eq(col, v) => (col.clone(), format!("eq.{}", filter_literal(v))),
            Filter::Gt(col, v) => (col.clone(), format!("gt.{}", filter_literal(v))),
        })
        .collect()
}

#[async_trait]
impl RemoteStore for RestRemote {
    async fn select(&self, table: &str, query: &RemoteQuery) -> Result<Vec<Row>, RemoteError> {
        let builder = self
            .authorized(self.client.get(self.rest_url(table)))
            .query(&select_params(query));
        let rows = Self::rows(self.send(table, builder).await?).await?;
        debug!(table, rows = rows.len(), "REST select");
        Ok(rows)
    }

    async fn upsert(
        &self,
        table: &str,
        rows: Vec<Row>,
        conflict_key: &[&str],
    ) -> Result<Vec<Row>, RemoteError> {
        let count = rows.len();
        let builder = self
            .authorized(self.client.post(self.rest_url(table)))
            .query(&[("on_conflict", conflict_key.join(","))])
            .header("Prefer", "resolution=merge-duplicates,return=representation")
            .json(&rows);
        let written = Self::rows(self.send(table, builder).await?).await?;
        debug!(table, sent = count, written = written.len(), "REST upsert");
        Ok(written)
    }

    async fn update(
        &self,
        table: &str,
        patch: Row,
        filters: &[Filter],
    ) -> Result<Vec<Row>, RemoteError> {
        let builder = self
            .authorized(self.client.patch(self.rest_url(table)))
            .query(&filter_params(filters))
            .header("Prefer", "return=representation")
            .json(&patch);
        Self::rows(self.send(table, builder).await?).await
    }
}

#[async_trait]
impl AuthBackend for RestRemote {
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        name: &str,
    ) -> Result<Session, RemoteError> {
        let builder = self
            .client
            .post(self.auth_url("signup"))
            .header("apikey", &self.api_key)
            .json(&json!({"email": email, "password": password, "data": {"name": name}}));
        let response: SignUpResponse = self
            .send("auth.users", builder)
            .await?
            .json()
            .await
            .map_err(|e| RemoteError::InvalidResponse(e.to_string()))?;

        let session = match response {
            SignUpResponse::Session(token) => Session {
                user_id: token.user.id,
                email: token.user.email.unwrap_or_else(|| email.to_string()),
                access_token: token.access_token,
                refresh_token: token.refresh_token,
            },
            // No session until the address is confirmed; fall back to the key.
            SignUpResponse::User(user) => Session {
                user_id: user.id,
                email: user.email.unwrap_or_else(|| email.to_string()),
                access_token: self.api_key.clone(),
                refresh_token: None,
            },
        };
        self.set_session(Some(session.clone()));
        Ok(session)
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, RemoteError> {
        let builder = self
            .client
            .post(self.auth_url("token"))
            .query(&[("grant_type", "password")])
            .header("apikey", &self.api_key)
            .json(&json!({"email": email, "password": password}));
        let token: TokenResponse = self
            .send("auth.users", builder)
            .await?
            .json()
            .await
            .map_err(|e| RemoteError::InvalidResponse(e.to_string()))?;

        let session = Session {
            user_id: token.user.id,
            email: token.user.email.unwrap_or_else(|| email.to_string()),
            access_token: token.access_token,
            refresh_token: token.refresh_token,
        };
        self.set_session(Some(session.clone()));
        Ok(session)
    }

    async fn sign_out(&self, session: &Session) -> Result<(), RemoteError> {
        let builder = self
            .client
            .post(self.auth_url("logout"))
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", session.access_token));
        self.send("auth.users", builder).await?;
        self.set_session(None);
        Ok(())
    }
}
