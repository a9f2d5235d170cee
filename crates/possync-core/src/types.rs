//! Core types for PosSync
//!
//! Rows travel between the local store, the adapters and the remote backend
//! as [`Row`] maps. The typed structs below are views over those maps for
//! callers that want compile-time field names.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Generic row shape: column name to scalar value
pub type Row = serde_json::Map<String, Value>;

/// Column carrying the dirty flag on flag-tracked tables
pub const IS_SYNCED: &str = "is_synced";
/// Column stamped when a row was last acknowledged by the remote store
pub const SYNCED_AT: &str = "synced_at";
/// Server-authoritative revision column
pub const UPDATED_AT: &str = "updated_at";

/// Current UTC time as an ISO-8601 string with millisecond precision.
pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse the timestamp shapes that show up in rows.
///
/// Accepts RFC 3339, SQLite's `CURRENT_TIMESTAMP` format and bare dates.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Role of a profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Manager,
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Manager => "manager",
            Role::User => "user",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "manager" => Ok(Role::Manager),
            "user" => Ok(Role::User),
            other => Err(format!(
                "Invalid role '{}'. Must be one of: admin, manager, user",
                other
            )),
        }
    }
}

/// Role a profile holds within one branch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssignmentRole {
    Manager,
    User,
}

impl AssignmentRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssignmentRole::Manager => "manager",
            AssignmentRole::User => "user",
        }
    }
}

impl fmt::Display for AssignmentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssignmentRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "manager" => Ok(AssignmentRole::Manager),
            "user" => Ok(AssignmentRole::User),
            other => Err(format!(
                "Invalid assignment role '{}'. Must be one of: manager, user",
                other
            )),
        }
    }
}

/// A user profile as stored locally
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    pub role: Role,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub synced_at: Option<String>,
    #[serde(default, deserialize_with = "de_flag")]
    pub is_synced: bool,
}

/// A store branch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Branch {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub synced_at: Option<String>,
    #[serde(default, deserialize_with = "de_flag")]
    pub is_synced: bool,
    #[serde(default, deserialize_with = "de_flag")]
    pub deleted: bool,
}

/// Membership of a profile in a branch, keyed by `(branch_id, user_id)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchAssignment {
    pub branch_id: String,
    pub user_id: String,
    pub role: AssignmentRole,
    #[serde(default)]
    pub assigned_at: Option<String>,
}

/// An authenticated backend session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub user_id: String,
    pub email: String,
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// SQLite has no boolean type; flags come back as 0/1 integers, remote
/// rows may carry real booleans, and nullable columns arrive as null.
fn de_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Bool(b) => b,
        Value::Number(n) => n.as_i64().map(|i| i != 0).unwrap_or(false),
        Value::String(s) => matches!(s.as_str(), "1" | "true" | "t"),
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_role_parse_and_display() {
        assert_eq!("ADMIN".parse::<Role>().unwrap(), Role::Admin);
        assert_eq!(Role::Manager.to_string(), "manager");
        assert!("owner".parse::<Role>().is_err());
        assert!("admin".parse::<AssignmentRole>().is_err());
    }

    #[test]
    fn test_profile_from_sqlite_row() {
        let profile: Profile = serde_json::from_value(json!({
            "id": "u1",
            "email": "a@example.com",
            "name": null,
            "role": "user",
            "is_synced": 0,
        }))
        .unwrap();
        assert!(!profile.is_synced);
        assert_eq!(profile.role, Role::User);
    }

    #[test]
    fn test_branch_deleted_flag_accepts_bool_and_int() {
        let from_remote: Branch =
            serde_json::from_value(json!({"id": "b", "name": "Main", "deleted": true})).unwrap();
        let from_local: Branch =
            serde_json::from_value(json!({"id": "b", "name": "Main", "deleted": 1})).unwrap();
        let absent: Branch =
            serde_json::from_value(json!({"id": "b", "name": "Main", "deleted": null})).unwrap();
        assert!(from_remote.deleted);
        assert!(from_local.deleted);
        assert!(!absent.deleted);
    }

    #[test]
    fn test_parse_timestamp_shapes() {
        let a = parse_timestamp("2024-03-01T10:00:00.000Z").unwrap();
        let b = parse_timestamp("2024-03-01 10:00:00").unwrap();
        assert_eq!(a, b);
        assert!(parse_timestamp("1970-01-01").unwrap() < a);
        assert!(parse_timestamp("yesterday").is_none());
    }
}
