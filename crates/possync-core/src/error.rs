//! Error types for PosSync

use thiserror::Error;

/// Errors reported by a remote record store or auth backend.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RemoteError {
    /// The request never produced a response (DNS, TLS, connection reset)
    #[error("Transport error: {0}")]
    Transport(String),

    /// The backend answered with a non-success status
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    /// The backend refused the rows (constraint violation, bad column)
    #[error("Rejected by {table}: {message}")]
    Rejected { table: String, message: String },

    /// Missing or expired credentials
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// No backend URL has been configured
    #[error("Remote backend not configured")]
    NotConfigured,

    /// The response body could not be decoded
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Main error type for PosSync operations
#[derive(Error, Debug)]
pub enum SyncError {
    /// Error raised by the embedded SQLite engine
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The local store was used before `initialize()` succeeded
    #[error("Local store not initialized")]
    NotInitialized,

    /// General I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Error returned by the remote backend
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    /// A row is missing a key column or carries an unusable value
    #[error("Malformed row in {table}: {reason}")]
    MalformedRow { table: String, reason: String },

    /// Error during serialization/deserialization
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Sign-in, sign-up or session failure
    #[error("Authentication error: {0}")]
    Auth(String),

    /// The acting profile may not perform this operation
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Requested row does not exist locally
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl SyncError {
    /// Whether the error originates in the on-device store.
    ///
    /// Local failures propagate to callers; everything else is contained
    /// at the sync-cycle boundary.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            SyncError::Database(_) | SyncError::NotInitialized | SyncError::Io(_)
        )
    }
}

/// Result type alias using SyncError
pub type SyncResult<T> = Result<T, SyncError>;
