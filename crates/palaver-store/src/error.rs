use palaver_shared::ChatError;
use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Failed to determine a platform data directory.
    #[error("Could not determine application data directory")]
    NoDataDir,

    /// Generic I/O error (e.g. creating the database directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A query expected exactly one row but found none.
    #[error("{0} not found")]
    NotFound(String),

    /// Input rejected before it reached SQLite.
    #[error("Invalid input: {0}")]
    Validation(String),

    /// Ownership or role check failed.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Uniqueness violation (e.g. handle already registered).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),
}

impl From<ChatError> for StoreError {
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::NotFound(m) => StoreError::NotFound(m),
            ChatError::PermissionDenied(m) => StoreError::PermissionDenied(m),
            ChatError::Conflict(m) => StoreError::Conflict(m),
            other => StoreError::Validation(other.detail()),
        }
    }
}

impl From<StoreError> for ChatError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => ChatError::NotFound(what),
            StoreError::Validation(m) => ChatError::Validation(m),
            StoreError::PermissionDenied(m) => ChatError::PermissionDenied(m),
            StoreError::Conflict(m) => ChatError::Conflict(m),
            other => ChatError::Transient(other.to_string()),
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
