//! Error types for the storage layer.

use rusqlite::ErrorCode;
use thiserror::Error;

/// Errors that can occur in the storage layer.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Database connection or query error.
    #[error("Database error: {0}")]
    Connection(#[source] rusqlite::Error),

    /// A uniqueness or primary-key constraint rejected a write.
    #[error("Unique constraint violated: {0}")]
    UniqueViolation(String),

    /// A statement that must touch an exact number of rows did not.
    #[error("Expected {expected} row(s) to be affected, got {actual}")]
    RowCount { expected: usize, actual: usize },

    /// Item not found in storage.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid data error.
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(failure, message)
                if failure.code == ErrorCode::ConstraintViolation
                    && matches!(
                        failure.extended_code,
                        rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                            | rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                    ) =>
            {
                StorageError::UniqueViolation(
                    message.clone().unwrap_or_else(|| failure.to_string()),
                )
            }
            _ => StorageError::Connection(err),
        }
    }
}

impl StorageError {
    /// Returns true if retrying the same call could succeed.
    ///
    /// Only transport-level failures (busy/locked database, I/O) qualify;
    /// constraint and row-count failures are answers, not accidents.
    pub fn is_transient(&self) -> bool {
        match self {
            StorageError::Connection(rusqlite::Error::SqliteFailure(failure, _)) => matches!(
                failure.code,
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked | ErrorCode::SystemIoFailure
            ),
            StorageError::Io(_) => true,
            _ => false,
        }
    }
}

/// Result type alias for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;
