//! Storage error types.

use armada_api::ErrorKind;
use thiserror::Error;

/// Storage operation errors.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A statement referenced a column or value the schema does not allow.
    #[error("schema violation on table '{table}': {message}")]
    SchemaViolation { table: &'static str, message: String },

    /// The requested row does not exist.
    #[error("row not found in '{table}': {key}")]
    RowNotFound { table: &'static str, key: String },

    /// A compare-and-set insert hit an existing row.
    #[error("row already exists in '{table}': {key}")]
    AlreadyExists { table: &'static str, key: String },

    /// A conditional update lost the revision race.
    #[error("conditional write not applied on '{table}': {key}")]
    WriteConflict { table: &'static str, key: String },

    /// Entity (de)serialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The backing store is transiently unreachable.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// The statement exceeded the storage deadline.
    #[error("storage operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// An invariant inside the storage layer broke.
    #[error("internal storage error: {0}")]
    Internal(String),
}

impl StorageError {
    /// Maps onto the shared failure taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StorageError::SchemaViolation { .. } => ErrorKind::Invalid,
            StorageError::RowNotFound { .. } => ErrorKind::NotFound,
            StorageError::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            StorageError::WriteConflict { .. } => ErrorKind::Concurrent,
            StorageError::Serialization(_) => ErrorKind::Internal,
            StorageError::Unavailable(_) => ErrorKind::Unavailable,
            StorageError::Timeout(_) => ErrorKind::DeadlineExceeded,
            StorageError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// True if the retry policy may re-issue the statement.
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable() && !matches!(self, StorageError::WriteConflict { .. })
    }
}
