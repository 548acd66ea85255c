//! Resource manager error types.

use armada_api::ErrorKind;
use armada_id::RespoolId;
use thiserror::Error;

/// Errors from tree and service operations.
#[derive(Debug, Error)]
pub enum ResmgrError {
    #[error("resource pool not found: {0}")]
    PoolNotFound(RespoolId),

    #[error("resource pool path not found: {0}")]
    PathNotFound(String),

    #[error("parent resource pool does not exist: {0}")]
    ParentMissing(RespoolId),

    #[error("upsert of {id} would create a cycle through {through}")]
    Cycle { id: RespoolId, through: RespoolId },

    #[error("resource pool {0} has children")]
    HasChildren(RespoolId),

    #[error("resource pool {0} has queued gangs")]
    HasQueuedGangs(RespoolId),

    #[error("resource pool {0} is not a leaf")]
    NotLeaf(RespoolId),

    #[error("the tree has not been started")]
    NotStarted,

    #[error("cannot delete the root resource pool")]
    RootImmortal,

    #[error("invalid gang: {0}")]
    InvalidGang(String),

    #[error("task {0} is not tracked")]
    UntrackedTask(armada_id::TaskId),

    #[error("storage error: {0}")]
    Storage(#[from] armada_storage::StorageError),

    #[error("internal resmgr error: {0}")]
    Internal(String),
}

impl ResmgrError {
    /// Maps onto the shared failure taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ResmgrError::PoolNotFound(_) | ResmgrError::PathNotFound(_) => ErrorKind::NotFound,
            ResmgrError::ParentMissing(_)
            | ResmgrError::Cycle { .. }
            | ResmgrError::HasChildren(_)
            | ResmgrError::HasQueuedGangs(_)
            | ResmgrError::NotLeaf(_)
            | ResmgrError::RootImmortal
            | ResmgrError::InvalidGang(_) => ErrorKind::Invalid,
            ResmgrError::UntrackedTask(_) => ErrorKind::NotFound,
            ResmgrError::NotStarted => ErrorKind::Unavailable,
            ResmgrError::Storage(e) => e.kind(),
            ResmgrError::Internal(_) => ErrorKind::Internal,
        }
    }
}

impl From<ResmgrError> for armada_api::Error {
    fn from(err: ResmgrError) -> Self {
        armada_api::Error::new(err.kind(), err.to_string())
    }
}
