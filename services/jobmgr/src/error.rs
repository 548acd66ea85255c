//! Job manager error types.

use armada_api::ErrorKind;
use armada_id::{JobId, TaskId};
use thiserror::Error;

/// Errors from cache, lifecycle, and recovery operations.
#[derive(Debug, Error)]
pub enum JobmgrError {
    #[error("job not found: {0}")]
    JobNotFound(JobId),

    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("illegal task state transition for {task_id}: {from} -> {to}")]
    IllegalTransition {
        task_id: TaskId,
        from: armada_api::task::TaskState,
        to: armada_api::task::TaskState,
    },

    #[error("concurrent modification of {0}, cache invalidated")]
    Concurrent(String),

    #[error("launch rejected: no pods")]
    EmptyPods,

    #[error("kill operations are locked")]
    KillLocked,

    #[error("rate limit reached for {0}")]
    RateLimited(&'static str),

    #[error("storage error: {0}")]
    Storage(#[from] armada_storage::StorageError),

    #[error("{0}")]
    Client(#[from] armada_api::Error),

    #[error("host manager call timed out after {0:?}")]
    HostmgrTimeout(std::time::Duration),

    #[error("recovery aborted: {0}")]
    RecoveryAborted(String),

    #[error("internal jobmgr error: {0}")]
    Internal(String),
}

impl JobmgrError {
    /// Maps onto the shared failure taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            JobmgrError::JobNotFound(_) | JobmgrError::TaskNotFound(_) => ErrorKind::NotFound,
            JobmgrError::IllegalTransition { .. } | JobmgrError::EmptyPods => ErrorKind::Invalid,
            JobmgrError::Concurrent(_) => ErrorKind::Concurrent,
            JobmgrError::KillLocked => ErrorKind::Internal,
            JobmgrError::RateLimited(_) => ErrorKind::ResourceExhausted,
            JobmgrError::Storage(e) => e.kind(),
            JobmgrError::Client(e) => e.kind(),
            JobmgrError::HostmgrTimeout(_) => ErrorKind::DeadlineExceeded,
            JobmgrError::RecoveryAborted(_) => ErrorKind::Internal,
            JobmgrError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// True if the goal-state engine should retry the action that hit this.
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable() || matches!(self, JobmgrError::RateLimited(_))
    }
}
