//! One cached task.

use std::sync::Mutex;

use tracing::debug;

use armada_api::task::TaskRuntime;
use armada_id::TaskId;
use armada_storage::{StorageError, TaskStore};

use crate::error::JobmgrError;

use super::diff::RuntimeDiff;

/// In-memory copy of one task's runtime, revision-tracked against storage.
///
/// The lock guards only the cached copy and is never held across an await:
/// a patch snapshots under the lock, races the conditional write against
/// storage, and re-acquires to commit or drop the copy. Concurrent patches
/// for the same task therefore race on the revision CAS, not on this lock;
/// the loser is invalidated and reloads.
pub struct CachedTask {
    task_id: TaskId,
    store: TaskStore,
    runtime: Mutex<Option<TaskRuntime>>,
}

impl CachedTask {
    pub(super) fn new(task_id: TaskId, store: TaskStore) -> Self {
        Self {
            task_id,
            store,
            runtime: Mutex::new(None),
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// The cached runtime, loading from storage on a miss.
    pub async fn runtime(&self) -> Result<TaskRuntime, JobmgrError> {
        if let Some(runtime) = self.lock().clone() {
            return Ok(runtime);
        }
        let loaded = self.store.get_task_runtime(&self.task_id).await?;
        *self.lock() = Some(loaded.clone());
        Ok(loaded)
    }

    /// Seeds the cache from a runtime just created or loaded in bulk.
    pub(crate) fn seed(&self, runtime: TaskRuntime) {
        *self.lock() = Some(runtime);
    }

    /// Applies a diff under revision CAS.
    ///
    /// On a lost race the entry is invalidated and the call fails with
    /// `Concurrent`; the caller reloads and retries with fresh state.
    pub async fn patch(&self, diff: &RuntimeDiff) -> Result<TaskRuntime, JobmgrError> {
        let cached = self.lock().clone();
        let current = match cached {
            Some(runtime) => runtime,
            None => self.store.get_task_runtime(&self.task_id).await?,
        };

        if let Some(target) = diff.state {
            if target != current.state && !current.state.can_transition_to(target) {
                return Err(JobmgrError::IllegalTransition {
                    task_id: self.task_id,
                    from: current.state,
                    to: target,
                });
            }
        }

        let mut next = current.clone();
        diff.apply(&mut next);
        next.revision = current.revision;

        match self.store.update_task_runtime(&self.task_id, &next).await {
            Ok(written) => {
                debug!(
                    task_id = %self.task_id,
                    state = %written.state,
                    revision = written.revision,
                    "task runtime patched"
                );
                *self.lock() = Some(written.clone());
                Ok(written)
            }
            Err(StorageError::WriteConflict { .. }) => {
                // Someone else advanced the row; drop the stale copy.
                *self.lock() = None;
                Err(JobmgrError::Concurrent(self.task_id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Drops the cached copy so the next read reloads from storage.
    pub fn invalidate(&self) {
        *self.lock() = None;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<TaskRuntime>> {
        self.runtime.lock().expect("cached task lock poisoned")
    }
}
