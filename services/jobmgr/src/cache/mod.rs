//! Write-through job/task cache.
//!
//! The cache owns the in-memory copies of job and task runtimes. Every
//! mutation is expressed as a [`RuntimeDiff`] and written through to storage
//! under a revision compare-and-set; only on a successful write does the
//! in-memory copy advance. A lost race invalidates the entry so the next
//! reader reloads.
//!
//! Lock order is strictly job → task and never reversed.

mod diff;
mod job;
mod task;

pub use diff::RuntimeDiff;
pub use job::CachedJob;
pub use task::CachedTask;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use armada_id::JobId;
use armada_storage::{JobStore, TaskStore};

/// The top-level cache: `JobId -> CachedJob`.
pub struct JobFactory {
    jobs: Mutex<HashMap<JobId, Arc<CachedJob>>>,
    job_store: JobStore,
    task_store: TaskStore,
}

impl JobFactory {
    pub fn new(job_store: JobStore, task_store: TaskStore) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            job_store,
            task_store,
        }
    }

    /// Returns the cached job, creating an empty entry if absent. Adding an
    /// already-cached job returns the existing entry.
    pub fn add_job(&self, job_id: JobId) -> Arc<CachedJob> {
        let mut jobs = self.lock();
        jobs.entry(job_id)
            .or_insert_with(|| {
                Arc::new(CachedJob::new(
                    job_id,
                    self.job_store.clone(),
                    self.task_store.clone(),
                ))
            })
            .clone()
    }

    /// Returns the cached job if present.
    pub fn get_job(&self, job_id: &JobId) -> Option<Arc<CachedJob>> {
        self.lock().get(job_id).cloned()
    }

    /// Drops one job from the cache.
    pub fn remove_job(&self, job_id: &JobId) {
        self.lock().remove(job_id);
    }

    /// All cached job ids.
    pub fn job_ids(&self) -> Vec<JobId> {
        self.lock().keys().copied().collect()
    }

    /// Drops every entry. Called on leadership loss.
    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<JobId, Arc<CachedJob>>> {
        self.jobs.lock().expect("job factory lock poisoned")
    }
}
