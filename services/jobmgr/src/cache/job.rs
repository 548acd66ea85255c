//! One cached job and its instances.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use armada_api::job::{JobConfig, JobRuntime, JobState};
use armada_api::task::{TaskRuntime, TaskState, TaskStats};
use armada_id::{JobId, TaskId};
use armada_storage::{JobStore, StorageError, TaskStore};

use crate::error::JobmgrError;

use super::diff::RuntimeDiff;
use super::task::CachedTask;

struct JobInner {
    config: Option<JobConfig>,
    runtime: Option<JobRuntime>,
    tasks: HashMap<u32, Arc<CachedTask>>,
}

/// In-memory view of one job: runtime copy plus the instance map.
///
/// The job lock guards the config/runtime copies and the task map; task
/// runtime state lives behind each task's own lock, always acquired after
/// this one.
pub struct CachedJob {
    job_id: JobId,
    job_store: JobStore,
    task_store: TaskStore,
    inner: Mutex<JobInner>,
}

impl CachedJob {
    pub(super) fn new(job_id: JobId, job_store: JobStore, task_store: TaskStore) -> Self {
        Self {
            job_id,
            job_store,
            task_store,
            inner: Mutex::new(JobInner {
                config: None,
                runtime: None,
                tasks: HashMap::new(),
            }),
        }
    }

    pub fn id(&self) -> JobId {
        self.job_id
    }

    /// Returns the cached task for an instance, adding an entry if absent.
    /// A task is addable only once: re-adding returns the existing entry.
    pub fn add_task(&self, instance_id: u32) -> Arc<CachedTask> {
        let mut inner = self.lock();
        inner
            .tasks
            .entry(instance_id)
            .or_insert_with(|| {
                Arc::new(CachedTask::new(
                    TaskId::new(self.job_id, instance_id),
                    self.task_store.clone(),
                ))
            })
            .clone()
    }

    /// Returns the cached task if the instance is known.
    pub fn get_task(&self, instance_id: u32) -> Option<Arc<CachedTask>> {
        self.lock().tasks.get(&instance_id).cloned()
    }

    /// Instance ids currently cached.
    pub fn task_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.lock().tasks.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// The job config, loading the runtime's version from storage on a miss.
    pub async fn config(&self) -> Result<JobConfig, JobmgrError> {
        if let Some(config) = self.lock().config.clone() {
            return Ok(config);
        }
        let runtime = self.runtime().await?;
        let config = self
            .job_store
            .get_job_config(&self.job_id, runtime.config_version)
            .await?;
        self.lock().config = Some(config.clone());
        Ok(config)
    }

    /// The job runtime, loading from storage on a miss.
    pub async fn runtime(&self) -> Result<JobRuntime, JobmgrError> {
        if let Some(runtime) = self.lock().runtime.clone() {
            return Ok(runtime);
        }
        let loaded = self.job_store.get_job_runtime(&self.job_id).await?;
        self.lock().runtime = Some(loaded.clone());
        Ok(loaded)
    }

    /// Seeds config and runtime after job creation or recovery load.
    pub fn seed(&self, config: JobConfig, runtime: JobRuntime) {
        let mut inner = self.lock();
        inner.config = Some(config);
        inner.runtime = Some(runtime);
    }

    /// Creates task runtimes for instances `[from, to)` and seeds the cache.
    pub async fn create_tasks(
        &self,
        from: u32,
        to: u32,
        goal_state: TaskState,
        config_version: u64,
    ) -> Result<(), JobmgrError> {
        for instance in from..to {
            let task = self.add_task(instance);
            let runtime = TaskRuntime::new(goal_state, config_version);
            match self.task_store.create_task_runtime(&task.task_id(), &runtime).await {
                Ok(()) => task.seed(runtime),
                // a leader crash between write and enqueue leaves the row
                Err(StorageError::AlreadyExists { .. }) => task.invalidate(),
                Err(e) => return Err(e.into()),
            }
        }
        debug!(job_id = %self.job_id, from, to, "task runtimes created");
        Ok(())
    }

    /// Applies per-instance diffs, write-through, one instance at a time.
    ///
    /// Fails fast on the first error: a lost revision race surfaces as
    /// `Concurrent` with the entry invalidated.
    pub async fn patch_tasks(
        &self,
        diffs: HashMap<u32, RuntimeDiff>,
    ) -> Result<Vec<TaskRuntime>, JobmgrError> {
        let mut ordered: Vec<(u32, RuntimeDiff)> = diffs.into_iter().collect();
        ordered.sort_by_key(|(instance, _)| *instance);

        let mut written = Vec::with_capacity(ordered.len());
        for (instance, diff) in ordered {
            let task = self.add_task(instance);
            written.push(task.patch(&diff).await?);
        }
        Ok(written)
    }

    /// Recomputes `task_stats` and the derived job state from cached task
    /// runtimes, then writes the job runtime through under revision CAS.
    pub async fn update_runtime_from_tasks(&self) -> Result<JobRuntime, JobmgrError> {
        let config = self.config().await?;
        let runtime = self.runtime().await?;

        let mut stats = TaskStats::new();
        let tasks: Vec<Arc<CachedTask>> = {
            let inner = self.lock();
            inner.tasks.values().cloned().collect()
        };
        for task in &tasks {
            let task_runtime = task.runtime().await?;
            *stats.entry(task_runtime.state).or_default() += 1;
        }

        let next_state = derive_job_state(&config, &stats, runtime.state);
        let mut next = runtime.clone();
        next.task_stats = stats;
        next.state = next_state;
        if next_state.is_terminal() && next.completed_at.is_none() {
            next.completed_at = Some(chrono::Utc::now());
        }

        match self
            .job_store
            .update_job_runtime(&self.job_id, &next, runtime.state)
            .await
        {
            Ok(written) => {
                if written.state != runtime.state {
                    info!(job_id = %self.job_id, state = %written.state, "job state changed");
                }
                self.lock().runtime = Some(written.clone());
                Ok(written)
            }
            Err(StorageError::WriteConflict { .. }) => {
                self.lock().runtime = None;
                Err(JobmgrError::Concurrent(self.job_id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Drops cached copies so the next read reloads.
    pub fn invalidate(&self) {
        let mut inner = self.lock();
        inner.config = None;
        inner.runtime = None;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, JobInner> {
        self.inner.lock().expect("cached job lock poisoned")
    }
}

/// Derives the aggregate job state from instance counts.
fn derive_job_state(config: &JobConfig, stats: &TaskStats, current: JobState) -> JobState {
    let count = |state: TaskState| stats.get(&state).copied().unwrap_or(0);
    let total = config.instance_count;

    if count(TaskState::Succeeded) >= total {
        return JobState::Succeeded;
    }
    if count(TaskState::Killed) > 0
        && count(TaskState::Killed) + count(TaskState::Succeeded) + count(TaskState::Failed)
            >= total
    {
        return JobState::Killed;
    }
    if count(TaskState::Failed) > 0
        && count(TaskState::Failed) + count(TaskState::Succeeded) >= total
    {
        return JobState::Failed;
    }
    if count(TaskState::Running) > 0
        || count(TaskState::Starting) > 0
        || count(TaskState::Launched) > 0
    {
        return JobState::Running;
    }
    if count(TaskState::Killing) > 0 {
        return JobState::Killing;
    }
    if count(TaskState::Pending) > 0 || count(TaskState::Placed) > 0 {
        return JobState::Pending;
    }
    current
}

#[cfg(test)]
mod tests {
    use super::*;
    use armada_api::job::{JobType, SlaConfig};
    use armada_api::task::TaskConfig;
    use armada_id::RespoolId;
    use armada_scalar::Resources;
    use armada_storage::InMemoryDriver;
    use chrono::Utc;

    fn stores() -> (JobStore, TaskStore) {
        let driver = Arc::new(InMemoryDriver::new());
        (JobStore::new(driver.clone()), TaskStore::new(driver))
    }

    fn job_config(instances: u32) -> JobConfig {
        JobConfig {
            name: "demo".into(),
            job_type: JobType::Batch,
            instance_count: instances,
            sla: SlaConfig::default(),
            respool_id: RespoolId::parse("batch").unwrap(),
            default_task: TaskConfig::with_resource("demo", Resources::new(1.0, 128.0, 0.0, 0.0)),
            config_version: 1,
        }
    }

    async fn seeded_job(instances: u32) -> (Arc<CachedJob>, JobStore, TaskStore) {
        let (job_store, task_store) = stores();
        let job_id = JobId::new();
        let config = job_config(instances);
        let runtime = JobRuntime::new(JobType::Batch, 1, Utc::now());
        job_store.create_job(&job_id, &config, &runtime).await.unwrap();

        let job = Arc::new(CachedJob::new(
            job_id,
            job_store.clone(),
            task_store.clone(),
        ));
        job.seed(config, runtime);
        job.create_tasks(0, instances, TaskState::Succeeded, 1)
            .await
            .unwrap();
        (job, job_store, task_store)
    }

    #[tokio::test]
    async fn add_task_is_idempotent() {
        let (job, _, _) = seeded_job(2).await;
        let first = job.add_task(0);
        let second = job.add_task(0);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn patch_then_get_returns_patched() {
        let (job, _, _) = seeded_job(1).await;
        let diff = RuntimeDiff::to_state(TaskState::Pending).with_message("queued");
        let written = job
            .patch_tasks(HashMap::from([(0, diff)]))
            .await
            .unwrap();
        assert_eq!(written[0].state, TaskState::Pending);
        assert_eq!(written[0].revision, 1);

        let cached = job.get_task(0).unwrap().runtime().await.unwrap();
        assert_eq!(cached, written[0]);
    }

    #[tokio::test]
    async fn concurrent_patch_detected_and_recoverable() {
        let (job, _, task_store) = seeded_job(1).await;

        // stale writer: bypass the cache and advance storage underneath
        let task = job.add_task(0);
        let stale = task.runtime().await.unwrap();
        let mut external = stale.clone();
        external.state = TaskState::Pending;
        task_store
            .update_task_runtime(&task.task_id(), &external)
            .await
            .unwrap();

        let err = job
            .patch_tasks(HashMap::from([(0, RuntimeDiff::to_state(TaskState::Pending))]))
            .await
            .unwrap_err();
        assert!(matches!(err, JobmgrError::Concurrent(_)));

        // the entry was invalidated: reload sees the external write and a
        // retry against fresh state succeeds
        let reloaded = task.runtime().await.unwrap();
        assert_eq!(reloaded.state, TaskState::Pending);
        assert_eq!(reloaded.revision, 1);
        let written = job
            .patch_tasks(HashMap::from([(0, RuntimeDiff::to_state(TaskState::Placed))]))
            .await
            .unwrap();
        assert_eq!(written[0].revision, 2);
    }

    #[tokio::test]
    async fn illegal_transition_is_rejected() {
        let (job, _, _) = seeded_job(1).await;
        let err = job
            .patch_tasks(HashMap::from([(0, RuntimeDiff::to_state(TaskState::Running))]))
            .await
            .unwrap_err();
        assert!(matches!(err, JobmgrError::IllegalTransition { .. }));
    }

    #[tokio::test]
    async fn job_runtime_updater_derives_state() {
        let (job, job_store, _) = seeded_job(2).await;

        for instance in 0..2 {
            job.patch_tasks(HashMap::from([(
                instance,
                RuntimeDiff::to_state(TaskState::Pending),
            )]))
            .await
            .unwrap();
        }
        let updated = job.update_runtime_from_tasks().await.unwrap();
        assert_eq!(updated.state, JobState::Pending);
        assert_eq!(updated.task_stats.get(&TaskState::Pending), Some(&2));

        // storage agrees
        let stored = job_store.get_job_runtime(&job.id()).await.unwrap();
        assert_eq!(stored.state, JobState::Pending);
    }
}
