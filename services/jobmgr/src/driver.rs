//! The job manager driver: composition root and background loops.

use std::sync::{Arc, OnceLock};

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{error, info, instrument, warn};

use armada_api::clients::ResourceManagerClient;
use armada_api::job::{JobConfig, JobRuntime};
use armada_api::task::TaskState;
use armada_eventstream::{Client, Handler};
use armada_id::{JobId, TaskId};
use armada_storage::{Driver, JobStore, TaskStore, UpdateStore, VolumeStore};

use crate::cache::JobFactory;
use crate::config::JobmgrConfig;
use crate::error::JobmgrError;
use crate::goalstate::{Engine, EngineConfig, JobEntity, TaskEntity};
use crate::lifecycle::LifecycleManager;
use crate::placements::PlacementProcessor;
use crate::recovery;
use crate::status::StatusProcessor;

/// Event stream client name for the job manager.
pub const EVENT_CLIENT_NAME: &str = "jobmgr";

/// Shared state every job manager component hangs off.
pub(crate) struct Ctx {
    pub config: JobmgrConfig,
    pub factory: JobFactory,
    pub job_store: JobStore,
    pub task_store: TaskStore,
    pub update_store: UpdateStore,
    pub volume_store: VolumeStore,
    pub resmgr: Arc<dyn ResourceManagerClient>,
    pub lifecycle: LifecycleManager,
    pub events: Arc<Handler>,
    pub task_engine: OnceLock<Arc<Engine>>,
    pub job_engine: OnceLock<Arc<Engine>>,
}

impl Ctx {
    pub fn task_engine(&self) -> &Arc<Engine> {
        self.task_engine.get().expect("task engine not wired")
    }

    pub fn job_engine(&self) -> &Arc<Engine> {
        self.job_engine.get().expect("job engine not wired")
    }
}

pub(crate) trait CtxEnqueue {
    fn enqueue_task(&self, task_id: TaskId, deadline: Instant);
    fn enqueue_job(&self, job_id: JobId, deadline: Instant);
}

impl CtxEnqueue for Arc<Ctx> {
    fn enqueue_task(&self, task_id: TaskId, deadline: Instant) {
        let entity = Arc::new(TaskEntity::new(task_id, self.clone()));
        self.task_engine().enqueue(entity, deadline);
    }

    fn enqueue_job(&self, job_id: JobId, deadline: Instant) {
        let entity = Arc::new(JobEntity::new(job_id, self.clone()));
        self.job_engine().enqueue(entity, deadline);
    }
}

/// The job manager.
pub struct JobManager {
    ctx: Arc<Ctx>,
}

impl JobManager {
    /// Wires the job manager over a storage driver, the resource manager,
    /// the lifecycle façade, and the shared event stream.
    pub fn new(
        config: JobmgrConfig,
        storage: Arc<dyn Driver>,
        resmgr: Arc<dyn ResourceManagerClient>,
        lifecycle: LifecycleManager,
        events: Arc<Handler>,
    ) -> Self {
        let job_store = JobStore::new(storage.clone());
        let task_store = TaskStore::new(storage.clone());
        let engine_config = EngineConfig {
            workers: config.goalstate_workers,
            action_timeout: config.action_timeout,
            backoff_base: config.backoff_base,
            backoff_cap: config.backoff_cap,
        };

        let ctx = Arc::new(Ctx {
            factory: JobFactory::new(job_store.clone(), task_store.clone()),
            job_store,
            task_store,
            update_store: UpdateStore::new(storage.clone()),
            volume_store: VolumeStore::new(storage),
            resmgr,
            lifecycle,
            events,
            task_engine: OnceLock::new(),
            job_engine: OnceLock::new(),
            config,
        });
        let _ = ctx
            .task_engine
            .set(Arc::new(Engine::new("task", engine_config.clone())));
        let _ = ctx
            .job_engine
            .set(Arc::new(Engine::new("job", engine_config)));

        Self { ctx }
    }

    /// The job/task cache.
    pub fn factory(&self) -> &JobFactory {
        &self.ctx.factory
    }

    /// Creates a job: persists config and runtimes, seeds the cache, and
    /// enqueues every instance into the goal-state engine.
    pub async fn create_job(&self, mut config: JobConfig) -> Result<JobId, JobmgrError> {
        let job_id = JobId::new();
        if config.config_version == 0 {
            config.config_version = 1;
        }
        let runtime = JobRuntime::new(config.job_type, config.config_version, chrono::Utc::now());

        self.ctx.job_store.create_job(&job_id, &config, &runtime).await?;
        self.ctx
            .task_store
            .put_task_config(&job_id, None, config.config_version, &config.default_task)
            .await?;

        let cached = self.ctx.factory.add_job(job_id);
        cached.seed(config.clone(), runtime);
        let goal_state = config.job_type.default_goal_state();
        cached
            .create_tasks(0, config.instance_count, goal_state, config.config_version)
            .await?;

        for instance in 0..config.instance_count {
            self.ctx
                .enqueue_task(TaskId::new(job_id, instance), Instant::now());
        }
        self.ctx.enqueue_job(job_id, Instant::now());

        info!(
            job_id = %job_id,
            name = %config.name,
            instances = config.instance_count,
            "job created"
        );
        Ok(job_id)
    }

    /// Requests a job kill: flips every instance's goal state and lets the
    /// engine converge.
    pub async fn kill_job(&self, job_id: &JobId) -> Result<(), JobmgrError> {
        let cached = self
            .ctx
            .factory
            .get_job(job_id)
            .ok_or(JobmgrError::JobNotFound(*job_id))?;
        let config = cached.config().await?;

        for instance in 0..config.instance_count {
            let task = cached.add_task(instance);
            let runtime = task.runtime().await?;
            if runtime.goal_state == TaskState::Killed || runtime.state == TaskState::Deleted {
                continue;
            }
            task.patch(
                &crate::cache::RuntimeDiff::default()
                    .with_goal_state(TaskState::Killed)
                    .with_reason("kill requested"),
            )
            .await?;
            self.ctx
                .enqueue_task(TaskId::new(*job_id, instance), Instant::now());
        }
        let mut runtime = cached.runtime().await?;
        runtime.goal_state = armada_api::job::JobState::Killed;
        // goal flip races with the stats updater; a lost race is retried by
        // the job entity
        match self
            .ctx
            .job_store
            .update_job_runtime(job_id, &runtime, runtime.state)
            .await
        {
            Ok(_) => cached.invalidate(),
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "job goal update raced, will converge");
                cached.invalidate();
            }
        }
        self.ctx.enqueue_job(*job_id, Instant::now());
        Ok(())
    }

    /// Rebuilds cache and engine state from storage. Called on leadership
    /// gain, after the resource pool tree has been rebuilt.
    pub async fn recover(&self, shutdown: &watch::Receiver<bool>) -> Result<(), JobmgrError> {
        recovery::recover_active_jobs(&self.ctx, shutdown).await
    }

    /// Runs every background loop until shutdown: both goal-state engines,
    /// the placement processor, the event-stream consumer, and the
    /// preemption poller.
    #[instrument(skip_all, name = "jobmgr")]
    pub async fn run(&self, shutdown: watch::Receiver<bool>) {
        info!("job manager starting");
        let mut handles = Vec::new();

        handles.push(tokio::spawn(
            self.ctx.task_engine().clone().run(shutdown.clone()),
        ));
        handles.push(tokio::spawn(
            self.ctx.job_engine().clone().run(shutdown.clone()),
        ));

        let placements = PlacementProcessor::new(self.ctx.clone());
        let placement_shutdown = shutdown.clone();
        handles.push(tokio::spawn(async move {
            placements.run(placement_shutdown).await;
        }));

        let status_client = Client::new(
            EVENT_CLIENT_NAME,
            self.ctx.events.clone(),
            StatusProcessor::new(self.ctx.clone()),
        );
        let status_shutdown = shutdown.clone();
        handles.push(tokio::spawn(async move {
            status_client.run(status_shutdown).await;
        }));

        let preemptor_ctx = self.ctx.clone();
        let preemptor_shutdown = shutdown.clone();
        handles.push(tokio::spawn(async move {
            run_preemptor(preemptor_ctx, preemptor_shutdown).await;
        }));

        for handle in handles {
            let _ = handle.await;
        }
        self.ctx.factory.clear();
        info!("job manager stopped");
    }
}

/// Polls the resource manager for marked preemption victims and moves them
/// into `Preempting` so the engine runs the preemption policy.
async fn run_preemptor(ctx: Arc<Ctx>, mut shutdown: watch::Receiver<bool>) {
    let interval = ctx.config.preemption_interval;
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
            }
            _ = tokio::time::sleep(interval) => {}
        }

        let victims = match ctx.resmgr.get_preemptible_tasks(100).await {
            Ok(victims) => victims,
            Err(e) => {
                error!(error = %e, "failed to fetch preemption victims");
                continue;
            }
        };

        for task_id in victims {
            let Some(job) = ctx.factory.get_job(&task_id.job_id()) else {
                continue;
            };
            let task = job.add_task(task_id.instance_id());
            let runtime = match task.runtime().await {
                Ok(runtime) => runtime,
                Err(e) => {
                    warn!(task_id = %task_id, error = %e, "cannot load preemption victim");
                    continue;
                }
            };
            if runtime.state != TaskState::Running {
                continue;
            }
            let patched = task
                .patch(
                    &crate::cache::RuntimeDiff::to_state(TaskState::Preempting)
                        .with_reason("resources reclaimed by higher-priority work"),
                )
                .await;
            match patched {
                Ok(_) => ctx.enqueue_task(task_id, Instant::now()),
                Err(e) => warn!(task_id = %task_id, error = %e, "preemption patch failed"),
            }
        }
    }
}

/// Emits a jobmgr-origin task status event onto the shared stream.
pub(crate) fn emit_task_status(
    ctx: &Ctx,
    task_id: TaskId,
    pod_id: Option<armada_id::PodId>,
    state: TaskState,
    reason: &str,
) {
    let payload = armada_api::events::EventPayload::TaskStatus(armada_api::events::TaskStatusEvent {
        task_id,
        pod_id: pod_id.unwrap_or_default(),
        state,
        message: String::new(),
        reason: reason.to_string(),
        hostname: None,
        timestamp: chrono::Utc::now(),
    });
    if let Err(e) = ctx.events.add_event(payload) {
        warn!(task_id = %task_id, error = %e, "failed to publish task status event");
    }
}
