//! Task-level goal-state actions.
//!
//! The transition table lives in [`TaskEntity::act`]: the entity snapshots
//! `{current, goal}` from the cache and executes the matching action. All
//! state changes flow through the cache as [`RuntimeDiff`]s.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use armada_api::job::JobType;
use armada_api::sched::{Gang, SchedTask, TaskType};
use armada_api::task::{TaskConfig, TaskRuntime, TaskState};
use armada_id::TaskId;

use crate::cache::{CachedJob, RuntimeDiff};
use crate::driver::{emit_task_status, Ctx, CtxEnqueue};
use crate::error::JobmgrError;

use super::engine::{ActionOutcome, Entity};

const METRIC_TASK_INVALID_STATE: &str = "armada_jobmgr_task_invalid_state";

/// One task as driven by the goal-state engine.
pub struct TaskEntity {
    task_id: TaskId,
    ctx: Arc<Ctx>,
}

impl TaskEntity {
    pub(crate) fn new(task_id: TaskId, ctx: Arc<Ctx>) -> Self {
        Self { task_id, ctx }
    }

    fn outcome_of(&self, result: Result<ActionOutcome, JobmgrError>) -> ActionOutcome {
        match result {
            Ok(outcome) => outcome,
            Err(e) if e.is_retryable() => {
                ActionOutcome::Retry(armada_api::Error::new(e.kind(), e.to_string()))
            }
            Err(e) => ActionOutcome::Fatal(armada_api::Error::new(e.kind(), e.to_string())),
        }
    }
}

#[async_trait]
impl Entity for TaskEntity {
    fn key(&self) -> String {
        self.task_id.to_string()
    }

    async fn act(&self) -> ActionOutcome {
        let Some(job) = self.ctx.factory.get_job(&self.task_id.job_id()) else {
            // job untracked; nothing to converge
            return ActionOutcome::Done;
        };
        let task = job.add_task(self.task_id.instance_id());
        let runtime = match task.runtime().await {
            Ok(runtime) => runtime,
            Err(JobmgrError::Storage(e))
                if matches!(e.kind(), armada_api::ErrorKind::NotFound) =>
            {
                return ActionOutcome::Done;
            }
            Err(e) => return self.outcome_of(Err(e)),
        };

        use TaskState::*;
        let result = match (runtime.state, runtime.goal_state) {
            // ---- toward Killed --------------------------------------
            (Succeeded | Failed | Lost | Killed, Killed) => self.finalize(&job).await,
            (Initialized | Pending | Placed, Killed) => {
                self.kill_unlaunched(&job, &runtime).await
            }
            (Launching | Launched | Starting | Running | Preempting | Killing, Killed) => {
                self.kill(&job, &runtime).await
            }

            // ---- preemption ----------------------------------------
            (Preempting, _) => self.preempt(&job, &runtime).await,

            // ---- scheduling progress --------------------------------
            (Initialized, Running | Succeeded) => self.start(&job, &runtime).await,
            (Pending | Placed | Launching | Launched | Starting, Running | Succeeded) => {
                Ok(ActionOutcome::Done)
            }
            (Running, Running | Succeeded) => Ok(ActionOutcome::Done),

            // ---- restarts -------------------------------------------
            (Failed | Lost, Running | Succeeded) => self.maybe_restart(&job, &runtime).await,
            (Killed, Running) => self.reinitialize(&job, &runtime, "restart after kill").await,
            (Succeeded, Running) => {
                // service instances are kept running; exit means restart
                self.reinitialize(&job, &runtime, "service instance exited").await
            }
            (Succeeded, Succeeded) => self.finalize(&job).await,

            // ---- garbage collection ---------------------------------
            (_, Deleted) => self.gc(&job).await,

            (state, goal_state) => {
                metrics::counter!(METRIC_TASK_INVALID_STATE, 1);
                error!(
                    task_id = %self.task_id,
                    current_state = %state,
                    goal_state = %goal_state,
                    "unexpected task state"
                );
                Ok(ActionOutcome::Done)
            }
        };
        self.outcome_of(result)
    }
}

impl TaskEntity {
    /// Builds the scheduling view of this task from its config.
    async fn sched_task(
        &self,
        job_type: JobType,
        priority: u32,
        config: &TaskConfig,
        runtime: &TaskRuntime,
    ) -> Result<SchedTask, JobmgrError> {
        let task_type = match (job_type, &config.volume) {
            (JobType::Batch, _) => TaskType::Batch,
            (JobType::Service, Some(_)) => TaskType::Stateful,
            (JobType::Service, None) => TaskType::Service,
        };
        let mut sched = SchedTask {
            task_id: self.task_id,
            task_type,
            resource: config.resource,
            priority,
            preemptible: config.preemptible,
            controller: config.controller,
            volume_id: runtime.volume_id,
            desired_host: None,
        };
        // sticky placement follows the volume
        if let Some(volume_id) = runtime.volume_id {
            match self.ctx.volume_store.get_volume(&volume_id).await {
                Ok(volume) => sched.desired_host = Some(volume.hostname),
                Err(e) => warn!(
                    task_id = %self.task_id,
                    volume_id = %volume_id,
                    error = %e,
                    "volume lookup failed, placing fresh"
                ),
            }
        }
        Ok(sched)
    }

    /// Start: enqueue the gang for this task (or the job's minimum-running
    /// gang) to the resource manager and move to Pending.
    async fn start(
        &self,
        job: &Arc<CachedJob>,
        runtime: &TaskRuntime,
    ) -> Result<ActionOutcome, JobmgrError> {
        let config = job.config().await?;
        let min_running = config.sla.min_running_instances;
        let instance = self.task_id.instance_id();

        if min_running > 1 && instance < min_running {
            if instance != 0 {
                // instance 0 drives the gang
                return Ok(ActionOutcome::Done);
            }
            return self.start_gang(job, &config, min_running).await;
        }

        let task_config = self
            .ctx
            .task_store
            .get_task_config(&self.task_id, runtime.config_version)
            .await?;
        let sched = self
            .sched_task(config.job_type, config.sla.priority, &task_config, runtime)
            .await?;
        let gang = Gang::single(sched);

        job.patch_tasks(
            [(instance, RuntimeDiff::to_state(TaskState::Pending))].into(),
        )
        .await?;
        if let Err(e) = self
            .ctx
            .resmgr
            .enqueue_gangs(Some(config.respool_id.clone()), vec![gang], "")
            .await
        {
            // roll back so the next attempt re-enqueues
            warn!(task_id = %self.task_id, error = %e, "gang enqueue failed, rolling back");
            job.patch_tasks(
                [(instance, RuntimeDiff::to_state(TaskState::Initialized))].into(),
            )
            .await?;
            return Err(e.into());
        }

        debug!(task_id = %self.task_id, "task enqueued for scheduling");
        self.ctx.enqueue_job(self.task_id.job_id(), Instant::now());
        Ok(ActionOutcome::Done)
    }

    /// Enqueues instances `[0, min_running)` as one all-or-nothing gang.
    async fn start_gang(
        &self,
        job: &Arc<CachedJob>,
        config: &armada_api::job::JobConfig,
        min_running: u32,
    ) -> Result<ActionOutcome, JobmgrError> {
        let mut members = Vec::with_capacity(min_running as usize);
        for instance in 0..min_running {
            let member = job.add_task(instance);
            let member_runtime = member.runtime().await?;
            match member_runtime.state {
                TaskState::Initialized => {}
                // someone already moved part of the gang; wait
                _ => return Ok(ActionOutcome::ReEnqueue(Duration::from_secs(1))),
            }
            let task_config = self
                .ctx
                .task_store
                .get_task_config(&member.task_id(), member_runtime.config_version)
                .await?;
            members.push(
                TaskEntity::new(member.task_id(), self.ctx.clone())
                    .sched_task(
                        config.job_type,
                        config.sla.priority,
                        &task_config,
                        &member_runtime,
                    )
                    .await?,
            );
        }

        let gang = Gang::new(members, config.sla.priority);
        let diffs = (0..min_running)
            .map(|i| (i, RuntimeDiff::to_state(TaskState::Pending)))
            .collect();
        job.patch_tasks(diffs).await?;

        if let Err(e) = self
            .ctx
            .resmgr
            .enqueue_gangs(Some(config.respool_id.clone()), vec![gang], "")
            .await
        {
            warn!(task_id = %self.task_id, error = %e, "gang enqueue failed, rolling back");
            let rollback = (0..min_running)
                .map(|i| (i, RuntimeDiff::to_state(TaskState::Initialized)))
                .collect();
            job.patch_tasks(rollback).await?;
            return Err(e.into());
        }

        info!(
            job_id = %self.task_id.job_id(),
            gang_size = min_running,
            "minimum-running gang enqueued"
        );
        self.ctx.enqueue_job(self.task_id.job_id(), Instant::now());
        Ok(ActionOutcome::Done)
    }

    /// Kill a task that holds (or may hold) a pod.
    async fn kill(
        &self,
        job: &Arc<CachedJob>,
        runtime: &TaskRuntime,
    ) -> Result<ActionOutcome, JobmgrError> {
        let Some(pod_id) = runtime.pod_id else {
            return self.kill_unlaunched(job, runtime).await;
        };
        self.ctx.lifecycle.kill(pod_id).await?;

        // the kill ack may already have landed while the RPC was in flight
        let task = job.add_task(self.task_id.instance_id());
        let fresh = task.runtime().await?;
        if fresh.state.can_transition_to(TaskState::Killing) {
            job.patch_tasks(
                [(
                    self.task_id.instance_id(),
                    RuntimeDiff::to_state(TaskState::Killing),
                )]
                .into(),
            )
            .await?;
        }
        debug!(task_id = %self.task_id, pod_id = %pod_id, "kill issued");
        // re-issue until the terminal status arrives
        Ok(ActionOutcome::ReEnqueue(Duration::from_secs(30)))
    }

    /// Kill a task that never reached a host: terminal immediately, with a
    /// status event so the scheduling side releases its bookkeeping.
    async fn kill_unlaunched(
        &self,
        job: &Arc<CachedJob>,
        runtime: &TaskRuntime,
    ) -> Result<ActionOutcome, JobmgrError> {
        job.patch_tasks(
            [(
                self.task_id.instance_id(),
                RuntimeDiff::to_state(TaskState::Killed)
                    .with_completed_at(Some(chrono::Utc::now())),
            )]
            .into(),
        )
        .await?;
        emit_task_status(
            &self.ctx,
            self.task_id,
            runtime.pod_id,
            TaskState::Killed,
            "killed before launch",
        );
        self.ctx.enqueue_job(self.task_id.job_id(), Instant::now());
        Ok(ActionOutcome::Done)
    }

    /// Preempt per the task's preemption policy.
    async fn preempt(
        &self,
        job: &Arc<CachedJob>,
        runtime: &TaskRuntime,
    ) -> Result<ActionOutcome, JobmgrError> {
        let task_config = self
            .ctx
            .task_store
            .get_task_config(&self.task_id, runtime.config_version)
            .await?;

        if task_config.kill_on_preempt {
            job.patch_tasks(
                [(
                    self.task_id.instance_id(),
                    RuntimeDiff::default().with_goal_state(TaskState::Killed),
                )]
                .into(),
            )
            .await?;
        }

        if let Some(pod_id) = runtime.pod_id {
            self.ctx.lifecycle.kill(pod_id).await?;
            info!(
                task_id = %self.task_id,
                kill_on_preempt = task_config.kill_on_preempt,
                "preemption kill issued"
            );
        }
        Ok(ActionOutcome::Done)
    }

    /// Restart a failed or lost task while attempts remain; otherwise the
    /// failure is terminal.
    async fn maybe_restart(
        &self,
        job: &Arc<CachedJob>,
        runtime: &TaskRuntime,
    ) -> Result<ActionOutcome, JobmgrError> {
        let config = job.config().await?;
        let max_attempts = config.sla.max_instance_attempts.max(1);
        if runtime.failure_count >= max_attempts {
            info!(
                task_id = %self.task_id,
                failures = runtime.failure_count,
                "attempts exhausted, failure is terminal"
            );
            return self.finalize(job).await;
        }
        self.reinitialize(job, runtime, "retrying after failure").await
    }

    /// Back to Initialized with host bindings cleared; the next action
    /// re-enqueues the task.
    async fn reinitialize(
        &self,
        job: &Arc<CachedJob>,
        _runtime: &TaskRuntime,
        reason: &str,
    ) -> Result<ActionOutcome, JobmgrError> {
        job.patch_tasks(
            [(
                self.task_id.instance_id(),
                RuntimeDiff::to_state(TaskState::Initialized)
                    .with_host(None, None)
                    .with_pod_id(None)
                    .with_reason(reason)
                    .with_started_at(None)
                    .with_completed_at(None),
            )]
            .into(),
        )
        .await?;
        debug!(task_id = %self.task_id, reason, "task reinitialized");
        Ok(ActionOutcome::ReEnqueue(Duration::ZERO))
    }

    /// Terminal convergence: refresh job-level stats and stop driving.
    async fn finalize(&self, _job: &Arc<CachedJob>) -> Result<ActionOutcome, JobmgrError> {
        self.ctx.enqueue_job(self.task_id.job_id(), Instant::now());
        Ok(ActionOutcome::Done)
    }

    /// Garbage collection: runtime and config rows are deleted at the job
    /// level; the task just leaves the engine.
    async fn gc(&self, _job: &Arc<CachedJob>) -> Result<ActionOutcome, JobmgrError> {
        self.ctx.enqueue_job(self.task_id.job_id(), Instant::now());
        Ok(ActionOutcome::Done)
    }
}
