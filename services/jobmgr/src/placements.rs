//! The placement processor: turns committed placements into launches.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use armada_api::sched::{Gang, LaunchablePod, Placement, SchedTask};
use armada_api::task::TaskState;
use armada_id::PodId;

use crate::cache::RuntimeDiff;
use crate::driver::{Ctx, CtxEnqueue};
use crate::error::JobmgrError;

const METRIC_LAUNCH_ROLLBACK: &str = "armada_jobmgr_placement_rollback";

/// Pulls placements from the resource manager and launches them through
/// the lifecycle manager.
pub struct PlacementProcessor {
    ctx: Arc<Ctx>,
}

impl PlacementProcessor {
    pub(crate) fn new(ctx: Arc<Ctx>) -> Self {
        Self { ctx }
    }

    /// Runs until shutdown.
    #[instrument(skip_all, name = "placement_processor")]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("placement processor started");
        loop {
            if *shutdown.borrow() {
                info!("placement processor stopping");
                return;
            }

            let placements = match self
                .ctx
                .resmgr
                .get_placements(
                    self.ctx.config.placement_batch_size,
                    self.ctx.config.placement_timeout,
                )
                .await
            {
                Ok(placements) => placements,
                Err(e) => {
                    error!(error = %e, "fetching placements failed");
                    tokio::select! {
                        _ = shutdown.changed() => {}
                        _ = tokio::time::sleep(std::time::Duration::from_millis(500)) => {}
                    }
                    continue;
                }
            };

            for placement in placements {
                if let Err(e) = self.process(&placement).await {
                    warn!(
                        hostname = %placement.hostname,
                        error = %e,
                        "placement processing failed"
                    );
                }
            }
        }
    }

    /// Drives one placement: patch tasks through Placed and Launching,
    /// launch the pods, then mark Launched.
    async fn process(&self, placement: &Placement) -> Result<(), JobmgrError> {
        let mut pods = Vec::with_capacity(placement.task_ids.len());
        let mut launched_instances = Vec::new();
        let mut killed_tasks = Vec::new();

        for task_id in &placement.task_ids {
            let job = self.ctx.factory.add_job(task_id.job_id());
            let task = job.add_task(task_id.instance_id());
            let runtime = task.runtime().await?;

            // a kill can land between admission and placement
            if runtime.goal_state == TaskState::Killed || runtime.state.is_terminal() {
                killed_tasks.push(*task_id);
                continue;
            }
            if runtime.state != TaskState::Pending {
                debug!(task_id = %task_id, state = %runtime.state, "placement for non-pending task ignored");
                continue;
            }

            let config = self
                .ctx
                .task_store
                .get_task_config(task_id, runtime.config_version)
                .await?;
            let pod_id = PodId::new();

            job.patch_tasks(
                [(
                    task_id.instance_id(),
                    RuntimeDiff::to_state(TaskState::Placed)
                        .with_host(
                            Some(placement.hostname.clone()),
                            Some(placement.agent_id),
                        )
                        .with_pod_id(Some(pod_id)),
                )]
                .into(),
            )
            .await?;
            job.patch_tasks(
                [(
                    task_id.instance_id(),
                    RuntimeDiff::to_state(TaskState::Launching),
                )]
                .into(),
            )
            .await?;

            pods.push(LaunchablePod {
                pod_id,
                task_id: *task_id,
                config,
            });
            launched_instances.push(*task_id);
        }

        for task_id in &killed_tasks {
            self.ctx.enqueue_task(*task_id, Instant::now());
        }
        if pods.is_empty() {
            return Ok(());
        }

        match self
            .ctx
            .lifecycle
            .launch(placement.lease_id, placement.hostname.clone(), pods)
            .await
        {
            Ok(()) => {
                for task_id in &launched_instances {
                    let job = self.ctx.factory.add_job(task_id.job_id());
                    job.patch_tasks(
                        [(
                            task_id.instance_id(),
                            RuntimeDiff::to_state(TaskState::Launched),
                        )]
                        .into(),
                    )
                    .await?;
                    self.ctx.enqueue_task(*task_id, Instant::now());
                }
                debug!(
                    hostname = %placement.hostname,
                    tasks = launched_instances.len(),
                    "placement launched"
                );
                Ok(())
            }
            Err(e) => {
                metrics::counter!(METRIC_LAUNCH_ROLLBACK, launched_instances.len() as u64);
                warn!(
                    hostname = %placement.hostname,
                    error = %e,
                    "launch failed, returning tasks to the queue"
                );
                self.rollback(placement, &launched_instances).await?;
                Err(e)
            }
        }
    }

    /// Launch failed: move the tasks back to Pending and hand the gang to
    /// the resource manager so it re-enters the demand queue at the head.
    async fn rollback(
        &self,
        placement: &Placement,
        task_ids: &[armada_id::TaskId],
    ) -> Result<(), JobmgrError> {
        let mut gang_tasks = Vec::with_capacity(task_ids.len());
        for task_id in task_ids {
            let job = self.ctx.factory.add_job(task_id.job_id());
            let task = job.add_task(task_id.instance_id());
            let runtime = task.runtime().await?;
            let config = self
                .ctx
                .task_store
                .get_task_config(task_id, runtime.config_version)
                .await?;
            let job_config = job.config().await?;

            task.patch(
                &RuntimeDiff::to_state(TaskState::Pending)
                    .with_host(None, None)
                    .with_pod_id(None)
                    .with_reason("launch failed"),
            )
            .await?;

            gang_tasks.push(SchedTask::from_config(
                *task_id,
                placement.task_type,
                job_config.sla.priority,
                &config,
            ));
        }

        let mut diffs: HashMap<armada_id::JobId, Vec<SchedTask>> = HashMap::new();
        for task in gang_tasks {
            diffs.entry(task.task_id.job_id()).or_default().push(task);
        }
        for (_, tasks) in diffs {
            let priority = tasks.first().map(|t| t.priority).unwrap_or(0);
            self.ctx
                .resmgr
                .enqueue_gangs(None, vec![Gang::new(tasks, priority)], "launch_failed")
                .await?;
        }
        Ok(())
    }
}
