//! Leader-failover recovery.
//!
//! Rebuilds the cache and re-seeds the goal-state engine from storage.
//! Jobs come from the materialized state index (authoritative), cross-checked
//! against the explicit active-job set (diagnostic). Work fans out in
//! bounded batches: groups of 10 jobs run concurrently, and within one job
//! the task range splits into a minimum-running gang batch plus contiguous
//! batches of 1000 instances.
//!
//! The caller must have rebuilt the resource pool tree before invoking
//! this; recovered tasks re-enter admission through their Start actions.

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use armada_api::job::JobState;
use armada_id::{JobId, TaskId};
use armada_storage::StorageError;

use crate::driver::{Ctx, CtxEnqueue};
use crate::error::JobmgrError;

/// Jobs recovered concurrently per batch.
const JOB_BATCH_SIZE: usize = 10;

/// Instances loaded per task batch.
const TASK_BATCH_SIZE: u32 = 1000;

const METRIC_JOBS_RECOVERED: &str = "armada_jobmgr_recovery_jobs";
const METRIC_JOBS_SKIPPED: &str = "armada_jobmgr_recovery_jobs_skipped";
const METRIC_TASKS_ENQUEUED: &str = "armada_jobmgr_recovery_tasks_enqueued";

/// A contiguous range of instances recovered together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TaskBatch {
    from: u32,
    to: u32,
}

/// Splits a job's instances into recovery batches: the minimum-running
/// prefix recovers as one batch (it was scheduled as one gang), the rest in
/// contiguous chunks.
fn create_task_batches(instance_count: u32, min_running: u32) -> Vec<TaskBatch> {
    let mut batches = Vec::new();
    let mut cursor = 0;
    if min_running > 1 {
        let gang_end = min_running.min(instance_count);
        batches.push(TaskBatch {
            from: 0,
            to: gang_end,
        });
        cursor = gang_end;
    }
    while cursor < instance_count {
        let to = (cursor + TASK_BATCH_SIZE).min(instance_count);
        batches.push(TaskBatch { from: cursor, to });
        cursor = to;
    }
    batches
}

/// Recovers all active jobs. Any error besides a stale index entry aborts
/// so the caller can retry recovery wholesale.
pub(crate) async fn recover_active_jobs(
    ctx: &Arc<Ctx>,
    shutdown: &watch::Receiver<bool>,
) -> Result<(), JobmgrError> {
    let job_ids = ctx.job_store.get_jobs_by_states(&JobState::ACTIVE).await?;

    // The explicit active set is diagnostic only; drift is logged loudly
    // but the index stays authoritative.
    match ctx.job_store.get_active_jobs().await {
        Ok(active) => {
            if active.len() != job_ids.len() {
                error!(
                    jobs_from_index = job_ids.len(),
                    jobs_from_active_set = active.len(),
                    "active job set disagrees with the state index"
                );
            }
        }
        Err(e) => error!(error = %e, "loading the active job set failed"),
    }

    info!(jobs = job_ids.len(), "starting job recovery");

    for batch in job_ids.chunks(JOB_BATCH_SIZE) {
        if *shutdown.borrow() {
            return Err(JobmgrError::RecoveryAborted("shutdown during recovery".into()));
        }
        let results = join_all(batch.iter().map(|job_id| recover_job(ctx, *job_id))).await;
        for result in results {
            result?;
        }
    }

    info!("job recovery complete");
    Ok(())
}

/// Recovers one job: runtime, config, then its task batches concurrently.
async fn recover_job(ctx: &Arc<Ctx>, job_id: JobId) -> Result<(), JobmgrError> {
    let runtime = match ctx.job_store.get_job_runtime(&job_id).await {
        Ok(runtime) => runtime,
        // The state index can lag deletions: a job listed there may be gone
        // from the runtime table. Skip it rather than fail the recovery.
        Err(StorageError::RowNotFound { .. }) => {
            metrics::counter!(METRIC_JOBS_SKIPPED, 1);
            warn!(job_id = %job_id, "job in state index without runtime, skipping");
            return Ok(());
        }
        Err(e) => {
            error!(job_id = %job_id, error = %e, "failed to load job runtime");
            return Err(e.into());
        }
    };

    if runtime.is_settled() {
        debug!(job_id = %job_id, "job already settled, skipping");
        return Ok(());
    }

    let config = match ctx
        .job_store
        .get_job_config(&job_id, runtime.config_version)
        .await
    {
        Ok(config) => config,
        Err(e) => {
            error!(job_id = %job_id, error = %e, "failed to load job config");
            return Err(e.into());
        }
    };

    // a job can be active purely because an update is still in flight
    if let Some(update_id) = runtime.update_id {
        match ctx.update_store.get_update(&update_id).await {
            Ok(update) if !update.state.is_terminal() => {
                info!(
                    job_id = %job_id,
                    update_id = %update_id,
                    state = ?update.state,
                    "recovered job carries an in-flight update"
                );
            }
            Ok(_) => {}
            Err(e) => warn!(
                job_id = %job_id,
                update_id = %update_id,
                error = %e,
                "failed to load update record"
            ),
        }
    }

    let cached = ctx.factory.add_job(job_id);
    cached.seed(config.clone(), runtime);

    let batches = create_task_batches(config.instance_count, config.sla.min_running_instances);
    let results = join_all(
        batches
            .iter()
            .map(|batch| recover_task_batch(ctx, job_id, *batch)),
    )
    .await;
    for result in results {
        result?;
    }

    ctx.enqueue_job(job_id, Instant::now());
    metrics::counter!(METRIC_JOBS_RECOVERED, 1);
    info!(job_id = %job_id, "job recovered");
    Ok(())
}

/// Loads one task range and re-enqueues every instance that has not
/// converged to its goal.
async fn recover_task_batch(
    ctx: &Arc<Ctx>,
    job_id: JobId,
    batch: TaskBatch,
) -> Result<(), JobmgrError> {
    let runtimes = ctx
        .task_store
        .get_task_runtimes_in_range(&job_id, batch.from, batch.to)
        .await?;

    let cached = ctx.factory.add_job(job_id);
    let mut enqueued = 0u64;
    for (instance, runtime) in runtimes {
        let task = cached.add_task(instance);
        task.seed(runtime.clone());

        let converged = runtime.state == runtime.goal_state
            || (runtime.state.is_terminal() && runtime.goal_state.is_terminal());
        if !converged {
            ctx.enqueue_task(TaskId::new(job_id, instance), Instant::now());
            enqueued += 1;
        }
    }

    if enqueued > 0 {
        metrics::counter!(METRIC_TASKS_ENQUEUED, enqueued);
        debug!(
            job_id = %job_id,
            from = batch.from,
            to = batch.to,
            enqueued,
            "task batch recovered"
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batches_without_gang() {
        assert_eq!(
            create_task_batches(2500, 1),
            vec![
                TaskBatch { from: 0, to: 1000 },
                TaskBatch { from: 1000, to: 2000 },
                TaskBatch { from: 2000, to: 2500 },
            ]
        );
    }

    #[test]
    fn gang_prefix_is_one_batch() {
        assert_eq!(
            create_task_batches(1500, 50),
            vec![
                TaskBatch { from: 0, to: 50 },
                TaskBatch { from: 50, to: 1050 },
                TaskBatch { from: 1050, to: 1500 },
            ]
        );
    }

    #[test]
    fn small_job_is_one_batch() {
        assert_eq!(create_task_batches(3, 1), vec![TaskBatch { from: 0, to: 3 }]);
        assert_eq!(create_task_batches(0, 1), Vec::<TaskBatch>::new());
    }
}
