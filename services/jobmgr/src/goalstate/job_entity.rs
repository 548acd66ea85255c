//! Job-level goal-state actions.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use armada_api::job::JobState;
use armada_id::JobId;

use crate::driver::Ctx;
use crate::error::JobmgrError;

use super::engine::{ActionOutcome, Entity};

/// One job as driven by the goal-state engine. Its action keeps the job
/// runtime (state, task stats) in step with instance states and garbage
/// collects deleted jobs.
pub struct JobEntity {
    job_id: JobId,
    ctx: Arc<Ctx>,
}

impl JobEntity {
    pub(crate) fn new(job_id: JobId, ctx: Arc<Ctx>) -> Self {
        Self { job_id, ctx }
    }
}

#[async_trait]
impl Entity for JobEntity {
    fn key(&self) -> String {
        self.job_id.to_string()
    }

    async fn act(&self) -> ActionOutcome {
        let Some(job) = self.ctx.factory.get_job(&self.job_id) else {
            return ActionOutcome::Done;
        };

        let runtime = match job.runtime().await {
            Ok(runtime) => runtime,
            Err(e) if e.is_retryable() => {
                return ActionOutcome::Retry(armada_api::Error::new(e.kind(), e.to_string()))
            }
            Err(e) => {
                return ActionOutcome::Fatal(armada_api::Error::new(e.kind(), e.to_string()))
            }
        };

        if runtime.goal_state == JobState::Deleted {
            return match self.gc().await {
                Ok(outcome) => outcome,
                Err(e) if e.is_retryable() => {
                    ActionOutcome::Retry(armada_api::Error::new(e.kind(), e.to_string()))
                }
                Err(e) => ActionOutcome::Fatal(armada_api::Error::new(e.kind(), e.to_string())),
            };
        }

        match job.update_runtime_from_tasks().await {
            Ok(written) => {
                if written.is_settled() {
                    info!(job_id = %self.job_id, state = %written.state, "job settled");
                    self.ctx.factory.remove_job(&self.job_id);
                } else {
                    debug!(job_id = %self.job_id, state = %written.state, "job stats refreshed");
                }
                ActionOutcome::Done
            }
            Err(JobmgrError::Concurrent(_)) => {
                ActionOutcome::Retry(armada_api::Error::concurrent(format!(
                    "job runtime race for {}",
                    self.job_id
                )))
            }
            Err(e) if e.is_retryable() => {
                ActionOutcome::Retry(armada_api::Error::new(e.kind(), e.to_string()))
            }
            Err(e) => ActionOutcome::Fatal(armada_api::Error::new(e.kind(), e.to_string())),
        }
    }
}

impl JobEntity {
    /// Deletes the job's task rows, config, runtime, and cache entry.
    async fn gc(&self) -> Result<ActionOutcome, JobmgrError> {
        let runtime = self.ctx.job_store.get_job_runtime(&self.job_id).await?;
        self.ctx.task_store.delete_job_tasks(&self.job_id).await?;
        self.ctx
            .job_store
            .delete_job(&self.job_id, runtime.state)
            .await?;
        self.ctx.factory.remove_job(&self.job_id);
        info!(job_id = %self.job_id, "job garbage collected");
        Ok(ActionOutcome::Done)
    }
}
