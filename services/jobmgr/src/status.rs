//! Task status event processing.
//!
//! The job manager's event-stream consumer: applies host-observed task
//! state transitions to the cache (with one reload-and-retry on a lost
//! revision race) and enqueues the affected entities.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, warn};

use armada_api::events::{EventPayload, TaskStatusEvent};
use armada_api::task::TaskState;
use armada_api::Error;
use armada_eventstream::{Event, EventProcessor};

use crate::cache::RuntimeDiff;
use crate::driver::{Ctx, CtxEnqueue};
use crate::error::JobmgrError;

const METRIC_STATUS_APPLIED: &str = "armada_jobmgr_status_applied";
const METRIC_STATUS_DROPPED: &str = "armada_jobmgr_status_dropped";

/// Applies task status events to the cache.
pub struct StatusProcessor {
    ctx: Arc<Ctx>,
}

impl StatusProcessor {
    pub(crate) fn new(ctx: Arc<Ctx>) -> Self {
        Self { ctx }
    }

    async fn apply(&self, status: &TaskStatusEvent) -> Result<(), JobmgrError> {
        let task_id = status.task_id;
        let Some(job) = self.ctx.factory.get_job(&task_id.job_id()) else {
            debug!(task_id = %task_id, "status for untracked job dropped");
            metrics::counter!(METRIC_STATUS_DROPPED, 1, "reason" => "untracked_job");
            return Ok(());
        };
        let task = job.add_task(task_id.instance_id());

        // one reload-and-retry on a lost revision race
        for attempt in 0..2 {
            let runtime = task.runtime().await?;

            // stale event for a previous pod incarnation
            if let Some(current_pod) = runtime.pod_id {
                if current_pod != status.pod_id {
                    metrics::counter!(METRIC_STATUS_DROPPED, 1, "reason" => "stale_pod");
                    debug!(task_id = %task_id, "status for stale pod dropped");
                    return Ok(());
                }
            }
            if runtime.state == status.state {
                return Ok(());
            }
            if !runtime.state.can_transition_to(status.state) {
                metrics::counter!(METRIC_STATUS_DROPPED, 1, "reason" => "illegal_transition");
                warn!(
                    task_id = %task_id,
                    from = %runtime.state,
                    to = %status.state,
                    "dropping status event with illegal transition"
                );
                return Ok(());
            }

            let mut diff = RuntimeDiff::to_state(status.state)
                .with_message(status.message.clone())
                .with_reason(status.reason.clone());
            if let Some(hostname) = &status.hostname {
                diff.host = Some(Some(hostname.clone()));
            }
            match status.state {
                TaskState::Running => {
                    diff = diff.with_started_at(Some(status.timestamp));
                }
                TaskState::Failed => {
                    diff = diff
                        .with_failure_count(runtime.failure_count + 1)
                        .with_completed_at(Some(status.timestamp));
                }
                TaskState::Succeeded | TaskState::Killed | TaskState::Lost => {
                    diff = diff.with_completed_at(Some(status.timestamp));
                }
                _ => {}
            }

            match job
                .patch_tasks(HashMap::from([(task_id.instance_id(), diff)]))
                .await
            {
                Ok(_) => {
                    metrics::counter!(METRIC_STATUS_APPLIED, 1);
                    self.ctx.enqueue_task(task_id, Instant::now());
                    self.ctx.enqueue_job(task_id.job_id(), Instant::now());
                    return Ok(());
                }
                Err(JobmgrError::Concurrent(_)) if attempt == 0 => {
                    debug!(task_id = %task_id, "status patch raced, reloading");
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
        Err(JobmgrError::Concurrent(task_id.to_string()))
    }
}

#[async_trait]
impl EventProcessor for StatusProcessor {
    async fn process(&self, event: Event) -> Result<(), Error> {
        match &event.payload {
            EventPayload::TaskStatus(status) => {
                self.apply(status)
                    .await
                    .map_err(|e| Error::new(e.kind(), e.to_string()))
            }
            EventPayload::HostStatus(host) => {
                debug!(hostname = %host.hostname, state = ?host.state, "host event observed");
                Ok(())
            }
            EventPayload::Pod(pod) => {
                debug!(pod_id = %pod.pod_id, healthy = pod.healthy, "pod event observed");
                Ok(())
            }
        }
    }
}
