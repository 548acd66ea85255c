//! Resource manager access for the placement engine.
//!
//! A thin wrapper applying the call timeout and the failure semantics:
//! dequeue failures log and yield an empty batch, commit failures surface
//! the unaccepted remainder, and return-path failures are counted.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info};

use armada_api::clients::ResourceManagerClient;
use armada_api::sched::{Gang, Placement, TaskType};

const CALL_TIMEOUT: Duration = Duration::from_secs(10);

const METRIC_SET_PLACEMENT_SUCCESS: &str = "armada_placement_set_placement_success";
const METRIC_SET_PLACEMENT_FAIL: &str = "armada_placement_set_placement_fail";
const METRIC_ENQUEUE_FAIL: &str = "armada_placement_enqueue_fail";

/// Gang and placement traffic with the resource manager.
pub struct TaskService {
    resmgr: Arc<dyn ResourceManagerClient>,
}

impl TaskService {
    pub fn new(resmgr: Arc<dyn ResourceManagerClient>) -> Self {
        Self { resmgr }
    }

    /// Fetches a batch of admitted gangs. Failures log and return an empty
    /// batch; the engine loop backs off and retries.
    pub async fn dequeue(
        &self,
        task_type: TaskType,
        batch_size: u32,
        timeout: Duration,
    ) -> Vec<Gang> {
        let call = self.resmgr.dequeue_gangs(task_type, batch_size, timeout);
        match tokio::time::timeout(timeout + CALL_TIMEOUT, call).await {
            Ok(Ok(gangs)) => {
                if !gangs.is_empty() {
                    info!(task_type = %task_type, gangs = gangs.len(), "dequeued gangs");
                }
                gangs
            }
            Ok(Err(e)) => {
                error!(task_type = %task_type, error = %e, "dequeue gangs failed");
                Vec::new()
            }
            Err(_) => {
                error!(task_type = %task_type, "dequeue gangs timed out");
                Vec::new()
            }
        }
    }

    /// Commits placements. Returns the placements the resource manager did
    /// NOT accept, for re-enqueueing.
    pub async fn set_placements(&self, placements: Vec<Placement>) -> Vec<Placement> {
        if placements.is_empty() {
            return Vec::new();
        }
        let total = placements.len();
        let call = self.resmgr.set_placements(placements.clone());
        match tokio::time::timeout(CALL_TIMEOUT, call).await {
            Ok(Ok(accepted)) => {
                metrics::counter!(METRIC_SET_PLACEMENT_SUCCESS, accepted.len() as u64);
                if accepted.len() < total {
                    metrics::counter!(
                        METRIC_SET_PLACEMENT_FAIL,
                        (total - accepted.len()) as u64
                    );
                }
                debug!(total, accepted = accepted.len(), "placements committed");
                placements
                    .into_iter()
                    .filter(|p| !accepted.contains(p))
                    .collect()
            }
            Ok(Err(e)) => {
                error!(error = %e, total, "set placements failed");
                metrics::counter!(METRIC_SET_PLACEMENT_FAIL, total as u64);
                placements
            }
            Err(_) => {
                error!(total, "set placements timed out");
                metrics::counter!(METRIC_SET_PLACEMENT_FAIL, total as u64);
                placements
            }
        }
    }

    /// Hands gangs back to the resource manager with a reason.
    pub async fn enqueue(&self, gangs: Vec<Gang>, reason: &str) {
        if gangs.is_empty() {
            return;
        }
        let total = gangs.len();
        let call = self.resmgr.enqueue_gangs(None, gangs, reason);
        match tokio::time::timeout(CALL_TIMEOUT, call).await {
            Ok(Ok(())) => {
                debug!(total, reason, "gangs returned to resource manager");
            }
            Ok(Err(e)) => {
                error!(error = %e, total, reason, "enqueue gangs failed");
                metrics::counter!(METRIC_ENQUEUE_FAIL, total as u64);
            }
            Err(_) => {
                error!(total, reason, "enqueue gangs timed out");
                metrics::counter!(METRIC_ENQUEUE_FAIL, total as u64);
            }
        }
    }
}
