//! The resource manager service front-end.
//!
//! Implements [`ResourceManagerClient`] in-process: enqueue/dequeue of
//! gangs, commit and hand-off of placements, and the preemption-victim
//! surface. Also hosts the event-stream processor that releases pool
//! allocation when tasks reach terminal states.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use armada_api::clients::ResourceManagerClient;
use armada_api::events::EventPayload;
use armada_api::sched::{Gang, Placement, TaskType};
use armada_api::Error;
use armada_eventstream::{Event, EventProcessor};
use armada_id::{RespoolId, TaskId};

use crate::config::ResmgrConfig;
use crate::error::ResmgrError;
use crate::respool::AdmissionBlock;
use crate::tracker::{TrackedState, Tracker};
use crate::tree::Tree;

const METRIC_PREEMPTION_MARKED: &str = "armada_resmgr_preemption_victims_marked";
const METRIC_GANGS_RETURNED: &str = "armada_resmgr_gangs_returned";

/// Committed placements waiting for the job manager.
struct PlacementQueue {
    queue: Mutex<VecDeque<Placement>>,
    notify: Notify,
    capacity: usize,
}

impl PlacementQueue {
    fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            capacity,
        }
    }

    fn push(&self, placement: Placement) -> Result<(), ResmgrError> {
        let mut queue = self.queue.lock().expect("placement queue lock poisoned");
        if queue.len() >= self.capacity {
            return Err(ResmgrError::Internal("placement queue full".into()));
        }
        queue.push_back(placement);
        drop(queue);
        self.notify.notify_waiters();
        Ok(())
    }

    async fn pop(&self, limit: usize, timeout: Duration) -> Vec<Placement> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            {
                let mut queue = self.queue.lock().expect("placement queue lock poisoned");
                if !queue.is_empty() {
                    let take = limit.min(queue.len());
                    return queue.drain(..take).collect();
                }
            }
            let notified = self.notify.notified();
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Vec::new();
            }
        }
    }
}

/// The resource manager.
pub struct ResourceManager {
    tree: Arc<Tree>,
    tracker: Arc<Tracker>,
    placements: PlacementQueue,
    config: ResmgrConfig,
}

impl ResourceManager {
    pub fn new(tree: Arc<Tree>, tracker: Arc<Tracker>, config: ResmgrConfig) -> Self {
        let placements = PlacementQueue::new(config.placement_queue_capacity);
        Self {
            tree,
            tracker,
            placements,
            config,
        }
    }

    pub fn tree(&self) -> &Arc<Tree> {
        &self.tree
    }

    pub fn tracker(&self) -> &Arc<Tracker> {
        &self.tracker
    }

    fn enqueue_fresh(&self, respool_id: &RespoolId, gangs: Vec<Gang>) -> Result<(), ResmgrError> {
        for gang in gangs {
            for task in &gang.tasks {
                self.tracker.track(task.clone(), respool_id.clone());
            }
            self.tree.enqueue_gang(respool_id, gang)?;
        }
        Ok(())
    }

    /// Re-admits gangs handed back by placement. Each gang's pool is
    /// resolved from the tracker, since the caller does not know it.
    ///
    /// Members that terminated while the gang was out (their allocation is
    /// already released) are dropped; only live members re-enter the queue
    /// and have their allocation returned.
    fn enqueue_returned(&self, gangs: Vec<Gang>, reason: &str) -> Result<(), ResmgrError> {
        metrics::counter!(METRIC_GANGS_RETURNED, gangs.len() as u64, "reason" => reason.to_string());
        for gang in gangs {
            let priority = gang.priority;
            let live: Vec<_> = gang
                .tasks
                .into_iter()
                .filter(|task| self.tracker.contains(&task.task_id))
                .collect();
            let Some(first) = live.first() else {
                continue;
            };
            let respool_id = self
                .tracker
                .respool_of(&first.task_id)
                .ok_or(ResmgrError::UntrackedTask(first.task_id))?;
            warn!(
                respool_id = %respool_id,
                tasks = live.len(),
                reason,
                "gang returned by placement"
            );
            for task in &live {
                self.tracker.transition(&task.task_id, TrackedState::Queued);
            }
            self.tree
                .return_gangs(&respool_id, vec![Gang::new(live, priority)])?;
        }
        Ok(())
    }

    /// Dequeues admissible gangs across all leaves, marking preemption
    /// victims for high-priority gangs blocked only by current allocation.
    fn dequeue_pass(&self, task_type: TaskType, limit: usize) -> Result<Vec<Gang>, ResmgrError> {
        let mut collected = Vec::new();
        for leaf_id in self.tree.get_all_nodes(true) {
            if collected.len() >= limit {
                break;
            }
            let remaining = limit - collected.len();
            let (admitted, blocked) =
                self.tree
                    .dequeue_gangs(&leaf_id, remaining, Some(task_type))?;
            for gang in admitted {
                // members killed while queued no longer need scheduling;
                // hand back their slice of the just-committed allocation
                let priority = gang.priority;
                let (live, dead): (Vec<_>, Vec<_>) = gang
                    .tasks
                    .into_iter()
                    .partition(|task| self.tracker.contains(&task.task_id));
                if !dead.is_empty() {
                    let released =
                        armada_scalar::Allocation::sum(dead.iter().map(|t| t.allocation()));
                    self.tree.release_allocation(&leaf_id, &released)?;
                    warn!(
                        respool_id = %leaf_id,
                        dropped = dead.len(),
                        "dropped terminated members from dequeued gang"
                    );
                }
                if live.is_empty() {
                    continue;
                }
                for task in &live {
                    self.tracker
                        .transition(&task.task_id, TrackedState::Admitted);
                }
                collected.push(Gang::new(live, priority));
            }

            if let Some(blocked) = blocked {
                if let AdmissionBlock::WouldFit { shortfall } = blocked.block {
                    let victims =
                        self.tracker
                            .mark_victims(&leaf_id, shortfall, blocked.priority);
                    if !victims.is_empty() {
                        metrics::counter!(METRIC_PREEMPTION_MARKED, victims.len() as u64);
                        info!(
                            respool_id = %leaf_id,
                            victims = victims.len(),
                            blocked_priority = blocked.priority,
                            "marked preemption victims for blocked gang"
                        );
                    }
                }
            }
        }
        Ok(collected)
    }
}

#[async_trait]
impl ResourceManagerClient for ResourceManager {
    async fn enqueue_gangs(
        &self,
        respool_id: Option<RespoolId>,
        gangs: Vec<Gang>,
        reason: &str,
    ) -> Result<(), Error> {
        if reason.is_empty() {
            let respool_id = respool_id
                .ok_or_else(|| Error::invalid("fresh enqueue requires a resource pool"))?;
            self.enqueue_fresh(&respool_id, gangs)?;
        } else {
            self.enqueue_returned(gangs, reason)?;
        }
        Ok(())
    }

    async fn dequeue_gangs(
        &self,
        task_type: TaskType,
        limit: u32,
        timeout: Duration,
    ) -> Result<Vec<Gang>, Error> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let gangs = self.dequeue_pass(task_type, limit as usize)?;
            if !gangs.is_empty() {
                debug!(task_type = %task_type, gangs = gangs.len(), "dequeued gangs");
                return Ok(gangs);
            }
            if tokio::time::Instant::now() + self.config.dequeue_poll_interval > deadline {
                return Ok(Vec::new());
            }
            tokio::time::sleep(self.config.dequeue_poll_interval).await;
        }
    }

    async fn set_placements(&self, placements: Vec<Placement>) -> Result<Vec<Placement>, Error> {
        let mut accepted = Vec::new();
        for placement in placements {
            // A placement for tasks the tracker no longer knows is stale
            // (the tasks terminated underneath placement); skip it.
            let known = placement
                .task_ids
                .iter()
                .all(|id| self.tracker.contains(id));
            if !known {
                warn!(
                    hostname = %placement.hostname,
                    "dropping placement with untracked tasks"
                );
                continue;
            }
            for task_id in &placement.task_ids {
                self.tracker.transition(task_id, TrackedState::Placed);
            }
            self.placements.push(placement.clone())?;
            accepted.push(placement);
        }
        Ok(accepted)
    }

    async fn get_placements(
        &self,
        limit: u32,
        timeout: Duration,
    ) -> Result<Vec<Placement>, Error> {
        Ok(self.placements.pop(limit as usize, timeout).await)
    }

    async fn get_preemptible_tasks(&self, limit: u32) -> Result<Vec<TaskId>, Error> {
        Ok(self.tracker.preemption_victims(limit as usize))
    }
}

/// Event-stream processor releasing pool allocation for terminal tasks.
///
/// Registered on the shared event stream under the `resmgr` client name, so
/// allocation drains even though task completion is observed by the job
/// manager, not by the scheduling path.
pub struct AllocationReleaser {
    tree: Arc<Tree>,
    tracker: Arc<Tracker>,
}

impl AllocationReleaser {
    pub fn new(tree: Arc<Tree>, tracker: Arc<Tracker>) -> Self {
        Self { tree, tracker }
    }
}

#[async_trait]
impl EventProcessor for AllocationReleaser {
    async fn process(&self, event: Event) -> Result<(), Error> {
        let EventPayload::TaskStatus(status) = &event.payload else {
            return Ok(());
        };
        if !status.state.is_terminal()
            && !matches!(
                status.state,
                armada_api::task::TaskState::Failed | armada_api::task::TaskState::Lost
            )
        {
            return Ok(());
        }
        if let Some((respool_id, charge)) = self.tracker.terminate(&status.task_id) {
            if let Some(alloc) = charge {
                self.tree.release_allocation(&respool_id, &alloc)?;
                debug!(
                    task_id = %status.task_id,
                    respool_id = %respool_id,
                    "released allocation for terminal task"
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use armada_api::respool::{RespoolConfig, ResourceQuota, SchedulingPolicy};
    use armada_api::sched::SchedTask;
    use armada_id::{AgentId, HostOfferId, JobId};
    use armada_scalar::{ResourceKind, Resources};
    use armada_storage::{InMemoryDriver, RespoolStore};
    use std::collections::HashMap;

    fn leaf_config(name: &str) -> RespoolConfig {
        RespoolConfig {
            name: name.into(),
            parent: Some(RespoolId::root()),
            resources: vec![ResourceQuota {
                kind: ResourceKind::Cpu,
                reservation: 4.0,
                limit: 100.0,
                share: 1.0,
            }],
            policy: SchedulingPolicy::PriorityFifo,
            controller_limit: 1.0,
        }
    }

    fn sched_task(job: JobId, instance: u32, priority: u32, cpu: f64) -> SchedTask {
        SchedTask {
            task_id: TaskId::new(job, instance),
            task_type: TaskType::Batch,
            resource: Resources::new(cpu, 1.0, 0.0, 0.0),
            priority,
            preemptible: true,
            controller: false,
            volume_id: None,
            desired_host: None,
        }
    }

    async fn service_with_leaf(leaf: &RespoolId) -> ResourceManager {
        let store = RespoolStore::new(Arc::new(InMemoryDriver::new()));
        let tree = Arc::new(Tree::new());
        tree.start(&store).await.unwrap();
        tree.upsert(leaf.clone(), leaf_config(leaf.as_str())).unwrap();
        tree.set_entitlements(HashMap::from([(
            leaf.clone(),
            Resources::new(4.0, 8.0, 0.0, 0.0),
        )]));
        ResourceManager::new(tree, Arc::new(Tracker::new()), ResmgrConfig::default())
    }

    fn placement_for(gang: &Gang) -> Placement {
        Placement {
            hostname: "host-1".into(),
            agent_id: AgentId::new(),
            lease_id: HostOfferId::new(),
            task_ids: gang.task_ids(),
            task_type: TaskType::Batch,
        }
    }

    #[tokio::test]
    async fn admission_gates_dequeue() {
        let leaf = RespoolId::parse("leaf").unwrap();
        let service = service_with_leaf(&leaf).await;
        let job = JobId::new();

        // entitlement {cpu:4, mem:8}: G1{2} admits, G2{3} stays queued
        let g1 = Gang::single(sched_task(job, 0, 1, 2.0));
        let g2 = Gang::single(sched_task(job, 1, 1, 3.0));
        service
            .enqueue_gangs(Some(leaf.clone()), vec![g1.clone(), g2.clone()], "")
            .await
            .unwrap();

        let gangs = service
            .dequeue_gangs(TaskType::Batch, 2, Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(gangs, vec![g1]);
        assert_eq!(service.tree().get(&leaf).unwrap().queue_len, 1);
    }

    #[tokio::test]
    async fn placements_flow_through_queue() {
        let leaf = RespoolId::parse("leaf").unwrap();
        let service = service_with_leaf(&leaf).await;
        let job = JobId::new();

        let gang = Gang::single(sched_task(job, 0, 1, 1.0));
        service
            .enqueue_gangs(Some(leaf.clone()), vec![gang.clone()], "")
            .await
            .unwrap();
        let gangs = service
            .dequeue_gangs(TaskType::Batch, 1, Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(gangs.len(), 1);

        let placement = placement_for(&gang);
        let accepted = service
            .set_placements(vec![placement.clone()])
            .await
            .unwrap();
        assert_eq!(accepted.len(), 1);

        let fetched = service
            .get_placements(10, Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(fetched, vec![placement]);
    }

    #[tokio::test]
    async fn returned_gangs_release_allocation() {
        let leaf = RespoolId::parse("leaf").unwrap();
        let service = service_with_leaf(&leaf).await;
        let job = JobId::new();

        let gang = Gang::single(sched_task(job, 0, 1, 2.0));
        service
            .enqueue_gangs(Some(leaf.clone()), vec![gang.clone()], "")
            .await
            .unwrap();
        let gangs = service
            .dequeue_gangs(TaskType::Batch, 1, Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(service.tree().get(&leaf).unwrap().allocation.total().cpu, 2.0);

        service
            .enqueue_gangs(None, gangs, "deadline_exceeded")
            .await
            .unwrap();
        assert_eq!(service.tree().get(&leaf).unwrap().allocation.total().cpu, 0.0);
        assert_eq!(service.tree().get(&leaf).unwrap().queue_len, 1);
    }

    #[tokio::test]
    async fn blocked_high_priority_gang_marks_victims() {
        let leaf = RespoolId::parse("leaf").unwrap();
        let service = service_with_leaf(&leaf).await;
        let job = JobId::new();

        // fill the entitlement with a low-priority gang
        let low = Gang::single(sched_task(job, 0, 1, 3.0));
        service
            .enqueue_gangs(Some(leaf.clone()), vec![low], "")
            .await
            .unwrap();
        service
            .dequeue_gangs(TaskType::Batch, 1, Duration::from_millis(50))
            .await
            .unwrap();

        // high-priority gang fits the entitlement alone but not on top of
        // the current allocation
        let high = Gang::single(sched_task(job, 1, 10, 3.0));
        service
            .enqueue_gangs(Some(leaf.clone()), vec![high], "")
            .await
            .unwrap();
        let gangs = service
            .dequeue_gangs(TaskType::Batch, 1, Duration::from_millis(50))
            .await
            .unwrap();
        assert!(gangs.is_empty());

        let victims = service.get_preemptible_tasks(10).await.unwrap();
        assert_eq!(victims, vec![TaskId::new(job, 0)]);
    }

    #[tokio::test]
    async fn terminal_event_releases_allocation() {
        let leaf = RespoolId::parse("leaf").unwrap();
        let service = service_with_leaf(&leaf).await;
        let job = JobId::new();

        let gang = Gang::single(sched_task(job, 0, 1, 2.0));
        service
            .enqueue_gangs(Some(leaf.clone()), vec![gang.clone()], "")
            .await
            .unwrap();
        service
            .dequeue_gangs(TaskType::Batch, 1, Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(service.tree().get(&leaf).unwrap().allocation.total().cpu, 2.0);

        let releaser =
            AllocationReleaser::new(service.tree().clone(), service.tracker().clone());
        releaser
            .process(Event {
                offset: 0,
                payload: EventPayload::TaskStatus(armada_api::events::TaskStatusEvent {
                    task_id: TaskId::new(job, 0),
                    pod_id: armada_id::PodId::new(),
                    state: armada_api::task::TaskState::Succeeded,
                    message: String::new(),
                    reason: String::new(),
                    hostname: None,
                    timestamp: chrono::Utc::now(),
                }),
            })
            .await
            .unwrap();

        assert_eq!(service.tree().get(&leaf).unwrap().allocation.total().cpu, 0.0);
        assert!(service.tracker().is_empty());
    }
}
