//! Active-task tracker.
//!
//! The scheduling-side view of every task between enqueue and terminal
//! state: which leaf it charges, whether it is queued, admitted, or placed,
//! and whether it has been marked as a preemption victim.

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::{debug, warn};

use armada_api::sched::SchedTask;
use armada_id::{RespoolId, TaskId};
use armada_scalar::Allocation;

/// Where a tracked task currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackedState {
    /// In a leaf demand queue; holds no allocation.
    Queued,
    /// Dequeued past admission; charges its leaf's allocation.
    Admitted,
    /// Committed onto a host; still charges its leaf.
    Placed,
}

#[derive(Debug)]
struct TrackedTask {
    task: SchedTask,
    respool_id: RespoolId,
    state: TrackedState,
    preemption_victim: bool,
}

/// Tracks all live scheduling-side tasks.
#[derive(Default)]
pub struct Tracker {
    inner: Mutex<HashMap<TaskId, TrackedTask>>,
}

impl Tracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts tracking a task entering a leaf queue. Re-adding an already
    /// tracked task resets it to `Queued`.
    pub fn track(&self, task: SchedTask, respool_id: RespoolId) {
        let mut inner = self.lock();
        let task_id = task.task_id;
        inner.insert(
            task_id,
            TrackedTask {
                task,
                respool_id,
                state: TrackedState::Queued,
                preemption_victim: false,
            },
        );
        debug!(task_id = %task_id, "task tracked");
    }

    /// Moves a task to a new tracked state. Unknown tasks are ignored with
    /// a warning; the caller may race task completion.
    pub fn transition(&self, task_id: &TaskId, state: TrackedState) {
        let mut inner = self.lock();
        match inner.get_mut(task_id) {
            Some(entry) => entry.state = state,
            None => warn!(task_id = %task_id, ?state, "transition for untracked task"),
        }
    }

    /// The leaf a task charges, if tracked.
    pub fn respool_of(&self, task_id: &TaskId) -> Option<RespoolId> {
        self.lock().get(task_id).map(|t| t.respool_id.clone())
    }

    /// Whether the task is currently tracked.
    pub fn contains(&self, task_id: &TaskId) -> bool {
        self.lock().contains_key(task_id)
    }

    /// Stops tracking a terminal task, returning its allocation charge (for
    /// tasks past admission) so the tree can release it.
    pub fn terminate(&self, task_id: &TaskId) -> Option<(RespoolId, Option<Allocation>)> {
        let mut inner = self.lock();
        let entry = inner.remove(task_id)?;
        let charge = match entry.state {
            TrackedState::Queued => None,
            TrackedState::Admitted | TrackedState::Placed => Some(entry.task.allocation()),
        };
        Some((entry.respool_id, charge))
    }

    /// Marks the cheapest set of preemptible victims in one leaf whose
    /// combined resources cover `shortfall`, considering only tasks below
    /// `priority`. Lowest priority goes first. Returns the marked ids.
    pub fn mark_victims(
        &self,
        respool_id: &RespoolId,
        shortfall: armada_scalar::Resources,
        priority: u32,
    ) -> Vec<TaskId> {
        let mut inner = self.lock();
        let mut candidates: Vec<(&TaskId, &mut TrackedTask)> = inner
            .iter_mut()
            .filter(|(_, t)| {
                t.respool_id == *respool_id
                    && t.task.preemptible
                    && !t.preemption_victim
                    && t.task.priority < priority
                    && matches!(t.state, TrackedState::Admitted | TrackedState::Placed)
            })
            .collect();
        candidates.sort_by_key(|(_, t)| t.task.priority);

        let mut victims = Vec::new();
        let mut covered = armada_scalar::Resources::ZERO;
        for (id, entry) in candidates {
            if shortfall.less_than_or_equal(&covered) {
                break;
            }
            entry.preemption_victim = true;
            covered = covered.add(&entry.task.resource);
            victims.push(*id);
        }

        if !shortfall.less_than_or_equal(&covered) && !victims.is_empty() {
            debug!(
                respool_id = %respool_id,
                victims = victims.len(),
                "victims cover only part of the shortfall"
            );
        }
        victims
    }

    /// Lists up to `limit` marked victims.
    pub fn preemption_victims(&self, limit: usize) -> Vec<TaskId> {
        self.lock()
            .iter()
            .filter(|(_, t)| t.preemption_victim)
            .map(|(id, _)| *id)
            .take(limit)
            .collect()
    }

    /// Number of tracked tasks.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<TaskId, TrackedTask>> {
        self.inner.lock().expect("tracker lock poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use armada_api::sched::TaskType;
    use armada_id::JobId;
    use armada_scalar::Resources;

    fn task(job: JobId, instance: u32, priority: u32, cpu: f64, preemptible: bool) -> SchedTask {
        SchedTask {
            task_id: TaskId::new(job, instance),
            task_type: TaskType::Batch,
            resource: Resources::new(cpu, 0.0, 0.0, 0.0),
            priority,
            preemptible,
            controller: false,
            volume_id: None,
            desired_host: None,
        }
    }

    #[test]
    fn terminate_returns_charge_only_past_admission() {
        let tracker = Tracker::new();
        let leaf = RespoolId::parse("leaf").unwrap();
        let job = JobId::new();

        let queued = task(job, 0, 1, 1.0, true);
        let admitted = task(job, 1, 1, 2.0, true);
        tracker.track(queued.clone(), leaf.clone());
        tracker.track(admitted.clone(), leaf.clone());
        tracker.transition(&admitted.task_id, TrackedState::Admitted);

        let (_, charge) = tracker.terminate(&queued.task_id).unwrap();
        assert!(charge.is_none());

        let (pool, charge) = tracker.terminate(&admitted.task_id).unwrap();
        assert_eq!(pool, leaf);
        assert_eq!(charge.unwrap().total().cpu, 2.0);

        assert!(tracker.is_empty());
    }

    #[test]
    fn victims_lowest_priority_first_until_covered() {
        let tracker = Tracker::new();
        let leaf = RespoolId::parse("leaf").unwrap();
        let job = JobId::new();

        for (instance, priority, cpu) in [(0, 1, 2.0), (1, 3, 2.0), (2, 2, 2.0)] {
            let t = task(job, instance, priority, cpu, true);
            tracker.track(t.clone(), leaf.clone());
            tracker.transition(&t.task_id, TrackedState::Placed);
        }

        let victims = tracker.mark_victims(&leaf, Resources::new(3.0, 0.0, 0.0, 0.0), 10);
        // priorities 1 then 2 cover 4.0 >= 3.0
        assert_eq!(
            victims,
            vec![TaskId::new(job, 0), TaskId::new(job, 2)]
        );
        assert_eq!(tracker.preemption_victims(10).len(), 2);
    }

    #[test]
    fn non_preemptible_and_higher_priority_are_spared() {
        let tracker = Tracker::new();
        let leaf = RespoolId::parse("leaf").unwrap();
        let job = JobId::new();

        let np = task(job, 0, 1, 4.0, false);
        let high = task(job, 1, 20, 4.0, true);
        for t in [&np, &high] {
            tracker.track(t.clone(), leaf.clone());
            tracker.transition(&t.task_id, TrackedState::Placed);
        }

        let victims = tracker.mark_victims(&leaf, Resources::new(1.0, 0.0, 0.0, 0.0), 10);
        assert!(victims.is_empty());
    }
}
