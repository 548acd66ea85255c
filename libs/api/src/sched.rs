//! The scheduling view: gangs, host offers, and placements.
//!
//! These types flow between the resource manager, the placement engine, and
//! the job manager. They carry only what scheduling needs; the full task
//! model stays in [`crate::task`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use armada_id::{AgentId, HostOfferId, JobId, PodId, TaskId, VolumeId};
use armada_scalar::{Allocation, Resources};

use crate::task::TaskConfig;

/// Task classes routed to distinct placement strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Batch,
    Service,
    Stateful,
}

impl TaskType {
    /// All task types, in placement-loop startup order.
    pub const ALL: [TaskType; 3] = [TaskType::Batch, TaskType::Service, TaskType::Stateful];
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskType::Batch => "batch",
            TaskType::Service => "service",
            TaskType::Stateful => "stateful",
        };
        f.write_str(s)
    }
}

/// One task as the scheduler sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedTask {
    pub task_id: TaskId,
    pub task_type: TaskType,
    pub resource: Resources,
    /// Scheduling priority; higher wins.
    pub priority: u32,
    pub preemptible: bool,
    pub controller: bool,
    /// Volume identity for sticky (stateful) placement.
    pub volume_id: Option<VolumeId>,
    /// Host the volume lives on, when known.
    pub desired_host: Option<String>,
}

impl SchedTask {
    /// Builds the scheduling view of one instance from its config.
    #[must_use]
    pub fn from_config(
        task_id: TaskId,
        task_type: TaskType,
        priority: u32,
        config: &TaskConfig,
    ) -> Self {
        Self {
            task_id,
            task_type,
            resource: config.resource,
            priority,
            preemptible: config.preemptible,
            controller: config.controller,
            volume_id: None,
            desired_host: None,
        }
    }

    /// This task's contribution to pool allocation.
    #[must_use]
    pub fn allocation(&self) -> Allocation {
        Allocation::for_task(self.resource, self.preemptible, self.controller)
    }
}

/// An atomically schedulable set of tasks: placed together or not at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gang {
    pub tasks: Vec<SchedTask>,
    /// Scheduling priority; all member tasks share it.
    pub priority: u32,
}

impl Gang {
    /// A gang of one task, priority taken from the task.
    #[must_use]
    pub fn single(task: SchedTask) -> Self {
        let priority = task.priority;
        Self {
            tasks: vec![task],
            priority,
        }
    }

    /// A gang over several tasks; priority is the members' shared priority.
    #[must_use]
    pub fn new(tasks: Vec<SchedTask>, priority: u32) -> Self {
        Self { tasks, priority }
    }

    /// The job the gang belongs to. Gangs never span jobs.
    #[must_use]
    pub fn job_id(&self) -> Option<JobId> {
        self.tasks.first().map(|t| t.task_id.job_id())
    }

    /// The task type driving strategy selection.
    #[must_use]
    pub fn task_type(&self) -> Option<TaskType> {
        self.tasks.first().map(|t| t.task_type)
    }

    /// Aggregate resource demand of all member tasks.
    #[must_use]
    pub fn resources(&self) -> Resources {
        Resources::sum(self.tasks.iter().map(|t| &t.resource))
    }

    /// Aggregate allocation across dimensions of all member tasks.
    #[must_use]
    pub fn allocation(&self) -> Allocation {
        Allocation::sum(self.tasks.iter().map(SchedTask::allocation))
    }

    /// Member task ids.
    #[must_use]
    pub fn task_ids(&self) -> Vec<TaskId> {
        self.tasks.iter().map(|t| t.task_id).collect()
    }
}

/// A time-bounded reservation of host resources granted to placement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostOffer {
    pub lease_id: HostOfferId,
    pub hostname: String,
    pub agent_id: AgentId,
    pub resources: Resources,
    pub expires_at: DateTime<Utc>,
}

/// Constraints handed to the host manager when acquiring offers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostFilter {
    /// Minimum free resources a host must offer to be useful.
    pub minimum: Resources,
    /// Upper bound on offers returned; 0 means no bound.
    pub max_hosts: u32,
    pub task_type: TaskType,
}

/// A committed match of gang tasks onto one host lease.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Placement {
    pub hostname: String,
    pub agent_id: AgentId,
    pub lease_id: HostOfferId,
    pub task_ids: Vec<TaskId>,
    pub task_type: TaskType,
}

/// One pod handed to the host manager for launch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaunchablePod {
    pub pod_id: PodId,
    pub task_id: TaskId,
    pub config: TaskConfig,
}

#[cfg(test)]
mod tests {
    use super::*;
    use armada_scalar::AllocationKind;

    fn sched_task(cpu: f64, preemptible: bool) -> SchedTask {
        SchedTask {
            task_id: TaskId::new(JobId::new(), 0),
            task_type: TaskType::Batch,
            resource: Resources::new(cpu, 128.0, 0.0, 0.0),
            priority: 1,
            preemptible,
            controller: false,
            volume_id: None,
            desired_host: None,
        }
    }

    #[test]
    fn gang_aggregates_resources() {
        let gang = Gang::new(vec![sched_task(1.0, true), sched_task(2.0, false)], 1);
        assert_eq!(gang.resources().cpu, 3.0);
        assert_eq!(gang.resources().mem, 256.0);

        let alloc = gang.allocation();
        assert_eq!(alloc.get(AllocationKind::Preemptible).cpu, 1.0);
        assert_eq!(alloc.get(AllocationKind::NonPreemptible).cpu, 2.0);
        assert_eq!(alloc.total().cpu, 3.0);
    }
}
