//! Task model: states, configuration, and runtime.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use armada_id::{AgentId, PodId, VolumeId};
use armada_scalar::Resources;

/// The states a task moves through from submission to the terminal set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Created in storage, not yet enqueued for scheduling.
    Initialized,
    /// Waiting in a resource pool demand queue.
    Pending,
    /// Admitted and matched to a host by placement.
    Placed,
    /// Launch request in flight to the host manager.
    Launching,
    /// Host manager acknowledged the launch.
    Launched,
    /// The pod is starting on the host.
    Starting,
    /// The pod is running.
    Running,
    /// Ran to successful completion.
    Succeeded,
    /// Exited with a failure.
    Failed,
    /// The host or pod disappeared.
    Lost,
    /// Kill request in flight.
    Killing,
    /// Killed on request.
    Killed,
    /// Being evicted to free resources for higher-priority work.
    Preempting,
    /// Runtime and config removed from storage.
    Deleted,
}

impl TaskState {
    /// States from which no further action is ever dispatched.
    ///
    /// `Failed` and `Lost` are deliberately absent: both are terminal only
    /// once restart attempts are exhausted, and that check lives in the
    /// goal-state engine, which owns the attempt counter.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Succeeded | TaskState::Killed | TaskState::Deleted
        )
    }

    /// True if the task holds (or may still hold) resources on a host.
    #[must_use]
    pub fn is_on_host(&self) -> bool {
        matches!(
            self,
            TaskState::Launching
                | TaskState::Launched
                | TaskState::Starting
                | TaskState::Running
                | TaskState::Killing
                | TaskState::Preempting
        )
    }

    /// The legal state graph.
    ///
    /// Scheduling progress is strictly forward; recovery edges
    /// (`Failed`/`Lost`/`Preempting` back to `Initialized`) exist so the
    /// goal-state engine can relaunch, and any live state may move to
    /// `Killing` when a kill is requested.
    #[must_use]
    pub fn can_transition_to(&self, target: TaskState) -> bool {
        use TaskState::*;
        if *self == target {
            return false;
        }
        match (self, target) {
            (Initialized, Pending) => true,
            (Pending, Placed) => true,
            (Placed, Launching) => true,
            (Launching, Launched) => true,
            (Launched, Starting) => true,
            (Starting, Running) => true,

            (Running, Succeeded | Failed | Lost | Killing | Preempting) => true,

            // A pod may die or go missing before it reaches Running.
            (Launching | Launched | Starting, Failed | Lost) => true,

            // Launch rollback: a failed launch re-enters the demand queue.
            (Placed | Launching, Pending) => true,

            // Kill can interrupt any live state.
            (
                Initialized | Pending | Placed | Launching | Launched | Starting | Preempting,
                Killing,
            ) => true,
            (Killing, Killed) => true,
            // Tasks not yet on a host are killed without a Killing round
            // trip, and a host's kill ack may outrun the Killing write.
            (Initialized | Pending | Placed, Killed) => true,
            (Launching | Launched | Starting | Running, Killed) => true,

            // Preemption either reschedules or kills, per policy.
            (Preempting, Killed | Initialized) => true,

            // Restart edges driven by the goal-state engine.
            (Failed | Lost | Killed, Initialized) => true,

            // Garbage collection of terminal tasks.
            (Succeeded | Failed | Lost | Killed, Deleted) => true,

            _ => false,
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskState::Initialized => "initialized",
            TaskState::Pending => "pending",
            TaskState::Placed => "placed",
            TaskState::Launching => "launching",
            TaskState::Launched => "launched",
            TaskState::Starting => "starting",
            TaskState::Running => "running",
            TaskState::Succeeded => "succeeded",
            TaskState::Failed => "failed",
            TaskState::Lost => "lost",
            TaskState::Killing => "killing",
            TaskState::Killed => "killed",
            TaskState::Preempting => "preempting",
            TaskState::Deleted => "deleted",
        };
        f.write_str(s)
    }
}

/// Persistent volume configuration for stateful tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeConfig {
    /// Volume container path.
    pub container_path: String,
    /// Volume size in MB.
    pub size_mb: u64,
}

/// Immutable per-instance configuration, versioned by `config_version` on the
/// owning job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Instance name, e.g. `webapp-3`.
    pub name: String,
    /// Resource demand of one instance.
    pub resource: Resources,
    /// Whether the instance's resources may be reclaimed by preemption.
    pub preemptible: bool,
    /// Whether this instance is the job's controller.
    pub controller: bool,
    /// When preempted, kill outright instead of rescheduling.
    pub kill_on_preempt: bool,
    /// Persistent volume, for stateful instances.
    pub volume: Option<VolumeConfig>,
}

impl TaskConfig {
    /// A minimal config with the given resources, preemptible, stateless.
    #[must_use]
    pub fn with_resource(name: impl Into<String>, resource: Resources) -> Self {
        Self {
            name: name.into(),
            resource,
            preemptible: true,
            controller: false,
            kill_on_preempt: false,
            volume: None,
        }
    }
}

/// Mutable per-instance state. Every persisted mutation bumps `revision`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRuntime {
    pub state: TaskState,
    pub goal_state: TaskState,
    /// Host the task is (or was last) placed on.
    pub host: Option<String>,
    pub agent_id: Option<AgentId>,
    /// Pod identity for the current launch attempt.
    pub pod_id: Option<PodId>,
    pub volume_id: Option<VolumeId>,
    /// Human-readable status message.
    pub message: String,
    /// Machine-readable status reason.
    pub reason: String,
    /// Consecutive failed launch attempts.
    pub failure_count: u32,
    /// Config version the current attempt was launched with.
    pub config_version: u64,
    /// Config version the task should converge to.
    pub desired_config_version: u64,
    /// Optimistic concurrency token; bumped by exactly one per write.
    pub revision: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskRuntime {
    /// Runtime for a freshly created instance with the given goal.
    #[must_use]
    pub fn new(goal_state: TaskState, config_version: u64) -> Self {
        Self {
            state: TaskState::Initialized,
            goal_state,
            host: None,
            agent_id: None,
            pod_id: None,
            volume_id: None,
            message: String::new(),
            reason: String::new(),
            failure_count: 0,
            config_version,
            desired_config_version: config_version,
            revision: 0,
            started_at: None,
            completed_at: None,
        }
    }
}

/// Per-state instance counts aggregated on the owning job.
pub type TaskStats = HashMap<TaskState, u32>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_path_is_legal() {
        use TaskState::*;
        let path = [
            Initialized,
            Pending,
            Placed,
            Launching,
            Launched,
            Starting,
            Running,
            Succeeded,
        ];
        for pair in path.windows(2) {
            assert!(
                pair[0].can_transition_to(pair[1]),
                "{} -> {} should be legal",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn no_backward_scheduling_edges() {
        use TaskState::*;
        assert!(!Running.can_transition_to(Pending));
        assert!(!Placed.can_transition_to(Initialized));
        assert!(!Succeeded.can_transition_to(Running));
    }

    #[test]
    fn restart_edges() {
        use TaskState::*;
        assert!(Failed.can_transition_to(Initialized));
        assert!(Lost.can_transition_to(Initialized));
        assert!(!Succeeded.can_transition_to(Initialized));
    }

    #[test]
    fn self_transition_is_illegal() {
        assert!(!TaskState::Running.can_transition_to(TaskState::Running));
    }

    #[test]
    fn terminal_set() {
        assert!(TaskState::Succeeded.is_terminal());
        assert!(TaskState::Killed.is_terminal());
        assert!(TaskState::Deleted.is_terminal());
        assert!(!TaskState::Preempting.is_terminal());
        assert!(!TaskState::Running.is_terminal());
        // terminal only when attempts are exhausted, which the engine decides
        assert!(!TaskState::Failed.is_terminal());
        assert!(!TaskState::Lost.is_terminal());
    }
}
