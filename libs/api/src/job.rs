//! Job model: type, SLA, configuration, and runtime.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use armada_id::{RespoolId, UpdateId};

use crate::task::{TaskConfig, TaskState, TaskStats};

/// The two workload classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// A finite batch of tasks; done when every instance completes.
    Batch,
    /// A long-running service; instances are kept running.
    Service,
}

impl JobType {
    /// The goal state every instance of this job type converges to by
    /// default.
    #[must_use]
    pub fn default_goal_state(&self) -> TaskState {
        match self {
            JobType::Batch => TaskState::Succeeded,
            JobType::Service => TaskState::Running,
        }
    }
}

/// Aggregate job states derived from instance states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Initialized,
    Pending,
    Running,
    Succeeded,
    Failed,
    Killing,
    Killed,
    Deleted,
}

impl JobState {
    /// States in which the job needs no further driving.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed | JobState::Killed | JobState::Deleted
        )
    }

    /// The active (non-terminal) states, used to query the materialized
    /// job-state index during recovery.
    pub const ACTIVE: [JobState; 4] = [
        JobState::Initialized,
        JobState::Pending,
        JobState::Running,
        JobState::Killing,
    ];
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobState::Initialized => "initialized",
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
            JobState::Killing => "killing",
            JobState::Killed => "killed",
            JobState::Deleted => "deleted",
        };
        f.write_str(s)
    }
}

/// Scheduling guarantees for a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlaConfig {
    /// Scheduling priority within the resource pool; higher wins.
    pub priority: u32,
    /// Whether instances may be preempted.
    pub preemptible: bool,
    /// Instances `[0, min_running)` are scheduled as one gang.
    pub min_running_instances: u32,
    /// Upper bound on concurrently running instances; 0 means unbounded.
    pub max_running_instances: u32,
    /// Launch attempts per instance before `Failed` becomes terminal.
    pub max_instance_attempts: u32,
}

impl Default for SlaConfig {
    fn default() -> Self {
        Self {
            priority: 0,
            preemptible: true,
            min_running_instances: 1,
            max_running_instances: 0,
            max_instance_attempts: 3,
        }
    }
}

/// Versioned job configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    pub name: String,
    pub job_type: JobType,
    pub instance_count: u32,
    pub sla: SlaConfig,
    /// Leaf resource pool the job's gangs are admitted through.
    pub respool_id: RespoolId,
    /// Template for instances without a per-instance override.
    pub default_task: TaskConfig,
    pub config_version: u64,
}

/// Mutable job state. Every persisted mutation bumps `revision`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRuntime {
    pub state: JobState,
    pub goal_state: JobState,
    pub task_stats: TaskStats,
    /// In-flight rolling update, if any.
    pub update_id: Option<UpdateId>,
    pub config_version: u64,
    pub revision: u64,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobRuntime {
    /// Runtime for a freshly created job.
    #[must_use]
    pub fn new(job_type: JobType, config_version: u64, now: DateTime<Utc>) -> Self {
        let goal_state = match job_type {
            JobType::Batch => JobState::Succeeded,
            JobType::Service => JobState::Running,
        };
        Self {
            state: JobState::Initialized,
            goal_state,
            task_stats: TaskStats::new(),
            update_id: None,
            config_version,
            revision: 0,
            created_at: now,
            completed_at: None,
        }
    }

    /// True when both state and goal state are terminal and no update is in
    /// flight, i.e. recovery can skip the job.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.state.is_terminal() && self.goal_state.is_terminal() && self.update_id.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_goal_states() {
        assert_eq!(JobType::Batch.default_goal_state(), TaskState::Succeeded);
        assert_eq!(JobType::Service.default_goal_state(), TaskState::Running);
    }

    #[test]
    fn settled_requires_terminal_both_and_no_update() {
        let mut rt = JobRuntime::new(JobType::Batch, 1, Utc::now());
        assert!(!rt.is_settled());

        rt.state = JobState::Succeeded;
        rt.goal_state = JobState::Succeeded;
        assert!(rt.is_settled());

        rt.update_id = Some(UpdateId::new());
        assert!(!rt.is_settled());
    }
}
