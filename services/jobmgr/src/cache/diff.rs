//! Field-level runtime overrides.

use chrono::{DateTime, Utc};

use armada_api::task::{TaskRuntime, TaskState};
use armada_id::{AgentId, PodId, VolumeId};

/// A partial update over a task runtime.
///
/// `None` leaves the field untouched; the double-`Option` fields can also
/// clear a value. Diffs are computed by goal-state actions and applied by
/// the cache under optimistic concurrency — actions never mutate runtimes
/// directly.
#[derive(Debug, Clone, Default)]
pub struct RuntimeDiff {
    pub state: Option<TaskState>,
    pub goal_state: Option<TaskState>,
    pub host: Option<Option<String>>,
    pub agent_id: Option<Option<AgentId>>,
    pub pod_id: Option<Option<PodId>>,
    pub volume_id: Option<Option<VolumeId>>,
    pub message: Option<String>,
    pub reason: Option<String>,
    pub failure_count: Option<u32>,
    pub config_version: Option<u64>,
    pub desired_config_version: Option<u64>,
    pub started_at: Option<Option<DateTime<Utc>>>,
    pub completed_at: Option<Option<DateTime<Utc>>>,
}

impl RuntimeDiff {
    /// A diff that only moves the state.
    pub fn to_state(state: TaskState) -> Self {
        Self {
            state: Some(state),
            ..Self::default()
        }
    }

    pub fn with_state(mut self, state: TaskState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_goal_state(mut self, goal_state: TaskState) -> Self {
        self.goal_state = Some(goal_state);
        self
    }

    pub fn with_host(mut self, host: Option<String>, agent_id: Option<AgentId>) -> Self {
        self.host = Some(host);
        self.agent_id = Some(agent_id);
        self
    }

    pub fn with_pod_id(mut self, pod_id: Option<PodId>) -> Self {
        self.pod_id = Some(pod_id);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_failure_count(mut self, count: u32) -> Self {
        self.failure_count = Some(count);
        self
    }

    pub fn with_completed_at(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.completed_at = Some(at);
        self
    }

    pub fn with_started_at(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.started_at = Some(at);
        self
    }

    /// Applies the overrides onto a runtime copy.
    pub fn apply(&self, runtime: &mut TaskRuntime) {
        if let Some(state) = self.state {
            runtime.state = state;
        }
        if let Some(goal_state) = self.goal_state {
            runtime.goal_state = goal_state;
        }
        if let Some(host) = &self.host {
            runtime.host = host.clone();
        }
        if let Some(agent_id) = &self.agent_id {
            runtime.agent_id = *agent_id;
        }
        if let Some(pod_id) = &self.pod_id {
            runtime.pod_id = *pod_id;
        }
        if let Some(volume_id) = &self.volume_id {
            runtime.volume_id = *volume_id;
        }
        if let Some(message) = &self.message {
            runtime.message = message.clone();
        }
        if let Some(reason) = &self.reason {
            runtime.reason = reason.clone();
        }
        if let Some(count) = self.failure_count {
            runtime.failure_count = count;
        }
        if let Some(version) = self.config_version {
            runtime.config_version = version;
        }
        if let Some(version) = self.desired_config_version {
            runtime.desired_config_version = version;
        }
        if let Some(at) = self.started_at {
            runtime.started_at = at;
        }
        if let Some(at) = self.completed_at {
            runtime.completed_at = at;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_touches_only_set_fields() {
        let mut runtime = TaskRuntime::new(TaskState::Running, 3);
        runtime.message = "original".into();

        let diff = RuntimeDiff::to_state(TaskState::Pending).with_reason("enqueued");
        diff.apply(&mut runtime);

        assert_eq!(runtime.state, TaskState::Pending);
        assert_eq!(runtime.reason, "enqueued");
        assert_eq!(runtime.message, "original");
        assert_eq!(runtime.config_version, 3);
    }

    #[test]
    fn double_option_clears_values() {
        let mut runtime = TaskRuntime::new(TaskState::Running, 1);
        runtime.host = Some("host-1".into());
        runtime.pod_id = Some(PodId::new());

        let diff = RuntimeDiff::default()
            .with_host(None, None)
            .with_pod_id(None);
        diff.apply(&mut runtime);

        assert_eq!(runtime.host, None);
        assert_eq!(runtime.pod_id, None);
    }
}
