//! Rolling update model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use armada_id::{JobId, UpdateId};

/// Lifecycle of a rolling update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateState {
    /// Created, not yet driving instances.
    Initialized,
    /// Actively converging instances to the target config.
    Rolling,
    /// Paused by the operator; resumable.
    Paused,
    /// Every instance reached the target config.
    Succeeded,
    /// Gave up after instance failures exceeded the tolerance.
    Failed,
    /// Superseded or cancelled.
    Aborted,
}

impl UpdateState {
    /// True once the update will never progress again.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UpdateState::Succeeded | UpdateState::Failed | UpdateState::Aborted
        )
    }

    /// The legal lifecycle graph.
    #[must_use]
    pub fn can_transition_to(&self, target: UpdateState) -> bool {
        use UpdateState::*;
        match (self, target) {
            (Initialized, Rolling | Aborted) => true,
            (Rolling, Paused | Succeeded | Failed | Aborted) => true,
            (Paused, Rolling | Aborted) => true,
            _ => false,
        }
    }
}

/// A rolling update of one job from one config version to another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateInfo {
    pub id: UpdateId,
    pub job_id: JobId,
    pub from_config_version: u64,
    pub to_config_version: u64,
    pub instances_added: Vec<u32>,
    pub instances_updated: Vec<u32>,
    pub instances_removed: Vec<u32>,
    pub state: UpdateState,
    pub created_at: DateTime<Utc>,
}

/// Progress snapshot persisted alongside [`UpdateInfo`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateProgress {
    /// Instances converged to the target config.
    pub instances_done: Vec<u32>,
    /// Instances that failed to converge.
    pub instances_failed: Vec<u32>,
    /// Instances currently being updated.
    pub instances_current: Vec<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_edges() {
        use UpdateState::*;
        assert!(Initialized.can_transition_to(Rolling));
        assert!(Rolling.can_transition_to(Paused));
        assert!(Paused.can_transition_to(Rolling));
        assert!(Rolling.can_transition_to(Succeeded));
        assert!(!Succeeded.can_transition_to(Rolling));
        assert!(!Paused.can_transition_to(Succeeded));
    }

    #[test]
    fn terminal_states() {
        assert!(UpdateState::Succeeded.is_terminal());
        assert!(UpdateState::Aborted.is_terminal());
        assert!(!UpdateState::Paused.is_terminal());
    }
}
