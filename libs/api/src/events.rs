//! Event payloads carried on the event stream.
//!
//! Every payload is versioned implicitly by its serde shape; consumers that
//! cannot handle a variant skip it rather than fail the stream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use armada_id::{AgentId, PodId, TaskId};

use crate::task::TaskState;

/// Host availability transitions reported by the host manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostState {
    Up,
    Draining,
    Down,
}

/// A task status transition observed on a host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatusEvent {
    pub task_id: TaskId,
    pub pod_id: PodId,
    pub state: TaskState,
    pub message: String,
    pub reason: String,
    pub hostname: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// A host availability change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostStatusEvent {
    pub hostname: String,
    pub agent_id: AgentId,
    pub state: HostState,
    pub timestamp: DateTime<Utc>,
}

/// A pod-level event (health transitions, restarts) below task granularity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodEvent {
    pub pod_id: PodId,
    pub task_id: TaskId,
    pub healthy: bool,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// The payload variants the stream can carry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    TaskStatus(TaskStatusEvent),
    HostStatus(HostStatusEvent),
    Pod(PodEvent),
}

impl EventPayload {
    /// Short name for logging and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            EventPayload::TaskStatus(_) => "task_status",
            EventPayload::HostStatus(_) => "host_status",
            EventPayload::Pod(_) => "pod",
        }
    }
}
