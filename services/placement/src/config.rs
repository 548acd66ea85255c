//! Placement engine configuration.

use std::time::Duration;

use armada_api::sched::TaskType;

/// Per-task-type placement tunables.
#[derive(Debug, Clone)]
pub struct PlacementConfig {
    /// Gangs fetched per dequeue call.
    pub dequeue_batch_size: u32,

    /// How long one dequeue call may wait for demand.
    pub dequeue_timeout: Duration,

    /// Matching rounds before a gang is handed back.
    pub max_rounds: u32,

    /// Wall-clock budget per gang before it is handed back with
    /// `deadline_exceeded`.
    pub max_duration: Duration,

    /// Cap on host offers acquired per matching round; 0 means unbounded.
    pub max_offers_per_round: u32,
}

impl PlacementConfig {
    /// Defaults tuned per task type: services get more rounds and a longer
    /// budget than throwaway batch work.
    pub fn for_task_type(task_type: TaskType) -> Self {
        match task_type {
            TaskType::Batch => Self {
                dequeue_batch_size: 100,
                dequeue_timeout: Duration::from_secs(10),
                max_rounds: 4,
                max_duration: Duration::from_secs(30),
                max_offers_per_round: 200,
            },
            TaskType::Service | TaskType::Stateful => Self {
                dequeue_batch_size: 50,
                dequeue_timeout: Duration::from_secs(10),
                max_rounds: 8,
                max_duration: Duration::from_secs(120),
                max_offers_per_round: 200,
            },
        }
    }
}
