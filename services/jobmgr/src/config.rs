//! Job manager configuration.

use std::time::Duration;

/// Tunables for the job manager.
#[derive(Debug, Clone)]
pub struct JobmgrConfig {
    /// Goal-state worker pool bound.
    pub goalstate_workers: usize,

    /// Deadline for one goal-state action.
    pub action_timeout: Duration,

    /// Retry backoff base for retryable action failures.
    pub backoff_base: Duration,

    /// Retry backoff cap.
    pub backoff_cap: Duration,

    /// Placements fetched per processor cycle.
    pub placement_batch_size: u32,

    /// How long one placement fetch may wait.
    pub placement_timeout: Duration,

    /// Host manager launch/kill deadline.
    pub hostmgr_timeout: Duration,

    /// Preemption poll interval.
    pub preemption_interval: Duration,

    /// Launches per second (0 disables the limiter).
    pub launch_rate: u32,

    /// Kills per second (0 disables the limiter).
    pub kill_rate: u32,
}

impl Default for JobmgrConfig {
    fn default() -> Self {
        Self {
            goalstate_workers: 1000,
            action_timeout: Duration::from_secs(60),
            backoff_base: Duration::from_millis(100),
            backoff_cap: Duration::from_secs(30),
            placement_batch_size: 100,
            placement_timeout: Duration::from_secs(1),
            hostmgr_timeout: Duration::from_secs(30),
            preemption_interval: Duration::from_secs(5),
            launch_rate: 0,
            kill_rate: 0,
        }
    }
}

impl JobmgrConfig {
    /// Loads configuration from `ARMADA_JOBMGR_*` environment variables,
    /// falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(n) = env_u64("ARMADA_JOBMGR_GOALSTATE_WORKERS") {
            config.goalstate_workers = n as usize;
        }
        if let Some(secs) = env_u64("ARMADA_JOBMGR_ACTION_TIMEOUT_SECS") {
            config.action_timeout = Duration::from_secs(secs);
        }
        if let Some(n) = env_u64("ARMADA_JOBMGR_LAUNCH_RATE") {
            config.launch_rate = n as u32;
        }
        if let Some(n) = env_u64("ARMADA_JOBMGR_KILL_RATE") {
            config.kill_rate = n as u32;
        }
        config
    }
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}
