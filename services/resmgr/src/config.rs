//! Resource manager configuration.

use std::time::Duration;

/// Tunables for the resource manager.
#[derive(Debug, Clone)]
pub struct ResmgrConfig {
    /// Poll interval while a dequeue waits for admissible demand.
    pub dequeue_poll_interval: Duration,

    /// Entitlement recompute floor; recomputes also fire on tree updates.
    pub entitlement_interval: Duration,

    /// Bound on the committed-placement queue.
    pub placement_queue_capacity: usize,
}

impl Default for ResmgrConfig {
    fn default() -> Self {
        Self {
            dequeue_poll_interval: Duration::from_millis(100),
            entitlement_interval: Duration::from_secs(60),
            placement_queue_capacity: 10_000,
        }
    }
}

impl ResmgrConfig {
    /// Loads configuration from `ARMADA_RESMGR_*` environment variables,
    /// falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(ms) = env_u64("ARMADA_RESMGR_DEQUEUE_POLL_MS") {
            config.dequeue_poll_interval = Duration::from_millis(ms);
        }
        if let Some(secs) = env_u64("ARMADA_RESMGR_ENTITLEMENT_INTERVAL_SECS") {
            config.entitlement_interval = Duration::from_secs(secs);
        }
        if let Some(cap) = env_u64("ARMADA_RESMGR_PLACEMENT_QUEUE_CAPACITY") {
            config.placement_queue_capacity = cap as usize;
        }
        config
    }
}

pub(crate) fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}
