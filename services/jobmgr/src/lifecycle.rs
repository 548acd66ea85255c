//! Thin façade over the host manager for launch and kill traffic.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use armada_api::clients::HostManagerClient;
use armada_api::sched::LaunchablePod;
use armada_id::{HostOfferId, PodId};

use crate::error::JobmgrError;
use crate::lockstate::LockState;
use crate::ratelimit::RateLimiter;

const METRIC_LAUNCH: &str = "armada_jobmgr_pod_launch";
const METRIC_LAUNCH_FAIL: &str = "armada_jobmgr_pod_launch_fail";
const METRIC_LAUNCH_RATE_LIMIT: &str = "armada_jobmgr_pod_launch_rate_limited";
const METRIC_KILL: &str = "armada_jobmgr_pod_kill";
const METRIC_KILL_FAIL: &str = "armada_jobmgr_pod_kill_fail";

/// Issues launch and kill requests with rate limits and the operator
/// kill-lock applied.
pub struct LifecycleManager {
    hostmgr: Arc<dyn HostManagerClient>,
    lock_state: Arc<LockState>,
    launch_limiter: Option<RateLimiter>,
    kill_limiter: Option<RateLimiter>,
    timeout: Duration,
}

impl LifecycleManager {
    pub fn new(
        hostmgr: Arc<dyn HostManagerClient>,
        lock_state: Arc<LockState>,
        launch_limiter: Option<RateLimiter>,
        kill_limiter: Option<RateLimiter>,
        timeout: Duration,
    ) -> Self {
        Self {
            hostmgr,
            lock_state,
            launch_limiter,
            kill_limiter,
            timeout,
        }
    }

    /// Launches pods on a leased host.
    pub async fn launch(
        &self,
        lease_id: HostOfferId,
        hostname: String,
        pods: Vec<LaunchablePod>,
    ) -> Result<(), JobmgrError> {
        if pods.is_empty() {
            return Err(JobmgrError::EmptyPods);
        }
        if let Some(limiter) = &self.launch_limiter {
            if !limiter.allow() {
                metrics::counter!(METRIC_LAUNCH_RATE_LIMIT, 1);
                return Err(JobmgrError::RateLimited("launch"));
            }
        }

        let count = pods.len();
        let call = self.hostmgr.launch_pods(lease_id, hostname.clone(), pods);
        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(())) => {
                metrics::counter!(METRIC_LAUNCH, count as u64);
                debug!(hostname = %hostname, pods = count, "pods launched");
                Ok(())
            }
            Ok(Err(e)) => {
                metrics::counter!(METRIC_LAUNCH_FAIL, count as u64);
                warn!(hostname = %hostname, pods = count, error = %e, "launch failed");
                Err(e.into())
            }
            Err(_) => {
                metrics::counter!(METRIC_LAUNCH_FAIL, count as u64);
                warn!(hostname = %hostname, pods = count, "launch timed out");
                Err(JobmgrError::HostmgrTimeout(self.timeout))
            }
        }
    }

    /// Kills one pod, honoring the operator kill-lock.
    pub async fn kill(&self, pod_id: PodId) -> Result<(), JobmgrError> {
        if self.lock_state.has_kill_lock() {
            return Err(JobmgrError::KillLocked);
        }
        if let Some(limiter) = &self.kill_limiter {
            if !limiter.allow() {
                metrics::counter!(METRIC_KILL_FAIL, 1);
                return Err(JobmgrError::RateLimited("kill"));
            }
        }

        let call = self.hostmgr.kill_pods(vec![pod_id]);
        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(())) => {
                metrics::counter!(METRIC_KILL, 1);
                debug!(pod_id = %pod_id, "pod killed");
                Ok(())
            }
            Ok(Err(e)) => {
                metrics::counter!(METRIC_KILL_FAIL, 1);
                warn!(pod_id = %pod_id, error = %e, "kill failed");
                Err(e.into())
            }
            Err(_) => {
                metrics::counter!(METRIC_KILL_FAIL, 1);
                warn!(pod_id = %pod_id, "kill timed out");
                Err(JobmgrError::HostmgrTimeout(self.timeout))
            }
        }
    }

    /// Executor shutdown is not part of the v1 host-manager surface.
    pub async fn shutdown_executor(&self, _pod_id: PodId) -> Result<(), JobmgrError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use armada_api::sched::HostFilter;
    use armada_api::sched::HostOffer;
    use armada_api::task::TaskConfig;
    use armada_api::Error;
    use armada_id::{JobId, TaskId};
    use armada_scalar::Resources;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct RecordingHostManager {
        launches: AtomicUsize,
        kills: AtomicUsize,
        fail_launch: bool,
    }

    #[async_trait]
    impl HostManagerClient for RecordingHostManager {
        async fn acquire_host_offers(&self, _: HostFilter) -> Result<Vec<HostOffer>, Error> {
            Ok(Vec::new())
        }
        async fn release_host_offers(&self, _: Vec<HostOffer>) -> Result<(), Error> {
            Ok(())
        }
        async fn launch_pods(
            &self,
            _: HostOfferId,
            _: String,
            pods: Vec<LaunchablePod>,
        ) -> Result<(), Error> {
            if self.fail_launch {
                return Err(Error::unavailable("host manager down"));
            }
            self.launches.fetch_add(pods.len(), Ordering::SeqCst);
            Ok(())
        }
        async fn kill_pods(&self, pod_ids: Vec<PodId>) -> Result<(), Error> {
            self.kills.fetch_add(pod_ids.len(), Ordering::SeqCst);
            Ok(())
        }
    }

    fn pod() -> LaunchablePod {
        LaunchablePod {
            pod_id: PodId::new(),
            task_id: TaskId::new(JobId::new(), 0),
            config: TaskConfig::with_resource("t", Resources::new(1.0, 64.0, 0.0, 0.0)),
        }
    }

    fn manager(hostmgr: Arc<RecordingHostManager>, lock: Arc<LockState>) -> LifecycleManager {
        LifecycleManager::new(hostmgr, lock, None, None, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn launch_rejects_empty_pods() {
        let mgr = manager(Arc::new(RecordingHostManager::default()), Arc::new(LockState::new()));
        let err = mgr
            .launch(HostOfferId::new(), "host".into(), Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, JobmgrError::EmptyPods));
    }

    #[tokio::test]
    async fn launch_reaches_host_manager() {
        let hostmgr = Arc::new(RecordingHostManager::default());
        let mgr = manager(hostmgr.clone(), Arc::new(LockState::new()));
        mgr.launch(HostOfferId::new(), "host".into(), vec![pod(), pod()])
            .await
            .unwrap();
        assert_eq!(hostmgr.launches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn kill_lock_blocks_kills() {
        let hostmgr = Arc::new(RecordingHostManager::default());
        let lock = Arc::new(LockState::new());
        let mgr = manager(hostmgr.clone(), lock.clone());

        lock.set_kill_lock();
        let err = mgr.kill(PodId::new()).await.unwrap_err();
        assert!(matches!(err, JobmgrError::KillLocked));
        assert_eq!(hostmgr.kills.load(Ordering::SeqCst), 0);

        lock.clear_kill_lock();
        mgr.kill(PodId::new()).await.unwrap();
        assert_eq!(hostmgr.kills.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn launch_rate_limit_is_resource_exhausted() {
        let hostmgr = Arc::new(RecordingHostManager::default());
        let mgr = LifecycleManager::new(
            hostmgr,
            Arc::new(LockState::new()),
            Some(RateLimiter::new(1, 1)),
            None,
            Duration::from_secs(5),
        );
        mgr.launch(HostOfferId::new(), "host".into(), vec![pod()])
            .await
            .unwrap();
        let err = mgr
            .launch(HostOfferId::new(), "host".into(), vec![pod()])
            .await
            .unwrap_err();
        assert!(matches!(err, JobmgrError::RateLimited("launch")));
    }
}
