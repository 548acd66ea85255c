//! Host offer access for the placement engine.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error};

use armada_api::clients::HostManagerClient;
use armada_api::sched::{HostFilter, HostOffer, TaskType};
use armada_scalar::Resources;

const CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Offer traffic with the host manager.
pub struct OfferService {
    hostmgr: Arc<dyn HostManagerClient>,
}

impl OfferService {
    pub fn new(hostmgr: Arc<dyn HostManagerClient>) -> Self {
        Self { hostmgr }
    }

    /// Acquires offers able to host at least the largest single task of the
    /// batch. Failures log and return no offers; the engine backs off.
    pub async fn acquire(
        &self,
        task_type: TaskType,
        minimum: Resources,
        max_hosts: u32,
    ) -> Vec<HostOffer> {
        let filter = HostFilter {
            minimum,
            max_hosts,
            task_type,
        };
        let call = self.hostmgr.acquire_host_offers(filter);
        match tokio::time::timeout(CALL_TIMEOUT, call).await {
            Ok(Ok(offers)) => {
                debug!(task_type = %task_type, offers = offers.len(), "acquired host offers");
                offers
            }
            Ok(Err(e)) => {
                error!(task_type = %task_type, error = %e, "acquire host offers failed");
                Vec::new()
            }
            Err(_) => {
                error!(task_type = %task_type, "acquire host offers timed out");
                Vec::new()
            }
        }
    }

    /// Returns offers the matching round left unused.
    pub async fn release(&self, offers: Vec<HostOffer>) {
        if offers.is_empty() {
            return;
        }
        let total = offers.len();
        let call = self.hostmgr.release_host_offers(offers);
        match tokio::time::timeout(CALL_TIMEOUT, call).await {
            Ok(Ok(())) => debug!(total, "released unused host offers"),
            Ok(Err(e)) => error!(error = %e, total, "release host offers failed"),
            Err(_) => error!(total, "release host offers timed out"),
        }
    }
}
