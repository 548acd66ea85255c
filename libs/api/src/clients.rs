//! Client traits for the orchestrator's collaborators.
//!
//! The transports behind these traits (RPC dispatch, retries at the wire
//! level, authentication) are out of scope; the core programs against the
//! traits and the minicluster provides in-process implementations.

use async_trait::async_trait;

use armada_id::{HostOfferId, PodId, RespoolId, TaskId};

use crate::errors::Error;
use crate::sched::{Gang, HostFilter, HostOffer, LaunchablePod, Placement, TaskType};

/// The host manager: offers hosts and runs pods.
#[async_trait]
pub trait HostManagerClient: Send + Sync {
    /// Acquires host offers matching the filter. Granted offers are leased
    /// to the caller until released, expired, or consumed by a launch.
    async fn acquire_host_offers(&self, filter: HostFilter) -> Result<Vec<HostOffer>, Error>;

    /// Returns unused offers so their resources are offered elsewhere.
    async fn release_host_offers(&self, offers: Vec<HostOffer>) -> Result<(), Error>;

    /// Launches pods on a host under a previously acquired lease.
    async fn launch_pods(
        &self,
        lease_id: HostOfferId,
        hostname: String,
        pods: Vec<LaunchablePod>,
    ) -> Result<(), Error>;

    /// Kills the given pods.
    async fn kill_pods(&self, pod_ids: Vec<PodId>) -> Result<(), Error>;
}

/// The resource manager: admits gangs and hands them to placement.
#[async_trait]
pub trait ResourceManagerClient: Send + Sync {
    /// Enqueues gangs into a leaf pool's demand queue.
    ///
    /// First submissions pass the target pool and an empty `reason`.
    /// Placement hands gangs back with `respool_id = None` and a non-empty
    /// reason; the resource manager resolves each returned gang's pool from
    /// its own tracking.
    async fn enqueue_gangs(
        &self,
        respool_id: Option<RespoolId>,
        gangs: Vec<Gang>,
        reason: &str,
    ) -> Result<(), Error>;

    /// Dequeues up to `limit` admitted gangs of one task type, waiting up to
    /// `timeout` for demand to appear.
    async fn dequeue_gangs(
        &self,
        task_type: TaskType,
        limit: u32,
        timeout: std::time::Duration,
    ) -> Result<Vec<Gang>, Error>;

    /// Commits placements decided by the placement engine. Returns the
    /// placements that were accepted; the caller re-enqueues the rest.
    async fn set_placements(&self, placements: Vec<Placement>) -> Result<Vec<Placement>, Error>;

    /// Fetches committed placements for launching, waiting up to `timeout`.
    async fn get_placements(
        &self,
        limit: u32,
        timeout: std::time::Duration,
    ) -> Result<Vec<Placement>, Error>;

    /// Lists currently marked preemption victims, up to `limit`.
    async fn get_preemptible_tasks(&self, limit: u32) -> Result<Vec<TaskId>, Error>;
}
