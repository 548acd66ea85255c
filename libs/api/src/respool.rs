//! Resource pool configuration.

use serde::{Deserialize, Serialize};

use armada_id::RespoolId;
use armada_scalar::{ResourceKind, Resources};

/// The path delimiter for resource pool lookups, e.g. `/infra/batch`.
pub const RESPOOL_PATH_DELIMITER: char = '/';

/// How queued gangs within one pool are ordered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulingPolicy {
    /// Priority descending, FIFO within a priority.
    #[default]
    PriorityFifo,
}

/// Quota for one resource dimension of one pool.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceQuota {
    pub kind: ResourceKind,
    /// Guaranteed floor the pool is entitled to under contention.
    pub reservation: f64,
    /// Hard cap on the pool's total allocation.
    pub limit: f64,
    /// Weight for distributing capacity beyond reservations.
    pub share: f64,
}

/// Configuration of one node in the resource pool tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RespoolConfig {
    pub name: String,
    /// Parent node; `None` only for the root.
    pub parent: Option<RespoolId>,
    /// Per-dimension quota. Dimensions absent here default to zero
    /// reservation, zero share, and an unlimited cap.
    pub resources: Vec<ResourceQuota>,
    pub policy: SchedulingPolicy,
    /// Cap on controller-task allocation, as a fraction of the reservation
    /// (0 disables controller admission, 1 allows up to the full
    /// reservation).
    pub controller_limit: f64,
}

impl RespoolConfig {
    /// Config for the implicit root node.
    #[must_use]
    pub fn root() -> Self {
        Self {
            name: RespoolId::ROOT_NAME.to_string(),
            parent: None,
            resources: Vec::new(),
            policy: SchedulingPolicy::PriorityFifo,
            controller_limit: 1.0,
        }
    }

    /// The reservation across all dimensions as one vector.
    #[must_use]
    pub fn reservation(&self) -> Resources {
        let mut r = Resources::ZERO;
        for quota in &self.resources {
            r.set(quota.kind, quota.reservation);
        }
        r
    }

    /// The limit across all dimensions as one vector; dimensions without a
    /// quota entry are unlimited.
    #[must_use]
    pub fn limit(&self) -> Resources {
        let mut r = Resources::new(f64::MAX, f64::MAX, f64::MAX, f64::MAX);
        for quota in &self.resources {
            r.set(quota.kind, quota.limit);
        }
        r
    }

    /// The share weights across all dimensions as one vector.
    #[must_use]
    pub fn share(&self) -> Resources {
        let mut r = Resources::ZERO;
        for quota in &self.resources {
            r.set(quota.kind, quota.share);
        }
        r
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_vectors() {
        let cfg = RespoolConfig {
            name: "batch".into(),
            parent: Some(RespoolId::root()),
            resources: vec![
                ResourceQuota {
                    kind: ResourceKind::Cpu,
                    reservation: 10.0,
                    limit: 100.0,
                    share: 1.0,
                },
                ResourceQuota {
                    kind: ResourceKind::Mem,
                    reservation: 1024.0,
                    limit: 8192.0,
                    share: 2.0,
                },
            ],
            policy: SchedulingPolicy::PriorityFifo,
            controller_limit: 0.5,
        };

        assert_eq!(cfg.reservation().cpu, 10.0);
        assert_eq!(cfg.limit().mem, 8192.0);
        // unlisted dimensions are unlimited
        assert_eq!(cfg.limit().gpu, f64::MAX);
        assert_eq!(cfg.share().mem, 2.0);
        assert_eq!(cfg.share().disk, 0.0);
    }
}
