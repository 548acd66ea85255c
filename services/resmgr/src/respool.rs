//! One node of the resource pool tree.

use armada_api::respool::RespoolConfig;
use armada_api::sched::Gang;
use armada_id::RespoolId;
use armada_scalar::{Allocation, AllocationKind, Resources};

use crate::queue::GangQueue;

/// Why a gang could not be admitted right now.
#[derive(Debug, Clone, PartialEq)]
pub enum AdmissionBlock {
    /// Some dimension of `allocation + gang` exceeds the entitlement, but
    /// the gang alone fits the entitlement: preempting running work would
    /// unblock it.
    WouldFit { shortfall: Resources },
    /// The gang alone exceeds the leaf entitlement; only an entitlement
    /// change can admit it.
    ExceedsEntitlement,
    /// The controller-allocation cap binds.
    ControllerCap,
    /// The non-preemptible allocation cap (the reservation) binds.
    NonPreemptibleCap,
}

/// One pool: immutable identity, quota, entitlement, allocation, and (for
/// leaves) the demand queue.
#[derive(Debug)]
pub struct ResPool {
    id: RespoolId,
    path: String,
    config: RespoolConfig,
    parent: Option<RespoolId>,
    /// Ordered child list; order is the deterministic tie-break for
    /// entitlement distribution.
    children: Vec<RespoolId>,

    reservation: Resources,
    limit: Resources,
    share: Resources,
    entitlement: Resources,
    allocation: Allocation,

    queue: GangQueue,
}

impl ResPool {
    pub fn new(id: RespoolId, parent_path: Option<&str>, config: RespoolConfig) -> Self {
        let path = match parent_path {
            None => "/".to_string(),
            Some("/") => format!("/{}", config.name),
            Some(p) => format!("{p}/{}", config.name),
        };
        let reservation = config.reservation();
        let limit = config.limit();
        let share = config.share();
        Self {
            id,
            path,
            parent: config.parent.clone(),
            children: Vec::new(),
            reservation,
            limit,
            share,
            entitlement: Resources::ZERO,
            allocation: Allocation::zero(),
            queue: GangQueue::new(),
            config,
        }
    }

    pub fn id(&self) -> &RespoolId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn config(&self) -> &RespoolConfig {
        &self.config
    }

    pub fn parent(&self) -> Option<&RespoolId> {
        self.parent.as_ref()
    }

    pub fn children(&self) -> &[RespoolId] {
        &self.children
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub fn reservation(&self) -> &Resources {
        &self.reservation
    }

    pub fn limit(&self) -> &Resources {
        &self.limit
    }

    pub fn share(&self) -> &Resources {
        &self.share
    }

    pub fn entitlement(&self) -> &Resources {
        &self.entitlement
    }

    pub fn allocation(&self) -> &Allocation {
        &self.allocation
    }

    pub fn queue(&self) -> &GangQueue {
        &self.queue
    }

    pub fn queue_mut(&mut self) -> &mut GangQueue {
        &mut self.queue
    }

    pub(crate) fn add_child(&mut self, child: RespoolId) {
        if !self.children.contains(&child) {
            self.children.push(child);
        }
    }

    pub(crate) fn remove_child(&mut self, child: &RespoolId) {
        self.children.retain(|c| c != child);
    }

    pub(crate) fn set_entitlement(&mut self, entitlement: Resources) {
        self.entitlement = entitlement;
    }

    pub(crate) fn set_parent(&mut self, parent: Option<RespoolId>) {
        self.parent = parent;
    }

    /// Applies a config update in place, refreshing the quota vectors. The
    /// path is identity and does not change.
    pub(crate) fn update_config(&mut self, config: RespoolConfig) {
        self.reservation = config.reservation();
        self.limit = config.limit();
        self.share = config.share();
        self.parent = config.parent.clone();
        self.config = config;
    }

    /// This leaf's demand: everything queued plus everything already
    /// allocated. Feeds entitlement calculation.
    pub fn demand(&self) -> Resources {
        self.queue.demand().add(self.allocation.total())
    }

    /// Gates one gang against the admission dimensions.
    ///
    /// Admission holds iff, in every resource dimension, the total
    /// allocation plus the gang stays within the entitlement, and the
    /// controller / non-preemptible aggregates stay within their caps.
    pub fn try_admit(&self, gang: &Gang) -> Result<(), AdmissionBlock> {
        let gang_alloc = gang.allocation();
        let next_total = self.allocation.total().add(gang_alloc.total());

        if !next_total.less_than_or_equal(&self.entitlement) {
            if gang_alloc.total().less_than_or_equal(&self.entitlement) {
                let shortfall = next_total.subtract(&self.entitlement);
                return Err(AdmissionBlock::WouldFit { shortfall });
            }
            return Err(AdmissionBlock::ExceedsEntitlement);
        }

        let gang_controller = gang_alloc.get(AllocationKind::Controller);
        if !gang_controller.equal(&Resources::ZERO) {
            let mut controller_cap = Resources::ZERO;
            for kind in armada_scalar::ResourceKind::ALL {
                controller_cap.set(kind, self.reservation.get(kind) * self.config.controller_limit);
            }
            let next_controller = self
                .allocation
                .get(AllocationKind::Controller)
                .add(gang_controller);
            if !next_controller.less_than_or_equal(&controller_cap) {
                return Err(AdmissionBlock::ControllerCap);
            }
        }

        let gang_np = gang_alloc.get(AllocationKind::NonPreemptible);
        if !gang_np.equal(&Resources::ZERO) {
            let next_np = self
                .allocation
                .get(AllocationKind::NonPreemptible)
                .add(gang_np);
            if !next_np.less_than_or_equal(&self.reservation) {
                return Err(AdmissionBlock::NonPreemptibleCap);
            }
        }

        Ok(())
    }

    /// Commits an admitted gang's allocation.
    pub(crate) fn add_allocation(&mut self, alloc: &Allocation) {
        self.allocation = self.allocation.add(alloc);
    }

    /// Releases allocation when a gang is returned or its tasks terminate.
    pub(crate) fn subtract_allocation(&mut self, alloc: &Allocation) {
        self.allocation = self.allocation.subtract(alloc);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use armada_api::respool::{ResourceQuota, SchedulingPolicy};
    use armada_api::sched::{SchedTask, TaskType};
    use armada_id::{JobId, TaskId};
    use armada_scalar::ResourceKind;

    fn leaf(reservation_cpu: f64, controller_limit: f64) -> ResPool {
        let config = RespoolConfig {
            name: "leaf".into(),
            parent: Some(RespoolId::root()),
            resources: vec![ResourceQuota {
                kind: ResourceKind::Cpu,
                reservation: reservation_cpu,
                limit: 100.0,
                share: 1.0,
            }],
            policy: SchedulingPolicy::PriorityFifo,
            controller_limit,
        };
        let mut pool = ResPool::new(RespoolId::parse("leaf").unwrap(), Some("/"), config);
        pool.set_entitlement(Resources::new(4.0, 8.0, 0.0, 0.0));
        pool
    }

    fn gang(cpu: f64, mem: f64, preemptible: bool, controller: bool) -> Gang {
        Gang::single(SchedTask {
            task_id: TaskId::new(JobId::new(), 0),
            task_type: TaskType::Batch,
            resource: Resources::new(cpu, mem, 0.0, 0.0),
            priority: 1,
            preemptible,
            controller,
            volume_id: None,
            desired_host: None,
        })
    }

    #[test]
    fn admits_within_entitlement() {
        let mut pool = leaf(10.0, 1.0);
        let g1 = gang(2.0, 4.0, true, false);
        assert!(pool.try_admit(&g1).is_ok());
        pool.add_allocation(&g1.allocation());

        // second gang pushes cpu to 5 > 4
        let g2 = gang(3.0, 4.0, true, false);
        match pool.try_admit(&g2).unwrap_err() {
            AdmissionBlock::WouldFit { shortfall } => {
                assert!(shortfall.cpu > 0.0);
            }
            other => panic!("unexpected block: {other:?}"),
        }
    }

    #[test]
    fn oversized_gang_exceeds_entitlement() {
        let pool = leaf(10.0, 1.0);
        let giant = gang(50.0, 0.0, true, false);
        assert_eq!(
            pool.try_admit(&giant).unwrap_err(),
            AdmissionBlock::ExceedsEntitlement
        );
    }

    #[test]
    fn non_preemptible_capped_by_reservation() {
        let mut pool = leaf(2.0, 1.0);
        // fits the entitlement (4 cpu) but exceeds the 2 cpu reservation
        let np = gang(3.0, 0.0, false, false);
        assert_eq!(
            pool.try_admit(&np).unwrap_err(),
            AdmissionBlock::NonPreemptibleCap
        );

        let ok = gang(1.5, 0.0, false, false);
        assert!(pool.try_admit(&ok).is_ok());
        pool.add_allocation(&ok.allocation());
        let next = gang(1.0, 0.0, false, false);
        assert_eq!(
            pool.try_admit(&next).unwrap_err(),
            AdmissionBlock::NonPreemptibleCap
        );
    }

    #[test]
    fn controller_capped_by_fraction_of_reservation() {
        let pool = leaf(2.0, 0.5);
        // controller cap is 1 cpu
        let controller = gang(1.5, 0.0, true, true);
        assert_eq!(
            pool.try_admit(&controller).unwrap_err(),
            AdmissionBlock::ControllerCap
        );
        let small = gang(0.5, 0.0, true, true);
        assert!(pool.try_admit(&small).is_ok());
    }

    #[test]
    fn allocation_round_trip() {
        let mut pool = leaf(10.0, 1.0);
        let g = gang(2.0, 4.0, true, false);
        pool.add_allocation(&g.allocation());
        assert_eq!(pool.allocation().total().cpu, 2.0);
        pool.subtract_allocation(&g.allocation());
        assert_eq!(pool.allocation().total(), &Resources::ZERO);
    }
}
