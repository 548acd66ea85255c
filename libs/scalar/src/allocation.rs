//! Multi-dimension allocation tracking.

use serde::{Deserialize, Serialize};

use crate::resources::Resources;

/// The allocation dimensions a resource pool tracks for admission control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationKind {
    /// Allocation of non-preemptible tasks.
    NonPreemptible,
    /// Allocation of preemptible tasks.
    Preemptible,
    /// Allocation of controller tasks.
    Controller,
    /// Allocation of all tasks. Always the sum of the preemptible and
    /// non-preemptible dimensions; controller tasks are counted in one of
    /// those two as well.
    Total,
}

impl AllocationKind {
    /// All allocation dimensions.
    pub const ALL: [AllocationKind; 4] = [
        AllocationKind::NonPreemptible,
        AllocationKind::Preemptible,
        AllocationKind::Controller,
        AllocationKind::Total,
    ];

    fn index(self) -> usize {
        match self {
            AllocationKind::NonPreemptible => 0,
            AllocationKind::Preemptible => 1,
            AllocationKind::Controller => 2,
            AllocationKind::Total => 3,
        }
    }
}

/// Tracks resource allocation across the dimensions of [`AllocationKind`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    values: [Resources; 4],
}

impl Allocation {
    /// The zero allocation.
    #[must_use]
    pub fn zero() -> Self {
        Self::default()
    }

    /// Returns the allocation for one dimension.
    #[must_use]
    pub fn get(&self, kind: AllocationKind) -> &Resources {
        &self.values[kind.index()]
    }

    /// Returns the allocation of all tasks.
    #[must_use]
    pub fn total(&self) -> &Resources {
        self.get(AllocationKind::Total)
    }

    /// Component-wise sum across every dimension.
    #[must_use]
    pub fn add(&self, other: &Allocation) -> Allocation {
        let mut result = Allocation::zero();
        for kind in AllocationKind::ALL {
            result.values[kind.index()] = self.get(kind).add(other.get(kind));
        }
        result
    }

    /// Component-wise difference across every dimension, saturating at zero.
    #[must_use]
    pub fn subtract(&self, other: &Allocation) -> Allocation {
        let mut result = Allocation::zero();
        for kind in AllocationKind::ALL {
            result.values[kind.index()] = self.get(kind).subtract(other.get(kind));
        }
        result
    }

    /// Buckets one task's resources into allocation dimensions.
    ///
    /// Every task counts toward the total; preemptibility decides which of
    /// the two exclusive dimensions it lands in, and controller tasks are
    /// additionally tracked in the controller dimension.
    #[must_use]
    pub fn for_task(resource: Resources, preemptible: bool, controller: bool) -> Allocation {
        let mut alloc = Allocation::zero();
        if preemptible {
            alloc.values[AllocationKind::Preemptible.index()] = resource;
        } else {
            alloc.values[AllocationKind::NonPreemptible.index()] = resource;
        }
        if controller {
            alloc.values[AllocationKind::Controller.index()] = resource;
        }
        alloc.values[AllocationKind::Total.index()] = resource;
        alloc
    }

    /// Sums a sequence of allocations.
    #[must_use]
    pub fn sum(items: impl IntoIterator<Item = Allocation>) -> Allocation {
        items
            .into_iter()
            .fold(Allocation::zero(), |acc, a| acc.add(&a))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_allocation_buckets_by_flags() {
        let res = Resources::new(2.0, 1024.0, 0.0, 0.0);

        let preemptible = Allocation::for_task(res, true, false);
        assert_eq!(preemptible.get(AllocationKind::Preemptible), &res);
        assert_eq!(
            preemptible.get(AllocationKind::NonPreemptible),
            &Resources::ZERO
        );
        assert_eq!(preemptible.total(), &res);

        let controller = Allocation::for_task(res, false, true);
        assert_eq!(controller.get(AllocationKind::NonPreemptible), &res);
        assert_eq!(controller.get(AllocationKind::Controller), &res);
    }

    #[test]
    fn total_is_sum_of_preemptible_and_non_preemptible() {
        let a = Allocation::for_task(Resources::new(1.0, 10.0, 0.0, 0.0), true, false);
        let b = Allocation::for_task(Resources::new(3.0, 30.0, 0.0, 0.0), false, false);
        let sum = a.add(&b);

        let rebuilt = sum
            .get(AllocationKind::Preemptible)
            .add(sum.get(AllocationKind::NonPreemptible));
        assert!(sum.total().equal(&rebuilt));
    }

    #[test]
    fn subtract_restores_zero() {
        let alloc = Allocation::for_task(Resources::new(4.0, 8.0, 0.0, 1.0), true, true);
        let drained = alloc.subtract(&alloc);
        assert_eq!(drained, Allocation::zero());
    }
}
