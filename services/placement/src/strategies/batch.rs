//! First-fit batch placement, packing by dominant resource.

use tracing::trace;

use crate::models::{Assignment, OfferSlot};

use super::Strategy;

/// Batch tasks pack onto the fullest host that still fits, measured by
/// dominant-resource load, which drains small leftovers before breaking
/// into empty hosts.
pub struct BatchStrategy;

impl Strategy for BatchStrategy {
    fn name(&self) -> &'static str {
        "batch"
    }

    fn place(&self, assignment: &mut Assignment, offers: &mut [OfferSlot]) {
        for task in &assignment.gang.tasks {
            let mut candidates: Vec<usize> = (0..offers.len())
                .filter(|&i| offers[i].fits(&task.resource))
                .collect();
            // fullest first; index ties break deterministically
            candidates.sort_by(|&a, &b| {
                offers[b]
                    .dominant_load()
                    .partial_cmp(&offers[a].dominant_load())
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(a.cmp(&b))
            });

            if let Some(&slot) = candidates.first() {
                offers[slot].claim(task.task_id.job_id(), &task.resource);
                assignment.chosen.insert(task.task_id, slot);
                trace!(
                    task_id = %task.task_id,
                    hostname = %offers[slot].offer.hostname,
                    "batch task packed"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::test_support::{assignment, offer_slot};
    use armada_api::sched::TaskType;

    #[test]
    fn packs_fullest_host_first() {
        let mut offers = vec![
            offer_slot("host-a", 4.0, 4096.0),
            offer_slot("host-b", 4.0, 4096.0),
        ];
        // pre-load host-b so it is the fuller one
        offers[1].claim(
            armada_id::JobId::new(),
            &armada_scalar::Resources::new(2.0, 0.0, 0.0, 0.0),
        );

        let mut first = assignment(TaskType::Batch, &[1.0, 1.0]);
        BatchStrategy.place(&mut first, &mut offers);

        assert!(first.fully_placed());
        for slot in first.chosen.values() {
            assert_eq!(*slot, 1);
        }
    }

    #[test]
    fn spills_when_full() {
        let mut offers = vec![
            offer_slot("host-a", 2.0, 4096.0),
            offer_slot("host-b", 2.0, 4096.0),
        ];
        let mut gang = assignment(TaskType::Batch, &[2.0, 2.0]);
        BatchStrategy.place(&mut gang, &mut offers);

        assert!(gang.fully_placed());
        let slots: std::collections::HashSet<_> = gang.chosen.values().collect();
        assert_eq!(slots.len(), 2);
    }

    #[test]
    fn leaves_unfittable_tasks_unchosen() {
        let mut offers = vec![offer_slot("host-a", 1.0, 128.0)];
        let mut gang = assignment(TaskType::Batch, &[4.0]);
        BatchStrategy.place(&mut gang, &mut offers);
        assert!(!gang.fully_placed());
    }
}
