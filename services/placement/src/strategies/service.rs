//! Best-fit service placement with host diversity.

use tracing::trace;

use crate::models::{Assignment, OfferSlot};

use super::Strategy;

/// Service tasks pick the host whose leftover capacity after placement is
/// smallest (best fit), and never share a host with another instance of the
/// same job placed this round.
pub struct ServiceStrategy;

impl Strategy for ServiceStrategy {
    fn name(&self) -> &'static str {
        "service"
    }

    fn place(&self, assignment: &mut Assignment, offers: &mut [OfferSlot]) {
        for task in &assignment.gang.tasks {
            let job_id = task.task_id.job_id();
            let best = (0..offers.len())
                .filter(|&i| {
                    offers[i].fits(&task.resource)
                        && offers[i].job_counts.get(&job_id).copied().unwrap_or(0) == 0
                })
                .min_by(|&a, &b| {
                    let left_a = offers[a].remaining.subtract(&task.resource).cpu;
                    let left_b = offers[b].remaining.subtract(&task.resource).cpu;
                    left_a
                        .partial_cmp(&left_b)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then(a.cmp(&b))
                });

            if let Some(slot) = best {
                offers[slot].claim(job_id, &task.resource);
                assignment.chosen.insert(task.task_id, slot);
                trace!(
                    task_id = %task.task_id,
                    hostname = %offers[slot].offer.hostname,
                    "service task placed best-fit"
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
    fn instances_of_one_job_spread_across_hosts() {
        let mut offers = vec![
            offer_slot("host-a", 8.0, 8192.0),
            offer_slot("host-b", 8.0, 8192.0),
        ];
        let mut gang = assignment(TaskType::Service, &[1.0, 1.0]);
        ServiceStrategy.place(&mut gang, &mut offers);

        assert!(gang.fully_placed());
        let slots: std::collections::HashSet<_> = gang.chosen.values().collect();
        assert_eq!(slots.len(), 2, "two instances must not share a host");
    }

    #[test]
    fn anti_affinity_can_block_placement() {
        let mut offers = vec![offer_slot("host-a", 8.0, 8192.0)];
        let mut gang = assignment(TaskType::Service, &[1.0, 1.0]);
        ServiceStrategy.place(&mut gang, &mut offers);

        // only one of the two instances fits the single host
        assert_eq!(gang.chosen.len(), 1);
        assert!(!gang.fully_placed());
    }

    #[test]
    fn best_fit_prefers_snuggest_host() {
        let mut offers = vec![
            offer_slot("host-big", 16.0, 8192.0),
            offer_slot("host-small", 2.0, 8192.0),
        ];
        let mut gang = assignment(TaskType::Service, &[1.5]);
        ServiceStrategy.place(&mut gang, &mut offers);

        assert_eq!(*gang.chosen.values().next().unwrap(), 1);
    }
}
