//! Sticky placement for stateful tasks.

use tracing::{trace, warn};

use crate::models::{Assignment, OfferSlot};

use super::Strategy;

/// Stateful tasks with an existing volume go only to the host holding it;
/// fresh tasks (no volume yet) fall back to best-fit so the volume lands
/// somewhere reasonable.
pub struct StatefulStrategy;

impl Strategy for StatefulStrategy {
    fn name(&self) -> &'static str {
        "stateful"
    }

    fn place(&self, assignment: &mut Assignment, offers: &mut [OfferSlot]) {
        for task in &assignment.gang.tasks {
            let job_id = task.task_id.job_id();
            let slot = match &task.desired_host {
                Some(hostname) => {
                    let sticky = (0..offers.len()).find(|&i| {
                        offers[i].offer.hostname == *hostname && offers[i].fits(&task.resource)
                    });
                    if sticky.is_none() {
                        warn!(
                            task_id = %task.task_id,
                            hostname = %hostname,
                            "volume host not among offers, task stays unplaced"
                        );
                    }
                    sticky
                }
                None => (0..offers.len())
                    .filter(|&i| offers[i].fits(&task.resource))
                    .min_by(|&a, &b| {
                        let left_a = offers[a].remaining.subtract(&task.resource).cpu;
                        let left_b = offers[b].remaining.subtract(&task.resource).cpu;
                        left_a
                            .partial_cmp(&left_b)
                            .unwrap_or(std::cmp::Ordering::Equal)
                            .then(a.cmp(&b))
                    }),
            };

            if let Some(slot) = slot {
                offers[slot].claim(job_id, &task.resource);
                assignment.chosen.insert(task.task_id, slot);
                trace!(
                    task_id = %task.task_id,
                    hostname = %offers[slot].offer.hostname,
                    sticky = task.desired_host.is_some(),
                    "stateful task placed"
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
    fn sticky_task_only_goes_to_volume_host() {
        let mut offers = vec![
            offer_slot("host-a", 8.0, 8192.0),
            offer_slot("host-b", 8.0, 8192.0),
        ];
        let mut gang = assignment(TaskType::Stateful, &[1.0]);
        gang.gang.tasks[0].desired_host = Some("host-b".into());
        StatefulStrategy.place(&mut gang, &mut offers);

        assert_eq!(*gang.chosen.values().next().unwrap(), 1);
    }

    #[test]
    fn sticky_task_waits_when_volume_host_missing() {
        let mut offers = vec![offer_slot("host-a", 8.0, 8192.0)];
        let mut gang = assignment(TaskType::Stateful, &[1.0]);
        gang.gang.tasks[0].desired_host = Some("host-gone".into());
        StatefulStrategy.place(&mut gang, &mut offers);

        assert!(gang.chosen.is_empty());
    }

    #[test]
    fn fresh_volume_falls_back_to_best_fit() {
        let mut offers = vec![
            offer_slot("host-big", 16.0, 8192.0),
            offer_slot("host-small", 2.0, 8192.0),
        ];
        let mut gang = assignment(TaskType::Stateful, &[1.0]);
        StatefulStrategy.place(&mut gang, &mut offers);

        assert_eq!(*gang.chosen.values().next().unwrap(), 1);
    }
}
