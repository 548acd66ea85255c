//! Working state of one matching cycle.

use std::collections::HashMap;
use std::time::Instant;

use armada_api::sched::{Gang, HostOffer, Placement, TaskType};
use armada_id::{JobId, TaskId};
use armada_scalar::Resources;

/// One gang travelling through the engine, with its placement budget.
#[derive(Debug, Clone)]
pub struct Assignment {
    pub gang: Gang,
    pub task_type: TaskType,
    /// Matching rounds consumed so far.
    pub rounds: u32,
    /// Hand the gang back after this instant.
    pub deadline: Instant,
    /// Task -> chosen offer slot index, filled by a strategy.
    pub chosen: HashMap<TaskId, usize>,
}

impl Assignment {
    pub fn new(gang: Gang, task_type: TaskType, deadline: Instant) -> Self {
        Self {
            gang,
            task_type,
            rounds: 0,
            deadline,
            chosen: HashMap::new(),
        }
    }

    /// All-or-nothing: placed only when every member task found a host.
    pub fn fully_placed(&self) -> bool {
        self.gang.tasks.len() == self.chosen.len()
    }

    /// Drops any partial choices so the next round starts clean.
    pub fn reset_choices(&mut self) {
        self.chosen.clear();
    }

    /// Builds the committed placements, one per distinct host used.
    pub fn to_placements(&self, offers: &[OfferSlot]) -> Vec<Placement> {
        let mut by_slot: HashMap<usize, Vec<TaskId>> = HashMap::new();
        for task in &self.gang.tasks {
            if let Some(&slot) = self.chosen.get(&task.task_id) {
                by_slot.entry(slot).or_default().push(task.task_id);
            }
        }
        let mut placements: Vec<Placement> = by_slot
            .into_iter()
            .filter_map(|(slot, task_ids)| {
                offers.get(slot).map(|offer| Placement {
                    hostname: offer.offer.hostname.clone(),
                    agent_id: offer.offer.agent_id,
                    lease_id: offer.offer.lease_id,
                    task_ids,
                    task_type: self.task_type,
                })
            })
            .collect();
        placements.sort_by(|a, b| a.hostname.cmp(&b.hostname));
        placements
    }
}

/// One host offer with the capacity still unclaimed this round.
#[derive(Debug, Clone)]
pub struct OfferSlot {
    pub offer: HostOffer,
    pub remaining: Resources,
    /// Instances per job already claimed onto this host this round, for
    /// service anti-affinity.
    pub job_counts: HashMap<JobId, u32>,
    pub used: bool,
}

impl OfferSlot {
    pub fn new(offer: HostOffer) -> Self {
        let remaining = offer.resources;
        Self {
            offer,
            remaining,
            job_counts: HashMap::new(),
            used: false,
        }
    }

    /// True if the slot still fits `need`.
    pub fn fits(&self, need: &Resources) -> bool {
        need.less_than_or_equal(&self.remaining)
    }

    /// Claims resources for one task of one job.
    pub fn claim(&mut self, job_id: JobId, need: &Resources) {
        self.remaining = self.remaining.subtract(need);
        *self.job_counts.entry(job_id).or_default() += 1;
        self.used = true;
    }

    /// The dominant-resource utilization of this host once claimed work is
    /// accounted, in `[0, 1]`. Higher means fuller.
    pub fn dominant_load(&self) -> f64 {
        let total = &self.offer.resources;
        let mut load: f64 = 0.0;
        for kind in armada_scalar::ResourceKind::ALL {
            let cap = total.get(kind);
            if cap > 0.0 {
                let used = cap - self.remaining.get(kind);
                load = load.max(used / cap);
            }
        }
        load
    }
}

#[cfg(test)]
pub mod test_support {
    //! Builders shared by strategy and engine tests.

    use std::time::{Duration, Instant};

    use armada_api::sched::{Gang, HostOffer, SchedTask, TaskType};
    use armada_id::{AgentId, HostOfferId, JobId, TaskId};
    use armada_scalar::Resources;
    use chrono::Utc;

    use super::{Assignment, OfferSlot};

    pub fn offer_slot(hostname: &str, cpu: f64, mem: f64) -> OfferSlot {
        OfferSlot::new(HostOffer {
            lease_id: HostOfferId::new(),
            hostname: hostname.into(),
            agent_id: AgentId::new(),
            resources: Resources::new(cpu, mem, 0.0, 0.0),
            expires_at: Utc::now() + chrono::Duration::minutes(5),
        })
    }

    pub fn sched_task(job: JobId, instance: u32, task_type: TaskType, cpu: f64) -> SchedTask {
        SchedTask {
            task_id: TaskId::new(job, instance),
            task_type,
            resource: Resources::new(cpu, 128.0, 0.0, 0.0),
            priority: 1,
            preemptible: true,
            controller: false,
            volume_id: None,
            desired_host: None,
        }
    }

    /// A one-job gang with one task per entry of `cpus`.
    pub fn assignment(task_type: TaskType, cpus: &[f64]) -> Assignment {
        let job = JobId::new();
        let tasks: Vec<SchedTask> = cpus
            .iter()
            .enumerate()
            .map(|(i, &cpu)| sched_task(job, i as u32, task_type, cpu))
            .collect();
        Assignment::new(
            Gang::new(tasks, 1),
            task_type,
            Instant::now() + Duration::from_secs(60),
        )
    }
}
