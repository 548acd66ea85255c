//! The placement engine loop.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use armada_api::clients::{HostManagerClient, ResourceManagerClient};
use armada_api::sched::{Gang, Placement, TaskType};
use armada_scalar::Resources;

use crate::config::PlacementConfig;
use crate::hosts::OfferService;
use crate::models::{Assignment, OfferSlot};
use crate::strategies::{default_strategies, Strategy};
use crate::tasks::TaskService;

const METRIC_GANGS_PLACED: &str = "armada_placement_gangs_placed";
const METRIC_GANGS_RETURNED: &str = "armada_placement_gangs_returned";

/// Why a gang is handed back to the resource manager.
mod return_reasons {
    pub const DEADLINE_EXCEEDED: &str = "deadline_exceeded";
    pub const MAX_ROUNDS: &str = "max_rounds_exceeded";
    pub const SET_PLACEMENT_FAILED: &str = "set_placement_failed";
}

/// One placement engine, covering every task type with its registered
/// strategy. Each task type runs as an independent loop.
pub struct Engine {
    tasks: Arc<TaskService>,
    hosts: Arc<OfferService>,
    strategies: HashMap<TaskType, Box<dyn Strategy>>,
}

impl Engine {
    pub fn new(
        resmgr: Arc<dyn ResourceManagerClient>,
        hostmgr: Arc<dyn HostManagerClient>,
    ) -> Self {
        Self {
            tasks: Arc::new(TaskService::new(resmgr)),
            hosts: Arc::new(OfferService::new(hostmgr)),
            strategies: default_strategies(),
        }
    }

    /// Replaces the strategy for one task type.
    pub fn register_strategy(&mut self, task_type: TaskType, strategy: Box<dyn Strategy>) {
        self.strategies.insert(task_type, strategy);
    }

    /// Spawns one loop per registered task type and waits for all of them
    /// to observe shutdown.
    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        let engine = Arc::new(self);
        let mut handles = Vec::new();
        for task_type in TaskType::ALL {
            if !engine.strategies.contains_key(&task_type) {
                continue;
            }
            let engine = engine.clone();
            let shutdown = shutdown.clone();
            let config = PlacementConfig::for_task_type(task_type);
            handles.push(tokio::spawn(async move {
                engine.run_loop(task_type, config, shutdown).await;
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }
    }

    /// The matching loop for one task type.
    #[instrument(skip(self, config, shutdown), fields(task_type = %task_type))]
    pub async fn run_loop(
        &self,
        task_type: TaskType,
        config: PlacementConfig,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let Some(strategy) = self.strategies.get(&task_type) else {
            warn!("no strategy registered, placement loop not starting");
            return;
        };
        info!(strategy = strategy.name(), "placement loop started");

        let mut pending: Vec<Assignment> = Vec::new();
        loop {
            if *shutdown.borrow() {
                if !pending.is_empty() {
                    let gangs: Vec<Gang> = pending.drain(..).map(|a| a.gang).collect();
                    self.tasks
                        .enqueue(gangs, return_reasons::DEADLINE_EXCEEDED)
                        .await;
                }
                info!("placement loop stopping");
                return;
            }

            // Pull fresh demand; the dequeue itself bounds how long we wait.
            let dequeued = self
                .tasks
                .dequeue(task_type, config.dequeue_batch_size, config.dequeue_timeout)
                .await;
            let now = Instant::now();
            pending.extend(dequeued.into_iter().map(|gang| {
                Assignment::new(gang, task_type, now + config.max_duration)
            }));

            if pending.is_empty() {
                continue;
            }

            // Expired gangs go back before we spend offers on them.
            let (expired, mut live): (Vec<Assignment>, Vec<Assignment>) =
                pending.drain(..).partition(|a| a.deadline <= Instant::now());
            self.hand_back(expired, return_reasons::DEADLINE_EXCEEDED).await;

            if live.is_empty() {
                continue;
            }

            let mut offers = self.acquire_offers(task_type, &live, &config).await;
            if offers.is_empty() {
                debug!(gangs = live.len(), "no offers this round");
                pending = self.bump_rounds(live, &config).await;
                continue;
            }

            for assignment in &mut live {
                strategy.place(assignment, &mut offers);
                if !assignment.fully_placed() {
                    // all-or-nothing: partial gangs start clean next round
                    assignment.reset_choices();
                }
            }

            let (placed, unplaced): (Vec<Assignment>, Vec<Assignment>) =
                live.into_iter().partition(Assignment::fully_placed);

            // One placement per host lease: a lease is consumed by a single
            // launch, so every gang that landed on it rides along.
            let mut by_lease: HashMap<armada_id::HostOfferId, Placement> = HashMap::new();
            for assignment in &placed {
                for placement in assignment.to_placements(&offers) {
                    match by_lease.get_mut(&placement.lease_id) {
                        Some(merged) => merged.task_ids.extend(placement.task_ids),
                        None => {
                            by_lease.insert(placement.lease_id, placement);
                        }
                    }
                }
            }
            let mut placements: Vec<Placement> = by_lease.into_values().collect();
            placements.sort_by(|a, b| a.hostname.cmp(&b.hostname));
            metrics::counter!(METRIC_GANGS_PLACED, placed.len() as u64);

            let rejected = self.tasks.set_placements(placements).await;
            if !rejected.is_empty() {
                // The accepted portion is already committed; only gangs
                // whose placements bounced are handed back.
                let bounced: Vec<Gang> = placed
                    .into_iter()
                    .filter(|a| {
                        rejected.iter().any(|p| {
                            p.task_ids.iter().any(|id| {
                                a.gang.tasks.iter().any(|t| t.task_id == *id)
                            })
                        })
                    })
                    .map(|a| a.gang)
                    .collect();
                metrics::counter!(METRIC_GANGS_RETURNED, bounced.len() as u64,
                    "reason" => return_reasons::SET_PLACEMENT_FAILED);
                self.tasks
                    .enqueue(bounced, return_reasons::SET_PLACEMENT_FAILED)
                    .await;
            }

            // Unused offers go back to the host manager.
            let unused: Vec<_> = offers
                .into_iter()
                .filter(|slot| !slot.used)
                .map(|slot| slot.offer)
                .collect();
            self.hosts.release(unused).await;

            pending = self.bump_rounds(unplaced, &config).await;
        }
    }

    /// Acquires offers sized for the live gangs.
    async fn acquire_offers(
        &self,
        task_type: TaskType,
        live: &[Assignment],
        config: &PlacementConfig,
    ) -> Vec<OfferSlot> {
        // The filter's floor is the largest single task, so every returned
        // host is useful to someone.
        let mut minimum = Resources::ZERO;
        let mut total_tasks = 0u32;
        for assignment in live {
            for task in &assignment.gang.tasks {
                total_tasks += 1;
                for kind in armada_scalar::ResourceKind::ALL {
                    if task.resource.get(kind) > minimum.get(kind) {
                        minimum.set(kind, task.resource.get(kind));
                    }
                }
            }
        }
        let max_hosts = if config.max_offers_per_round == 0 {
            total_tasks
        } else {
            config.max_offers_per_round.min(total_tasks.max(1))
        };

        self.hosts
            .acquire(task_type, minimum, max_hosts)
            .await
            .into_iter()
            .map(OfferSlot::new)
            .collect()
    }

    /// Advances round counters, handing back gangs that ran out of rounds.
    async fn bump_rounds(
        &self,
        assignments: Vec<Assignment>,
        config: &PlacementConfig,
    ) -> Vec<Assignment> {
        let mut keep = Vec::new();
        let mut exhausted = Vec::new();
        for mut assignment in assignments {
            assignment.rounds += 1;
            if assignment.rounds >= config.max_rounds {
                exhausted.push(assignment);
            } else {
                keep.push(assignment);
            }
        }
        self.hand_back(exhausted, return_reasons::MAX_ROUNDS).await;
        keep
    }

    async fn hand_back(&self, assignments: Vec<Assignment>, reason: &'static str) {
        if assignments.is_empty() {
            return;
        }
        warn!(gangs = assignments.len(), reason, "handing gangs back");
        metrics::counter!(METRIC_GANGS_RETURNED, assignments.len() as u64, "reason" => reason);
        let gangs: Vec<Gang> = assignments.into_iter().map(|a| a.gang).collect();
        self.tasks.enqueue(gangs, reason).await;
    }
}
