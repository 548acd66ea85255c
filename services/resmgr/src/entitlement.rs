//! Max-min fair entitlement calculation.
//!
//! Runs whenever the tree's update signal fires (debounced to one pending
//! recompute) and on a periodic floor. For each resource dimension
//! independently, capacity flows top-down: every pool starts at its
//! reservation floor capped by its subtree demand, then free capacity is
//! distributed among unsaturated siblings proportional to share, removing
//! saturated pools and redistributing their surplus until stable or the
//! round bound is hit.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use armada_id::RespoolId;
use armada_scalar::{ResourceKind, Resources, EPSILON};

use crate::config::ResmgrConfig;
use crate::tree::{PoolSnapshot, Tree};

/// Redistribution rounds per sibling group and dimension.
const MAX_ROUNDS: usize = 8;

/// The entitlement calculator loop.
pub struct Calculator {
    tree: Arc<Tree>,
    config: ResmgrConfig,
}

impl Calculator {
    pub fn new(tree: Arc<Tree>, config: ResmgrConfig) -> Self {
        Self { tree, config }
    }

    /// Runs until shutdown, recomputing on tree updates and on the
    /// periodic floor.
    #[instrument(skip(self, shutdown), name = "entitlement_calculator")]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.entitlement_interval.as_secs(),
            "entitlement calculator started"
        );
        let mut interval = tokio::time::interval(self.config.entitlement_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("entitlement calculator stopping");
                        return;
                    }
                }
                _ = self.tree.updated().notified() => {
                    self.recompute();
                }
                _ = interval.tick() => {
                    self.recompute();
                }
            }
        }
    }

    /// One full recompute over a tree snapshot, published back at the end.
    pub fn recompute(&self) {
        let pools = self.tree.calc_snapshot();
        if pools.is_empty() {
            return;
        }
        let entitlements = calculate(&pools);
        debug!(pools = entitlements.len(), "entitlements recomputed");
        self.tree.set_entitlements(entitlements);
    }
}

/// Computes entitlements for every pool in the snapshot.
///
/// The root's entitlement is the cluster capacity: its reservation vector,
/// kept in step with the host fleet by whoever manages the root config.
pub fn calculate(pools: &[PoolSnapshot]) -> HashMap<RespoolId, Resources> {
    let by_id: HashMap<&RespoolId, &PoolSnapshot> =
        pools.iter().map(|p| (&p.id, p)).collect();
    let root_id = RespoolId::root();
    let Some(root) = by_id.get(&root_id) else {
        warn!("no root pool in snapshot, skipping entitlement calculation");
        return HashMap::new();
    };

    let mut subtree_demand = HashMap::new();
    compute_subtree_demand(root, &by_id, &mut subtree_demand);

    let mut entitlements = HashMap::new();
    entitlements.insert(root.id.clone(), root.reservation);
    distribute(root, root.reservation, &by_id, &subtree_demand, &mut entitlements);
    entitlements
}

fn compute_subtree_demand(
    pool: &PoolSnapshot,
    by_id: &HashMap<&RespoolId, &PoolSnapshot>,
    out: &mut HashMap<RespoolId, Resources>,
) -> Resources {
    let demand = if pool.is_leaf {
        pool.demand
    } else {
        let mut sum = Resources::ZERO;
        for child_id in &pool.children {
            if let Some(child) = by_id.get(child_id) {
                sum = sum.add(&compute_subtree_demand(child, by_id, out));
            }
        }
        sum
    };
    out.insert(pool.id.clone(), demand);
    demand
}

fn distribute(
    pool: &PoolSnapshot,
    capacity: Resources,
    by_id: &HashMap<&RespoolId, &PoolSnapshot>,
    subtree_demand: &HashMap<RespoolId, Resources>,
    entitlements: &mut HashMap<RespoolId, Resources>,
) {
    if pool.children.is_empty() {
        return;
    }
    let children: Vec<&PoolSnapshot> = pool
        .children
        .iter()
        .filter_map(|id| by_id.get(id).copied())
        .collect();

    let mut child_entitlements: Vec<Resources> =
        vec![Resources::ZERO; children.len()];
    for kind in ResourceKind::ALL {
        let split = distribute_dimension(kind, capacity.get(kind), &children, subtree_demand);
        for (entitlement, value) in child_entitlements.iter_mut().zip(split) {
            entitlement.set(kind, value);
        }
    }

    for (child, entitlement) in children.iter().zip(child_entitlements) {
        entitlements.insert(child.id.clone(), entitlement);
        distribute(child, entitlement, by_id, subtree_demand, entitlements);
    }
}

/// Max-min fair split of one dimension's capacity among siblings.
fn distribute_dimension(
    kind: ResourceKind,
    capacity: f64,
    children: &[&PoolSnapshot],
    subtree_demand: &HashMap<RespoolId, Resources>,
) -> Vec<f64> {
    let demand: Vec<f64> = children
        .iter()
        .map(|c| {
            subtree_demand
                .get(&c.id)
                .map(|d| d.get(kind))
                .unwrap_or(0.0)
        })
        .collect();

    // A pool never gets more than min(limit, demand); reservations are
    // honored first, capped by demand.
    let cap: Vec<f64> = children
        .iter()
        .zip(&demand)
        .map(|(c, d)| c.limit.get(kind).min(*d))
        .collect();
    let mut allocated: Vec<f64> = children
        .iter()
        .zip(&cap)
        .map(|(c, cap)| c.reservation.get(kind).min(*cap))
        .collect();

    let mut remaining = capacity - allocated.iter().sum::<f64>();
    if remaining < EPSILON {
        return allocated;
    }

    let mut active: Vec<usize> = (0..children.len())
        .filter(|&i| allocated[i] + EPSILON < cap[i] && children[i].share.get(kind) > EPSILON)
        .collect();

    for _ in 0..MAX_ROUNDS {
        if remaining < EPSILON || active.is_empty() {
            break;
        }
        let total_share: f64 = active
            .iter()
            .map(|&i| children[i].share.get(kind))
            .sum();
        if total_share < EPSILON {
            break;
        }

        let pool_this_round = remaining;
        let mut saturated = Vec::new();
        for &i in &active {
            let give = pool_this_round * children[i].share.get(kind) / total_share;
            let headroom = cap[i] - allocated[i];
            let take = give.min(headroom);
            allocated[i] += take;
            remaining -= take;
            if allocated[i] + EPSILON >= cap[i] {
                saturated.push(i);
            }
        }
        if saturated.is_empty() {
            // everyone took their full proportional slice; stable
            break;
        }
        active.retain(|i| !saturated.contains(i));
    }

    allocated
}
