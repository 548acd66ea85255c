//! The resource pool tree.
//!
//! One `RwLock` serializes readers and writers; no node is ever exposed by
//! reference outside the lock. The tree owns node state exclusively — other
//! components see snapshots.
//!
//! Lifecycle is tied to leadership: [`Tree::start`] loads pool configs from
//! storage when leadership is gained, [`Tree::stop`] clears state when it is
//! lost.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use armada_api::respool::{RespoolConfig, RESPOOL_PATH_DELIMITER};
use armada_api::sched::{Gang, TaskType};
use armada_id::RespoolId;
use armada_scalar::{Allocation, Resources};
use armada_storage::RespoolStore;

use crate::error::ResmgrError;
use crate::respool::{AdmissionBlock, ResPool};

/// A gang blocking the head of a demand queue.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockedGang {
    pub priority: u32,
    pub resources: Resources,
    pub block: AdmissionBlock,
}

/// Read-only snapshot of one pool.
#[derive(Debug, Clone)]
pub struct PoolSnapshot {
    pub id: RespoolId,
    pub path: String,
    pub config: RespoolConfig,
    pub children: Vec<RespoolId>,
    pub is_leaf: bool,
    pub reservation: Resources,
    pub limit: Resources,
    pub share: Resources,
    pub entitlement: Resources,
    pub allocation: Allocation,
    pub demand: Resources,
    pub queue_len: usize,
}

struct TreeState {
    pools: HashMap<RespoolId, ResPool>,
    started: bool,
}

/// The resource pool tree.
pub struct Tree {
    state: RwLock<TreeState>,
    /// Capacity-one update signal; written on every mutation, read by the
    /// entitlement calculator. Multiple updates may collapse into one wake.
    updated: Notify,
}

impl Tree {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(TreeState {
                pools: HashMap::new(),
                started: false,
            }),
            updated: Notify::new(),
        }
    }

    /// The debounced update signal for the entitlement calculator.
    pub fn updated(&self) -> &Notify {
        &self.updated
    }

    /// Builds the tree from stored configs. Called on leadership gain.
    ///
    /// Configs whose parent chain does not terminate at the root are
    /// rejected and skipped with an error log; the rest of the tree still
    /// comes up.
    pub async fn start(&self, store: &RespoolStore) -> Result<(), ResmgrError> {
        let mut configs = store.all().await?;
        configs
            .entry(RespoolId::root())
            .or_insert_with(RespoolConfig::root);

        let accepted = prune_unrooted(configs);

        let mut state = self.write();
        state.pools.clear();
        build_tree(&mut state.pools, &accepted);
        state.started = true;
        let total = state.pools.len();
        drop(state);

        info!(pools = total, "resource pool tree started");
        self.updated.notify_one();
        Ok(())
    }

    /// Clears the tree. Called on leadership loss.
    pub fn stop(&self) {
        let mut state = self.write();
        state.pools.clear();
        state.started = false;
        info!("resource pool tree stopped");
    }

    /// Creates or updates one pool.
    pub fn upsert(&self, id: RespoolId, config: RespoolConfig) -> Result<(), ResmgrError> {
        let mut state = self.write();
        if !state.started {
            return Err(ResmgrError::NotStarted);
        }

        if id.is_root() {
            let root = state
                .pools
                .get_mut(&id)
                .ok_or_else(|| ResmgrError::PoolNotFound(id.clone()))?;
            root.update_config(config);
            drop(state);
            self.updated.notify_one();
            return Ok(());
        }

        let parent_id = config
            .parent
            .clone()
            .ok_or_else(|| ResmgrError::ParentMissing(id.clone()))?;
        if !state.pools.contains_key(&parent_id) {
            return Err(ResmgrError::ParentMissing(parent_id));
        }

        // Walk up from the declared parent; reaching `id` means the update
        // would close a cycle.
        let mut cursor = Some(parent_id.clone());
        while let Some(current) = cursor {
            if current == id {
                return Err(ResmgrError::Cycle {
                    id,
                    through: parent_id,
                });
            }
            cursor = state
                .pools
                .get(&current)
                .and_then(|p| p.parent().cloned());
        }

        let exists = state.pools.contains_key(&id);
        if exists {
            let pool = state
                .pools
                .get_mut(&id)
                .ok_or_else(|| ResmgrError::PoolNotFound(id.clone()))?;
            if pool.parent() != Some(&parent_id) {
                // Re-parenting would silently invalidate every path in the
                // subtree; pools are deleted and recreated instead.
                return Err(ResmgrError::Internal(format!(
                    "resource pool {id} cannot change parent"
                )));
            }
            pool.update_config(config);
            debug!(respool_id = %id, "resource pool updated");
        } else {
            let parent = state
                .pools
                .get(&parent_id)
                .ok_or_else(|| ResmgrError::ParentMissing(parent_id.clone()))?;
            // A leaf with queued gangs cannot become an inner node.
            if parent.is_leaf() && !parent.queue().is_empty() {
                return Err(ResmgrError::HasQueuedGangs(parent_id));
            }
            let parent_path = parent.path().to_string();
            let pool = ResPool::new(id.clone(), Some(&parent_path), config);
            state.pools.insert(id.clone(), pool);
            if let Some(parent) = state.pools.get_mut(&parent_id) {
                parent.add_child(id.clone());
            }
            debug!(respool_id = %id, parent = %parent_id, "resource pool added");
        }

        drop(state);
        self.updated.notify_one();
        Ok(())
    }

    /// Deletes one pool. Rejected while the pool has children or queued
    /// gangs.
    pub fn delete(&self, id: &RespoolId) -> Result<(), ResmgrError> {
        let mut state = self.write();
        if !state.started {
            return Err(ResmgrError::NotStarted);
        }
        if id.is_root() {
            return Err(ResmgrError::RootImmortal);
        }
        let pool = state
            .pools
            .get(id)
            .ok_or_else(|| ResmgrError::PoolNotFound(id.clone()))?;
        if !pool.children().is_empty() {
            return Err(ResmgrError::HasChildren(id.clone()));
        }
        if !pool.queue().is_empty() {
            return Err(ResmgrError::HasQueuedGangs(id.clone()));
        }
        let parent = pool.parent().cloned();

        state.pools.remove(id);
        if let Some(parent_id) = parent {
            if let Some(parent) = state.pools.get_mut(&parent_id) {
                parent.remove_child(id);
            }
        }
        drop(state);

        self.updated.notify_one();
        info!(respool_id = %id, "resource pool deleted");
        Ok(())
    }

    /// Snapshot of one pool by id.
    pub fn get(&self, id: &RespoolId) -> Result<PoolSnapshot, ResmgrError> {
        let state = self.read();
        let pool = state
            .pools
            .get(id)
            .ok_or_else(|| ResmgrError::PoolNotFound(id.clone()))?;
        Ok(snapshot(pool))
    }

    /// Resolves `/a/b/c` to a pool snapshot; `/` resolves to the root.
    pub fn get_by_path(&self, path: &str) -> Result<PoolSnapshot, ResmgrError> {
        let state = self.read();
        if !state.started {
            return Err(ResmgrError::NotStarted);
        }
        let root = state
            .pools
            .get(&RespoolId::root())
            .ok_or(ResmgrError::NotStarted)?;

        let trimmed = path
            .trim_start_matches(RESPOOL_PATH_DELIMITER)
            .trim_end_matches(RESPOOL_PATH_DELIMITER);
        if trimmed.is_empty() {
            return Ok(snapshot(root));
        }

        let mut current = root;
        for segment in trimmed.split(RESPOOL_PATH_DELIMITER) {
            let next = current
                .children()
                .iter()
                .filter_map(|child_id| state.pools.get(child_id))
                .find(|child| child.name() == segment);
            match next {
                Some(child) => current = child,
                None => return Err(ResmgrError::PathNotFound(path.to_string())),
            }
        }
        Ok(snapshot(current))
    }

    /// Ids of all pools, or of all leaves.
    pub fn get_all_nodes(&self, leaf_only: bool) -> Vec<RespoolId> {
        let state = self.read();
        let mut ids: Vec<RespoolId> = state
            .pools
            .values()
            .filter(|p| !leaf_only || p.is_leaf())
            .map(|p| p.id().clone())
            .collect();
        ids.sort();
        ids
    }

    /// Appends a gang to a leaf's demand queue.
    pub fn enqueue_gang(&self, leaf_id: &RespoolId, gang: Gang) -> Result<(), ResmgrError> {
        if gang.tasks.is_empty() {
            return Err(ResmgrError::InvalidGang("gang has no tasks".into()));
        }
        let mut state = self.write();
        let pool = state
            .pools
            .get_mut(leaf_id)
            .ok_or_else(|| ResmgrError::PoolNotFound(leaf_id.clone()))?;
        if !pool.is_leaf() {
            return Err(ResmgrError::NotLeaf(leaf_id.clone()));
        }
        pool.queue_mut().enqueue(gang);
        drop(state);
        self.updated.notify_one();
        Ok(())
    }

    /// Dequeues up to `limit` admissible gangs from one leaf, committing
    /// each admitted gang's allocation atomically with its removal.
    ///
    /// Scanning stops at the first gang that fails admission (strict
    /// priority-FIFO: a blocked head blocks the line); the blocker is
    /// reported so the caller can decide on preemption.
    pub fn dequeue_gangs(
        &self,
        leaf_id: &RespoolId,
        limit: usize,
        task_type: Option<TaskType>,
    ) -> Result<(Vec<Gang>, Option<BlockedGang>), ResmgrError> {
        let mut state = self.write();
        let pool = state
            .pools
            .get_mut(leaf_id)
            .ok_or_else(|| ResmgrError::PoolNotFound(leaf_id.clone()))?;
        if !pool.is_leaf() {
            return Err(ResmgrError::NotLeaf(leaf_id.clone()));
        }

        let mut admitted = Vec::new();
        let mut blocked = None;
        while admitted.len() < limit {
            let Some(head) = pool.queue().peek(task_type) else {
                break;
            };
            match pool.try_admit(head) {
                Ok(()) => {
                    let gang = pool
                        .queue_mut()
                        .dequeue(task_type)
                        .ok_or_else(|| ResmgrError::Internal("peeked gang vanished".into()))?;
                    pool.add_allocation(&gang.allocation());
                    admitted.push(gang);
                }
                Err(block) => {
                    blocked = Some(BlockedGang {
                        priority: head.priority,
                        resources: head.resources(),
                        block,
                    });
                    break;
                }
            }
        }
        drop(state);

        if !admitted.is_empty() {
            self.updated.notify_one();
        }
        Ok((admitted, blocked))
    }

    /// Returns gangs placement could not serve: releases their allocation
    /// and re-enqueues them at the head of their priority band, preserving
    /// their relative order.
    pub fn return_gangs(&self, leaf_id: &RespoolId, gangs: Vec<Gang>) -> Result<(), ResmgrError> {
        let mut state = self.write();
        let pool = state
            .pools
            .get_mut(leaf_id)
            .ok_or_else(|| ResmgrError::PoolNotFound(leaf_id.clone()))?;
        for gang in gangs.iter().rev() {
            pool.subtract_allocation(&gang.allocation());
            pool.queue_mut().enqueue_at_head(gang.clone());
        }
        drop(state);
        self.updated.notify_one();
        Ok(())
    }

    /// Releases allocation held by tasks that reached a terminal state.
    pub fn release_allocation(
        &self,
        leaf_id: &RespoolId,
        alloc: &Allocation,
    ) -> Result<(), ResmgrError> {
        let mut state = self.write();
        let pool = state
            .pools
            .get_mut(leaf_id)
            .ok_or_else(|| ResmgrError::PoolNotFound(leaf_id.clone()))?;
        pool.subtract_allocation(alloc);
        drop(state);
        self.updated.notify_one();
        Ok(())
    }

    /// Snapshot of the whole tree for the entitlement calculator.
    pub fn calc_snapshot(&self) -> Vec<PoolSnapshot> {
        let state = self.read();
        state.pools.values().map(snapshot).collect()
    }

    /// Publishes computed entitlements. Ids no longer present are ignored.
    pub fn set_entitlements(&self, entitlements: HashMap<RespoolId, Resources>) {
        let mut state = self.write();
        for (id, entitlement) in entitlements {
            if let Some(pool) = state.pools.get_mut(&id) {
                pool.set_entitlement(entitlement);
            }
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, TreeState> {
        self.state.read().expect("tree lock poisoned")
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, TreeState> {
        self.state.write().expect("tree lock poisoned")
    }
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

fn snapshot(pool: &ResPool) -> PoolSnapshot {
    PoolSnapshot {
        id: pool.id().clone(),
        path: pool.path().to_string(),
        config: pool.config().clone(),
        children: pool.children().to_vec(),
        is_leaf: pool.is_leaf(),
        reservation: *pool.reservation(),
        limit: *pool.limit(),
        share: *pool.share(),
        entitlement: *pool.entitlement(),
        allocation: *pool.allocation(),
        demand: pool.demand(),
        queue_len: pool.queue().len(),
    }
}

/// Drops configs whose parent chain does not terminate at the root.
fn prune_unrooted(
    configs: HashMap<RespoolId, RespoolConfig>,
) -> HashMap<RespoolId, RespoolConfig> {
    let mut accepted = HashMap::new();
    'outer: for (id, config) in &configs {
        let mut seen = HashSet::new();
        let mut cursor = id.clone();
        loop {
            if cursor.is_root() {
                break;
            }
            if !seen.insert(cursor.clone()) {
                error!(respool_id = %id, "resource pool config closes a cycle, skipping");
                continue 'outer;
            }
            let Some(parent) = configs.get(&cursor).and_then(|c| c.parent.clone()) else {
                error!(respool_id = %id, "resource pool config does not reach root, skipping");
                continue 'outer;
            };
            cursor = parent;
        }
        accepted.insert(id.clone(), config.clone());
    }
    accepted
}

/// Builds pools from validated configs, parents before children.
fn build_tree(pools: &mut HashMap<RespoolId, ResPool>, configs: &HashMap<RespoolId, RespoolConfig>) {
    let root_config = configs
        .get(&RespoolId::root())
        .cloned()
        .unwrap_or_else(RespoolConfig::root);
    pools.insert(
        RespoolId::root(),
        ResPool::new(RespoolId::root(), None, root_config),
    );

    // Child ids attach in sorted order so sibling order is deterministic.
    let mut pending: Vec<(&RespoolId, &RespoolConfig)> = configs
        .iter()
        .filter(|(id, _)| !id.is_root())
        .collect();
    pending.sort_by(|a, b| a.0.cmp(b.0));

    let mut progress = true;
    while progress && !pending.is_empty() {
        progress = false;
        let mut remaining = Vec::new();
        for (id, config) in pending {
            let parent_id = match &config.parent {
                Some(p) => p.clone(),
                None => {
                    warn!(respool_id = %id, "non-root pool without parent, skipping");
                    continue;
                }
            };
            if let Some(parent) = pools.get(&parent_id) {
                let parent_path = parent.path().to_string();
                let pool = ResPool::new(id.clone(), Some(&parent_path), config.clone());
                pools.insert(id.clone(), pool);
                if let Some(parent) = pools.get_mut(&parent_id) {
                    parent.add_child(id.clone());
                }
                progress = true;
            } else {
                remaining.push((id, config));
            }
        }
        pending = remaining;
    }

    for (id, _) in pending {
        error!(respool_id = %id, "resource pool parent never materialized, skipping");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use armada_api::respool::{ResourceQuota, SchedulingPolicy};
    use armada_api::sched::{SchedTask, TaskType};
    use armada_id::{JobId, TaskId};
    use armada_scalar::ResourceKind;
    use armada_storage::InMemoryDriver;
    use std::sync::Arc;

    fn pool_config(name: &str, parent: &RespoolId) -> RespoolConfig {
        RespoolConfig {
            name: name.into(),
            parent: Some(parent.clone()),
            resources: vec![ResourceQuota {
                kind: ResourceKind::Cpu,
                reservation: 10.0,
                limit: 100.0,
                share: 1.0,
            }],
            policy: SchedulingPolicy::PriorityFifo,
            controller_limit: 1.0,
        }
    }

    async fn started_tree() -> Tree {
        let store = RespoolStore::new(Arc::new(InMemoryDriver::new()));
        let tree = Tree::new();
        tree.start(&store).await.unwrap();
        tree
    }

    fn gang(priority: u32, cpu: f64) -> Gang {
        Gang::single(SchedTask {
            task_id: TaskId::new(JobId::new(), 0),
            task_type: TaskType::Batch,
            resource: Resources::new(cpu, 0.0, 0.0, 0.0),
            priority,
            preemptible: true,
            controller: false,
            volume_id: None,
            desired_host: None,
        })
    }

    #[tokio::test]
    async fn upsert_then_get_by_path() {
        let tree = started_tree().await;
        let infra = RespoolId::parse("infra").unwrap();
        let batch = RespoolId::parse("infra-batch").unwrap();
        tree.upsert(infra.clone(), pool_config("infra", &RespoolId::root()))
            .unwrap();
        tree.upsert(batch.clone(), pool_config("batch", &infra))
            .unwrap();

        assert_eq!(tree.get_by_path("/").unwrap().id, RespoolId::root());
        let found = tree.get_by_path("/infra/batch").unwrap();
        assert_eq!(found.id, batch);
        assert_eq!(found.path, "/infra/batch");
        assert_eq!(found.config, pool_config("batch", &infra));
        assert!(matches!(
            tree.get_by_path("/infra/missing").unwrap_err(),
            ResmgrError::PathNotFound(_)
        ));
    }

    #[tokio::test]
    async fn upsert_rejects_missing_parent() {
        let tree = started_tree().await;
        let err = tree
            .upsert(
                RespoolId::parse("orphan").unwrap(),
                pool_config("orphan", &RespoolId::parse("ghost").unwrap()),
            )
            .unwrap_err();
        assert!(matches!(err, ResmgrError::ParentMissing(_)));
    }

    #[tokio::test]
    async fn delete_rejects_children_and_gangs() {
        let tree = started_tree().await;
        let a = RespoolId::parse("a").unwrap();
        let b = RespoolId::parse("b").unwrap();
        tree.upsert(a.clone(), pool_config("a", &RespoolId::root()))
            .unwrap();
        tree.upsert(b.clone(), pool_config("b", &a)).unwrap();

        assert!(matches!(
            tree.delete(&a).unwrap_err(),
            ResmgrError::HasChildren(_)
        ));

        tree.enqueue_gang(&b, gang(1, 1.0)).unwrap();
        assert!(matches!(
            tree.delete(&b).unwrap_err(),
            ResmgrError::HasQueuedGangs(_)
        ));
    }

    #[tokio::test]
    async fn enqueue_rejects_non_leaf() {
        let tree = started_tree().await;
        let a = RespoolId::parse("a").unwrap();
        let b = RespoolId::parse("b").unwrap();
        tree.upsert(a.clone(), pool_config("a", &RespoolId::root()))
            .unwrap();
        tree.upsert(b, pool_config("b", &a)).unwrap();

        let err = tree.enqueue_gang(&a, gang(1, 1.0)).unwrap_err();
        assert!(matches!(err, ResmgrError::NotLeaf(_)));
    }

    #[tokio::test]
    async fn leaf_with_gangs_cannot_gain_children() {
        let tree = started_tree().await;
        let a = RespoolId::parse("a").unwrap();
        tree.upsert(a.clone(), pool_config("a", &RespoolId::root()))
            .unwrap();
        tree.enqueue_gang(&a, gang(1, 1.0)).unwrap();

        let err = tree
            .upsert(RespoolId::parse("child").unwrap(), pool_config("child", &a))
            .unwrap_err();
        assert!(matches!(err, ResmgrError::HasQueuedGangs(_)));
    }

    #[tokio::test]
    async fn dequeue_respects_priority_fifo_and_admission() {
        let tree = started_tree().await;
        let leaf = RespoolId::parse("leaf").unwrap();
        tree.upsert(leaf.clone(), pool_config("leaf", &RespoolId::root()))
            .unwrap();
        tree.set_entitlements(HashMap::from([(
            leaf.clone(),
            Resources::new(4.0, 8.0, 0.0, 0.0),
        )]));

        let a = gang(10, 1.0);
        let b = gang(5, 1.0);
        let c = gang(10, 1.0);
        tree.enqueue_gang(&leaf, a.clone()).unwrap();
        tree.enqueue_gang(&leaf, b.clone()).unwrap();
        tree.enqueue_gang(&leaf, c.clone()).unwrap();

        let (admitted, blocked) = tree.dequeue_gangs(&leaf, 3, None).unwrap();
        assert_eq!(admitted, vec![a, c, b]);
        assert!(blocked.is_none());
        assert_eq!(tree.get(&leaf).unwrap().allocation.total().cpu, 3.0);
    }

    #[tokio::test]
    async fn blocked_head_stops_the_line() {
        let tree = started_tree().await;
        let leaf = RespoolId::parse("leaf").unwrap();
        tree.upsert(leaf.clone(), pool_config("leaf", &RespoolId::root()))
            .unwrap();
        tree.set_entitlements(HashMap::from([(
            leaf.clone(),
            Resources::new(4.0, 8.0, 0.0, 0.0),
        )]));

        tree.enqueue_gang(&leaf, gang(10, 3.0)).unwrap();
        tree.enqueue_gang(&leaf, gang(9, 3.0)).unwrap();
        tree.enqueue_gang(&leaf, gang(8, 0.5)).unwrap();

        let (admitted, blocked) = tree.dequeue_gangs(&leaf, 3, None).unwrap();
        assert_eq!(admitted.len(), 1);
        let blocked = blocked.unwrap();
        assert_eq!(blocked.priority, 9);
        assert!(matches!(blocked.block, AdmissionBlock::WouldFit { .. }));
    }

    #[tokio::test]
    async fn returned_gangs_restore_allocation_and_order() {
        let tree = started_tree().await;
        let leaf = RespoolId::parse("leaf").unwrap();
        tree.upsert(leaf.clone(), pool_config("leaf", &RespoolId::root()))
            .unwrap();
        tree.set_entitlements(HashMap::from([(
            leaf.clone(),
            Resources::new(8.0, 8.0, 0.0, 0.0),
        )]));

        let a = gang(5, 1.0);
        let b = gang(5, 2.0);
        tree.enqueue_gang(&leaf, a.clone()).unwrap();
        tree.enqueue_gang(&leaf, b.clone()).unwrap();

        let (admitted, _) = tree.dequeue_gangs(&leaf, 2, None).unwrap();
        assert_eq!(admitted.len(), 2);
        assert_eq!(tree.get(&leaf).unwrap().allocation.total().cpu, 3.0);

        tree.return_gangs(&leaf, admitted).unwrap();
        assert_eq!(tree.get(&leaf).unwrap().allocation.total().cpu, 0.0);

        // round-trip preserves FIFO order
        let (again, _) = tree.dequeue_gangs(&leaf, 2, None).unwrap();
        assert_eq!(again, vec![a, b]);
    }

    #[tokio::test]
    async fn start_skips_unrooted_configs() {
        let driver = Arc::new(InMemoryDriver::new());
        let store = RespoolStore::new(driver);
        let good = RespoolId::parse("good").unwrap();
        let orphan = RespoolId::parse("orphan").unwrap();
        store
            .upsert(&good, &pool_config("good", &RespoolId::root()))
            .await
            .unwrap();
        store
            .upsert(
                &orphan,
                &pool_config("orphan", &RespoolId::parse("ghost").unwrap()),
            )
            .await
            .unwrap();

        let tree = Tree::new();
        tree.start(&store).await.unwrap();
        assert!(tree.get(&good).is_ok());
        assert!(tree.get(&orphan).is_err());
    }

    #[tokio::test]
    async fn stop_clears_state() {
        let tree = started_tree().await;
        tree.stop();
        assert!(matches!(
            tree.get_by_path("/").unwrap_err(),
            ResmgrError::NotStarted
        ));
    }
}
