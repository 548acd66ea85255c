//! End-to-end placement loop: resource manager in, placements out.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use armada_api::clients::{HostManagerClient, ResourceManagerClient};
use armada_api::respool::{RespoolConfig, ResourceQuota, SchedulingPolicy};
use armada_api::sched::{Gang, HostFilter, HostOffer, LaunchablePod, SchedTask, TaskType};
use armada_api::Error;
use armada_id::{AgentId, HostOfferId, JobId, PodId, RespoolId, TaskId};
use armada_placement::{Engine, PlacementConfig};
use armada_resmgr::{ResmgrConfig, ResourceManager, Tree};
use armada_resmgr::tracker::Tracker;
use armada_scalar::{ResourceKind, Resources};
use armada_storage::{InMemoryDriver, RespoolStore};

/// Host manager stub offering a fixed fleet.
struct StubHostManager {
    hosts: Vec<(String, Resources)>,
    launched: Mutex<Vec<PodId>>,
}

#[async_trait]
impl HostManagerClient for StubHostManager {
    async fn acquire_host_offers(&self, filter: HostFilter) -> Result<Vec<HostOffer>, Error> {
        let offers = self
            .hosts
            .iter()
            .filter(|(_, resources)| filter.minimum.less_than_or_equal(resources))
            .take(filter.max_hosts.max(1) as usize)
            .map(|(hostname, resources)| HostOffer {
                lease_id: HostOfferId::new(),
                hostname: hostname.clone(),
                agent_id: AgentId::new(),
                resources: *resources,
                expires_at: chrono::Utc::now() + chrono::Duration::minutes(1),
            })
            .collect();
        Ok(offers)
    }

    async fn release_host_offers(&self, _offers: Vec<HostOffer>) -> Result<(), Error> {
        Ok(())
    }

    async fn launch_pods(
        &self,
        _lease_id: HostOfferId,
        _hostname: String,
        pods: Vec<LaunchablePod>,
    ) -> Result<(), Error> {
        self.launched
            .lock()
            .unwrap()
            .extend(pods.into_iter().map(|p| p.pod_id));
        Ok(())
    }

    async fn kill_pods(&self, _pod_ids: Vec<PodId>) -> Result<(), Error> {
        Ok(())
    }
}

async fn resmgr_with_leaf(leaf: &RespoolId) -> Arc<ResourceManager> {
    let store = RespoolStore::new(Arc::new(InMemoryDriver::new()));
    let tree = Arc::new(Tree::new());
    tree.start(&store).await.unwrap();
    tree.upsert(
        leaf.clone(),
        RespoolConfig {
            name: leaf.as_str().into(),
            parent: Some(RespoolId::root()),
            resources: vec![ResourceQuota {
                kind: ResourceKind::Cpu,
                reservation: 16.0,
                limit: 64.0,
                share: 1.0,
            }],
            policy: SchedulingPolicy::PriorityFifo,
            controller_limit: 1.0,
        },
    )
    .unwrap();
    tree.set_entitlements(HashMap::from([(
        leaf.clone(),
        Resources::new(16.0, 16384.0, 0.0, 0.0),
    )]));
    Arc::new(ResourceManager::new(
        tree,
        Arc::new(Tracker::new()),
        ResmgrConfig::default(),
    ))
}

fn batch_gang(job: JobId, instances: std::ops::Range<u32>, cpu: f64) -> Gang {
    let tasks: Vec<SchedTask> = instances
        .map(|i| SchedTask {
            task_id: TaskId::new(job, i),
            task_type: TaskType::Batch,
            resource: Resources::new(cpu, 128.0, 0.0, 0.0),
            priority: 1,
            preemptible: true,
            controller: false,
            volume_id: None,
            desired_host: None,
        })
        .collect();
    Gang::new(tasks, 1)
}

fn quick_config() -> PlacementConfig {
    PlacementConfig {
        dequeue_batch_size: 10,
        dequeue_timeout: Duration::from_millis(50),
        max_rounds: 4,
        max_duration: Duration::from_secs(5),
        max_offers_per_round: 10,
    }
}

#[tokio::test]
async fn gang_flows_from_queue_to_placement() {
    let leaf = RespoolId::parse("batch").unwrap();
    let resmgr = resmgr_with_leaf(&leaf).await;
    let hostmgr = Arc::new(StubHostManager {
        hosts: vec![
            ("host-1".into(), Resources::new(8.0, 8192.0, 0.0, 0.0)),
            ("host-2".into(), Resources::new(8.0, 8192.0, 0.0, 0.0)),
        ],
        launched: Mutex::new(Vec::new()),
    });

    let job = JobId::new();
    let gang = batch_gang(job, 0..3, 1.0);
    resmgr
        .enqueue_gangs(Some(leaf.clone()), vec![gang], "")
        .await
        .unwrap();

    let engine = Engine::new(resmgr.clone(), hostmgr);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let resmgr_for_loop = resmgr.clone();
    let loop_handle = tokio::spawn(async move {
        let engine = engine;
        engine
            .run_loop(TaskType::Batch, quick_config(), shutdown_rx)
            .await;
        drop(resmgr_for_loop);
    });

    let placements = resmgr
        .get_placements(10, Duration::from_secs(2))
        .await
        .unwrap();
    shutdown_tx.send(true).unwrap();
    let _ = loop_handle.await;

    let placed_tasks: usize = placements.iter().map(|p| p.task_ids.len()).sum();
    assert_eq!(placed_tasks, 3, "all gang members are placed");
    for placement in &placements {
        assert!(placement.hostname.starts_with("host-"));
    }
    // allocation is held while the gang is placed
    let snapshot = resmgr.tree().get(&leaf).unwrap();
    assert!((snapshot.allocation.total().cpu - 3.0).abs() < 1e-9);
}

#[tokio::test]
async fn unplaceable_gang_is_returned() {
    let leaf = RespoolId::parse("batch").unwrap();
    let resmgr = resmgr_with_leaf(&leaf).await;
    // fleet too small for any task
    let hostmgr = Arc::new(StubHostManager {
        hosts: vec![("tiny".into(), Resources::new(0.5, 64.0, 0.0, 0.0))],
        launched: Mutex::new(Vec::new()),
    });

    let job = JobId::new();
    resmgr
        .enqueue_gangs(Some(leaf.clone()), vec![batch_gang(job, 0..1, 4.0)], "")
        .await
        .unwrap();

    let engine = Engine::new(resmgr.clone(), hostmgr);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let loop_handle = tokio::spawn({
        let resmgr = resmgr.clone();
        async move {
            let engine = engine;
            engine
                .run_loop(TaskType::Batch, quick_config(), shutdown_rx)
                .await;
            drop(resmgr);
        }
    });

    // after max_rounds the gang is back in the queue with no allocation
    tokio::time::sleep(Duration::from_millis(600)).await;
    shutdown_tx.send(true).unwrap();
    let _ = loop_handle.await;

    let snapshot = resmgr.tree().get(&leaf).unwrap();
    assert_eq!(snapshot.queue_len, 1);
    assert!(snapshot.allocation.total().cpu.abs() < 1e-9);
}
