//! Wiring of the full control plane.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::info;

use armada_api::job::{JobConfig, JobState, JobType, SlaConfig};
use armada_api::respool::{RespoolConfig, ResourceQuota, SchedulingPolicy};
use armada_api::task::TaskConfig;
use armada_eventstream::{Client, Handler};
use armada_id::{JobId, RespoolId};
use armada_jobmgr::lifecycle::LifecycleManager;
use armada_jobmgr::lockstate::LockState;
use armada_jobmgr::{JobManager, JobmgrConfig};
use armada_placement::Engine;
use armada_resmgr::entitlement::Calculator;
use armada_resmgr::service::AllocationReleaser;
use armada_resmgr::tracker::Tracker;
use armada_resmgr::{ResmgrConfig, ResourceManager, Tree};
use armada_scalar::{ResourceKind, Resources};
use armada_storage::{InMemoryDriver, JobStore, RespoolStore};

use crate::sim::SimHostManager;

/// Event stream clients allowed on the in-process bus.
const EVENT_CLIENTS: &[&str] = &["jobmgr", "resmgr"];

/// Minicluster sizing.
#[derive(Debug, Clone)]
pub struct MiniclusterConfig {
    pub hosts: usize,
    pub host_capacity: Resources,
    /// Simulated pod run time before it succeeds.
    pub task_run_time: Duration,
}

impl Default for MiniclusterConfig {
    fn default() -> Self {
        Self {
            hosts: 3,
            host_capacity: Resources::new(8.0, 16384.0, 65536.0, 0.0),
            task_run_time: Duration::from_secs(1),
        }
    }
}

impl MiniclusterConfig {
    /// Loads sizing from `ARMADA_MINICLUSTER_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(hosts) = env_u64("ARMADA_MINICLUSTER_HOSTS") {
            config.hosts = hosts as usize;
        }
        if let Some(ms) = env_u64("ARMADA_MINICLUSTER_TASK_RUN_TIME_MS") {
            config.task_run_time = Duration::from_millis(ms);
        }
        config
    }
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

/// The assembled control plane.
pub struct Minicluster {
    pub resmgr: Arc<ResourceManager>,
    pub jobmgr: Arc<JobManager>,
    pub hostmgr: Arc<SimHostManager>,
    pub events: Arc<Handler>,
    job_store: JobStore,
    batch_pool: RespoolId,
    service_pool: RespoolId,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl Minicluster {
    /// Brings up the whole control plane, in leadership order: storage,
    /// tree, recovery, then the background loops.
    pub async fn start(config: MiniclusterConfig) -> anyhow::Result<Self> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let driver = Arc::new(InMemoryDriver::new());
        let events = Arc::new(Handler::new(4096, EVENT_CLIENTS));

        let hostmgr = Arc::new(SimHostManager::new(
            config.hosts,
            config.host_capacity,
            events.clone(),
            config.task_run_time,
        ));

        // resource manager: tree first, pools next
        let tree = Arc::new(Tree::new());
        let respool_store = RespoolStore::new(driver.clone());
        tree.start(&respool_store).await?;

        let capacity = hostmgr.total_capacity();
        tree.upsert(RespoolId::root(), root_config(&capacity))?;
        let batch_pool = RespoolId::parse("batch").expect("static pool id");
        let service_pool = RespoolId::parse("service").expect("static pool id");
        tree.upsert(batch_pool.clone(), leaf_config("batch", &capacity, 1.0))?;
        tree.upsert(service_pool.clone(), leaf_config("service", &capacity, 2.0))?;

        let tracker = Arc::new(Tracker::new());
        let resmgr = Arc::new(ResourceManager::new(
            tree.clone(),
            tracker.clone(),
            ResmgrConfig::default(),
        ));

        let mut tasks = Vec::new();

        let calculator = Calculator::new(tree.clone(), ResmgrConfig::default());
        calculator.recompute();
        let calc_shutdown = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            calculator.run(calc_shutdown).await;
        }));

        let releaser_client = Client::new(
            "resmgr",
            events.clone(),
            AllocationReleaser::new(tree.clone(), tracker.clone()),
        );
        let releaser_shutdown = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            releaser_client.run(releaser_shutdown).await;
        }));

        // placement engine
        let engine = Engine::new(resmgr.clone(), hostmgr.clone());
        let engine_shutdown = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            engine.run(engine_shutdown).await;
        }));

        // job manager: recover (trivially empty on a fresh store), then run
        let jobmgr_config = JobmgrConfig::default();
        let lifecycle = LifecycleManager::new(
            hostmgr.clone(),
            Arc::new(LockState::new()),
            None,
            None,
            jobmgr_config.hostmgr_timeout,
        );
        let jobmgr = Arc::new(JobManager::new(
            jobmgr_config,
            driver.clone(),
            resmgr.clone(),
            lifecycle,
            events.clone(),
        ));
        jobmgr.recover(&shutdown_rx).await?;
        let jobmgr_runner = jobmgr.clone();
        let jobmgr_shutdown = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            jobmgr_runner.run(jobmgr_shutdown).await;
        }));

        info!(
            hosts = config.hosts,
            capacity = %capacity,
            "minicluster up"
        );

        Ok(Self {
            resmgr,
            jobmgr,
            hostmgr,
            events,
            job_store: JobStore::new(driver),
            batch_pool,
            service_pool,
            shutdown_tx,
            tasks,
        })
    }

    /// Submits a batch job of `instances` identical tasks.
    pub async fn submit_batch_job(
        &self,
        name: &str,
        instances: u32,
        resource: Resources,
    ) -> anyhow::Result<JobId> {
        let config = JobConfig {
            name: name.into(),
            job_type: JobType::Batch,
            instance_count: instances,
            sla: SlaConfig::default(),
            respool_id: self.batch_pool.clone(),
            default_task: TaskConfig::with_resource(name, resource),
            config_version: 1,
        };
        Ok(self.jobmgr.create_job(config).await?)
    }

    /// Submits a service job of `instances` long-running tasks.
    pub async fn submit_service_job(
        &self,
        name: &str,
        instances: u32,
        resource: Resources,
    ) -> anyhow::Result<JobId> {
        let config = JobConfig {
            name: name.into(),
            job_type: JobType::Service,
            instance_count: instances,
            sla: SlaConfig {
                priority: 10,
                ..SlaConfig::default()
            },
            respool_id: self.service_pool.clone(),
            default_task: TaskConfig::with_resource(name, resource),
            config_version: 1,
        };
        Ok(self.jobmgr.create_job(config).await?)
    }

    /// Waits until the job's persisted state matches `target`.
    pub async fn await_job_state(
        &self,
        job_id: &JobId,
        target: JobState,
        timeout: Duration,
    ) -> anyhow::Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let runtime = self.job_store.get_job_runtime(job_id).await?;
            if runtime.state == target {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                anyhow::bail!(
                    "job {job_id} is {} after {timeout:?}, wanted {target}",
                    runtime.state
                );
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Requests a job kill.
    pub async fn kill_job(&self, job_id: &JobId) -> anyhow::Result<()> {
        Ok(self.jobmgr.kill_job(job_id).await?)
    }

    /// Stops every loop and waits for them to exit.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks {
            let _ = task.await;
        }
        info!("minicluster stopped");
    }
}

fn root_config(capacity: &Resources) -> RespoolConfig {
    RespoolConfig {
        name: RespoolId::ROOT_NAME.to_string(),
        parent: None,
        resources: quotas(capacity, capacity, 1.0),
        policy: SchedulingPolicy::PriorityFifo,
        controller_limit: 1.0,
    }
}

fn leaf_config(name: &str, capacity: &Resources, share: f64) -> RespoolConfig {
    RespoolConfig {
        name: name.into(),
        parent: Some(RespoolId::root()),
        // no reservation: leaves compete for the whole cluster by share
        resources: quotas(&Resources::ZERO, capacity, share),
        policy: SchedulingPolicy::PriorityFifo,
        controller_limit: 1.0,
    }
}

fn quotas(reservation: &Resources, limit: &Resources, share: f64) -> Vec<ResourceQuota> {
    ResourceKind::ALL
        .iter()
        .map(|&kind| ResourceQuota {
            kind,
            reservation: reservation.get(kind),
            limit: limit.get(kind),
            share,
        })
        .collect()
}
