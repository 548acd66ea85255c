//! Full-stack convergence tests over the simulated fleet.

use std::time::Duration;

use armada_api::job::JobState;
use armada_minicluster::{Minicluster, MiniclusterConfig};
use armada_scalar::Resources;

fn quick_config() -> MiniclusterConfig {
    MiniclusterConfig {
        hosts: 3,
        host_capacity: Resources::new(8.0, 16384.0, 65536.0, 0.0),
        task_run_time: Duration::from_millis(300),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn batch_job_runs_to_succeeded() {
    let cluster = Minicluster::start(quick_config()).await.unwrap();

    let job = cluster
        .submit_batch_job("e2e-batch", 3, Resources::new(1.0, 256.0, 512.0, 0.0))
        .await
        .unwrap();
    cluster
        .await_job_state(&job, JobState::Succeeded, Duration::from_secs(30))
        .await
        .unwrap();

    cluster.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn service_job_runs_then_dies_on_kill() {
    let cluster = Minicluster::start(quick_config()).await.unwrap();

    let job = cluster
        .submit_service_job("e2e-service", 2, Resources::new(1.0, 256.0, 512.0, 0.0))
        .await
        .unwrap();
    cluster
        .await_job_state(&job, JobState::Running, Duration::from_secs(30))
        .await
        .unwrap();

    cluster.kill_job(&job).await.unwrap();
    cluster
        .await_job_state(&job, JobState::Killed, Duration::from_secs(30))
        .await
        .unwrap();

    cluster.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn two_jobs_share_the_fleet() {
    let cluster = Minicluster::start(quick_config()).await.unwrap();

    let batch = cluster
        .submit_batch_job("e2e-mixed-batch", 4, Resources::new(1.0, 256.0, 512.0, 0.0))
        .await
        .unwrap();
    let service = cluster
        .submit_service_job("e2e-mixed-service", 2, Resources::new(1.0, 256.0, 512.0, 0.0))
        .await
        .unwrap();

    cluster
        .await_job_state(&service, JobState::Running, Duration::from_secs(30))
        .await
        .unwrap();
    cluster
        .await_job_state(&batch, JobState::Succeeded, Duration::from_secs(30))
        .await
        .unwrap();

    cluster.kill_job(&service).await.unwrap();
    cluster
        .await_job_state(&service, JobState::Killed, Duration::from_secs(30))
        .await
        .unwrap();

    cluster.stop().await;
}
