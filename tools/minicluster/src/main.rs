//! Armada minicluster demo.
//!
//! Brings up the whole scheduling core in one process against a simulated
//! host fleet, runs a batch job to completion, keeps a service job running,
//! then kills it and shuts down.

use std::time::Duration;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use armada_api::job::JobState;
use armada_minicluster::{Minicluster, MiniclusterConfig};
use armada_scalar::Resources;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting armada minicluster");
    let config = MiniclusterConfig::from_env();
    let cluster = Minicluster::start(config).await?;

    let task_resource = Resources::new(1.0, 512.0, 1024.0, 0.0);

    let batch = cluster
        .submit_batch_job("demo-batch", 3, task_resource)
        .await?;
    info!(job_id = %batch, "batch job submitted");
    cluster
        .await_job_state(&batch, JobState::Succeeded, Duration::from_secs(60))
        .await?;
    info!(job_id = %batch, "batch job succeeded");

    let service = cluster
        .submit_service_job("demo-service", 2, task_resource)
        .await?;
    info!(job_id = %service, "service job submitted");
    cluster
        .await_job_state(&service, JobState::Running, Duration::from_secs(60))
        .await?;
    info!(job_id = %service, "service job running, requesting kill");

    cluster.kill_job(&service).await?;
    cluster
        .await_job_state(&service, JobState::Killed, Duration::from_secs(60))
        .await?;
    info!(job_id = %service, "service job killed");

    cluster.stop().await;
    info!("minicluster demo complete");
    Ok(())
}
