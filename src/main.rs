use crate::kube_client::KubeClusterClient;
use crate::state::AppContext;
use anyhow::Context;
use std::env;
use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

mod aggregator;
mod cluster;
mod config;
mod diff;
mod fetcher;
mod image_reference;
mod kube_client;
mod prober;
mod refresh;
mod report;
mod state;
mod webserver;
mod workload;

#[cfg(target_env = "musl")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let log_level = env::var("LOG_LEVEL")
        .ok()
        .and_then(|level| level.parse::<tracing::Level>().ok())
        .unwrap_or(tracing::Level::INFO);
    tracing_subscriber::fmt().with_max_level(log_level).init();
    info!("Starting kdiff {}", env!("CARGO_PKG_VERSION"));

    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.yaml".to_string());
    let config = Arc::new(config::load_config_or_default(&config_path)?);

    let kube_client = Arc::new(
        KubeClusterClient::new(config.kubeconfig.clone())
            .await
            .context("Failed to load kubeconfig")?,
    );
    let ctx = AppContext::new(config.clone(), kube_client.clone(), kube_client);

    if let Err(e) = refresh::run(&ctx).await {
        error!("Initial refresh failed: {:?}", e);
    }

    info!(
        "Executing refresh at cron schedule {}",
        config.refresh_schedule
    );
    let mut scheduler = JobScheduler::new().await?;
    let job_ctx = ctx.clone();
    let job = Job::new_async(config.refresh_schedule.clone(), move |_uuid, _l| {
        let ctx = job_ctx.clone();
        Box::pin(async move {
            if let Err(e) = refresh::run(&ctx).await {
                error!("Error running refresh job: {:?}", e);
            }
        })
    })?;
    scheduler.add(job).await?;
    scheduler.start().await?;

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received Ctrl-C, shutting down");
            }
            shutdown.cancel();
        }
    });

    let app = webserver::create_app(ctx);
    let addr = std::net::SocketAddr::from(([127, 0, 0, 1], config.webserver.port));
    info!("Starting webserver on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;

    scheduler.shutdown().await?;
    Ok(())
}
