//! Exercise video analysis worker binary.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use wod_gemini::{GeminiConfig, GeminiFactory};
use wod_queue::JobQueue;
use wod_store::{DbConfig, PgResultStore};
use wod_worker::{init_tracing, shutdown_signal, AnalysisHandler, TaskExecutor, WorkerConfig};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Worker failed: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    // Install rustls crypto provider (required for TLS/HTTPS)
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    dotenvy::dotenv().ok();
    init_tracing();

    info!("Starting wod-worker");

    let config = WorkerConfig::from_env()?;
    info!(
        concurrency = config.concurrency,
        shutdown_timeout = ?config.shutdown_timeout,
        "Worker config loaded"
    );

    if let Some(port) = config.metrics_port {
        wod_worker::metrics::init_metrics_listener(SocketAddr::from(([0, 0, 0, 0], port)))
            .context("Failed to start metrics listener")?;
        info!("Metrics available on port {}", port);
    }

    let queue = JobQueue::from_env().context("Failed to create task queue")?;

    let db_config = DbConfig::from_env()?;
    let pool = wod_store::connect(&db_config)
        .await
        .context("Failed to connect to database")?;
    let store = Arc::new(PgResultStore::new(pool));

    let gemini = GeminiConfig::from_env();
    let handler = AnalysisHandler::new(GeminiFactory::new(gemini.clone()), store, config.prompt.clone())
        .with_polling(gemini.poll_interval, gemini.max_processing_wait);
    let executor = TaskExecutor::new(config, Arc::new(queue), handler);

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal.cancel();
    });

    executor.run(shutdown).await?;

    info!("Worker shutdown complete");
    Ok(())
}
