//! Combined API + worker binary.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use wod_api::{create_router, ApiConfig, AppState};
use wod_gemini::{GeminiConfig, GeminiFactory};
use wod_queue::JobQueue;
use wod_server::{ServerConfig, Supervisor};
use wod_store::{DbConfig, PgResultStore};
use wod_worker::{init_tracing, shutdown_signal, AnalysisHandler, TaskExecutor, WorkerConfig};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    init_tracing();

    if let Err(e) = run().await {
        error!("Server failed: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    // Install rustls crypto provider (required for TLS/HTTPS)
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    info!("Starting wod-server");

    let server_config = ServerConfig::from_env();
    let api_config = ApiConfig::from_env();
    let worker_config = WorkerConfig::from_env()?;
    if worker_config.metrics_port.is_some() {
        warn!("WORKER_METRICS_PORT is ignored; worker metrics are served on /metrics");
    }

    // One queue handle and one pool serve both sides
    let queue = Arc::new(JobQueue::from_env().context("Failed to create task queue")?);

    let db_config = DbConfig::from_env()?;
    let pool = wod_store::connect(&db_config)
        .await
        .context("Failed to connect to database")?;
    wod_store::migrate(&pool)
        .await
        .context("Failed to run database migrations")?;
    let store = Arc::new(PgResultStore::new(pool));

    let metrics_handle =
        wod_api::metrics::init_metrics().context("Failed to install metrics recorder")?;

    let addr: SocketAddr = api_config
        .bind_address()
        .parse()
        .context("Invalid bind address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    let state = AppState::new(api_config, queue.clone(), store.clone());
    let app = create_router(state, Some(metrics_handle));

    let gemini = GeminiConfig::from_env();
    let handler = AnalysisHandler::new(
        GeminiFactory::new(gemini.clone()),
        store,
        worker_config.prompt.clone(),
    )
    .with_polling(gemini.poll_interval, gemini.max_processing_wait);
    let executor = TaskExecutor::new(worker_config, queue, handler);

    let shutdown = CancellationToken::new();
    let mut supervisor = Supervisor::new(shutdown.clone(), server_config.shutdown_grace);

    let http_shutdown = supervisor.token();
    supervisor.spawn("http", async move {
        info!("Listening on {}", addr);
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { http_shutdown.cancelled().await })
            .await
            .context("HTTP server error")
    });

    let worker_shutdown = supervisor.token();
    supervisor.spawn("worker", async move {
        executor
            .run(worker_shutdown)
            .await
            .context("Worker pool error")
    });

    tokio::spawn(async move {
        shutdown_signal().await;
        shutdown.cancel();
    });

    supervisor.wait().await?;
    info!("Server shutdown complete");
    Ok(())
}
