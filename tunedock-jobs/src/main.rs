//! tunedock-jobs - Track Processing Service
//!
//! Fetches audio for catalog tracks from external sources, runs feature
//! analysis, and streams job progress to the UI over SSE. Job state lives
//! in SQLite; worker pools execute the queued work without blocking the
//! request/response cycle.

use anyhow::Result;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tunedock_common::events::EventBus;

use tunedock_jobs::workers::{pool, recovery, WorkerContext};
use tunedock_jobs::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting tunedock-jobs (Track Processing) service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    // Step 1: Resolve and prepare the storage root
    let cli_root = std::env::args().nth(1);
    let root = tunedock_common::config::resolve_storage_root(cli_root.as_deref());
    tunedock_common::config::ensure_storage_root(&root)
        .map_err(|e| anyhow::anyhow!("Failed to initialize storage root: {}", e))?;
    info!("Storage root: {}", root.display());

    // Step 2: Resolve settings (ENV → TOML → defaults)
    let settings = Arc::new(tunedock_jobs::config::load_settings(root.clone()));

    // Step 3: Open or create the database
    let db_path = tunedock_common::config::database_path(&root);
    info!("Database: {}", db_path.display());
    let db = tunedock_jobs::db::init_database_pool(&db_path).await?;

    // Step 4: Requeue anything a previous run left stranded, before any
    // worker can race the reconciliation
    let recovered = recovery::reconcile_startup(&db)
        .await
        .map_err(|e| anyhow::anyhow!("Startup reconciliation failed: {}", e))?;
    if recovered > 0 {
        info!(recovered, "Recovered jobs from previous run");
    }

    // Step 5: Event bus for SSE broadcasting
    let event_bus = EventBus::new(settings.event_bus_capacity);

    // Step 6: Worker pools and the claim sweeper
    let ctx = Arc::new(WorkerContext::production(
        db.clone(),
        event_bus.clone(),
        settings.clone(),
    ));
    let _workers = pool::spawn_worker_pools(ctx.clone());
    let _sweeper = recovery::spawn_claim_sweeper(ctx);

    // Step 7: HTTP server
    let state = AppState::new(db, event_bus, settings.clone());
    let app = tunedock_jobs::build_router(state);

    let addr = format!("127.0.0.1:{}", settings.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
