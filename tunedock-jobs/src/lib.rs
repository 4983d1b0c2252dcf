//! tunedock-jobs library interface
//!
//! Exposes the application state, router construction, and the pipeline
//! internals for integration testing.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod providers;
pub mod services;
pub mod workers;

pub use crate::error::{ApiError, ApiResult};

use axum::{routing::get, Router};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use tunedock_common::events::EventBus;

use crate::config::JobsSettings;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool (job store, queues, track rows)
    pub db: SqlitePool,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    /// Resolved service settings
    pub settings: Arc<JobsSettings>,
    /// Service startup timestamp for uptime reporting
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(db: SqlitePool, event_bus: EventBus, settings: Arc<JobsSettings>) -> Self {
        Self {
            db,
            event_bus,
            settings,
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::job_routes())
        .route("/api/jobs/events", get(api::global_event_stream))
        .route("/api/jobs/:job_id/events", get(api::job_event_stream))
        .merge(api::health_routes())
        .with_state(state)
}
