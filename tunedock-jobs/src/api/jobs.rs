//! Job API handlers
//!
//! The boundary the UI calls to submit work and observe status. Submission
//! never blocks on execution: the record and queue reference are persisted
//! and a job_id comes straight back.

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tunedock_common::events::JobEvent;
use uuid::Uuid;

use crate::db::jobs::JobSummary;
use crate::db::{jobs, queue};
use crate::error::{ApiError, ApiResult};
use crate::models::{JobPriority, JobRecord, JobStatus, Provider, SourceCandidate};
use crate::workers::submit_job;
use crate::AppState;

/// POST /api/jobs/download request
#[derive(Debug, Deserialize)]
pub struct SubmitDownloadRequest {
    pub track_id: String,
    pub owner_id: i64,
    /// Candidate sources in fallback order; at least one required
    pub sources: Vec<SourceCandidate>,
    pub preferred_provider: Option<Provider>,
    #[serde(default)]
    pub priority: JobPriority,
}

/// POST /api/jobs/download response
#[derive(Debug, Serialize)]
pub struct SubmitJobResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// GET /api/jobs response
#[derive(Debug, Serialize)]
pub struct JobListResponse {
    pub jobs: Vec<JobRecord>,
    pub summary: JobSummary,
}

/// DELETE /api/jobs response
#[derive(Debug, Serialize)]
pub struct ClearJobsResponse {
    pub jobs_dropped: u64,
    pub references_dropped: u64,
}

/// POST /api/jobs/download
///
/// Create and enqueue a download job for a track. Returns the job_id
/// immediately; progress is observed via the status and event endpoints.
pub async fn submit_download(
    State(state): State<AppState>,
    Json(request): Json<SubmitDownloadRequest>,
) -> ApiResult<Json<SubmitJobResponse>> {
    if request.track_id.trim().is_empty() {
        return Err(ApiError::BadRequest("track_id is required".to_string()));
    }
    if request.sources.is_empty() {
        return Err(ApiError::BadRequest(
            "at least one candidate source is required".to_string(),
        ));
    }

    let job = JobRecord::new_download(
        request.track_id,
        request.owner_id,
        request.sources,
        request.preferred_provider,
    );

    submit_job(&state.db, &state.event_bus, &job, request.priority).await?;

    Ok(Json(SubmitJobResponse {
        job_id: job.job_id,
        status: job.status,
        created_at: job.created_at,
    }))
}

/// GET /api/jobs/{job_id}
///
/// Current record for one job, or a distinct not-found error, never
/// confused with "still queued".
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Json<JobRecord>> {
    let job = jobs::get_job(&state.db, job_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Job not found: {}", job_id)))?;

    Ok(Json(job))
}

/// GET /api/jobs
///
/// All records (most recently updated first) plus the status summary.
pub async fn list_jobs(State(state): State<AppState>) -> ApiResult<Json<JobListResponse>> {
    let mut jobs = jobs::list_jobs(&state.db).await?;
    jobs.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));

    let summary = jobs::summary(&state.db).await?;

    Ok(Json(JobListResponse { jobs, summary }))
}

/// DELETE /api/jobs
///
/// Administrative reset: drops every job record and queued reference. A
/// worker that is mid-execution will finish quietly against the now-empty
/// store.
pub async fn clear_jobs(State(state): State<AppState>) -> ApiResult<Json<ClearJobsResponse>> {
    let references_dropped = queue::clear_queue(&state.db).await?;
    let jobs_dropped = jobs::clear_jobs(&state.db).await?;

    tracing::info!(jobs_dropped, references_dropped, "All jobs cleared");

    state.event_bus.emit_lossy(JobEvent::QueueCleared {
        jobs_dropped,
        timestamp: Utc::now(),
    });

    Ok(Json(ClearJobsResponse {
        jobs_dropped,
        references_dropped,
    }))
}

/// Build job API routes
pub fn job_routes() -> Router<AppState> {
    Router::new()
        .route("/api/jobs/download", post(submit_download))
        .route("/api/jobs", get(list_jobs).delete(clear_jobs))
        .route("/api/jobs/:job_id", get(get_job_status))
}
