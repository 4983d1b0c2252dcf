//! Server-Sent Events for job progress streaming
//!
//! Two stream shapes: a global stream carrying every job completion (used
//! to refresh broad UI state), and a per-job stream that delivers progress
//! and the terminal event for one job, then closes.
//!
//! Events are pushed from the worker pools via the EventBus; the per-job
//! stream additionally reconciles against the job store every few seconds
//! so the terminal event is delivered at-least-once even if the broadcast
//! was missed.

use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::Stream;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use tunedock_common::events::JobEvent;
use uuid::Uuid;

use crate::db::jobs;
use crate::error::ApiError;
use crate::models::{JobRecord, JobStatus};
use crate::AppState;

/// How often a per-job stream re-reads the store as a delivery backstop
const RECONCILE_INTERVAL: Duration = Duration::from_secs(3);

fn sse_event(event: &JobEvent) -> Event {
    match serde_json::to_string(event) {
        Ok(json) => Event::default().event(event.event_type()).data(json),
        Err(e) => {
            warn!(event_type = event.event_type(), error = %e, "Failed to serialize event");
            Event::default().comment("serialization failure")
        }
    }
}

/// Synthesize the terminal event from a stored record
///
/// Used when a subscriber arrives after the fact, or when the broadcast
/// tick was missed and the reconciliation pass finds the job finished.
fn terminal_event_for(job: &JobRecord) -> Option<JobEvent> {
    match job.status {
        JobStatus::Completed => Some(JobEvent::JobCompleted {
            job_id: job.job_id,
            kind: job.kind,
            track_id: job.track_id.clone(),
            owner_id: job.owner_id,
            result: job.result.clone().unwrap_or(serde_json::Value::Null),
            timestamp: job.updated_at,
        }),
        JobStatus::Failed => Some(JobEvent::JobFailed {
            job_id: job.job_id,
            kind: job.kind,
            track_id: job.track_id.clone(),
            error: job
                .error
                .clone()
                .unwrap_or_else(|| "unknown error".to_string()),
            attempt_count: job.attempt_count,
            timestamp: job.updated_at,
        }),
        JobStatus::Queued | JobStatus::Processing => None,
    }
}

/// GET /api/jobs/events - global completion stream
///
/// Emits an event whenever any job transitions to completed. Runs until
/// the client disconnects.
pub async fn global_event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!("New SSE client connected to global job events");

    let mut rx = state.event_bus.subscribe();

    let stream = async_stream::stream! {
        yield Ok(Event::default().event("ConnectionStatus").data("connected"));

        loop {
            match rx.recv().await {
                Ok(event) => {
                    if matches!(event, JobEvent::JobCompleted { .. }) {
                        debug!("SSE: Broadcasting job completion");
                        yield Ok(sse_event(&event));
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    // Intermediate events are lossy by contract
                    warn!(skipped, "Global SSE subscriber lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("heartbeat"),
    )
}

/// GET /api/jobs/{job_id}/events - per-job progress stream
///
/// Emits progress and lifecycle events for one job and closes after the
/// terminal event. A job that is already finished at subscribe time gets
/// its terminal event immediately; a subscriber never hangs on a done
/// job. The stream also closes on the idle timeout.
pub async fn job_event_stream(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    // Subscribe before the snapshot so no event can fall in the gap
    let mut rx = state.event_bus.subscribe();

    let job = jobs::get_job(&state.db, job_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Job not found: {}", job_id)))?;

    info!(job_id = %job_id, status = ?job.status, "New SSE client connected to job events");

    let idle_timeout = Duration::from_secs(state.settings.sse_idle_timeout_secs);
    let db = state.db.clone();

    let stream = async_stream::stream! {
        yield Ok(Event::default().event("ConnectionStatus").data("connected"));

        // Already terminal: deliver and close, no waiting
        if let Some(terminal) = terminal_event_for(&job) {
            yield Ok(sse_event(&terminal));
            yield Ok(Event::default().event("StreamClosed").data("closed"));
            return;
        }

        let deadline = tokio::time::Instant::now() + idle_timeout;
        let mut reconcile = tokio::time::interval(RECONCILE_INTERVAL);
        reconcile.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {
                    warn!(job_id = %job_id, "Job event stream idle timeout");
                    break;
                }

                _ = reconcile.tick() => {
                    match jobs::get_job(&db, job_id).await {
                        Ok(Some(current)) => {
                            if let Some(terminal) = terminal_event_for(&current) {
                                debug!(job_id = %job_id, "Terminal state found by reconciliation");
                                yield Ok(sse_event(&terminal));
                                break;
                            }
                        }
                        Ok(None) => {
                            // Cleared mid-stream; nothing further will happen
                            debug!(job_id = %job_id, "Job cleared, closing stream");
                            break;
                        }
                        Err(e) => {
                            warn!(job_id = %job_id, error = %e, "Reconciliation read failed");
                        }
                    }
                }

                received = rx.recv() => match received {
                    Ok(event) if event.job_id() == Some(job_id) => {
                        let terminal = event.is_terminal();
                        yield Ok(sse_event(&event));
                        if terminal {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        // The reconciliation tick covers anything that mattered
                        debug!(job_id = %job_id, skipped, "Job SSE subscriber lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }

        yield Ok(Event::default().event("StreamClosed").data("closed"));
    };

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("heartbeat"),
    ))
}
