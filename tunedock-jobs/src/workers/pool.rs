//! Worker pools
//!
//! A fixed number of long-lived claim/execute loops per job kind. The
//! download pool stays small (external providers rate-limit); the analyze
//! pool runs wider. The pools share nothing in-process; all coordination
//! goes through the job store and queue.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tunedock_common::events::{JobEvent, JobKind};

use super::{analyze, download, ProgressReporter, WorkerContext};
use crate::db::{jobs, queue};
use crate::db::queue::ClaimReceipt;

/// Spawn both pools; returns the worker task handles
pub fn spawn_worker_pools(ctx: Arc<WorkerContext>) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::new();

    for kind in [JobKind::Download, JobKind::Analyze] {
        let concurrency = ctx.settings.concurrency(kind);
        tracing::info!(kind = %kind, concurrency, "Starting worker pool");

        for slot in 0..concurrency {
            let worker = format!("{}-{}", kind, slot);
            handles.push(tokio::spawn(worker_loop(ctx.clone(), kind, worker)));
        }
    }

    handles
}

/// One worker: claim, execute, repeat
///
/// Nothing a job does may end this loop. Handler errors become retry or
/// failure decisions; store/queue errors are logged and the worker backs
/// off briefly before trying again.
async fn worker_loop(ctx: Arc<WorkerContext>, kind: JobKind, worker: String) {
    tracing::info!(worker = %worker, "Worker started");
    let poll_interval = Duration::from_millis(ctx.settings.worker_poll_interval_ms);

    loop {
        match queue::claim(&ctx.db, kind, &worker).await {
            Ok(Some(receipt)) => {
                execute_claim(&ctx, kind, &worker, receipt).await;
            }
            Ok(None) => {
                // Queue empty or nothing eligible yet
                tokio::time::sleep(poll_interval).await;
            }
            Err(e) => {
                tracing::error!(worker = %worker, error = %e, "Claim failed, backing off");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

/// Run one claimed job through the state machine
async fn execute_claim(ctx: &WorkerContext, kind: JobKind, worker: &str, receipt: ClaimReceipt) {
    let job_id = receipt.job_id;

    let job = match jobs::get_job(&ctx.db, job_id).await {
        Ok(Some(job)) => job,
        Ok(None) => {
            // Record cleared between enqueue and claim; the reference is
            // stale and the claim is a no-op
            tracing::warn!(worker = %worker, job_id = %job_id, "Claimed job no longer exists");
            release_quietly(ctx, &receipt).await;
            return;
        }
        Err(e) => {
            // Keep the claim; the visibility sweep will return it rather
            // than losing the reference over a transient store error
            tracing::error!(worker = %worker, job_id = %job_id, error = %e, "Job load failed");
            return;
        }
    };

    if job.is_terminal() {
        // A recovered duplicate reference for a finished job
        tracing::debug!(worker = %worker, job_id = %job_id, status = ?job.status, "Skipping terminal job");
        release_quietly(ctx, &receipt).await;
        return;
    }

    let attempt = match jobs::begin_attempt(&ctx.db, job_id).await {
        Ok(Some(attempt)) => attempt,
        Ok(None) => {
            // Someone else moved the job out of queued; claim is stale
            tracing::debug!(worker = %worker, job_id = %job_id, "Stale claim, job not queued");
            release_quietly(ctx, &receipt).await;
            return;
        }
        Err(e) => {
            // Keep the claim for the sweep, same as a failed load
            tracing::error!(worker = %worker, job_id = %job_id, error = %e, "Attempt transition failed");
            return;
        }
    };

    tracing::info!(worker = %worker, job_id = %job_id, attempt, "Executing job");
    ctx.bus.emit_lossy(JobEvent::JobStarted {
        job_id,
        kind,
        attempt,
        timestamp: Utc::now(),
    });

    let progress = ProgressReporter::new(ctx.db.clone(), ctx.bus.clone(), job_id, kind);

    let outcome = match kind {
        JobKind::Download => download::run(ctx, &job, &progress).await,
        JobKind::Analyze => analyze::run(ctx, &job, &progress).await,
    };

    match outcome {
        Ok(result) => {
            finish_success(ctx, &job, kind, result).await;
            release_quietly(ctx, &receipt).await;
        }
        Err(error) => {
            finish_failure(ctx, &job, kind, attempt, &receipt, error).await;
        }
    }
}

async fn finish_success(
    ctx: &WorkerContext,
    job: &crate::models::JobRecord,
    kind: JobKind,
    result: serde_json::Value,
) {
    match jobs::mark_completed(&ctx.db, job.job_id, &result).await {
        Ok(true) => {
            ctx.bus.emit_lossy(JobEvent::JobCompleted {
                job_id: job.job_id,
                kind,
                track_id: job.track_id.clone(),
                owner_id: job.owner_id,
                result,
                timestamp: Utc::now(),
            });
        }
        Ok(false) => {
            // Job was cleared (or timed out and re-claimed) mid-flight;
            // tolerated as a no-op
            tracing::warn!(job_id = %job.job_id, "Completion write found no processing job");
        }
        Err(e) => {
            tracing::error!(job_id = %job.job_id, error = %e, "Completion write failed");
        }
    }
}

async fn finish_failure(
    ctx: &WorkerContext,
    job: &crate::models::JobRecord,
    kind: JobKind,
    attempt: u32,
    receipt: &ClaimReceipt,
    error: anyhow::Error,
) {
    let error_text = format!("{:#}", error);
    let max_attempts = ctx.settings.max_attempts(kind);

    if attempt < max_attempts {
        // Exponential backoff from the per-kind base
        let delay_ms = ctx.settings.backoff_ms(kind).saturating_mul(1u64 << (attempt - 1).min(16));

        tracing::warn!(
            job_id = %job.job_id,
            attempt,
            max_attempts,
            delay_ms,
            error = %error_text,
            "Job failed, will retry"
        );

        match jobs::requeue(&ctx.db, job.job_id).await {
            Ok(true) => {
                // New reference first, then drop the claim; a crash in
                // between leaves a duplicate, never a lost job
                if let Err(e) =
                    queue::enqueue(&ctx.db, kind, job.job_id, receipt.priority, delay_ms).await
                {
                    tracing::error!(job_id = %job.job_id, error = %e, "Retry enqueue failed");
                }
                ctx.bus.emit_lossy(JobEvent::JobRequeued {
                    job_id: job.job_id,
                    kind,
                    attempt_count: attempt,
                    delay_ms,
                    error: error_text,
                    timestamp: Utc::now(),
                });
            }
            Ok(false) => {
                tracing::warn!(job_id = %job.job_id, "Requeue found no processing job");
            }
            Err(e) => {
                tracing::error!(job_id = %job.job_id, error = %e, "Requeue write failed");
            }
        }
    } else {
        tracing::error!(
            job_id = %job.job_id,
            attempt,
            error = %error_text,
            "Job failed, retries exhausted"
        );

        match jobs::mark_failed(&ctx.db, job.job_id, &error_text).await {
            Ok(true) => {
                ctx.bus.emit_lossy(JobEvent::JobFailed {
                    job_id: job.job_id,
                    kind,
                    track_id: job.track_id.clone(),
                    error: error_text,
                    attempt_count: attempt,
                    timestamp: Utc::now(),
                });
            }
            Ok(false) => {
                tracing::warn!(job_id = %job.job_id, "Failure write found no processing job");
            }
            Err(e) => {
                tracing::error!(job_id = %job.job_id, error = %e, "Failure write failed");
            }
        }
    }

    release_quietly(ctx, receipt).await;
}

async fn release_quietly(ctx: &WorkerContext, receipt: &ClaimReceipt) {
    if let Err(e) = queue::release(&ctx.db, receipt.id).await {
        tracing::error!(receipt = receipt.id, error = %e, "Claim release failed");
    }
}
