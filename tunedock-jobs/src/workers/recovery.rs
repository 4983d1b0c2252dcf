//! Claim recovery
//!
//! A worker that crashes after claiming a job must not strand it. Two
//! layers guarantee that:
//!
//! - a startup reconciliation pass: any claim present at boot belongs to
//!   a dead worker, since claims never outlive the process
//! - a periodic sweep while running: claims older than the visibility
//!   timeout are returned to the queue, and non-terminal jobs that lost
//!   their queue reference entirely are re-enqueued
//!
//! Recovery gives at-least-once execution; the store-level state machine
//! keeps a recovered duplicate from ever producing a second active run of
//! a job that already finished.

use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tunedock_common::Result;

use super::WorkerContext;
use crate::db::{jobs, queue};
use crate::models::JobPriority;

/// Requeue everything stranded by a previous run
///
/// Called once at startup, before the pools spawn. Returns the number of
/// jobs recovered.
pub async fn reconcile_startup(pool: &SqlitePool) -> Result<usize> {
    let mut recovered = 0;

    // Claims never survive the process that took them
    let reclaimed = queue::reclaim_expired(pool, Utc::now().timestamp_millis()).await?;
    for (job_id, kind) in &reclaimed {
        if jobs::requeue(pool, *job_id).await? {
            tracing::info!(job_id = %job_id, kind = %kind, "Recovered claimed job from previous run");
        }
        recovered += 1;
    }

    // Active jobs whose queue reference is gone entirely
    for (job_id, kind, status) in jobs::list_unreferenced_active(pool).await? {
        if status == crate::models::JobStatus::Processing && !jobs::requeue(pool, job_id).await? {
            continue;
        }
        queue::enqueue(pool, kind, job_id, JobPriority::Normal, 0).await?;
        tracing::info!(job_id = %job_id, kind = %kind, "Re-enqueued stranded job");
        recovered += 1;
    }

    if recovered > 0 {
        tracing::info!(recovered, "Startup reconciliation requeued stranded jobs");
    }

    Ok(recovered)
}

/// Spawn the periodic visibility-timeout sweep
pub fn spawn_claim_sweeper(ctx: Arc<WorkerContext>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let visibility = Duration::from_secs(ctx.settings.claim_visibility_timeout_secs);
        // Sweeping at half the timeout bounds how long past expiry a claim
        // can linger
        let mut interval = tokio::time::interval(visibility / 2);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            if let Err(e) = sweep_once(&ctx).await {
                tracing::error!(error = %e, "Claim sweep failed");
            }
        }
    })
}

async fn sweep_once(ctx: &WorkerContext) -> Result<()> {
    let visibility_ms = ctx.settings.claim_visibility_timeout_secs as i64 * 1000;
    let cutoff = Utc::now().timestamp_millis() - visibility_ms;

    let reclaimed = queue::reclaim_expired(&ctx.db, cutoff).await?;
    for (job_id, kind) in &reclaimed {
        tracing::warn!(
            job_id = %job_id,
            kind = %kind,
            "Claim outlived visibility timeout, returning job to queue"
        );
        jobs::requeue(&ctx.db, *job_id).await?;
    }

    for (job_id, kind, status) in jobs::list_unreferenced_active(&ctx.db).await? {
        tracing::warn!(job_id = %job_id, kind = %kind, ?status, "Re-enqueueing stranded job");
        if status == crate::models::JobStatus::Processing && !jobs::requeue(&ctx.db, job_id).await? {
            continue;
        }
        queue::enqueue(&ctx.db, kind, job_id, JobPriority::Normal, 0).await?;
    }

    Ok(())
}
