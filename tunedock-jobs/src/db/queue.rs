//! Durable work queue
//!
//! One logical queue per job kind, stored in the `job_queue` table. Three
//! priority bands (high drains before normal before low) with FIFO order
//! inside a band via the rowid sequence. A claim is a single UPDATE with a
//! nested SELECT; SQLite serializes writers, so no two claimants can
//! receive the same reference.
//!
//! A claimed row stays in the table until released. Rows whose claim
//! outlives the visibility timeout are returned to the queue by the
//! recovery sweep, which is what keeps a worker crash from silently
//! stranding a job.

use chrono::Utc;
use sqlx::{Row, SqlitePool};
use tunedock_common::events::JobKind;
use tunedock_common::{Error, Result};
use uuid::Uuid;

use crate::db::retry_on_lock;
use crate::models::JobPriority;

/// Default total wait for lock-contention retries on queue writes
const LOCK_WAIT_MS: u64 = 5000;

/// Proof of a successful claim, held by exactly one worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimReceipt {
    /// Queue row id; used to release the reference
    pub id: i64,
    /// Claimed job
    pub job_id: Uuid,
    /// Band the reference was queued in (kept for re-enqueue on retry)
    pub priority: JobPriority,
}

/// Add a job reference to the tail of its priority band
///
/// `delay_ms` postpones eligibility, used for retry backoff.
pub async fn enqueue(
    pool: &SqlitePool,
    kind: JobKind,
    job_id: Uuid,
    priority: JobPriority,
    delay_ms: u64,
) -> Result<()> {
    let available_at = Utc::now().timestamp_millis() + delay_ms as i64;
    let job_id = job_id.to_string();

    retry_on_lock("queue_enqueue", LOCK_WAIT_MS, || async {
        sqlx::query(
            r#"
            INSERT INTO job_queue (kind, job_id, priority, available_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(kind.as_str())
        .bind(&job_id)
        .bind(priority.band())
        .bind(available_at)
        .execute(pool)
        .await
        .map_err(Error::Database)?;

        Ok(())
    })
    .await
}

/// Atomically claim the next eligible reference for a kind
///
/// Returns None when the queue is empty (or nothing is eligible yet).
pub async fn claim(pool: &SqlitePool, kind: JobKind, worker: &str) -> Result<Option<ClaimReceipt>> {
    let now = Utc::now().timestamp_millis();

    let row = retry_on_lock("queue_claim", LOCK_WAIT_MS, || async {
        sqlx::query(
            r#"
            UPDATE job_queue
            SET claimed_at = ?1, claimed_by = ?2
            WHERE id = (
                SELECT id FROM job_queue
                WHERE kind = ?3 AND claimed_at IS NULL AND available_at <= ?1
                ORDER BY priority ASC, id ASC
                LIMIT 1
            )
            RETURNING id, job_id, priority
            "#,
        )
        .bind(now)
        .bind(worker)
        .bind(kind.as_str())
        .fetch_optional(pool)
        .await
        .map_err(Error::Database)
    })
    .await?;

    row.map(|r| {
        let job_id: String = r.get("job_id");
        let job_id = Uuid::parse_str(&job_id)
            .map_err(|e| Error::Internal(format!("Failed to parse queued job_id: {}", e)))?;
        Ok(ClaimReceipt {
            id: r.get("id"),
            job_id,
            priority: JobPriority::from_band(r.get("priority")),
        })
    })
    .transpose()
}

/// Drop a claimed reference once its job finished or was re-enqueued
pub async fn release(pool: &SqlitePool, receipt_id: i64) -> Result<()> {
    sqlx::query("DELETE FROM job_queue WHERE id = ?")
        .bind(receipt_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Return expired claims to their queues
///
/// Unclaims every row claimed at or before `cutoff_ms` and makes it
/// immediately eligible again. Returns the affected jobs so the caller can
/// flip their records back to queued.
pub async fn reclaim_expired(pool: &SqlitePool, cutoff_ms: i64) -> Result<Vec<(Uuid, JobKind)>> {
    let now = Utc::now().timestamp_millis();

    let rows = sqlx::query(
        r#"
        UPDATE job_queue
        SET claimed_at = NULL, claimed_by = NULL, available_at = ?
        WHERE claimed_at IS NOT NULL AND claimed_at <= ?
        RETURNING job_id, kind
        "#,
    )
    .bind(now)
    .bind(cutoff_ms)
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|r| {
            let job_id: String = r.get("job_id");
            let job_id = Uuid::parse_str(&job_id)
                .map_err(|e| Error::Internal(format!("Failed to parse queued job_id: {}", e)))?;
            let kind: String = r.get("kind");
            let kind = JobKind::parse(&kind)
                .ok_or_else(|| Error::Internal(format!("Unknown kind in queue: {}", kind)))?;
            Ok((job_id, kind))
        })
        .collect()
}

/// Drop all queued references (administrative reset)
pub async fn clear_queue(pool: &SqlitePool) -> Result<u64> {
    let result = sqlx::query("DELETE FROM job_queue").execute(pool).await?;
    Ok(result.rows_affected())
}

/// Unclaimed references currently eligible or waiting, for one kind
pub async fn pending_count(pool: &SqlitePool, kind: JobKind) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM job_queue WHERE kind = ? AND claimed_at IS NULL",
    )
    .bind(kind.as_str())
    .fetch_one(pool)
    .await?;
    Ok(count)
}
