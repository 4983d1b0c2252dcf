//! Job store operations
//!
//! Durable keyed storage for job records. All status mutations go through
//! the guarded functions below, which enforce the state machine at the
//! store level: a stale or concurrent writer sees zero rows affected and
//! must drop its claim instead of overwriting a terminal record.

use chrono::Utc;
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use tunedock_common::events::JobKind;
use tunedock_common::{Error, Result};
use uuid::Uuid;

use crate::db::retry_on_lock;
use crate::models::{JobRecord, JobStatus, Provider};

/// Default total wait for lock-contention retries on store writes
const LOCK_WAIT_MS: u64 = 5000;

/// Aggregate status counts for the dashboard
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct JobSummary {
    pub total: i64,
    pub queued: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
}

/// Upsert a job record, overwriting all fields
pub async fn put_job(pool: &SqlitePool, job: &JobRecord) -> Result<()> {
    // Prepare all data BEFORE acquiring a database connection
    let job_id = job.job_id.to_string();
    let candidate_sources = serde_json::to_string(&job.candidate_sources)
        .map_err(|e| Error::Internal(format!("Failed to serialize candidate_sources: {}", e)))?;
    let preferred_provider = job.preferred_provider.map(|p| p.as_str().to_string());
    let input = job
        .input
        .as_ref()
        .map(|v| serde_json::to_string(v))
        .transpose()
        .map_err(|e| Error::Internal(format!("Failed to serialize input: {}", e)))?;
    let result = job
        .result
        .as_ref()
        .map(|v| serde_json::to_string(v))
        .transpose()
        .map_err(|e| Error::Internal(format!("Failed to serialize result: {}", e)))?;
    let created_at = job.created_at.to_rfc3339();
    let updated_at = job.updated_at.to_rfc3339();

    retry_on_lock("put_job", LOCK_WAIT_MS, || async {
        sqlx::query(
            r#"
            INSERT INTO jobs (
                job_id, kind, track_id, owner_id, candidate_sources,
                preferred_provider, input, status, progress, result, error,
                attempt_count, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(job_id) DO UPDATE SET
                kind = excluded.kind,
                track_id = excluded.track_id,
                owner_id = excluded.owner_id,
                candidate_sources = excluded.candidate_sources,
                preferred_provider = excluded.preferred_provider,
                input = excluded.input,
                status = excluded.status,
                progress = excluded.progress,
                result = excluded.result,
                error = excluded.error,
                attempt_count = excluded.attempt_count,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&job_id)
        .bind(job.kind.as_str())
        .bind(&job.track_id)
        .bind(job.owner_id)
        .bind(&candidate_sources)
        .bind(&preferred_provider)
        .bind(&input)
        .bind(job.status.as_str())
        .bind(job.progress as i64)
        .bind(&result)
        .bind(&job.error)
        .bind(job.attempt_count as i64)
        .bind(&created_at)
        .bind(&updated_at)
        .execute(pool)
        .await
        .map_err(Error::Database)?;

        Ok(())
    })
    .await
}

/// Load a job record by id
pub async fn get_job(pool: &SqlitePool, job_id: Uuid) -> Result<Option<JobRecord>> {
    let row = sqlx::query(
        r#"
        SELECT job_id, kind, track_id, owner_id, candidate_sources,
               preferred_provider, input, status, progress, result, error,
               attempt_count, created_at, updated_at
        FROM jobs
        WHERE job_id = ?
        "#,
    )
    .bind(job_id.to_string())
    .fetch_optional(pool)
    .await?;

    row.map(|r| row_to_job(&r)).transpose()
}

/// All job records; no ordering guarantee, callers sort as needed
pub async fn list_jobs(pool: &SqlitePool) -> Result<Vec<JobRecord>> {
    let rows = sqlx::query(
        r#"
        SELECT job_id, kind, track_id, owner_id, candidate_sources,
               preferred_provider, input, status, progress, result, error,
               attempt_count, created_at, updated_at
        FROM jobs
        "#,
    )
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_to_job).collect()
}

/// Status counts across all records
pub async fn summary(pool: &SqlitePool) -> Result<JobSummary> {
    let rows: Vec<(String, i64)> =
        sqlx::query_as("SELECT status, COUNT(*) FROM jobs GROUP BY status")
            .fetch_all(pool)
            .await?;

    let mut summary = JobSummary {
        total: 0,
        queued: 0,
        processing: 0,
        completed: 0,
        failed: 0,
    };
    for (status, count) in rows {
        summary.total += count;
        match JobStatus::parse(&status) {
            Some(JobStatus::Queued) => summary.queued += count,
            Some(JobStatus::Processing) => summary.processing += count,
            Some(JobStatus::Completed) => summary.completed += count,
            Some(JobStatus::Failed) => summary.failed += count,
            None => {
                return Err(Error::Internal(format!(
                    "Unknown job status in store: {}",
                    status
                )))
            }
        }
    }

    Ok(summary)
}

/// Delete all job records (administrative reset)
pub async fn clear_jobs(pool: &SqlitePool) -> Result<u64> {
    let result = sqlx::query("DELETE FROM jobs").execute(pool).await?;
    Ok(result.rows_affected())
}

/// Transition queued → processing and count the attempt
///
/// Returns the attempt number (1-based) on success, or None if the job is
/// no longer in `queued`: a stale claim the caller must drop.
pub async fn begin_attempt(pool: &SqlitePool, job_id: Uuid) -> Result<Option<u32>> {
    let row = sqlx::query(
        r#"
        UPDATE jobs
        SET status = 'processing',
            progress = 0,
            attempt_count = attempt_count + 1,
            updated_at = ?
        WHERE job_id = ? AND status = 'queued'
        RETURNING attempt_count
        "#,
    )
    .bind(Utc::now().to_rfc3339())
    .bind(job_id.to_string())
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.get::<i64, _>("attempt_count") as u32))
}

/// Record progress for a processing job
///
/// Progress never decreases and only applies while the job is processing;
/// out-of-order or post-terminal updates are silently dropped.
pub async fn set_progress(pool: &SqlitePool, job_id: Uuid, progress: u8) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE jobs
        SET progress = ?, updated_at = ?
        WHERE job_id = ? AND status = 'processing' AND progress <= ?
        "#,
    )
    .bind(progress.min(100) as i64)
    .bind(Utc::now().to_rfc3339())
    .bind(job_id.to_string())
    .bind(progress.min(100) as i64)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Return a processing job to queued for another attempt
pub async fn requeue(pool: &SqlitePool, job_id: Uuid) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE jobs
        SET status = 'queued', progress = 0, updated_at = ?
        WHERE job_id = ? AND status = 'processing'
        "#,
    )
    .bind(Utc::now().to_rfc3339())
    .bind(job_id.to_string())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Terminal success: store the result and force progress to 100
pub async fn mark_completed(
    pool: &SqlitePool,
    job_id: Uuid,
    result: &serde_json::Value,
) -> Result<bool> {
    let result_json = serde_json::to_string(result)
        .map_err(|e| Error::Internal(format!("Failed to serialize result: {}", e)))?;

    let outcome = sqlx::query(
        r#"
        UPDATE jobs
        SET status = 'completed', progress = 100, result = ?, error = NULL,
            updated_at = ?
        WHERE job_id = ? AND status = 'processing'
        "#,
    )
    .bind(&result_json)
    .bind(Utc::now().to_rfc3339())
    .bind(job_id.to_string())
    .execute(pool)
    .await?;

    Ok(outcome.rows_affected() == 1)
}

/// Terminal failure: store the aggregated error
pub async fn mark_failed(pool: &SqlitePool, job_id: Uuid, error: &str) -> Result<bool> {
    let outcome = sqlx::query(
        r#"
        UPDATE jobs
        SET status = 'failed', error = ?, updated_at = ?
        WHERE job_id = ? AND status = 'processing'
        "#,
    )
    .bind(error)
    .bind(Utc::now().to_rfc3339())
    .bind(job_id.to_string())
    .execute(pool)
    .await?;

    Ok(outcome.rows_affected() == 1)
}

/// Non-terminal jobs with no queue reference left
///
/// A crash between claim release and the terminal write (or a failed
/// retry enqueue) strands a job this way; the recovery passes re-enqueue
/// them. A freshly submitted job can appear here for the instant between
/// its record write and its enqueue, which at worst produces a harmless
/// duplicate reference.
pub async fn list_unreferenced_active(
    pool: &SqlitePool,
) -> Result<Vec<(Uuid, JobKind, JobStatus)>> {
    let rows: Vec<(String, String, String)> = sqlx::query_as(
        r#"
        SELECT job_id, kind, status FROM jobs
        WHERE status IN ('queued', 'processing')
          AND job_id NOT IN (SELECT job_id FROM job_queue)
        "#,
    )
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|(id, kind, status)| {
            let job_id = Uuid::parse_str(&id)
                .map_err(|e| Error::Internal(format!("Failed to parse job_id: {}", e)))?;
            let kind = JobKind::parse(&kind)
                .ok_or_else(|| Error::Internal(format!("Unknown job kind in store: {}", kind)))?;
            let status = JobStatus::parse(&status)
                .ok_or_else(|| Error::Internal(format!("Unknown job status in store: {}", status)))?;
            Ok((job_id, kind, status))
        })
        .collect()
}

fn row_to_job(row: &sqlx::sqlite::SqliteRow) -> Result<JobRecord> {
    let job_id: String = row.get("job_id");
    let job_id = Uuid::parse_str(&job_id)
        .map_err(|e| Error::Internal(format!("Failed to parse job_id: {}", e)))?;

    let kind: String = row.get("kind");
    let kind = JobKind::parse(&kind)
        .ok_or_else(|| Error::Internal(format!("Unknown job kind in store: {}", kind)))?;

    let status: String = row.get("status");
    let status = JobStatus::parse(&status)
        .ok_or_else(|| Error::Internal(format!("Unknown job status in store: {}", status)))?;

    let candidate_sources: String = row.get("candidate_sources");
    let candidate_sources = serde_json::from_str(&candidate_sources)
        .map_err(|e| Error::Internal(format!("Failed to deserialize candidate_sources: {}", e)))?;

    let preferred_provider: Option<String> = row.get("preferred_provider");
    let preferred_provider = preferred_provider
        .map(|p| {
            serde_json::from_value::<Provider>(serde_json::Value::String(p.clone()))
                .map_err(|_| Error::Internal(format!("Unknown provider in store: {}", p)))
        })
        .transpose()?;

    let input: Option<String> = row.get("input");
    let input = input
        .map(|s| serde_json::from_str(&s))
        .transpose()
        .map_err(|e| Error::Internal(format!("Failed to deserialize input: {}", e)))?;

    let result: Option<String> = row.get("result");
    let result = result
        .map(|s| serde_json::from_str(&s))
        .transpose()
        .map_err(|e| Error::Internal(format!("Failed to deserialize result: {}", e)))?;

    let created_at: String = row.get("created_at");
    let created_at = chrono::DateTime::parse_from_rfc3339(&created_at)
        .map_err(|e| Error::Internal(format!("Failed to parse created_at: {}", e)))?
        .with_timezone(&chrono::Utc);

    let updated_at: String = row.get("updated_at");
    let updated_at = chrono::DateTime::parse_from_rfc3339(&updated_at)
        .map_err(|e| Error::Internal(format!("Failed to parse updated_at: {}", e)))?
        .with_timezone(&chrono::Utc);

    Ok(JobRecord {
        job_id,
        kind,
        track_id: row.get("track_id"),
        owner_id: row.get("owner_id"),
        candidate_sources,
        preferred_provider,
        input,
        status,
        progress: row.get::<i64, _>("progress") as u8,
        result,
        error: row.get("error"),
        attempt_count: row.get::<i64, _>("attempt_count") as u32,
        created_at,
        updated_at,
    })
}
