//! Database access for tunedock-jobs
//!
//! The job store, the durable queues, and the track rows the pipeline
//! updates all live in one SQLite database inside the storage root.

pub mod jobs;
pub mod queue;
pub mod retry;
pub mod tracks;

use anyhow::Result;
use sqlx::SqlitePool;
use std::path::Path;

pub use retry::retry_on_lock;

/// Initialize database connection pool
///
/// Opens (or creates) the database file and runs the table init pass.
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Proper SQLite URI with mode=rwc (read, write, create)
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let pool = SqlitePool::connect(&db_url).await?;

    init_tables(&pool).await?;

    Ok(pool)
}

/// Create the pipeline tables if they don't exist
///
/// `jobs` is the durable job store, `job_queue` holds the claimable work
/// references, and `tracks` carries the collection fields the pipeline
/// writes on completion.
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            job_id TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            track_id TEXT NOT NULL,
            owner_id INTEGER NOT NULL,
            candidate_sources TEXT NOT NULL DEFAULT '[]',
            preferred_provider TEXT,
            input TEXT,
            status TEXT NOT NULL,
            progress INTEGER NOT NULL DEFAULT 0,
            result TEXT,
            error TEXT,
            attempt_count INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS job_queue (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            kind TEXT NOT NULL,
            job_id TEXT NOT NULL,
            priority INTEGER NOT NULL DEFAULT 1,
            available_at INTEGER NOT NULL,
            claimed_at INTEGER,
            claimed_by TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_job_queue_claim
        ON job_queue (kind, priority, id)
        WHERE claimed_at IS NULL
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tracks (
            track_id TEXT NOT NULL,
            owner_id INTEGER NOT NULL,
            title TEXT,
            artist TEXT,
            album TEXT,
            local_audio_url TEXT,
            bpm INTEGER,
            key TEXT,
            danceability REAL,
            duration_seconds INTEGER,
            PRIMARY KEY (track_id, owner_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!("Database tables initialized (jobs, job_queue, tracks)");

    Ok(())
}
