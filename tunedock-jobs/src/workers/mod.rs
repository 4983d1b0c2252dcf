//! Worker pools and job handlers
//!
//! Everything the executing side of the pipeline needs: the injected
//! component graph (`WorkerContext`), job submission, the per-kind
//! handlers, and the claim-recovery tasks.

pub mod analyze;
pub mod chain;
pub mod download;
pub mod pool;
pub mod recovery;

use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;
use tunedock_common::events::{EventBus, JobEvent, JobKind};
use tunedock_common::Result;

use crate::config::JobsSettings;
use crate::db;
use crate::models::{JobPriority, JobRecord};
use crate::providers::ProviderRegistry;
use crate::services::{
    AudioStore, EssentiaHttpExtractor, FeatureExtractor, FfmpegTranscoder, SearchIndexClient,
};

/// Component graph handed to every worker
///
/// Constructed once at startup and shared via Arc; workers never reach for
/// process-global state.
pub struct WorkerContext {
    pub db: SqlitePool,
    pub bus: EventBus,
    pub settings: Arc<JobsSettings>,
    pub providers: Arc<ProviderRegistry>,
    pub extractor: Arc<dyn FeatureExtractor>,
    pub search_index: Arc<SearchIndexClient>,
    pub audio_store: Arc<AudioStore>,
}

impl WorkerContext {
    /// Production wiring from resolved settings
    pub fn production(db: SqlitePool, bus: EventBus, settings: Arc<JobsSettings>) -> Self {
        let audio_store = Arc::new(AudioStore::new(
            settings.storage_root.clone(),
            Arc::new(FfmpegTranscoder),
        ));
        let extractor = Arc::new(EssentiaHttpExtractor::new(settings.analysis_url.clone()));
        let search_index = Arc::new(SearchIndexClient::new(
            settings.search_index_url.clone(),
            settings.search_index_api_key.clone(),
        ));

        Self {
            db,
            bus,
            settings,
            providers: Arc::new(ProviderRegistry::standard()),
            extractor,
            search_index,
            audio_store,
        }
    }
}

/// Store a new job record and enqueue its reference
///
/// Used by the API for download submissions and by the download handler
/// when it chains the follow-on analyze job. Returns only after both the
/// record and the queue reference are durable.
pub async fn submit_job(
    db: &SqlitePool,
    bus: &EventBus,
    job: &JobRecord,
    priority: JobPriority,
) -> Result<()> {
    db::jobs::put_job(db, job).await?;
    db::queue::enqueue(db, job.kind, job.job_id, priority, 0).await?;

    tracing::info!(
        job_id = %job.job_id,
        kind = %job.kind,
        track_id = %job.track_id,
        priority = ?priority,
        "Job submitted"
    );

    bus.emit_lossy(JobEvent::JobQueued {
        job_id: job.job_id,
        kind: job.kind,
        track_id: job.track_id.clone(),
        timestamp: Utc::now(),
    });

    Ok(())
}

/// Forwards handler progress milestones into the store and onto the bus
///
/// The store write is the source of truth; the event is only emitted when
/// the write landed (the job was still processing), so a job that was
/// cleared or timed out mid-flight stops ticking.
pub struct ProgressReporter {
    db: SqlitePool,
    bus: EventBus,
    job_id: uuid::Uuid,
    kind: JobKind,
}

impl ProgressReporter {
    pub fn new(db: SqlitePool, bus: EventBus, job_id: uuid::Uuid, kind: JobKind) -> Self {
        Self {
            db,
            bus,
            job_id,
            kind,
        }
    }

    pub async fn update(&self, progress: u8) {
        match db::jobs::set_progress(&self.db, self.job_id, progress).await {
            Ok(true) => {
                self.bus.emit_lossy(JobEvent::JobProgress {
                    job_id: self.job_id,
                    kind: self.kind,
                    progress,
                    timestamp: Utc::now(),
                });
            }
            Ok(false) => {
                tracing::debug!(job_id = %self.job_id, progress, "Progress update dropped (job not processing)");
            }
            Err(e) => {
                tracing::warn!(job_id = %self.job_id, error = %e, "Progress write failed");
            }
        }
    }
}
