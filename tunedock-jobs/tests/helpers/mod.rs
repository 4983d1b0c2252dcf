//! Shared fixtures for integration tests
//!
//! Not every test binary uses every fixture.
#![allow(dead_code)]

use async_trait::async_trait;
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use tunedock_common::events::EventBus;
use tunedock_jobs::config::JobsSettings;
use tunedock_jobs::models::{JobRecord, JobStatus, Provider};
use tunedock_jobs::providers::{AudioSource, ProviderRegistry, SourceError};
use tunedock_jobs::services::{
    AudioStore, FeatureExtractor, SearchIndexClient, TrackFeatures, Transcoder,
};
use tunedock_jobs::workers::WorkerContext;
use tunedock_jobs::AppState;

/// Single-connection in-memory database with the schema applied
pub async fn memory_pool() -> SqlitePool {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("open in-memory database");
    tunedock_jobs::db::init_tables(&pool).await.expect("init tables");
    pool
}

/// File-backed database for tests that need real connection concurrency
pub async fn file_pool(dir: &Path) -> SqlitePool {
    let db_path = dir.join("test.db");
    let pool = SqlitePool::connect(&format!("sqlite://{}?mode=rwc", db_path.display()))
        .await
        .expect("open file database");
    tunedock_jobs::db::init_tables(&pool).await.expect("init tables");
    pool
}

/// Settings tuned for fast tests: tiny backoffs and poll intervals
pub fn test_settings(root: PathBuf) -> JobsSettings {
    let mut settings = JobsSettings::defaults(root);
    settings.download_backoff_ms = 10;
    settings.analyze_backoff_ms = 10;
    settings.worker_poll_interval_ms = 20;
    settings.claim_visibility_timeout_secs = 30;
    settings
}

pub fn test_app_state(pool: SqlitePool, root: PathBuf) -> AppState {
    AppState::new(
        pool,
        EventBus::new(100),
        Arc::new(test_settings(root)),
    )
}

/// Transcoder that copies bytes instead of invoking ffmpeg
pub struct CopyTranscoder;

#[async_trait]
impl Transcoder for CopyTranscoder {
    async fn to_mono_wav(&self, src: &Path, dst: &Path) -> anyhow::Result<()> {
        tokio::fs::copy(src, dst).await?;
        Ok(())
    }
}

/// Scripted audio source: succeeds or fails on demand, logging every call
pub struct ScriptedSource {
    pub provider: Provider,
    pub succeed: bool,
    pub call_log: Arc<Mutex<Vec<Provider>>>,
}

impl ScriptedSource {
    pub fn new(provider: Provider, succeed: bool, call_log: Arc<Mutex<Vec<Provider>>>) -> Self {
        Self {
            provider,
            succeed,
            call_log,
        }
    }
}

#[async_trait]
impl AudioSource for ScriptedSource {
    fn provider(&self) -> Provider {
        self.provider
    }

    async fn fetch(&self, _locator: &str, work_dir: &Path) -> Result<PathBuf, SourceError> {
        self.call_log
            .lock()
            .expect("call log lock")
            .push(self.provider);
        if self.succeed {
            std::fs::create_dir_all(work_dir)?;
            let path = work_dir.join(format!("{}.m4a", self.provider));
            std::fs::write(&path, b"scripted-audio")?;
            Ok(path)
        } else {
            Err(SourceError::ToolFailed {
                tool: "scripted",
                code: Some(1),
                stderr: "scripted failure".to_string(),
            })
        }
    }
}

/// Extractor returning fixed features, counting invocations
pub struct FixedExtractor {
    pub calls: Arc<AtomicUsize>,
}

impl FixedExtractor {
    pub fn new() -> Self {
        Self {
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl FeatureExtractor for FixedExtractor {
    async fn analyze(&self, _wav_path: &Path) -> anyhow::Result<TrackFeatures> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(TrackFeatures {
            bpm: Some(128),
            key: Some("F".to_string()),
            scale: Some("minor".to_string()),
            danceability: Some(0.9),
            ..Default::default()
        })
    }
}

/// Extractor that always errors, for retry-exhaustion tests
pub struct FailingExtractor {
    pub calls: Arc<AtomicUsize>,
}

impl FailingExtractor {
    pub fn new() -> Self {
        Self {
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl FeatureExtractor for FailingExtractor {
    async fn analyze(&self, _wav_path: &Path) -> anyhow::Result<TrackFeatures> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        anyhow::bail!("extractor exploded")
    }
}

/// Worker context over scripted collaborators
pub fn test_context(
    pool: SqlitePool,
    bus: EventBus,
    settings: JobsSettings,
    sources: Vec<Arc<dyn AudioSource>>,
    extractor: Arc<dyn FeatureExtractor>,
) -> Arc<WorkerContext> {
    let root = settings.storage_root.clone();
    Arc::new(WorkerContext {
        db: pool,
        bus,
        settings: Arc::new(settings),
        providers: Arc::new(ProviderRegistry::from_sources(sources)),
        extractor,
        search_index: Arc::new(SearchIndexClient::disabled()),
        audio_store: Arc::new(AudioStore::new(root, Arc::new(CopyTranscoder))),
    })
}

/// Poll the store until the job reaches the wanted status
pub async fn wait_for_status(
    pool: &SqlitePool,
    job_id: Uuid,
    status: JobStatus,
    timeout: Duration,
) -> JobRecord {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Some(job) = tunedock_jobs::db::jobs::get_job(pool, job_id)
            .await
            .expect("job store readable")
        {
            if job.status == status {
                return job;
            }
            assert!(
                !(job.status.is_terminal() && job.status != status),
                "job {} reached terminal {:?} while waiting for {:?} (error: {:?})",
                job_id,
                job.status,
                status,
                job.error
            );
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for job {} to reach {:?}",
            job_id,
            status
        );
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}
