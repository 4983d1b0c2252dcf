//! Worker pool integration tests
//!
//! Runs real worker loops against scripted providers and extractors,
//! with no external tools or network, and asserts the state machine,
//! fallback, retry, and chaining behavior end to end.

mod helpers;

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use helpers::{
    memory_pool, test_context, test_settings, wait_for_status, FailingExtractor, FixedExtractor,
    ScriptedSource,
};
use tunedock_common::events::{EventBus, JobKind};
use tunedock_jobs::db::{jobs, queue};
use tunedock_jobs::models::{
    AnalyzeInput, JobPriority, JobRecord, JobStatus, Provider, SourceCandidate,
};
use tunedock_jobs::providers::AudioSource;
use tunedock_jobs::workers::{pool::spawn_worker_pools, submit_job};

const WAIT: Duration = Duration::from_secs(10);

fn candidates(providers: &[Provider]) -> Vec<SourceCandidate> {
    providers
        .iter()
        .map(|p| SourceCandidate {
            provider: *p,
            locator: format!("https://example.com/{}", p),
        })
        .collect()
}

#[tokio::test]
async fn test_download_falls_back_and_attributes_winner() {
    let dir = tempfile::tempdir().unwrap();
    let pool = memory_pool().await;
    let bus = EventBus::new(100);
    let call_log = Arc::new(Mutex::new(Vec::new()));

    let sources: Vec<Arc<dyn AudioSource>> = vec![
        Arc::new(ScriptedSource::new(Provider::Freyr, false, call_log.clone())),
        Arc::new(ScriptedSource::new(Provider::Spotdl, false, call_log.clone())),
        Arc::new(ScriptedSource::new(Provider::YtDlp, true, call_log.clone())),
    ];
    let extractor = Arc::new(FixedExtractor::new());
    let ctx = test_context(
        pool.clone(),
        bus.clone(),
        test_settings(dir.path().to_path_buf()),
        sources,
        extractor,
    );

    let job = JobRecord::new_download(
        "r1".to_string(),
        1,
        candidates(&[Provider::Freyr, Provider::Spotdl, Provider::YtDlp]),
        None,
    );
    submit_job(&pool, &bus, &job, JobPriority::Normal)
        .await
        .unwrap();

    let _workers = spawn_worker_pools(ctx);

    let done = wait_for_status(&pool, job.job_id, JobStatus::Completed, WAIT).await;
    let result = done.result.expect("result payload");

    // Success attributed to the third candidate, earlier failures recorded
    assert_eq!(result["provider"], "yt-dlp");
    let failed = result["failed_sources"].as_array().unwrap();
    assert_eq!(failed.len(), 2);
    assert_eq!(failed[0]["provider"], "freyr");
    assert_eq!(failed[1]["provider"], "spotdl");
    assert_eq!(done.progress, 100);
    assert_eq!(done.attempt_count, 1);

    // The chained analyze job runs to completion as well
    let analyze_id: Uuid = serde_json::from_value(result["analyze_job_id"].clone()).unwrap();
    let analyze = wait_for_status(&pool, analyze_id, JobStatus::Completed, WAIT).await;
    assert_eq!(analyze.kind, JobKind::Analyze);
    assert_eq!(analyze.track_id, "r1");
}

#[tokio::test]
async fn test_preferred_provider_is_attempted_first() {
    let dir = tempfile::tempdir().unwrap();
    let pool = memory_pool().await;
    let bus = EventBus::new(100);
    let call_log = Arc::new(Mutex::new(Vec::new()));

    // Every source fails so the whole attempt order is observable
    let sources: Vec<Arc<dyn AudioSource>> = vec![
        Arc::new(ScriptedSource::new(Provider::Freyr, false, call_log.clone())),
        Arc::new(ScriptedSource::new(Provider::Spotdl, false, call_log.clone())),
        Arc::new(ScriptedSource::new(Provider::YtDlp, false, call_log.clone())),
    ];
    let mut settings = test_settings(dir.path().to_path_buf());
    settings.download_max_retries = 0; // one pass, no retry noise
    let ctx = test_context(
        pool.clone(),
        bus.clone(),
        settings,
        sources,
        Arc::new(FixedExtractor::new()),
    );

    let job = JobRecord::new_download(
        "r2".to_string(),
        1,
        candidates(&[Provider::Freyr, Provider::Spotdl, Provider::YtDlp]),
        Some(Provider::Spotdl),
    );
    submit_job(&pool, &bus, &job, JobPriority::Normal)
        .await
        .unwrap();

    let _workers = spawn_worker_pools(ctx);
    let failed = wait_for_status(&pool, job.job_id, JobStatus::Failed, WAIT).await;

    let log = call_log.lock().unwrap().clone();
    assert_eq!(
        log,
        vec![Provider::Spotdl, Provider::Freyr, Provider::YtDlp],
        "preferred provider must be tried before the original order"
    );

    // Exhaustion error names every provider tried
    let error = failed.error.expect("error populated");
    assert!(error.contains("spotdl"));
    assert!(error.contains("freyr"));
    assert!(error.contains("yt-dlp"));
}

#[tokio::test]
async fn test_retries_exhaust_to_failed_with_attempt_count() {
    let dir = tempfile::tempdir().unwrap();
    let pool = memory_pool().await;
    let bus = EventBus::new(100);

    let extractor = Arc::new(FailingExtractor::new());
    let calls = extractor.calls.clone();
    let settings = test_settings(dir.path().to_path_buf());
    let max_retries = settings.analyze_max_retries;
    let ctx = test_context(pool.clone(), bus.clone(), settings, Vec::new(), extractor);

    let job = JobRecord::new_analyze(
        "r3".to_string(),
        1,
        AnalyzeInput {
            wav_file: "audio_x.wav".to_string(),
            audio_file: "audio_x.m4a".to_string(),
        },
    );
    submit_job(&pool, &bus, &job, JobPriority::Normal)
        .await
        .unwrap();

    let _workers = spawn_worker_pools(ctx);
    let failed = wait_for_status(&pool, job.job_id, JobStatus::Failed, WAIT).await;

    assert_eq!(failed.attempt_count, max_retries + 1);
    assert_eq!(calls.load(Ordering::SeqCst) as u32, max_retries + 1);
    assert!(failed.error.expect("error populated").contains("extractor exploded"));
}

#[tokio::test]
async fn test_terminal_job_is_never_claimed_again() {
    let dir = tempfile::tempdir().unwrap();
    let pool = memory_pool().await;
    let bus = EventBus::new(100);

    let extractor = Arc::new(FixedExtractor::new());
    let calls = extractor.calls.clone();
    let ctx = test_context(
        pool.clone(),
        bus.clone(),
        test_settings(dir.path().to_path_buf()),
        Vec::new(),
        extractor,
    );

    let job = JobRecord::new_analyze(
        "r4".to_string(),
        1,
        AnalyzeInput {
            wav_file: "audio_y.wav".to_string(),
            audio_file: "audio_y.m4a".to_string(),
        },
    );
    submit_job(&pool, &bus, &job, JobPriority::Normal)
        .await
        .unwrap();

    let _workers = spawn_worker_pools(ctx);
    let done = wait_for_status(&pool, job.job_id, JobStatus::Completed, WAIT).await;
    let completed_at = done.updated_at;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // A stray duplicate reference (e.g. from recovery) must be dropped
    queue::enqueue(&pool, JobKind::Analyze, job.job_id, JobPriority::Normal, 0)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    let after = jobs::get_job(&pool, job.job_id).await.unwrap().unwrap();
    assert_eq!(after.status, JobStatus::Completed);
    assert_eq!(after.updated_at, completed_at, "terminal record untouched");
    assert_eq!(calls.load(Ordering::SeqCst), 1, "no second execution");
    assert_eq!(queue::pending_count(&pool, JobKind::Analyze).await.unwrap(), 0);
}

#[tokio::test]
async fn test_pipeline_applies_analysis_to_track_row() {
    let dir = tempfile::tempdir().unwrap();
    let pool = memory_pool().await;
    let bus = EventBus::new(100);

    sqlx::query(
        "INSERT INTO tracks (track_id, owner_id, title, artist) VALUES ('r5', 9, 'Tune', 'Someone')",
    )
    .execute(&pool)
    .await
    .unwrap();

    let call_log = Arc::new(Mutex::new(Vec::new()));
    let sources: Vec<Arc<dyn AudioSource>> = vec![Arc::new(ScriptedSource::new(
        Provider::Scdl,
        true,
        call_log,
    ))];
    let ctx = test_context(
        pool.clone(),
        bus.clone(),
        test_settings(dir.path().to_path_buf()),
        sources,
        Arc::new(FixedExtractor::new()),
    );

    let job = JobRecord::new_download("r5".to_string(), 9, candidates(&[Provider::Scdl]), None);
    submit_job(&pool, &bus, &job, JobPriority::High)
        .await
        .unwrap();

    let _workers = spawn_worker_pools(ctx.clone());
    let done = wait_for_status(&pool, job.job_id, JobStatus::Completed, WAIT).await;
    let result = done.result.unwrap();
    let analyze_id: Uuid = serde_json::from_value(result["analyze_job_id"].clone()).unwrap();
    wait_for_status(&pool, analyze_id, JobStatus::Completed, WAIT).await;

    // Analysis landed on the track row
    let track = tunedock_jobs::db::tracks::get_track(&pool, "r5", 9)
        .await
        .unwrap()
        .expect("track row");
    assert_eq!(track.bpm, Some(128));
    assert_eq!(track.key.as_deref(), Some("F minor"));
    assert_eq!(track.danceability, Some(0.9));
    let audio_file = result["audio_file"].as_str().unwrap();
    assert_eq!(track.local_audio_url.as_deref(), Some(audio_file));

    // The persisted audio remains, the temporary wav is gone
    let wav_file = result["wav_file"].as_str().unwrap();
    assert!(ctx.audio_store.audio_path(9, audio_file).exists());
    assert!(!ctx.audio_store.audio_path(9, wav_file).exists());
}

#[tokio::test]
async fn test_clear_during_execution_is_tolerated() {
    let dir = tempfile::tempdir().unwrap();
    let pool = memory_pool().await;
    let bus = EventBus::new(100);

    let ctx = test_context(
        pool.clone(),
        bus.clone(),
        test_settings(dir.path().to_path_buf()),
        Vec::new(),
        Arc::new(FixedExtractor::new()),
    );

    let job = JobRecord::new_analyze(
        "r6".to_string(),
        1,
        AnalyzeInput {
            wav_file: "audio_z.wav".to_string(),
            audio_file: "audio_z.m4a".to_string(),
        },
    );
    // Simulate a worker mid-execution when the clear lands
    jobs::put_job(&pool, &job).await.unwrap();
    jobs::begin_attempt(&pool, job.job_id).await.unwrap();
    jobs::clear_jobs(&pool).await.unwrap();
    queue::clear_queue(&pool).await.unwrap();

    // The late completion write is a no-op, not an error
    let landed = jobs::mark_completed(&pool, job.job_id, &serde_json::json!({"late": true}))
        .await
        .unwrap();
    assert!(!landed);
    assert!(jobs::get_job(&pool, job.job_id).await.unwrap().is_none());

    // Workers keep running fine afterwards
    let _workers = spawn_worker_pools(ctx);
    let next = JobRecord::new_analyze(
        "r7".to_string(),
        1,
        AnalyzeInput {
            wav_file: "audio_w.wav".to_string(),
            audio_file: "audio_w.m4a".to_string(),
        },
    );
    submit_job(&pool, &bus, &next, JobPriority::Normal)
        .await
        .unwrap();
    wait_for_status(&pool, next.job_id, JobStatus::Completed, WAIT).await;
}
