//! Download job handler
//!
//! Runs the provider fallback chain, persists the fetched audio into the
//! owner's storage area, and chains the follow-on analyze job.

use anyhow::{anyhow, Context};

use super::{chain, submit_job, ProgressReporter, WorkerContext};
use crate::models::{AnalyzeInput, JobPriority, JobRecord};

/// Execute one download job
///
/// Returns the opaque result payload stored on completion. Any error is a
/// handler failure the pool converts into a retry or terminal failure.
pub async fn run(
    ctx: &WorkerContext,
    job: &JobRecord,
    progress: &ProgressReporter,
) -> anyhow::Result<serde_json::Value> {
    if job.candidate_sources.is_empty() {
        return Err(anyhow!("download job has no candidate sources"));
    }

    progress.update(10).await;

    let work_dir = ctx.audio_store.job_work_dir(job.job_id);
    tokio::fs::create_dir_all(&work_dir)
        .await
        .context("Failed to create job work directory")?;

    let outcome = execute(ctx, job, progress, &work_dir).await;

    // Staged downloads are scratch data either way
    ctx.audio_store.cleanup_work_dir(job.job_id).await;

    outcome
}

async fn execute(
    ctx: &WorkerContext,
    job: &JobRecord,
    progress: &ProgressReporter,
    work_dir: &std::path::Path,
) -> anyhow::Result<serde_json::Value> {
    let ordered = chain::order_candidates(&job.candidate_sources, job.preferred_provider);

    progress.update(30).await;

    let outcome = chain::fetch_first_success(&ctx.providers, &ordered, work_dir).await?;

    let stored = ctx
        .audio_store
        .persist(job.owner_id, &outcome.fetched)
        .await?;

    progress.update(70).await;

    // Chain the analysis; the user sees one logical flow, download → analyze
    let analyze_job = JobRecord::new_analyze(
        job.track_id.clone(),
        job.owner_id,
        AnalyzeInput {
            wav_file: stored.wav_file.clone(),
            audio_file: stored.audio_file.clone(),
        },
    );
    submit_job(&ctx.db, &ctx.bus, &analyze_job, JobPriority::Normal)
        .await
        .context("Failed to enqueue analyze job")?;

    progress.update(90).await;

    tracing::info!(
        job_id = %job.job_id,
        track_id = %job.track_id,
        provider = %outcome.provider,
        analyze_job_id = %analyze_job.job_id,
        "Download completed, analysis queued"
    );

    Ok(serde_json::json!({
        "provider": outcome.provider,
        "audio_file": stored.audio_file,
        "wav_file": stored.wav_file,
        "analyze_job_id": analyze_job.job_id,
        "failed_sources": outcome.failures,
    }))
}
