//! Analyze job handler
//!
//! Feeds the downloaded wav to the analysis service, writes the extracted
//! features back to the track row, and asks the search index to refresh
//! the track's document.

use anyhow::{anyhow, Context};

use super::{ProgressReporter, WorkerContext};
use crate::db;
use crate::models::JobRecord;

/// Execute one analyze job
pub async fn run(
    ctx: &WorkerContext,
    job: &JobRecord,
    progress: &ProgressReporter,
) -> anyhow::Result<serde_json::Value> {
    let input = job
        .analyze_input()
        .ok_or_else(|| anyhow!("analyze job is missing its input payload"))?;

    progress.update(10).await;

    let outcome = execute(ctx, job, progress, &input).await;

    // The wav was only ever needed for analysis; drop it on success and
    // failure alike so retries re-render from the kept audio if needed
    ctx.audio_store.cleanup_wav(job.owner_id, &input.wav_file).await;

    outcome
}

async fn execute(
    ctx: &WorkerContext,
    job: &JobRecord,
    progress: &ProgressReporter,
    input: &crate::models::AnalyzeInput,
) -> anyhow::Result<serde_json::Value> {
    let wav_path = ctx.audio_store.audio_path(job.owner_id, &input.wav_file);

    progress.update(30).await;

    let features = ctx
        .extractor
        .analyze(&wav_path)
        .await
        .context("Feature extraction failed")?;

    progress.update(70).await;

    let updated = db::tracks::apply_analysis(
        &ctx.db,
        &job.track_id,
        job.owner_id,
        &input.audio_file,
        &features,
    )
    .await?;

    if !updated {
        // The track may have been removed from the collection mid-job
        tracing::warn!(
            track_id = %job.track_id,
            owner_id = job.owner_id,
            "Track row missing, analysis not applied"
        );
    }

    // Index refresh is best-effort: the analysis already landed in the
    // store, and search catches up on the next reindex
    if updated {
        match db::tracks::get_track(&ctx.db, &job.track_id, job.owner_id).await {
            Ok(Some(track)) => {
                if let Err(e) = ctx.search_index.upsert_track(&track).await {
                    tracing::warn!(track_id = %job.track_id, error = %e, "Search index upsert failed");
                }
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(track_id = %job.track_id, error = %e, "Track reload for indexing failed");
            }
        }
    }

    progress.update(90).await;

    tracing::info!(
        job_id = %job.job_id,
        track_id = %job.track_id,
        bpm = ?features.bpm,
        "Analysis completed"
    );

    Ok(serde_json::json!({
        "local_audio_url": input.audio_file,
        "features": features,
        "track_updated": updated,
    }))
}
