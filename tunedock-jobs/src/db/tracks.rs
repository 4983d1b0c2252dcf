//! Track row updates
//!
//! The relational store holding the collection is owned by the catalog
//! layer; the pipeline only writes back the resolved audio reference and
//! the analysis fields once an analyze job completes.

use sqlx::{Row, SqlitePool};
use tunedock_common::Result;

use crate::services::analysis::TrackFeatures;

/// Catalog fields the pipeline reads when building a search document
#[derive(Debug, Clone)]
pub struct TrackRow {
    pub track_id: String,
    pub owner_id: i64,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub local_audio_url: Option<String>,
    pub bpm: Option<i64>,
    pub key: Option<String>,
    pub danceability: Option<f64>,
    pub duration_seconds: Option<i64>,
}

/// Write the resolved audio reference and analysis fields to a track row
///
/// Only provided fields are written; absent features leave the existing
/// column value alone. Returns false when the track row no longer exists;
/// tolerated, the collection may have changed while the job ran.
pub async fn apply_analysis(
    pool: &SqlitePool,
    track_id: &str,
    owner_id: i64,
    local_audio_url: &str,
    features: &TrackFeatures,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE tracks
        SET local_audio_url = ?,
            bpm = COALESCE(?, bpm),
            key = COALESCE(?, key),
            danceability = COALESCE(?, danceability),
            duration_seconds = COALESCE(?, duration_seconds)
        WHERE track_id = ? AND owner_id = ?
        "#,
    )
    .bind(local_audio_url)
    .bind(features.bpm)
    .bind(features.key_signature())
    .bind(features.danceability)
    .bind(features.duration_seconds)
    .bind(track_id)
    .bind(owner_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Load a track row for search-index document building
pub async fn get_track(
    pool: &SqlitePool,
    track_id: &str,
    owner_id: i64,
) -> Result<Option<TrackRow>> {
    let row = sqlx::query(
        r#"
        SELECT track_id, owner_id, title, artist, album, local_audio_url,
               bpm, key, danceability, duration_seconds
        FROM tracks
        WHERE track_id = ? AND owner_id = ?
        "#,
    )
    .bind(track_id)
    .bind(owner_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| TrackRow {
        track_id: r.get("track_id"),
        owner_id: r.get("owner_id"),
        title: r.get("title"),
        artist: r.get("artist"),
        album: r.get("album"),
        local_audio_url: r.get("local_audio_url"),
        bpm: r.get("bpm"),
        key: r.get("key"),
        danceability: r.get("danceability"),
        duration_seconds: r.get("duration_seconds"),
    }))
}
