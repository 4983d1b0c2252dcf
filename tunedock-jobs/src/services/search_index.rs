//! Search index collaborator
//!
//! After an analyze job completes, the affected track's document is
//! upserted so full-text and vector search reflect the new audio/analysis
//! state. The index owns its schema; this client only posts documents.

use anyhow::{anyhow, Context};

use crate::db::tracks::TrackRow;

/// Client for a Meilisearch-style document index
pub struct SearchIndexClient {
    client: reqwest::Client,
    base_url: Option<String>,
    api_key: Option<String>,
}

impl SearchIndexClient {
    pub fn new(base_url: Option<String>, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            api_key,
        }
    }

    /// Client that skips indexing entirely (no index configured)
    pub fn disabled() -> Self {
        Self::new(None, None)
    }

    /// Upsert one track document
    pub async fn upsert_track(&self, track: &TrackRow) -> anyhow::Result<()> {
        let Some(base_url) = &self.base_url else {
            tracing::debug!(track_id = %track.track_id, "Search index not configured, skipping upsert");
            return Ok(());
        };

        let url = format!("{}/indexes/tracks/documents", base_url.trim_end_matches('/'));
        let document = serde_json::json!([{
            "id": format!("{}-{}", track.owner_id, track.track_id),
            "track_id": track.track_id,
            "owner_id": track.owner_id,
            "title": track.title,
            "artist": track.artist,
            "album": track.album,
            "local_audio_url": track.local_audio_url,
            "bpm": track.bpm,
            "key": track.key,
            "danceability": track.danceability,
            "duration_seconds": track.duration_seconds,
        }]);

        let mut request = self.client.post(&url).json(&document);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.context("Search index unreachable")?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Search index upsert failed: {} {}", status, body));
        }

        tracing::debug!(track_id = %track.track_id, "Track document upserted");
        Ok(())
    }
}
