//! Audio feature extraction client
//!
//! The analysis service is an external Essentia-based HTTP endpoint: POST a
//! wav file reference, get structured features back. The pipeline treats it
//! as an opaque capability behind the `FeatureExtractor` trait.

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Features extracted from one track's audio
///
/// Mirrors the analysis service's output; every field is optional because
/// individual extractors can fail on unusual audio without failing the
/// whole analysis.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackFeatures {
    /// Beats per minute, rounded
    pub bpm: Option<i64>,
    /// Musical key (e.g. "C", "A")
    pub key: Option<String>,
    /// Scale (e.g. "major", "minor")
    pub scale: Option<String>,
    /// Danceability score (0.0-1.0)
    pub danceability: Option<f64>,
    pub mood_happy: Option<f64>,
    pub mood_sad: Option<f64>,
    pub mood_relaxed: Option<f64>,
    pub mood_aggressive: Option<f64>,
    /// Track length in seconds, when the service reports it
    pub duration_seconds: Option<i64>,
}

impl TrackFeatures {
    /// Combined key signature for the track row ("C major"), if both parts
    /// were detected
    pub fn key_signature(&self) -> Option<String> {
        match (&self.key, &self.scale) {
            (Some(key), Some(scale)) => Some(format!("{} {}", key, scale)),
            _ => None,
        }
    }
}

/// Uniform analysis capability: audio in, structured features out
#[async_trait]
pub trait FeatureExtractor: Send + Sync {
    async fn analyze(&self, wav_path: &Path) -> anyhow::Result<TrackFeatures>;
}

/// HTTP client for the Essentia analysis service
pub struct EssentiaHttpExtractor {
    client: reqwest::Client,
    endpoint: String,
}

impl EssentiaHttpExtractor {
    pub fn new(endpoint: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
        }
    }
}

#[async_trait]
impl FeatureExtractor for EssentiaHttpExtractor {
    async fn analyze(&self, wav_path: &Path) -> anyhow::Result<TrackFeatures> {
        let filename = wav_path
            .to_str()
            .ok_or_else(|| anyhow!("Non-UTF-8 wav path: {}", wav_path.display()))?;

        tracing::debug!(endpoint = %self.endpoint, wav = filename, "Calling analysis service");

        let response = self
            .client
            .post(&self.endpoint)
            .json(&serde_json::json!({ "filename": filename }))
            .send()
            .await
            .context("Analysis service unreachable")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Analysis service error: {} {}", status, body));
        }

        let features: TrackFeatures = response
            .json()
            .await
            .context("Failed to parse analysis service response")?;

        tracing::info!(
            wav = filename,
            bpm = ?features.bpm,
            key = ?features.key_signature(),
            "Analysis completed"
        );

        Ok(features)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_features_parse_from_service_output() {
        let json = r#"{
            "bpm": 124,
            "key": "A",
            "scale": "minor",
            "danceability": 0.82,
            "mood_happy": 0.4,
            "mood_sad": 0.1,
            "mood_relaxed": 0.2,
            "mood_aggressive": 0.3
        }"#;

        let features: TrackFeatures = serde_json::from_str(json).unwrap();
        assert_eq!(features.bpm, Some(124));
        assert_eq!(features.key_signature().as_deref(), Some("A minor"));
        assert_eq!(features.danceability, Some(0.82));
        assert_eq!(features.duration_seconds, None);
    }

    #[test]
    fn test_partial_output_is_tolerated() {
        let features: TrackFeatures = serde_json::from_str(r#"{"bpm": 98}"#).unwrap();
        assert_eq!(features.bpm, Some(98));
        assert!(features.key_signature().is_none());
    }

    #[test]
    fn test_key_signature_needs_both_parts() {
        let features = TrackFeatures {
            key: Some("C".to_string()),
            ..Default::default()
        };
        assert!(features.key_signature().is_none());
    }
}
