//! Job record and its state machine
//!
//! A job record is the durable unit of trackable async work. It is created
//! by the API on submission, mutated exclusively by the worker that claimed
//! it, and becomes immutable once it reaches a terminal state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tunedock_common::events::JobKind;
use uuid::Uuid;

/// Job execution status
///
/// Transitions are monotone:
/// queued → processing → completed | failed, with processing → queued
/// allowed only while retries remain. Terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting in the queue for a worker
    Queued,
    /// Claimed and executing
    Processing,
    /// Finished successfully; `result` is set
    Completed,
    /// Out of retries; `error` is set
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(JobStatus::Queued),
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }
}

/// Queue priority band
///
/// High drains before normal before low; FIFO within a band. A long-running
/// low-priority job is never preempted by a later high-priority submission.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPriority {
    High,
    #[default]
    Normal,
    Low,
}

impl JobPriority {
    /// Band number used for queue ordering (lower drains first)
    pub fn band(&self) -> i64 {
        match self {
            JobPriority::High => 0,
            JobPriority::Normal => 1,
            JobPriority::Low => 2,
        }
    }

    pub fn from_band(band: i64) -> Self {
        match band {
            0 => JobPriority::High,
            2 => JobPriority::Low,
            _ => JobPriority::Normal,
        }
    }
}

/// External audio source a track can be fetched from
///
/// Each provider wraps one downloader tool; the pipeline is agnostic to how
/// a provider authenticates or resolves its locator internally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Provider {
    /// Apple Music / Spotify via freyr
    #[serde(rename = "freyr")]
    Freyr,
    /// Spotify via spotdl
    #[serde(rename = "spotdl")]
    Spotdl,
    /// YouTube via yt-dlp
    #[serde(rename = "yt-dlp")]
    YtDlp,
    /// SoundCloud via scdl
    #[serde(rename = "scdl")]
    Scdl,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Freyr => "freyr",
            Provider::Spotdl => "spotdl",
            Provider::YtDlp => "yt-dlp",
            Provider::Scdl => "scdl",
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One candidate audio source for a download job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceCandidate {
    /// Provider to fetch through
    pub provider: Provider,
    /// Provider-specific locator (track URL)
    pub locator: String,
}

/// Input payload for an analyze job
///
/// Created by the download handler when it chains the follow-on analysis;
/// file names are relative to the owner's audio directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzeInput {
    /// Mono wav rendition fed to the feature extractor
    pub wav_file: String,
    /// Original downloaded audio file kept for playback
    pub audio_file: String,
}

/// Durable unit of work and its status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    /// Unique job identifier, generated at submission
    pub job_id: Uuid,

    /// Job kind (download or analyze)
    pub kind: JobKind,

    /// Target track identifier
    pub track_id: String,

    /// Owning collection identifier
    pub owner_id: i64,

    /// Ordered candidate sources (download jobs; empty for analyze)
    pub candidate_sources: Vec<SourceCandidate>,

    /// Optional hint: try this provider's candidates first
    pub preferred_provider: Option<Provider>,

    /// Kind-specific input payload (analyze: wav/audio file references)
    pub input: Option<serde_json::Value>,

    /// Current execution status
    pub status: JobStatus,

    /// Progress percentage, 0-100; meaningful only while processing
    pub progress: u8,

    /// Opaque result payload, set only on completion
    pub result: Option<serde_json::Value>,

    /// Failure reason, set only on failure
    pub error: Option<String>,

    /// Execution attempts so far; bounded by max_retries + 1
    pub attempt_count: u32,

    /// Submission time
    pub created_at: DateTime<Utc>,

    /// Last status/progress mutation time
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    /// Create a download job for a track with its candidate sources
    pub fn new_download(
        track_id: String,
        owner_id: i64,
        candidate_sources: Vec<SourceCandidate>,
        preferred_provider: Option<Provider>,
    ) -> Self {
        let now = Utc::now();
        Self {
            job_id: Uuid::new_v4(),
            kind: JobKind::Download,
            track_id,
            owner_id,
            candidate_sources,
            preferred_provider,
            input: None,
            status: JobStatus::Queued,
            progress: 0,
            result: None,
            error: None,
            attempt_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Create the follow-on analyze job for freshly downloaded audio
    pub fn new_analyze(track_id: String, owner_id: i64, input: AnalyzeInput) -> Self {
        let now = Utc::now();
        Self {
            job_id: Uuid::new_v4(),
            kind: JobKind::Analyze,
            track_id,
            owner_id,
            candidate_sources: Vec::new(),
            preferred_provider: None,
            input: serde_json::to_value(input).ok(),
            status: JobStatus::Queued,
            progress: 0,
            result: None,
            error: None,
            attempt_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// True once the job reached completed or failed
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Analyze input payload, if this is an analyze job
    pub fn analyze_input(&self) -> Option<AnalyzeInput> {
        self.input
            .as_ref()
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_download_starts_queued() {
        let job = JobRecord::new_download(
            "r100".to_string(),
            7,
            vec![SourceCandidate {
                provider: Provider::YtDlp,
                locator: "https://youtube.com/watch?v=abc".to_string(),
            }],
            None,
        );

        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.progress, 0);
        assert_eq!(job.attempt_count, 0);
        assert!(job.result.is_none());
        assert!(job.error.is_none());
        assert!(!job.is_terminal());
    }

    #[test]
    fn test_analyze_input_round_trip() {
        let job = JobRecord::new_analyze(
            "r100".to_string(),
            7,
            AnalyzeInput {
                wav_file: "audio_x.wav".to_string(),
                audio_file: "audio_x.m4a".to_string(),
            },
        );

        let input = job.analyze_input().expect("input present");
        assert_eq!(input.wav_file, "audio_x.wav");
        assert_eq!(input.audio_file, "audio_x.m4a");
        assert!(job.candidate_sources.is_empty());
    }

    #[test]
    fn test_status_parse_matches_serde() {
        for status in [
            JobStatus::Queued,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(JobStatus::parse(status.as_str()), Some(status));
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
        }
        assert_eq!(JobStatus::parse("active"), None);
    }

    #[test]
    fn test_priority_bands_order() {
        assert!(JobPriority::High.band() < JobPriority::Normal.band());
        assert!(JobPriority::Normal.band() < JobPriority::Low.band());
        assert_eq!(JobPriority::from_band(0), JobPriority::High);
        assert_eq!(JobPriority::from_band(1), JobPriority::Normal);
        assert_eq!(JobPriority::from_band(2), JobPriority::Low);
    }

    #[test]
    fn test_provider_serde_names() {
        let json = serde_json::to_string(&Provider::YtDlp).unwrap();
        assert_eq!(json, "\"yt-dlp\"");
        let back: Provider = serde_json::from_str("\"spotdl\"").unwrap();
        assert_eq!(back, Provider::Spotdl);
    }
}
