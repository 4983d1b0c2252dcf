//! Collaborator clients and storage helpers used by the job handlers

pub mod analysis;
pub mod audio_store;
pub mod search_index;

pub use analysis::{EssentiaHttpExtractor, FeatureExtractor, TrackFeatures};
pub use audio_store::{AudioStore, FfmpegTranscoder, StoredAudio, Transcoder};
pub use search_index::SearchIndexClient;
