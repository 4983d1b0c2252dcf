//! Configuration for tunedock-jobs
//!
//! Settings resolve ENV → TOML config file → compiled defaults. The worker
//! defaults are deliberate admission control: the download pool stays small
//! because external providers rate-limit, while analysis is local
//! computation and runs wider.

use serde::Deserialize;
use std::path::PathBuf;
use tracing::{info, warn};
use tunedock_common::events::JobKind;

/// Resolved runtime settings for the service
#[derive(Debug, Clone)]
pub struct JobsSettings {
    /// HTTP listen port
    pub port: u16,
    /// Storage root (database, audio areas, staging)
    pub storage_root: PathBuf,
    /// Analysis service endpoint
    pub analysis_url: String,
    /// Search index base URL; None disables indexing
    pub search_index_url: Option<String>,
    /// Search index API key
    pub search_index_api_key: Option<String>,
    /// Download worker count
    pub download_concurrency: usize,
    /// Analyze worker count
    pub analyze_concurrency: usize,
    /// Retries after the first failed download attempt
    pub download_max_retries: u32,
    /// Retries after the first failed analyze attempt
    pub analyze_max_retries: u32,
    /// Base backoff before a download retry (doubles per attempt)
    pub download_backoff_ms: u64,
    /// Base backoff before an analyze retry (doubles per attempt)
    pub analyze_backoff_ms: u64,
    /// How long a claim may stay un-finished before the sweep requeues it
    pub claim_visibility_timeout_secs: u64,
    /// Idle worker poll interval between empty claims
    pub worker_poll_interval_ms: u64,
    /// Per-job SSE streams close after this much inactivity
    pub sse_idle_timeout_secs: u64,
    /// Event bus channel capacity
    pub event_bus_capacity: usize,
}

impl JobsSettings {
    pub fn defaults(storage_root: PathBuf) -> Self {
        Self {
            port: 5740,
            storage_root,
            analysis_url: "http://127.0.0.1:8001/analyze".to_string(),
            search_index_url: None,
            search_index_api_key: None,
            download_concurrency: 2,
            analyze_concurrency: 3,
            download_max_retries: 2,
            analyze_max_retries: 1,
            download_backoff_ms: 2000,
            analyze_backoff_ms: 1000,
            // Must comfortably exceed the worst-case handler run (four
            // candidate fetches at the 2-minute tool timeout, plus ffmpeg)
            claim_visibility_timeout_secs: 900,
            worker_poll_interval_ms: 500,
            sse_idle_timeout_secs: 600,
            event_bus_capacity: 1000,
        }
    }

    pub fn concurrency(&self, kind: JobKind) -> usize {
        match kind {
            JobKind::Download => self.download_concurrency,
            JobKind::Analyze => self.analyze_concurrency,
        }
    }

    pub fn max_retries(&self, kind: JobKind) -> u32 {
        match kind {
            JobKind::Download => self.download_max_retries,
            JobKind::Analyze => self.analyze_max_retries,
        }
    }

    /// Upper bound on execution attempts (`max_retries + 1`)
    pub fn max_attempts(&self, kind: JobKind) -> u32 {
        self.max_retries(kind) + 1
    }

    pub fn backoff_ms(&self, kind: JobKind) -> u64 {
        match kind {
            JobKind::Download => self.download_backoff_ms,
            JobKind::Analyze => self.analyze_backoff_ms,
        }
    }
}

/// On-disk configuration file shape; every field optional
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub root_folder: Option<String>,
    pub port: Option<u16>,
    pub analysis_url: Option<String>,
    pub search_index_url: Option<String>,
    pub search_index_api_key: Option<String>,
    pub download_concurrency: Option<usize>,
    pub analyze_concurrency: Option<usize>,
    pub download_max_retries: Option<u32>,
    pub analyze_max_retries: Option<u32>,
    pub download_backoff_ms: Option<u64>,
    pub analyze_backoff_ms: Option<u64>,
    pub claim_visibility_timeout_secs: Option<u64>,
    pub worker_poll_interval_ms: Option<u64>,
    pub sse_idle_timeout_secs: Option<u64>,
    pub event_bus_capacity: Option<usize>,
}

/// Resolve service settings for a storage root
///
/// TOML values override the compiled defaults, environment variables
/// override both.
pub fn load_settings(storage_root: PathBuf) -> JobsSettings {
    let mut settings = JobsSettings::defaults(storage_root);

    if let Ok(path) = tunedock_common::config::config_file_path() {
        match std::fs::read_to_string(&path) {
            Ok(content) => match toml::from_str::<TomlConfig>(&content) {
                Ok(config) => {
                    apply_toml(&mut settings, config);
                    info!("Loaded configuration from {}", path.display());
                }
                Err(e) => warn!("Ignoring malformed config file {}: {}", path.display(), e),
            },
            Err(e) => warn!("Could not read config file {}: {}", path.display(), e),
        }
    }

    apply_env(&mut settings);

    info!(
        port = settings.port,
        download_concurrency = settings.download_concurrency,
        analyze_concurrency = settings.analyze_concurrency,
        analysis_url = %settings.analysis_url,
        search_index = settings.search_index_url.is_some(),
        "Settings resolved"
    );

    settings
}

fn apply_toml(settings: &mut JobsSettings, config: TomlConfig) {
    if let Some(v) = config.port {
        settings.port = v;
    }
    if let Some(v) = config.analysis_url {
        settings.analysis_url = v;
    }
    if config.search_index_url.is_some() {
        settings.search_index_url = config.search_index_url;
    }
    if config.search_index_api_key.is_some() {
        settings.search_index_api_key = config.search_index_api_key;
    }
    if let Some(v) = config.download_concurrency {
        settings.download_concurrency = v.max(1);
    }
    if let Some(v) = config.analyze_concurrency {
        settings.analyze_concurrency = v.max(1);
    }
    if let Some(v) = config.download_max_retries {
        settings.download_max_retries = v;
    }
    if let Some(v) = config.analyze_max_retries {
        settings.analyze_max_retries = v;
    }
    if let Some(v) = config.download_backoff_ms {
        settings.download_backoff_ms = v;
    }
    if let Some(v) = config.analyze_backoff_ms {
        settings.analyze_backoff_ms = v;
    }
    if let Some(v) = config.claim_visibility_timeout_secs {
        settings.claim_visibility_timeout_secs = v.max(1);
    }
    if let Some(v) = config.worker_poll_interval_ms {
        settings.worker_poll_interval_ms = v.max(50);
    }
    if let Some(v) = config.sse_idle_timeout_secs {
        settings.sse_idle_timeout_secs = v.max(1);
    }
    if let Some(v) = config.event_bus_capacity {
        settings.event_bus_capacity = v.max(16);
    }
}

fn apply_env(settings: &mut JobsSettings) {
    if let Some(v) = env_parse::<u16>("TUNEDOCK_PORT") {
        settings.port = v;
    }
    if let Ok(v) = std::env::var("TUNEDOCK_ANALYSIS_URL") {
        if !v.trim().is_empty() {
            settings.analysis_url = v;
        }
    }
    if let Ok(v) = std::env::var("TUNEDOCK_SEARCH_INDEX_URL") {
        if !v.trim().is_empty() {
            settings.search_index_url = Some(v);
        }
    }
    if let Ok(v) = std::env::var("TUNEDOCK_SEARCH_INDEX_API_KEY") {
        if !v.trim().is_empty() {
            settings.search_index_api_key = Some(v);
        }
    }
    if let Some(v) = env_parse::<usize>("TUNEDOCK_DOWNLOAD_CONCURRENCY") {
        settings.download_concurrency = v.max(1);
    }
    if let Some(v) = env_parse::<usize>("TUNEDOCK_ANALYZE_CONCURRENCY") {
        settings.analyze_concurrency = v.max(1);
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    match std::env::var(name) {
        Ok(value) => match value.trim().parse() {
            Ok(parsed) => Some(parsed),
            Err(_) => {
                warn!("Ignoring unparseable {}: {:?}", name, value);
                None
            }
        },
        Err(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_defaults_keep_download_pool_small() {
        let settings = JobsSettings::defaults(PathBuf::from("/tmp/x"));
        assert!(settings.download_concurrency < settings.analyze_concurrency);
        assert_eq!(settings.max_attempts(JobKind::Download), 3);
        assert_eq!(settings.max_attempts(JobKind::Analyze), 2);
    }

    #[test]
    fn test_toml_overrides_defaults() {
        let mut settings = JobsSettings::defaults(PathBuf::from("/tmp/x"));
        let config: TomlConfig = toml::from_str(
            r#"
            port = 6000
            analyze_concurrency = 5
            download_max_retries = 4
            "#,
        )
        .unwrap();

        apply_toml(&mut settings, config);
        assert_eq!(settings.port, 6000);
        assert_eq!(settings.analyze_concurrency, 5);
        assert_eq!(settings.max_attempts(JobKind::Download), 5);
        // Untouched fields keep defaults
        assert_eq!(settings.download_concurrency, 2);
    }

    #[test]
    #[serial]
    fn test_env_overrides_toml() {
        let mut settings = JobsSettings::defaults(PathBuf::from("/tmp/x"));
        settings.port = 6000;

        std::env::set_var("TUNEDOCK_PORT", "7000");
        std::env::set_var("TUNEDOCK_DOWNLOAD_CONCURRENCY", "0");
        apply_env(&mut settings);
        std::env::remove_var("TUNEDOCK_PORT");
        std::env::remove_var("TUNEDOCK_DOWNLOAD_CONCURRENCY");

        assert_eq!(settings.port, 7000);
        // Zero workers would stall the queue; clamped to one
        assert_eq!(settings.download_concurrency, 1);
    }
}
