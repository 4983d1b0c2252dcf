//! External audio sources
//!
//! Each provider wraps one command-line downloader behind the uniform
//! `AudioSource` capability: given a locator, produce a local audio file or
//! fail. Providers are rate-limited, unreliable resources; a single
//! provider failure feeds the fallback chain, never the whole job.

mod freyr;
mod scdl;
mod spotdl;
mod ytdlp;

pub use freyr::FreyrSource;
pub use scdl::ScdlSource;
pub use spotdl::SpotdlSource;
pub use ytdlp::YtDlpSource;

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;

use crate::models::Provider;

/// Download tool timeout; a track fetch that takes longer has hung
const FETCH_TIMEOUT: Duration = Duration::from_secs(120);

/// Audio source errors
#[derive(Debug, Error)]
pub enum SourceError {
    /// Downloader binary not found in PATH
    #[error("{0} binary not found in PATH")]
    ToolMissing(&'static str),

    /// Downloader exited non-zero
    #[error("{tool} failed (exit code {code:?}): {stderr}")]
    ToolFailed {
        tool: &'static str,
        code: Option<i32>,
        stderr: String,
    },

    /// Downloader did not finish within the timeout
    #[error("{0} timed out")]
    Timeout(&'static str),

    /// Tool reported success but no usable audio file appeared
    #[error("downloaded file from {0} not found")]
    OutputMissing(&'static str),

    /// I/O error while staging the download
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Uniform fetch capability over one external source
///
/// `fetch` stages the download under `work_dir` and returns the path of the
/// fetched audio file. Implementations are agnostic to where the file goes
/// afterwards; persistence into the owner's storage area is the caller's
/// concern.
#[async_trait]
pub trait AudioSource: Send + Sync {
    /// Which provider this source implements
    fn provider(&self) -> Provider;

    /// Fetch audio for a locator, staging files under `work_dir`
    async fn fetch(&self, locator: &str, work_dir: &Path) -> Result<PathBuf, SourceError>;
}

/// Provider lookup injected into the download handler
pub struct ProviderRegistry {
    sources: HashMap<Provider, Arc<dyn AudioSource>>,
}

impl ProviderRegistry {
    /// Registry with the four standard downloaders
    pub fn standard() -> Self {
        let sources: Vec<Arc<dyn AudioSource>> = vec![
            Arc::new(FreyrSource::new()),
            Arc::new(SpotdlSource::new()),
            Arc::new(YtDlpSource::new()),
            Arc::new(ScdlSource::new()),
        ];
        Self::from_sources(sources)
    }

    /// Registry over an explicit source list (tests inject scripted sources)
    pub fn from_sources(sources: Vec<Arc<dyn AudioSource>>) -> Self {
        Self {
            sources: sources.into_iter().map(|s| (s.provider(), s)).collect(),
        }
    }

    pub fn get(&self, provider: Provider) -> Option<Arc<dyn AudioSource>> {
        self.sources.get(&provider).cloned()
    }
}

/// Run a downloader command with a timeout, mapping the usual failures
///
/// Stdout/stderr are captured; stderr is folded into the error on non-zero
/// exit so the chain can aggregate a useful reason per provider.
pub(crate) async fn run_tool(
    tool: &'static str,
    command: &mut Command,
) -> Result<std::process::Output, SourceError> {
    tracing::debug!(tool, "Running downloader");

    let child = command
        .kill_on_drop(true)
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .spawn()
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SourceError::ToolMissing(tool)
            } else {
                SourceError::Io(e)
            }
        })?;

    let output = tokio::time::timeout(FETCH_TIMEOUT, child.wait_with_output())
        .await
        .map_err(|_| SourceError::Timeout(tool))??;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr = stderr.chars().take(500).collect::<String>();
        return Err(SourceError::ToolFailed {
            tool,
            code: output.status.code(),
            stderr,
        });
    }

    Ok(output)
}

/// Newest non-empty file with the given extension in a directory
///
/// Downloaders name their output after track metadata, so the freshest
/// file is the one this invocation produced.
pub(crate) fn newest_file_with_ext(dir: &Path, ext: &str) -> Option<PathBuf> {
    let mut candidates: Vec<(PathBuf, std::time::SystemTime)> = std::fs::read_dir(dir)
        .ok()?
        .flatten()
        .filter_map(|entry| {
            let path = entry.path();
            let meta = entry.metadata().ok()?;
            if path.extension().and_then(|e| e.to_str()) == Some(ext) && meta.len() > 0 {
                Some((path, meta.modified().ok()?))
            } else {
                None
            }
        })
        .collect();

    candidates.sort_by(|a, b| b.1.cmp(&a.1));
    candidates.into_iter().map(|(path, _)| path).next()
}
