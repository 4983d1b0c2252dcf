//! yt-dlp downloader (YouTube locators)

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;

use super::{run_tool, AudioSource, SourceError};
use crate::models::Provider;

pub struct YtDlpSource;

impl YtDlpSource {
    pub fn new() -> Self {
        Self
    }
}

impl Default for YtDlpSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AudioSource for YtDlpSource {
    fn provider(&self) -> Provider {
        Provider::YtDlp
    }

    async fn fetch(&self, locator: &str, work_dir: &Path) -> Result<PathBuf, SourceError> {
        let out_dir = work_dir.join("yt-dlp");
        std::fs::create_dir_all(&out_dir)?;
        let out_file = out_dir.join("audio.m4a");

        run_tool(
            "yt-dlp",
            Command::new("yt-dlp")
                .arg("-f")
                .arg("bestaudio/best")
                .arg("-x")
                .arg("--audio-format")
                .arg("m4a")
                .arg("-o")
                .arg(&out_file)
                .arg(locator),
        )
        .await?;

        let non_empty = out_file
            .metadata()
            .map(|m| m.len() > 0)
            .unwrap_or(false);
        if non_empty {
            Ok(out_file)
        } else {
            Err(SourceError::OutputMissing("yt-dlp"))
        }
    }
}
