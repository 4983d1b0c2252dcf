//! spotdl downloader (Spotify locators)

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;

use super::{newest_file_with_ext, run_tool, AudioSource, SourceError};
use crate::models::Provider;

pub struct SpotdlSource;

impl SpotdlSource {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SpotdlSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AudioSource for SpotdlSource {
    fn provider(&self) -> Provider {
        Provider::Spotdl
    }

    async fn fetch(&self, locator: &str, work_dir: &Path) -> Result<PathBuf, SourceError> {
        let out_dir = work_dir.join("spotdl");
        std::fs::create_dir_all(&out_dir)?;

        run_tool(
            "spotdl",
            Command::new("spotdl")
                .arg("download")
                .arg(locator)
                .arg("--output")
                .arg(&out_dir)
                .arg("--format")
                .arg("mp3"),
        )
        .await?;

        newest_file_with_ext(&out_dir, "mp3").ok_or(SourceError::OutputMissing("spotdl"))
    }
}
