//! scdl downloader (SoundCloud locators)

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;

use super::{newest_file_with_ext, run_tool, AudioSource, SourceError};
use crate::models::Provider;

pub struct ScdlSource;

impl ScdlSource {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ScdlSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AudioSource for ScdlSource {
    fn provider(&self) -> Provider {
        Provider::Scdl
    }

    async fn fetch(&self, locator: &str, work_dir: &Path) -> Result<PathBuf, SourceError> {
        let out_dir = work_dir.join("scdl");
        std::fs::create_dir_all(&out_dir)?;

        run_tool(
            "scdl",
            Command::new("scdl")
                .arg("-l")
                .arg(locator)
                .arg("--path")
                .arg(&out_dir)
                .arg("--onlymp3")
                .arg("--addtofile"),
        )
        .await?;

        newest_file_with_ext(&out_dir, "mp3").ok_or(SourceError::OutputMissing("scdl"))
    }
}
