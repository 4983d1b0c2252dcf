//! freyr downloader (Apple Music and Spotify locators)

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;

use super::{newest_file_with_ext, run_tool, AudioSource, SourceError};
use crate::models::Provider;

pub struct FreyrSource;

impl FreyrSource {
    pub fn new() -> Self {
        Self
    }
}

impl Default for FreyrSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AudioSource for FreyrSource {
    fn provider(&self) -> Provider {
        Provider::Freyr
    }

    async fn fetch(&self, locator: &str, work_dir: &Path) -> Result<PathBuf, SourceError> {
        let out_dir = work_dir.join("freyr");
        std::fs::create_dir_all(&out_dir)?;

        run_tool(
            "freyr",
            Command::new("freyr")
                .arg("get")
                .arg("--no-tree")
                .arg("--directory")
                .arg(&out_dir)
                .arg(locator),
        )
        .await?;

        newest_file_with_ext(&out_dir, "m4a").ok_or(SourceError::OutputMissing("freyr"))
    }
}
