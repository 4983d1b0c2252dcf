//! Audio file persistence
//!
//! Downloads are staged in a per-job work directory under `tmp/`, then
//! persisted into the owner's storage area (`audio/<owner_id>/`) alongside
//! a mono wav rendition for the analysis service. The wav is temporary and
//! cleaned up once analysis finishes.

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::process::Command;
use uuid::Uuid;

/// Wav rendition capability, separated so tests can avoid ffmpeg
#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn to_mono_wav(&self, src: &Path, dst: &Path) -> anyhow::Result<()>;
}

/// ffmpeg-backed transcoder used in production
pub struct FfmpegTranscoder;

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn to_mono_wav(&self, src: &Path, dst: &Path) -> anyhow::Result<()> {
        let output = Command::new("ffmpeg")
            .arg("-y")
            .arg("-i")
            .arg(src)
            .arg("-ac")
            .arg("1")
            .arg(dst)
            .kill_on_drop(true)
            .output()
            .await
            .context("Failed to run ffmpeg")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stderr = stderr.chars().take(500).collect::<String>();
            return Err(anyhow!(
                "ffmpeg failed (exit code {:?}): {}",
                output.status.code(),
                stderr
            ));
        }

        Ok(())
    }
}

/// Names of the files persisted for one download
#[derive(Debug, Clone)]
pub struct StoredAudio {
    /// Original audio file, kept for playback
    pub audio_file: String,
    /// Mono wav rendition for analysis
    pub wav_file: String,
}

/// Storage-root file layout used by the handlers
pub struct AudioStore {
    root: PathBuf,
    transcoder: Arc<dyn Transcoder>,
}

impl AudioStore {
    pub fn new(root: PathBuf, transcoder: Arc<dyn Transcoder>) -> Self {
        Self { root, transcoder }
    }

    /// Scratch directory for one job's staged downloads
    pub fn job_work_dir(&self, job_id: Uuid) -> PathBuf {
        self.root.join("tmp").join(format!("job_{}", job_id))
    }

    /// Absolute path of a persisted file in an owner's storage area
    pub fn audio_path(&self, owner_id: i64, file_name: &str) -> PathBuf {
        self.root
            .join("audio")
            .join(owner_id.to_string())
            .join(file_name)
    }

    /// Move fetched audio into the owner's storage area and render the wav
    pub async fn persist(&self, owner_id: i64, fetched: &Path) -> anyhow::Result<StoredAudio> {
        let ext = fetched
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("m4a");
        let base_name = format!("audio_{}", Uuid::new_v4().simple());
        let audio_file = format!("{}.{}", base_name, ext);
        let wav_file = format!("{}.wav", base_name);

        let owner_dir = self.root.join("audio").join(owner_id.to_string());
        tokio::fs::create_dir_all(&owner_dir)
            .await
            .context("Failed to create owner audio directory")?;

        let audio_dest = owner_dir.join(&audio_file);
        let wav_dest = owner_dir.join(&wav_file);

        tokio::fs::copy(fetched, &audio_dest)
            .await
            .with_context(|| format!("Failed to store audio file {}", audio_dest.display()))?;

        self.transcoder
            .to_mono_wav(&audio_dest, &wav_dest)
            .await
            .context("Wav conversion failed")?;

        tracing::info!(
            audio = %audio_dest.display(),
            wav = %wav_dest.display(),
            "Audio persisted"
        );

        Ok(StoredAudio {
            audio_file,
            wav_file,
        })
    }

    /// Delete the temporary wav once analysis is done
    ///
    /// Best-effort: a missing file is fine, the job already succeeded.
    pub async fn cleanup_wav(&self, owner_id: i64, wav_file: &str) {
        let path = self.audio_path(owner_id, wav_file);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => tracing::debug!(wav = %path.display(), "Cleaned up wav file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(wav = %path.display(), error = %e, "Wav cleanup failed"),
        }
    }

    /// Drop a job's staging directory
    pub async fn cleanup_work_dir(&self, job_id: Uuid) {
        let dir = self.job_work_dir(job_id);
        if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(dir = %dir.display(), error = %e, "Work dir cleanup failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Test transcoder that just copies bytes instead of invoking ffmpeg
    struct CopyTranscoder;

    #[async_trait]
    impl Transcoder for CopyTranscoder {
        async fn to_mono_wav(&self, src: &Path, dst: &Path) -> anyhow::Result<()> {
            tokio::fs::copy(src, dst).await?;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_persist_places_files_in_owner_area() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = AudioStore::new(dir.path().to_path_buf(), Arc::new(CopyTranscoder));

        let fetched = dir.path().join("fetched.m4a");
        tokio::fs::write(&fetched, b"audio-bytes").await.unwrap();

        let stored = store.persist(7, &fetched).await.expect("persist");
        assert!(stored.audio_file.ends_with(".m4a"));
        assert!(stored.wav_file.ends_with(".wav"));

        assert!(store.audio_path(7, &stored.audio_file).exists());
        assert!(store.audio_path(7, &stored.wav_file).exists());
    }

    #[tokio::test]
    async fn test_cleanup_wav_is_best_effort() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = AudioStore::new(dir.path().to_path_buf(), Arc::new(CopyTranscoder));

        // Missing file must not error or panic
        store.cleanup_wav(7, "never_existed.wav").await;

        let fetched = dir.path().join("fetched.mp3");
        tokio::fs::write(&fetched, b"audio-bytes").await.unwrap();
        let stored = store.persist(7, &fetched).await.unwrap();

        store.cleanup_wav(7, &stored.wav_file).await;
        assert!(!store.audio_path(7, &stored.wav_file).exists());
        assert!(store.audio_path(7, &stored.audio_file).exists());
    }
}
