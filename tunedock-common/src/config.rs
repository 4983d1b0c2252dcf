//! Configuration loading and storage-root resolution

use crate::{Error, Result};
use std::path::{Path, PathBuf};

/// Resolve the storage root folder following the priority order:
/// 1. Command-line argument (highest priority)
/// 2. `TUNEDOCK_ROOT` environment variable
/// 3. `root_folder` key in the TOML config file
/// 4. OS-dependent compiled default (fallback)
///
/// The storage root holds the SQLite database and the per-owner audio
/// directories.
pub fn resolve_storage_root(cli_arg: Option<&str>) -> PathBuf {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        tracing::debug!(path, "Storage root from command-line argument");
        return PathBuf::from(path);
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var("TUNEDOCK_ROOT") {
        if !path.trim().is_empty() {
            tracing::debug!(path, "Storage root from TUNEDOCK_ROOT");
            return PathBuf::from(path);
        }
    }

    // Priority 3: TOML config file
    if let Ok(config_path) = config_file_path() {
        if let Ok(toml_content) = std::fs::read_to_string(&config_path) {
            if let Ok(config) = toml_content.parse::<toml::Table>() {
                if let Some(root_folder) = config.get("root_folder").and_then(|v| v.as_str()) {
                    tracing::debug!(
                        path = root_folder,
                        config = %config_path.display(),
                        "Storage root from config file"
                    );
                    return PathBuf::from(root_folder);
                }
            }
        }
    }

    // Priority 4: OS-dependent compiled default
    let default = default_storage_root();
    tracing::debug!(path = %default.display(), "Storage root from compiled default");
    default
}

/// Get the configuration file path for the platform
///
/// Linux: `~/.config/tunedock/config.toml`, then `/etc/tunedock/config.toml`.
/// macOS/Windows: the platform config directory.
pub fn config_file_path() -> Result<PathBuf> {
    if cfg!(target_os = "linux") {
        let user_config = dirs::config_dir().map(|d| d.join("tunedock").join("config.toml"));
        if let Some(path) = user_config {
            if path.exists() {
                return Ok(path);
            }
        }
        let system_config = PathBuf::from("/etc/tunedock/config.toml");
        if system_config.exists() {
            return Ok(system_config);
        }
        Err(Error::Config("No config file found".to_string()))
    } else {
        let path = dirs::config_dir()
            .map(|d| d.join("tunedock").join("config.toml"))
            .ok_or_else(|| Error::Config("Could not determine config directory".to_string()))?;
        if path.exists() {
            Ok(path)
        } else {
            Err(Error::Config(format!("Config file not found: {:?}", path)))
        }
    }
}

/// OS-dependent default storage root
fn default_storage_root() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("tunedock"))
        .unwrap_or_else(|| PathBuf::from("./tunedock_data"))
}

/// Create the storage root (and its audio subdirectory) if missing
pub fn ensure_storage_root(root: &Path) -> Result<()> {
    std::fs::create_dir_all(root)?;
    std::fs::create_dir_all(root.join("audio"))?;
    std::fs::create_dir_all(root.join("tmp"))?;
    Ok(())
}

/// Database file location inside the storage root
pub fn database_path(root: &Path) -> PathBuf {
    root.join("tunedock.db")
}
