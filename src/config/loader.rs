// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::Result;

/// Environment variable overriding `[runner].channels`.
pub const CHANNELS_ENV: &str = "JOBQUEUE_CHANNELS";

/// Read and deserialize a config file, without semantic validation.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let contents = fs::read_to_string(path.as_ref())?;
    let config: RawConfigFile = toml::from_str(&contents)?;
    Ok(config)
}

/// Load a config file, apply the `JOBQUEUE_CHANNELS` override and validate.
///
/// Validation rejects unknown or self `after` references, seed cycles,
/// invalid channel strings, an empty database list and non-positive
/// timeouts.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ConfigFile> {
    let channels = std::env::var(CHANNELS_ENV).ok();
    load_with_channels(path, channels)
}

/// Like [`load_and_validate`], with an explicit channel string override.
pub fn load_with_channels(path: impl AsRef<Path>, channels: Option<String>) -> Result<ConfigFile> {
    let mut raw = load_from_path(&path)?;
    if let Some(channels) = channels.filter(|c| !c.trim().is_empty()) {
        raw.runner.channels = Some(channels);
    }
    ConfigFile::try_from(raw)
}

/// `Jobqueue.toml` in the current working directory.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("Jobqueue.toml")
}
