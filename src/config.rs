//! Playback configuration
//!
//! Device name, requested hardware parameters and round shape, read from an
//! optional JSON file. Every field has a default, so a partial file (or none
//! at all) is valid.

use crate::audio::device::HardwareRequest;
use crate::audio::driver::RoundPlan;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors reading a config file
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

fn default_device() -> String {
    crate::DEFAULT_DEVICE.to_string()
}

fn default_sample_rate() -> u32 {
    crate::DEFAULT_SAMPLE_RATE
}

fn default_periods() -> u32 {
    crate::DEFAULT_PERIODS
}

fn default_period_frames() -> usize {
    crate::DEFAULT_PERIOD_FRAMES
}

fn default_repetitions() -> u32 {
    crate::REPETITIONS_PER_ROUND
}

fn default_pause_ms() -> u64 {
    crate::ROUND_PAUSE.as_millis() as u64
}

/// Playback configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackConfig {
    /// PCM device name
    #[serde(default = "default_device")]
    pub device: String,
    /// Requested sample rate in Hz
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    /// Requested period count
    #[serde(default = "default_periods")]
    pub periods: u32,
    /// Requested period size in frames
    #[serde(default = "default_period_frames")]
    pub period_frames: usize,
    /// Buffer writes per round
    #[serde(default = "default_repetitions")]
    pub repetitions: u32,
    /// Pause after each drain in milliseconds
    #[serde(default = "default_pause_ms")]
    pub pause_ms: u64,
    /// Failed writes tolerated per repetition (None = retry while recovery succeeds)
    #[serde(default)]
    pub max_retries: Option<u32>,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            device: default_device(),
            sample_rate: default_sample_rate(),
            periods: default_periods(),
            period_frames: default_period_frames(),
            repetitions: default_repetitions(),
            pause_ms: default_pause_ms(),
            max_retries: None,
        }
    }
}

impl PlaybackConfig {
    /// Read and parse a config file
    pub fn try_load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load config from disk, falling back to defaults on any error
    pub fn load(path: &Path) -> Self {
        match Self::try_load(path) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "Loaded config from disk");
                config
            }
            Err(e @ ConfigError::Parse { .. }) => {
                tracing::warn!(error = %e, "Failed to parse config, using defaults");
                Self::default()
            }
            Err(ConfigError::Read { source, .. })
                if source.kind() == std::io::ErrorKind::NotFound =>
            {
                tracing::info!(path = %path.display(), "No config file found, using defaults");
                Self::default()
            }
            Err(e @ ConfigError::Read { .. }) => {
                tracing::warn!(error = %e, "Failed to read config, using defaults");
                Self::default()
            }
        }
    }

    /// Save config to disk, creating parent directories if needed
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        tracing::info!(path = %path.display(), "Config saved to disk");
        Ok(())
    }

    /// Hardware parameters to negotiate
    pub fn request(&self) -> HardwareRequest {
        HardwareRequest {
            sample_rate: self.sample_rate,
            periods: self.periods,
            period_frames: self.period_frames,
        }
    }

    /// Shape of each playback round
    pub fn plan(&self) -> RoundPlan {
        RoundPlan {
            repetitions: self.repetitions,
            max_retries: self.max_retries,
        }
    }

    pub fn pause(&self) -> Duration {
        Duration::from_millis(self.pause_ms)
    }
}
