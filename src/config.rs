//! Host configuration.
//!
//! The idle polling interval and the unload safety countdown are tunable
//! constants owned by whoever embeds the host.  They are read once from
//! `$XDG_CONFIG_HOME/vstkeep/host.json` (or an explicit path) and fall back
//! to the built-in defaults for anything missing.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Default idle period: 50 ms, i.e. 20 Hz.
pub const DEFAULT_IDLE_INTERVAL_MS: u64 = 50;

/// Default unload safety window: 10 seconds worth of idle ticks.
pub const DEFAULT_UNLOAD_COUNTDOWN_TICKS: u32 = (10_000 / DEFAULT_IDLE_INTERVAL_MS) as u32;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Period of the idle timer in milliseconds.
    pub idle_interval_ms: u64,
    /// Number of idle ticks a released library waits before it is unloaded.
    pub unload_countdown_ticks: u32,
    /// Sample rate announced to plugins when they are opened.
    pub sample_rate: f64,
    /// Maximum block size announced to plugins when they are opened.
    pub block_size: usize,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            idle_interval_ms: DEFAULT_IDLE_INTERVAL_MS,
            unload_countdown_ticks: DEFAULT_UNLOAD_COUNTDOWN_TICKS,
            sample_rate: 44_100.0,
            block_size: 512,
        }
    }
}

impl HostConfig {
    /// Location of the user's config file, if the platform has a config dir.
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("vstkeep").join("host.json"))
    }

    /// Load the user's config, falling back to defaults when the file is
    /// missing or unreadable.
    pub fn load() -> Self {
        let path = match Self::config_path() {
            Some(p) => p,
            None => return Self::default(),
        };
        if !path.exists() {
            return Self::default();
        }
        match Self::load_from(&path) {
            Ok(config) => {
                log::info!("Loaded host config from {}", path.display());
                config
            }
            Err(e) => {
                log::warn!("Ignoring {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// The idle period, never shorter than 1 ms.
    pub fn idle_interval(&self) -> Duration {
        Duration::from_millis(self.idle_interval_ms.max(1))
    }

    /// The unload countdown, never shorter than one tick.
    pub fn unload_countdown(&self) -> u32 {
        self.unload_countdown_ticks.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_twenty_hertz_and_ten_seconds() {
        let config = HostConfig::default();
        assert_eq!(config.idle_interval(), Duration::from_millis(50));
        assert_eq!(config.unload_countdown(), 200);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("host.json");
        std::fs::write(&path, r#"{ "idle_interval_ms": 20 }"#).unwrap();

        let config = HostConfig::load_from(&path).unwrap();
        assert_eq!(config.idle_interval_ms, 20);
        assert_eq!(config.unload_countdown_ticks, DEFAULT_UNLOAD_COUNTDOWN_TICKS);
        assert_eq!(config.block_size, 512);
    }

    #[test]
    fn test_save_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("host.json");
        let config = HostConfig {
            unload_countdown_ticks: 7,
            ..HostConfig::default()
        };
        config.save_to(&path).unwrap();
        assert_eq!(HostConfig::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_zero_values_are_clamped() {
        let config = HostConfig {
            idle_interval_ms: 0,
            unload_countdown_ticks: 0,
            ..HostConfig::default()
        };
        assert_eq!(config.idle_interval(), Duration::from_millis(1));
        assert_eq!(config.unload_countdown(), 1);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("host.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            HostConfig::load_from(&path),
            Err(crate::Error::Config(_))
        ));
    }
}
