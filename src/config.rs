//! Configuration for the candela daemon

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Daemon configuration, built once in `main` and shared via `Arc`
#[derive(Debug, Clone)]
pub struct Config {
    /// Bridge address override (from `--bridge` / `HUE_BRIDGE_IP`)
    pub bridge_address: Option<String>,

    /// Wake keyword to listen for
    pub wake_keyword: String,

    /// Wake detection sensitivity in [0, 1]
    pub wake_sensitivity: f32,

    /// Recognition service endpoint
    pub stt_url: String,

    /// Recognition service API key (from `CANDELA_STT_API_KEY`)
    pub stt_api_key: Option<String>,

    /// Pause before capture re-arms after an executed command
    pub cooldown: Duration,

    /// How long gated capture waits for speech to begin
    pub command_timeout: Duration,

    /// Maximum length of a single utterance
    pub phrase_limit: Duration,

    /// How long capture stays armed after a wake detection
    pub activation_window: Duration,

    /// Deadline for one recognition round trip
    pub recognition_timeout: Duration,

    /// Device handle cache lifetime
    pub cache_ttl: Duration,

    /// Undo history depth
    pub undo_depth: usize,

    /// Recent-transcript window for duplicate suppression
    pub debounce_window: usize,

    /// Minimum recognition confidence (exclusive)
    pub confidence_threshold: f32,

    /// Minimum fuzzy match score on a 0-100 scale (exclusive)
    pub fuzzy_threshold: u8,

    /// Stage errors tolerated inside the rolling window
    pub max_errors: usize,

    /// Rolling error window length
    pub error_window: Duration,

    /// Pause before the pipeline is rebuilt after a restart trigger
    pub restart_backoff: Duration,

    /// Supervisor health poll interval
    pub poll_interval: Duration,

    /// Path of the persisted bridge pairing file
    pub pairing_path: PathBuf,
}

impl Config {
    /// Build the configuration from CLI values
    #[must_use]
    pub fn new(bridge_address: Option<String>, wake_sensitivity: f32) -> Self {
        Self {
            bridge_address,
            wake_sensitivity,
            ..Self::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bridge_address: std::env::var("HUE_BRIDGE_IP").ok(),
            wake_keyword: "philips".to_string(),
            wake_sensitivity: 0.5,
            stt_url: std::env::var("CANDELA_STT_URL")
                .unwrap_or_else(|_| "http://localhost:2700/recognize".to_string()),
            stt_api_key: std::env::var("CANDELA_STT_API_KEY").ok(),
            cooldown: Duration::from_secs(5),
            command_timeout: Duration::from_secs(5),
            phrase_limit: Duration::from_secs(5),
            activation_window: Duration::from_secs(10),
            recognition_timeout: Duration::from_secs(5),
            cache_ttl: Duration::from_secs(60),
            undo_depth: 5,
            debounce_window: 5,
            confidence_threshold: 0.7,
            fuzzy_threshold: 70,
            max_errors: 5,
            error_window: Duration::from_secs(30),
            restart_backoff: Duration::from_secs(1),
            poll_interval: Duration::from_millis(500),
            pairing_path: default_pairing_path(),
        }
    }
}

/// Default pairing file path: `~/.config/candela/bridge.json` on Linux
fn default_pairing_path() -> PathBuf {
    directories::ProjectDirs::from("dev", "candela", "candela").map_or_else(
        || PathBuf::from("bridge.json"),
        |dirs| dirs.config_dir().join("bridge.json"),
    )
}

/// Persisted bridge pairing, written once after the first successful
/// link-button handshake
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Pairing {
    /// Bridge IP or hostname
    pub bridge_address: String,
    /// Username issued by the bridge
    pub auth_token: String,
}

impl Pairing {
    /// Load a previously stored pairing, if any
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path)?;
        let pairing: Self = serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("invalid pairing file {}: {e}", path.display())))?;
        Ok(Some(pairing))
    }

    /// Persist the pairing, creating parent directories as needed
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be written
    pub fn store(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        tracing::info!(path = %path.display(), "stored bridge pairing");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::new(None, 0.5);
        assert_eq!(config.wake_keyword, "philips");
        assert_eq!(config.cooldown, Duration::from_secs(5));
        assert_eq!(config.cache_ttl, Duration::from_secs(60));
        assert_eq!(config.undo_depth, 5);
        assert_eq!(config.max_errors, 5);
        assert!((config.confidence_threshold - 0.7).abs() < f32::EPSILON);
    }

    #[test]
    fn pairing_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("bridge.json");

        let pairing = Pairing {
            bridge_address: "192.168.1.42".to_string(),
            auth_token: "abc123".to_string(),
        };
        pairing.store(&path).expect("store");

        let loaded = Pairing::load(&path).expect("load").expect("present");
        assert_eq!(loaded, pairing);
    }

    #[test]
    fn missing_pairing_is_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let loaded = Pairing::load(&dir.path().join("absent.json")).expect("load");
        assert!(loaded.is_none());
    }

    #[test]
    fn corrupt_pairing_is_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("bridge.json");
        std::fs::write(&path, "not json").expect("write");
        assert!(Pairing::load(&path).is_err());
    }
}
