//! Persisted settings for the ledroid tool.
//! Stored in the platform-specific config directory via `directories::ProjectDirs`
//! and overridable from `LEDROID_*` environment variables.

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::bus::{ConnectOptions, DEFAULT_OFFLINE_BUFFER};
use crate::calibration::{ProtocolConfig, SessionConfig, DEFAULT_CAPTURE_COUNT};
use crate::runner::RunnerConfig;
use crate::vision::{ExtractorConfig, DEFAULT_OPEN_RADIUS, DEFAULT_THRESHOLD};

/// Settings errors.
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Cannot determine config directory")]
    NoConfigDir,
    #[error("Settings I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid settings file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Application settings that can be saved and loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// Broker URL for an external transport. The in-process broker used by
    /// `ledroid calibrate` does not connect anywhere and ignores it.
    pub server_url: String,
    /// Broker user name
    pub username: String,
    /// Broker password
    pub password: String,
    /// Client id presented to the broker
    pub client_id: String,
    /// Topic the calibration server sends control messages on
    pub subscribe_topic: String,
    /// Topic start triggers and data messages are published to
    pub publish_topic: String,
    /// Frames per calibration round
    pub capture_count: usize,
    /// Brightness cutoff for marker pixels
    pub threshold: u8,
    /// Erode/dilate radius (0 disables)
    pub open_radius: u8,
    /// Publishes kept while disconnected
    pub offline_buffer_size: usize,
    /// Interval between frames in milliseconds
    pub frame_interval_ms: u64,
    /// Seconds without progress before a capturing round is reported
    pub stall_warn_secs: u64,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            server_url: "tcp://localhost:1883".to_string(),
            username: String::new(),
            password: String::new(),
            client_id: "ledroid".to_string(),
            subscribe_topic: "ledroid/server".to_string(),
            publish_topic: "ledroid/client".to_string(),
            capture_count: DEFAULT_CAPTURE_COUNT,
            threshold: DEFAULT_THRESHOLD,
            open_radius: DEFAULT_OPEN_RADIUS,
            offline_buffer_size: DEFAULT_OFFLINE_BUFFER,
            frame_interval_ms: 33,
            stall_warn_secs: 30,
        }
    }
}

impl AppSettings {
    /// Get the config directory path.
    pub fn config_dir() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "matteverett", "ledroid")
            .map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the settings file path.
    pub fn settings_path() -> Option<PathBuf> {
        Self::config_dir().map(|dir| dir.join("settings.json"))
    }

    /// Load settings from the config file, falling back to defaults.
    pub fn load() -> Self {
        let Some(path) = Self::settings_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        match Self::load_from(&path) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!("Ignoring settings file {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Load settings from a specific file.
    pub fn load_from(path: &std::path::Path) -> Result<Self, SettingsError> {
        let content = fs::read_to_string(path)?;
        let loaded: Self = serde_json::from_str(&content)?;
        Ok(loaded.backfilled())
    }

    /// Replace empty or zero fields from older config files with defaults.
    fn backfilled(mut self) -> Self {
        let defaults = Self::default();
        if self.client_id.is_empty() {
            self.client_id = defaults.client_id;
        }
        if self.subscribe_topic.is_empty() {
            self.subscribe_topic = defaults.subscribe_topic;
        }
        if self.publish_topic.is_empty() {
            self.publish_topic = defaults.publish_topic;
        }
        if self.capture_count == 0 {
            self.capture_count = 1;
        }
        if self.frame_interval_ms == 0 {
            self.frame_interval_ms = defaults.frame_interval_ms;
        }
        self
    }

    /// Apply `LEDROID_*` environment variables on top of these settings.
    ///
    /// Unparseable numeric values are ignored with a warning.
    pub fn with_env_overrides(mut self) -> Self {
        let string_vars: [(&str, &mut String); 6] = [
            ("LEDROID_SERVER_URL", &mut self.server_url),
            ("LEDROID_USERNAME", &mut self.username),
            ("LEDROID_PASSWORD", &mut self.password),
            ("LEDROID_CLIENT_ID", &mut self.client_id),
            ("LEDROID_SUBSCRIBE_TOPIC", &mut self.subscribe_topic),
            ("LEDROID_PUBLISH_TOPIC", &mut self.publish_topic),
        ];
        for (name, field) in string_vars {
            if let Ok(value) = env::var(name) {
                *field = value;
            }
        }

        override_parsed("LEDROID_CAPTURE_COUNT", &mut self.capture_count);
        override_parsed("LEDROID_THRESHOLD", &mut self.threshold);
        override_parsed("LEDROID_OPEN_RADIUS", &mut self.open_radius);
        override_parsed("LEDROID_OFFLINE_BUFFER", &mut self.offline_buffer_size);
        override_parsed("LEDROID_FRAME_INTERVAL_MS", &mut self.frame_interval_ms);
        override_parsed("LEDROID_STALL_WARN_SECS", &mut self.stall_warn_secs);

        self.backfilled()
    }

    /// Save settings to the config file.
    pub fn save(&self) -> Result<PathBuf, SettingsError> {
        let dir = Self::config_dir().ok_or(SettingsError::NoConfigDir)?;
        fs::create_dir_all(&dir)?;

        let path = dir.join("settings.json");
        fs::write(&path, serde_json::to_string_pretty(self)?)?;
        Ok(path)
    }

    pub fn extractor_config(&self) -> ExtractorConfig {
        ExtractorConfig::default()
            .with_threshold(self.threshold)
            .with_open_radius(self.open_radius)
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig::default().with_capture_count(self.capture_count)
    }

    pub fn protocol_config(&self) -> ProtocolConfig {
        ProtocolConfig::default()
            .with_subscribe_topic(&self.subscribe_topic)
            .with_publish_topic(&self.publish_topic)
            .with_stall_warning(Duration::from_secs(self.stall_warn_secs))
    }

    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig::default().with_frame_interval(Duration::from_millis(self.frame_interval_ms))
    }

    pub fn connect_options(&self) -> ConnectOptions {
        ConnectOptions::default()
            .with_client_id(&self.client_id)
            .with_credentials(&self.username, &self.password)
            .with_offline_buffer(self.offline_buffer_size)
    }
}

fn override_parsed<T: std::str::FromStr>(name: &str, field: &mut T) {
    if let Ok(value) = env::var(name) {
        match value.trim().parse() {
            Ok(parsed) => *field = parsed,
            Err(_) => tracing::warn!("Ignoring {}={:?}: not a valid number", name, value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = AppSettings::default();
        assert_eq!(settings.capture_count, 20);
        assert_eq!(settings.threshold, 251);
        assert_eq!(settings.open_radius, 1);
        assert_eq!(settings.offline_buffer_size, 100);
        assert_eq!(settings.session_config().capture_count, 20);
        assert_eq!(settings.extractor_config(), ExtractorConfig::default());
    }

    #[test]
    fn test_partial_file_backfills() {
        let path = std::env::temp_dir().join(format!("ledroid_settings_{}.json", std::process::id()));
        fs::write(&path, r#"{"capture_count": 0, "publish_topic": "", "threshold": 200}"#).unwrap();

        let loaded = AppSettings::load_from(&path).unwrap();
        assert_eq!(loaded.capture_count, 1);
        assert_eq!(loaded.publish_topic, "ledroid/client");
        assert_eq!(loaded.threshold, 200);
        assert_eq!(loaded.client_id, "ledroid");

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_invalid_file_reported() {
        let path = std::env::temp_dir().join(format!("ledroid_bad_{}.json", std::process::id()));
        fs::write(&path, "not json").unwrap();
        assert!(matches!(AppSettings::load_from(&path), Err(SettingsError::Parse(_))));
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_env_overrides() {
        env::set_var("LEDROID_SERVER_URL", "tcp://broker.lan:1883");
        env::set_var("LEDROID_PUBLISH_TOPIC", "lights/out");
        env::set_var("LEDROID_STALL_WARN_SECS", "12");
        env::set_var("LEDROID_OPEN_RADIUS", "not-a-number");

        let settings = AppSettings::default().with_env_overrides();
        assert_eq!(settings.server_url, "tcp://broker.lan:1883");
        assert_eq!(settings.publish_topic, "lights/out");
        assert_eq!(settings.stall_warn_secs, 12);
        assert_eq!(settings.open_radius, 1);
        assert_eq!(settings.protocol_config().stall_warning, Duration::from_secs(12));

        env::remove_var("LEDROID_SERVER_URL");
        env::remove_var("LEDROID_PUBLISH_TOPIC");
        env::remove_var("LEDROID_STALL_WARN_SECS");
        env::remove_var("LEDROID_OPEN_RADIUS");
    }
}
