//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/beacon/config.toml`, with the two
//! installation-time secrets overridable from the environment:
//! - `BEACON_API_KEY` replaces `ingest.api_key`
//! - `BEACON_PROJECT` replaces `ingest.project`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/beacon/` (~/.config/beacon/)
//! - Data: `$XDG_DATA_HOME/beacon/` (~/.local/share/beacon/)
//! - State/Logs: `$XDG_STATE_HOME/beacon/` (~/.local/state/beacon/)

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Default ingestion endpoint
pub const DEFAULT_ENDPOINT: &str = "https://api.enalog.app/v1/events";

/// Hard ceiling for the per-minute throttle
pub const MAX_THROTTLE_PER_MINUTE: u32 = 20;

const API_KEY_ENV: &str = "BEACON_API_KEY";
const PROJECT_ENV: &str = "BEACON_PROJECT";

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Ingestion endpoint and credentials
    #[serde(default)]
    pub ingest: IngestConfig,

    /// Crash capture and replay
    #[serde(default)]
    pub crash: CrashConfig,

    /// Overrides for host facts
    #[serde(default)]
    pub system: SystemConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Ingestion endpoint configuration
#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    /// Bearer token for the ingestion endpoint
    pub api_key: Option<String>,

    /// Project events are filed under
    pub project: Option<String>,

    /// Application name, used as the project when none is configured
    pub app_name: Option<String>,

    /// Application version, reported as the first tag
    pub app_version: Option<String>,

    /// Full URL events are POSTed to
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// HTTP request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Initial per-minute throttle (clamped to 20)
    #[serde(default = "default_throttle")]
    pub throttle_per_minute: u32,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            project: None,
            app_name: None,
            app_version: None,
            endpoint: default_endpoint(),
            timeout_secs: default_timeout(),
            throttle_per_minute: default_throttle(),
        }
    }
}

impl IngestConfig {
    /// Resolve the project name: explicit project first, then app name, lowercased.
    pub fn resolved_project(&self) -> Option<String> {
        self.project
            .as_deref()
            .or(self.app_name.as_deref())
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_lowercase)
    }

    /// Returns the API key if one is configured and non-empty.
    pub fn resolved_api_key(&self) -> Option<&str> {
        self.api_key.as_deref().filter(|k| !k.trim().is_empty())
    }

    /// Apply `BEACON_API_KEY` / `BEACON_PROJECT` overrides.
    pub fn apply_env(&mut self) {
        if let Ok(key) = std::env::var(API_KEY_ENV) {
            self.api_key = Some(key);
        }
        if let Ok(project) = std::env::var(PROJECT_ENV) {
            self.project = Some(project);
        }
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if !(self.endpoint.starts_with("https://") || self.endpoint.starts_with("http://")) {
            return Err(Error::Config(format!(
                "ingest.endpoint must be an http(s) URL, got '{}'",
                self.endpoint
            )));
        }
        if self.timeout_secs == 0 {
            return Err(Error::Config(
                "ingest.timeout_secs must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_timeout() -> u64 {
    60
}

fn default_throttle() -> u32 {
    10
}

/// Crash capture configuration
#[derive(Debug, Deserialize, Clone)]
pub struct CrashConfig {
    /// SQLite file holding the pending crash record
    pub store_path: Option<PathBuf>,

    /// Replays attempted before a pending record is discarded
    #[serde(default = "default_max_replay_attempts")]
    pub max_replay_attempts: u32,

    /// Abort the process shortly after a captured panic
    ///
    /// The hook also runs for panics that are caught later (`catch_unwind`,
    /// a panicking tokio task). With this off such a panic still leaves a
    /// pending record, replayed as a crash on the next bind.
    #[serde(default = "default_abort_on_crash")]
    pub abort_on_crash: bool,

    /// Install the panic hook when a crash event is bound
    #[serde(default = "default_capture_panics")]
    pub capture_panics: bool,
}

impl Default for CrashConfig {
    fn default() -> Self {
        Self {
            store_path: None,
            max_replay_attempts: default_max_replay_attempts(),
            abort_on_crash: default_abort_on_crash(),
            capture_panics: default_capture_panics(),
        }
    }
}

impl CrashConfig {
    /// Store path, defaulting to `$XDG_DATA_HOME/beacon/state.db`
    pub fn resolved_store_path(&self) -> PathBuf {
        self.store_path
            .clone()
            .unwrap_or_else(Config::default_store_path)
    }
}

fn default_max_replay_attempts() -> u32 {
    5
}

fn default_abort_on_crash() -> bool {
    true
}

fn default_capture_panics() -> bool {
    true
}

/// Overrides for facts the host cannot report reliably
#[derive(Debug, Deserialize, Clone, Default)]
pub struct SystemConfig {
    /// "light" or "dark"
    pub theme: Option<String>,
    /// Region code, e.g. "US"
    pub locale: Option<String>,
    /// Hardware model identifier
    pub model: Option<String>,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from the default path, then apply env overrides
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        let mut config = if config_path.exists() {
            Self::load_from(&config_path)?
        } else {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            Config::default()
        };

        config.ingest.apply_env();
        config.ingest.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/beacon/config.toml` (~/.config/beacon/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("beacon").join("config.toml")
    }

    /// Returns the data directory path
    ///
    /// `$XDG_DATA_HOME/beacon/` (~/.local/share/beacon/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("beacon")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/beacon/` (~/.local/state/beacon/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("beacon")
    }

    /// Returns the default crash store path
    pub fn default_store_path() -> PathBuf {
        Self::data_dir().join("state.db")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.ingest.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(config.ingest.timeout_secs, 60);
        assert_eq!(config.ingest.throttle_per_minute, 10);
        assert_eq!(config.crash.max_replay_attempts, 5);
        assert!(config.crash.abort_on_crash);
        assert!(config.crash.capture_panics);
        assert_eq!(config.logging.level, "info");
        assert!(config.ingest.resolved_api_key().is_none());
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[ingest]
api_key = "en_live_123"
project = "Acme"
app_version = "1.4.0"
timeout_secs = 15

[crash]
max_replay_attempts = 3
abort_on_crash = false

[system]
theme = "dark"

[logging]
level = "debug"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.ingest.resolved_api_key(), Some("en_live_123"));
        assert_eq!(config.ingest.resolved_project().as_deref(), Some("acme"));
        assert_eq!(config.ingest.app_version.as_deref(), Some("1.4.0"));
        assert_eq!(config.ingest.timeout_secs, 15);
        assert_eq!(config.ingest.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(config.crash.max_replay_attempts, 3);
        assert!(!config.crash.abort_on_crash);
        assert_eq!(config.system.theme.as_deref(), Some("dark"));
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_project_falls_back_to_app_name() {
        let config = IngestConfig {
            app_name: Some("Sprint Dock".to_string()),
            ..Default::default()
        };
        assert_eq!(config.resolved_project().as_deref(), Some("sprint dock"));

        let config = IngestConfig {
            project: Some("  ".to_string()),
            ..Default::default()
        };
        assert!(config.resolved_project().is_none());
    }

    #[test]
    fn test_validate_rejects_bad_endpoint() {
        let config = IngestConfig {
            endpoint: "ftp://example.com".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = IngestConfig {
            timeout_secs: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        assert!(IngestConfig::default().validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[ingest]\nproject = \"demo\"\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.ingest.project.as_deref(), Some("demo"));

        std::fs::write(&path, "[ingest\n").unwrap();
        assert!(Config::load_from(&path).is_err());
    }
}
