//! Configuration management for Syndicate

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub publisher: PublisherConfig,
    #[serde(default)]
    pub platforms: PlatformsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

/// Retry and pacing policy for the publish pass.
///
/// The retry ceiling and the backoff schedule are configuration, not
/// per-call-site constants: exceeding `max_retries` always forces a
/// terminal failure regardless of error classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    /// Maximum transient failures per target before forcing terminal failure.
    pub max_retries: i64,
    /// Seconds to wait before retry N (last entry repeats).
    pub retry_backoff_secs: Vec<i64>,
    /// Per external call timeout, so one stuck call cannot starve the pass.
    pub publish_timeout_secs: u64,
    /// Staleness threshold for the missed-item diagnostic.
    pub missed_threshold_minutes: i64,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_backoff_secs: vec![60, 300, 900],
            publish_timeout_secs: 60,
            missed_threshold_minutes: 30,
        }
    }
}

impl PublisherConfig {
    /// Backoff delay before the given retry attempt.
    pub fn backoff_secs(&self, retry_count: i64) -> i64 {
        if self.retry_backoff_secs.is_empty() {
            return 0;
        }
        let idx = (retry_count.max(0) as usize).min(self.retry_backoff_secs.len() - 1);
        self.retry_backoff_secs[idx]
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformsConfig {
    pub threads: Option<ThreadsConfig>,
    pub instagram: Option<InstagramConfig>,
    pub mastodon: Option<MastodonConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadsConfig {
    pub enabled: bool,
    #[serde(default = "default_threads_base_url")]
    pub base_url: String,
}

fn default_threads_base_url() -> String {
    "https://graph.threads.net/v1.0".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstagramConfig {
    pub enabled: bool,
    #[serde(default = "default_instagram_base_url")]
    pub base_url: String,
}

fn default_instagram_base_url() -> String {
    "https://graph.facebook.com/v21.0".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MastodonConfig {
    pub enabled: bool,
    pub instance: String,
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        let config: Config = toml::from_str(&content).map_err(ConfigError::ParseError)?;
        Ok(config)
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self {
            database: DatabaseConfig {
                path: "~/.local/share/syndicate/queue.db".to_string(),
            },
            publisher: PublisherConfig::default(),
            platforms: PlatformsConfig::default(),
        }
    }
}

/// Resolve the configuration file path following XDG Base Directory spec
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("SYNDICATE_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("syndicate").join("config.toml"))
}
