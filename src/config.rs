use anyhow::{Context, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::sync::Collection;

/// Main configuration structure for configsync
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    /// SQLite database holding settings and the synced collections
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Remote blob store endpoint settings
    #[serde(default)]
    pub remote: RemoteConfig,

    /// Scheduler settings
    #[serde(default)]
    pub sync: SyncConfig,

    /// Per-collection export policy
    #[serde(default)]
    pub collections: CollectionsConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Remote store configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RemoteConfig {
    /// API root, e.g. "https://api.github.com"
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Timeout for a single HTTP request in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// User-Agent sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

/// Scheduler configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SyncConfig {
    /// Push interval in seconds when no interval setting is persisted
    #[serde(default = "default_interval")]
    pub default_interval: u64,

    /// How long Stop waits for the loop to acknowledge, in milliseconds
    #[serde(default = "default_stop_grace_ms")]
    pub stop_grace_ms: u64,

    /// How often persisted settings are re-read from the database, in milliseconds
    #[serde(default = "default_settings_refresh_ms")]
    pub settings_refresh_ms: u64,

    /// Environment variable carrying the override credential
    #[serde(default = "default_env_credential_var")]
    pub env_credential_var: String,

    /// Environment variable carrying the override destination
    #[serde(default = "default_env_destination_var")]
    pub env_destination_var: String,
}

/// Export policy for one collection
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq, Eq)]
pub struct CollectionPolicy {
    /// Fields holding secret material
    #[serde(default)]
    pub sensitive_fields: Vec<String>,

    /// Strip sensitive fields before pushing
    #[serde(default)]
    pub redact_sensitive: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CollectionsConfig {
    #[serde(default = "default_key_policy")]
    pub tokens: CollectionPolicy,

    #[serde(default = "default_key_policy")]
    pub channels: CollectionPolicy,

    #[serde(default)]
    pub models: CollectionPolicy,
}

/// Logging configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String, // "info"

    /// Log format
    #[serde(default = "default_log_format")]
    pub format: String, // "compact", "pretty", "full"

    /// Enable colored output
    #[serde(default = "default_true")]
    pub color: bool,
}

// Default value functions
fn default_database_path() -> String {
    if let Ok(data_home) = std::env::var("XDG_DATA_HOME") {
        format!("{}/configsync/state.db", data_home)
    } else if let Ok(home) = std::env::var("HOME") {
        format!("{}/.local/share/configsync/state.db", home)
    } else {
        "/tmp/configsync-state.db".to_string()
    }
}
fn default_api_base_url() -> String {
    "https://api.github.com".to_string()
}
fn default_timeout() -> u64 {
    30
}
fn default_user_agent() -> String {
    format!("configsync/{}", env!("CARGO_PKG_VERSION"))
}
fn default_interval() -> u64 {
    3600
}
fn default_settings_refresh_ms() -> u64 {
    5000
}
fn default_stop_grace_ms() -> u64 {
    100
}
fn default_env_credential_var() -> String {
    "GITHUB_SYNC_TOKEN".to_string()
}
fn default_env_destination_var() -> String {
    "GITHUB_SYNC_REPO".to_string()
}
fn default_key_policy() -> CollectionPolicy {
    CollectionPolicy {
        sensitive_fields: vec!["key".to_string()],
        redact_sensitive: false,
    }
}
fn default_true() -> bool {
    true
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "compact".to_string()
}

// Default implementations
impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            timeout: default_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            default_interval: default_interval(),
            stop_grace_ms: default_stop_grace_ms(),
            settings_refresh_ms: default_settings_refresh_ms(),
            env_credential_var: default_env_credential_var(),
            env_destination_var: default_env_destination_var(),
        }
    }
}

impl Default for CollectionsConfig {
    fn default() -> Self {
        Self {
            tokens: default_key_policy(),
            channels: default_key_policy(),
            models: CollectionPolicy::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            color: default_true(),
        }
    }
}

impl CollectionsConfig {
    pub fn policy(&self, collection: Collection) -> &CollectionPolicy {
        match collection {
            Collection::Tokens => &self.tokens,
            Collection::Channels => &self.channels,
            Collection::Models => &self.models,
        }
    }
}

impl Config {
    /// Load configuration from the default location or create a default config
    pub fn load_or_default() -> Result<Self> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load(&config_path)
        } else {
            let mut config = Self::default();

            if let Some(parent) = config_path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
            }

            config.save(&config_path)?;
            config.expand_paths()?;

            tracing::info!("Created default configuration at: {:?}", config_path);
            Ok(config)
        }
    }

    /// Load configuration from a specific file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let mut config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        config.expand_paths()?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self).context("Failed to serialize configuration")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;

        Ok(())
    }

    /// Get the default configuration file path (XDG compliant)
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = config_dir().context("Failed to get user config directory")?;

        Ok(config_dir.join("configsync").join("config.yml"))
    }

    /// Expand environment variables in configuration paths
    pub fn expand_paths(&mut self) -> Result<()> {
        self.database_path = shellexpand::full(&self.database_path)
            .context("Failed to expand database_path")?
            .into_owned();

        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.remote.timeout)
    }

    pub fn default_interval(&self) -> Duration {
        Duration::from_secs(self.sync.default_interval)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.sync.stop_grace_ms)
    }

    /// Never zero; a zero setting falls back to one second
    pub fn settings_refresh(&self) -> Duration {
        match self.sync.settings_refresh_ms {
            0 => Duration::from_secs(1),
            ms => Duration::from_millis(ms),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            remote: RemoteConfig::default(),
            sync: SyncConfig::default(),
            collections: CollectionsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}
