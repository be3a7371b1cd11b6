//! Cache configuration management.
//!
//! Settings are layered with figment: built-in defaults, then a TOML file
//! (`<config dir>/config.toml` unless a path is given), then environment
//! variables prefixed `MEDIA_COLUMNS_` (for example
//! `MEDIA_COLUMNS_MAX_ENTRIES=20000`).

use anyhow::Result;
use directories::ProjectDirs;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::{EvictionPolicy, MetadataStore};

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "MEDIA_COLUMNS_";

/// Errors from loading or validating configuration.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// A provider could not be read or a value had the wrong type.
    #[error("Failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    /// A value parsed but is out of range.
    #[error("Invalid configuration value for {field}: {reason}")]
    Invalid {
        /// Offending key
        field: &'static str,
        /// Why it was rejected
        reason: String,
    },
}

/// Cache configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Database file; the platform cache directory is used when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_path: Option<PathBuf>,
    /// Days an entry may go unaccessed before eviction.
    pub ttl_days: u64,
    /// Maximum number of cached entries.
    pub max_entries: u64,
    /// Cache hits and stores between eviction passes.
    pub eviction_interval: u64,
    /// Maximum rows removed by one eviction pass.
    pub eviction_batch_limit: usize,
    /// Bound on one probe, in milliseconds.
    pub probe_timeout_ms: u64,
    /// Cache hits buffered before `last_access` is written.
    pub touch_batch_size: usize,
    /// `ffprobe` executable used for videos.
    pub ffprobe_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: None,
            ttl_days: 90,
            max_entries: crate::cache::eviction::DEFAULT_MAX_ENTRIES,
            eviction_interval: crate::cache::eviction::DEFAULT_INTERVAL,
            eviction_batch_limit: crate::cache::eviction::DEFAULT_BATCH_LIMIT,
            probe_timeout_ms: 2_000,
            touch_batch_size: crate::resolver::DEFAULT_TOUCH_BATCH_SIZE,
            ffprobe_path: PathBuf::from("ffprobe"),
        }
    }
}

impl Config {
    /// Load the configuration from the default platform-specific path.
    ///
    /// Never fails: any load or validation error is logged and the
    /// defaults are used.
    pub fn load() -> Self {
        let path = Self::config_path();
        match Self::extract(path.as_deref()) {
            Ok(config) => config,
            Err(e) => {
                log::warn!("{}; using default configuration", e);
                Self::default()
            }
        }
    }

    /// Load defaults, then `path` (if it exists), then the environment.
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        Self::extract(Some(path))
    }

    /// The provider stack behind [`Config::load`].
    #[must_use]
    pub fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed(ENV_PREFIX))
    }

    fn extract(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config: Self = Self::figment(path).extract().map_err(Box::new)?;
        config.validate()?;
        log::debug!("Loaded configuration: {:?}", config);
        Ok(config)
    }

    /// Reject values that would disable the cache's limits.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive: [(&'static str, u64); 5] = [
            ("ttl_days", self.ttl_days),
            ("max_entries", self.max_entries),
            ("eviction_interval", self.eviction_interval),
            ("eviction_batch_limit", self.eviction_batch_limit as u64),
            ("probe_timeout_ms", self.probe_timeout_ms),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        if self.ffprobe_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid {
                field: "ffprobe_path",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Save the configuration to the default platform-specific path.
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()
            .ok_or_else(|| anyhow::anyhow!("Failed to determine project directories"))?;
        self.save_to_path(&path)
    }

    /// Save the configuration as TOML at `path`.
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Where the database lives: the configured path, else the platform
    /// cache directory.
    #[must_use]
    pub fn resolved_database_path(&self) -> Option<PathBuf> {
        self.database_path
            .clone()
            .or_else(MetadataStore::default_path)
    }

    /// Probe bound as a [`Duration`].
    #[must_use]
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Eviction limits described by this configuration.
    #[must_use]
    pub fn eviction_policy(&self) -> EvictionPolicy {
        EvictionPolicy::default()
            .with_ttl(Duration::from_secs(self.ttl_days.saturating_mul(24 * 60 * 60)))
            .with_max_entries(self.max_entries)
            .with_interval(self.eviction_interval)
            .with_batch_limit(self.eviction_batch_limit)
    }

    /// Get the default platform-specific configuration path.
    #[must_use]
    pub fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "media-columns").map(|dirs| dirs.config_dir().join("config.toml"))
    }
}
