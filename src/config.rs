// File: ./src/config.rs
// Handles configuration loading, saving, and defaults.
use crate::context::AppContext;
use crate::debounce::DEFAULT_FLUSH_DELAY_SECS;
use crate::storage::{DEFAULT_CACHE_FILE_NAME, LocalStorage};
use crate::timezone::TimezoneConfig;
use anyhow::{Error, Result};
use log::LevelFilter;
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;

fn default_true() -> bool {
    true
}

fn default_flush_delay() -> u64 {
    DEFAULT_FLUSH_DELAY_SECS
}

fn default_cache_file() -> String {
    DEFAULT_CACHE_FILE_NAME.to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct Config {
    /// Write the cache to disk at all.
    #[serde(default = "default_true")]
    pub persistent_storage: bool,
    #[serde(default = "default_cache_file")]
    pub cache_file: String,
    /// Quiet period after the last change before the cache file is rewritten.
    #[serde(default = "default_flush_delay")]
    pub flush_delay_secs: u64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    // Kept last: TOML tables must follow plain keys.
    #[serde(default)]
    pub timezone: TimezoneConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            persistent_storage: true,
            cache_file: default_cache_file(),
            flush_delay_secs: DEFAULT_FLUSH_DELAY_SECS,
            log_level: default_log_level(),
            timezone: TimezoneConfig::default(),
        }
    }
}

impl Config {
    /// Load the configuration from disk using an explicit context.
    pub fn load(ctx: &dyn AppContext) -> Result<Self> {
        let path = ctx.get_config_file_path()?;

        if !path.exists() {
            return Err(anyhow::anyhow!("Config file not found"));
        }

        let contents = fs::read_to_string(&path).map_err(|e| {
            anyhow::anyhow!("Failed to read config file '{}': {}", path.display(), e)
        })?;

        let config: Config = toml::from_str(&contents).map_err(|e| {
            anyhow::anyhow!("Failed to parse config file '{}': {}", path.display(), e)
        })?;

        Ok(config)
    }

    /// Like `load`, but a missing file quietly yields the defaults and any
    /// other problem is logged before falling back to them.
    pub fn load_or_default(ctx: &dyn AppContext) -> Self {
        match Self::load(ctx) {
            Ok(config) => config,
            Err(e) if Self::is_missing_config_error(&e) => Self::default(),
            Err(e) => {
                log::warn!("{e:#}; using default configuration");
                Self::default()
            }
        }
    }

    pub fn is_missing_config_error(err: &Error) -> bool {
        if err.to_string().contains("Config file not found") {
            return true;
        }

        for cause in err.chain() {
            if let Some(io_err) = cause.downcast_ref::<std::io::Error>()
                && io_err.kind() == std::io::ErrorKind::NotFound
            {
                return true;
            }
        }

        false
    }

    /// Save configuration using an explicit context.
    pub fn save(&self, ctx: &dyn AppContext) -> Result<()> {
        let path = ctx.get_config_file_path()?;
        LocalStorage::with_lock(&path, || {
            let toml_str = toml::to_string_pretty(self)?;
            LocalStorage::atomic_write(&path, toml_str)?;
            Ok(())
        })?;
        Ok(())
    }

    pub fn flush_delay(&self) -> Duration {
        Duration::from_secs(self.flush_delay_secs)
    }

    /// Unknown level names fall back to `Info`.
    pub fn log_level_filter(&self) -> LevelFilter {
        self.log_level.parse().unwrap_or(LevelFilter::Info)
    }
}
