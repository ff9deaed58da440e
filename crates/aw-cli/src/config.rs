//! Configuration loading for the Asset Warden CLI.

use anyhow::{Context, Result};
use aw_core::DedupConfig;
use aw_observability::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Database URL (`sqlite:` scheme).
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// Deduplication and merge settings.
    #[serde(default)]
    pub dedup: DedupConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_database_url() -> String {
    "sqlite:asset-warden.db".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            dedup: DedupConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl AppConfig {
    /// Loads configuration from a file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Overlays `ASSET_WARDEN_*` environment variables onto the dedup settings.
    pub fn with_env_overrides(mut self) -> Result<Self> {
        self.dedup
            .apply_overrides(|key| std::env::var(key).ok())
            .context("Invalid environment override")?;
        Ok(self)
    }
}
