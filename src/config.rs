//! Configuration system
//!
//! Centralized configuration with layered resolution: runtime defaults, then
//! an optional TOML file, then environment variable overrides, then
//! validation. Contract violations (empty currency, zero max age) fail fast
//! at load time rather than surfacing as empty reports later.
//!
//! Components take the relevant sections by value; there is no global config
//! instance, so each component stays independently constructible.

use crate::models::{CostMode, SortOrder};
use anyhow::{Context, Result};
use chrono::Weekday;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub logging: LoggingConfig,

    /// Log data sources
    pub data: DataConfig,

    /// Cost calculation and pricing cache
    pub cost: CostConfig,

    /// Report defaults
    pub report: ReportConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    pub output: String,
    pub directory: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Root directories scanned for usage logs. Empty means "use the default
    /// roots" (see [`crate::normalizer::default_data_paths`]).
    pub paths: Vec<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CostConfig {
    pub mode: CostMode,
    pub offline: bool,
    pub currency: String,
    pub cache_file: PathBuf,
    pub max_age_days: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub week_start: Weekday,
    pub sort_order: SortOrder,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "ERROR".to_string(),
            format: "pretty".to_string(),
            output: "console".to_string(),
            directory: PathBuf::from("logs"),
        }
    }
}

impl Default for DataConfig {
    fn default() -> Self {
        Self { paths: Vec::new() }
    }
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            mode: CostMode::Auto,
            offline: false,
            currency: "USD".to_string(),
            cache_file: dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("usage-guru")
                .join("pricing_cache.json"),
            max_age_days: crate::pricing::DEFAULT_MAX_AGE_DAYS,
        }
    }
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            week_start: Weekday::Mon,
            sort_order: SortOrder::Desc,
        }
    }
}

impl Config {
    /// Load configuration from file, environment, and defaults.
    pub fn load() -> Result<Self> {
        let mut config = Config::default();

        let config_paths = [
            PathBuf::from("usage-guru.toml"),
            PathBuf::from(".usage-guru.toml"),
            dirs::config_dir()
                .map(|d| d.join("usage-guru").join("config.toml"))
                .unwrap_or_default(),
        ];

        for path in &config_paths {
            if path.exists() {
                info!(config_file = %path.display(), "Loading configuration from file");
                config = Self::load_from_file(path)?;
                break;
            }
        }

        config.apply_env_overrides()?;
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a TOML file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Apply environment variable overrides.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(val) = env::var("LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Ok(val) = env::var("LOG_FORMAT") {
            self.logging.format = val;
        }
        if let Ok(val) = env::var("LOG_OUTPUT") {
            self.logging.output = val;
        }

        if let Ok(val) = env::var("USAGE_GURU_DATA_PATHS") {
            self.data.paths = env::split_paths(&val).collect();
        }

        if let Ok(val) = env::var("USAGE_GURU_OFFLINE") {
            self.cost.offline = val.parse().context("Invalid USAGE_GURU_OFFLINE")?;
        }
        if let Ok(val) = env::var("USAGE_GURU_CURRENCY") {
            self.cost.currency = val;
        }
        if let Ok(val) = env::var("USAGE_GURU_PRICING_CACHE") {
            self.cost.cache_file = PathBuf::from(val);
        }
        if let Ok(val) = env::var("USAGE_GURU_PRICING_MAX_AGE_DAYS") {
            self.cost.max_age_days = val
                .parse()
                .context("Invalid USAGE_GURU_PRICING_MAX_AGE_DAYS")?;
        }

        Ok(())
    }

    /// Validate configuration values, failing fast on contract violations.
    pub fn validate(&self) -> Result<()> {
        if self.cost.currency.trim().is_empty() {
            return Err(anyhow::anyhow!("Currency code must not be empty"));
        }

        if self.cost.max_age_days < 1 {
            return Err(anyhow::anyhow!(
                "Pricing max age must be at least 1 day, got {}",
                self.cost.max_age_days
            ));
        }

        Ok(())
    }
}
