//! Configuration management for propscout.
//!
//! Provides TOML-based configuration with XDG-compliant paths and
//! environment variable overrides. Every crawl knob (delays, ceilings,
//! timeouts) is configurable here rather than hard-coded in the crawl loop.

use crate::error::{ConfigError, ConfigResult};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Main application configuration.
///
/// This is loaded from `~/.config/propscout/config.toml` (or platform
/// equivalent). If the file doesn't exist, default values are used.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Crawl loop behavior settings
    pub scrape: ScrapeConfig,
    /// Browser automation settings
    pub browser: BrowserConfig,
    /// Record store settings
    pub database: DatabaseConfig,
}

impl AppConfig {
    /// Load configuration from disk, falling back to defaults if not found.
    ///
    /// # Errors
    /// Returns error if:
    /// - Config directory cannot be determined
    /// - File exists but cannot be read
    /// - File contents are not valid TOML
    pub fn load() -> ConfigResult<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            tracing::debug!("Loading config from {}", config_path.display());
            let contents = fs::read_to_string(&config_path)?;
            let config = toml::from_str(&contents)?;
            Ok(config)
        } else {
            tracing::debug!("Config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Load configuration with environment variable overrides.
    ///
    /// Supports the following environment variables:
    /// - `DATABASE_URL`: Override the record store connection string
    /// - `PROPSCOUT_HEADLESS`: Override browser headless mode (true/false)
    /// - `PROPSCOUT_MAX_PAGES`: Override the crawl page ceiling
    pub fn load_with_env() -> ConfigResult<Self> {
        let mut config = Self::load()?;

        // Override from environment
        if let Ok(val) = std::env::var("DATABASE_URL") {
            if !val.trim().is_empty() {
                config.database.url = Some(val.trim().to_string());
                tracing::debug!("Override database.url from DATABASE_URL");
            }
        }

        if let Ok(val) = std::env::var("PROPSCOUT_HEADLESS") {
            if let Ok(headless) = val.parse() {
                config.browser.headless = headless;
                tracing::debug!("Override browser.headless from env: {}", headless);
            }
        }

        if let Ok(val) = std::env::var("PROPSCOUT_MAX_PAGES") {
            if let Ok(pages) = val.parse() {
                config.scrape.max_pages = pages;
                tracing::debug!("Override scrape.max_pages from env: {}", pages);
            }
        }

        Ok(config)
    }

    /// Save configuration to disk.
    ///
    /// Creates the config directory if it doesn't exist.
    pub fn save(&self) -> ConfigResult<()> {
        let config_path = Self::config_path()?;
        let config_dir = config_path
            .parent()
            .ok_or_else(|| ConfigError::InvalidValue {
                field: "config_path".to_string(),
                reason: "no parent directory".to_string(),
            })?;

        fs::create_dir_all(config_dir)?;
        tracing::debug!("Saving config to {}", config_path.display());

        let contents = toml::to_string_pretty(self)?;
        fs::write(config_path, contents)?;
        Ok(())
    }

    /// Get the path to the configuration file.
    ///
    /// Uses XDG base directories: `~/.config/propscout/config.toml`
    pub fn config_path() -> ConfigResult<PathBuf> {
        let dirs =
            ProjectDirs::from("com", "propscout", "propscout").ok_or(ConfigError::NoConfigDir)?;
        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Get the data directory path.
    ///
    /// Uses XDG base directories: `~/.local/share/propscout`. The default
    /// record store lives here when `DATABASE_URL` is not set.
    pub fn data_dir() -> ConfigResult<PathBuf> {
        let dirs =
            ProjectDirs::from("com", "propscout", "propscout").ok_or(ConfigError::NoConfigDir)?;
        Ok(dirs.data_dir().to_path_buf())
    }
}

/// Crawl loop behavior settings.
///
/// All ceilings and delays for the pagination controller live here so tests
/// can inject small values and deployments can tune for the target site.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrapeConfig {
    /// Base delay between page fetches in milliseconds
    pub base_delay_ms: u64,
    /// Maximum random jitter added to the base delay in milliseconds
    pub jitter_ms: u64,
    /// Upper bound for the doubled backoff delay in milliseconds
    pub max_delay_ms: u64,
    /// Consecutive blocked responses before the job fails
    pub max_consecutive_blocked: u32,
    /// Retry attempts for transient navigation failures on a single page
    pub max_fetch_retries: u32,
    /// Consecutive pages yielding zero new records before the crawl stops
    pub max_consecutive_empty_pages: u32,
    /// Hard ceiling on pages fetched per job
    pub max_pages: u32,
    /// Maximum number of jobs running at the same time
    pub max_concurrent_jobs: usize,
    /// Overall wall-clock ceiling for a single job in seconds
    pub job_timeout_secs: u64,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 500,
            jitter_ms: 250,
            max_delay_ms: 30_000,
            max_consecutive_blocked: 3,
            max_fetch_retries: 3,
            max_consecutive_empty_pages: 2,
            max_pages: 50,
            max_concurrent_jobs: 2,
            job_timeout_secs: 1800,
        }
    }
}

/// Browser automation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// Run browser in headless mode. Window size is not configured here:
    /// each session gets a randomized viewport from its fingerprint.
    pub headless: bool,
    /// Hard timeout for a single page fetch (navigation plus the wait for
    /// the listing container) in seconds
    pub fetch_timeout_secs: u64,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            fetch_timeout_secs: 20,
        }
    }
}

/// Record store settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Connection string for the record store. When `None`, a local SQLite
    /// file under the data directory is used.
    pub url: Option<String>,
}
