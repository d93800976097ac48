//! Propscout Core - Foundation crate for the propscout scraping engine.
//!
//! This crate provides shared types, error handling, configuration management,
//! and tracing initialization that all other propscout crates depend on.
//!
//! # Modules
//!
//! - [`error`] - Central error types using thiserror
//! - [`config`] - TOML-based configuration with XDG paths and env overrides
//! - [`types`] - Shared newtypes (`JobId`, `ListingId`)
//! - [`logging`] - Tracing subscriber setup
//!
//! # Example
//!
//! ```rust
//! use propscout_core::{AppConfig, JobId};
//!
//! let config = AppConfig::default();
//! assert!(config.browser.headless);
//!
//! let job_id = JobId::generate();
//! assert_eq!(job_id.as_str().len(), 36);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod config;
pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use config::{AppConfig, BrowserConfig, DatabaseConfig, ScrapeConfig};
pub use error::{ConfigError, ConfigResult, Result, ScoutError};
pub use types::{JobId, ListingId};
