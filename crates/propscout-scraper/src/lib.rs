//! Propscout Scraping Job Engine
//!
//! Drives headless-browser crawls across the portal's paginated broker
//! search, tracks live job progress for polling and cancellation, and
//! persists deduplicated records incrementally.
//!
//! # Architecture
//!
//! - **Parser**: pure extraction from the rendered page, preferring the
//!   portal's embedded JSON payload with a CSS fallback
//! - **Tracker**: in-process registry of jobs with an atomic per-page
//!   counter/status update discipline
//! - **Crawl loop**: one worker per job with exclusive ownership of its
//!   browser session, jittered delays, doubling backoff on blocks, and
//!   cooperative cancellation
//! - **Facade**: [`ScrapeEngine`] is the only surface the route layer needs
//!
//! # Example
//!
//! ```ignore
//! use propscout_scraper::{ScrapeEngine, SiteConfig};
//!
//! let engine = ScrapeEngine::new(config.scrape, SiteConfig::default(), db, sessions)?;
//! let job_id = engine.start_job("https://www.propertyfinder.qa/en/find-broker/search")?;
//! let status = engine.job_status(&job_id)?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::cast_possible_truncation)]

pub mod crawler;
pub mod error;
pub mod jobs;
pub mod parser;
pub mod site;

// Re-export commonly used types
pub use crawler::ScrapeEngine;
pub use error::{Result, ScrapeError};
pub use jobs::{JobStatus, JobTracker, ScrapeJob};
pub use parser::{ListingParser, ParsedPage};
pub use site::SiteConfig;
