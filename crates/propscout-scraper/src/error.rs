//! Error types for the scraping job engine.

use propscout_core::JobId;
use thiserror::Error;

/// Errors surfaced by the job engine and its facade.
#[derive(Debug, Error)]
pub enum ScrapeError {
    /// A job for this target URL is already pending or running
    #[error("a scrape job for '{0}' is already running")]
    AlreadyRunning(String),

    /// No job with this id exists in the tracker
    #[error("scrape job '{0}' not found")]
    NotFound(JobId),

    /// The configured ceiling on concurrently running jobs was hit
    #[error("cannot start job: {0} jobs already running (configured maximum)")]
    JobLimitReached(usize),

    /// The job exceeded its overall wall-clock ceiling
    #[error("job exceeded its overall time limit of {0} seconds")]
    Timeout(u64),

    /// Invalid target URL supplied to the engine
    #[error("invalid target URL: {0}")]
    InvalidUrl(String),

    /// A configured CSS selector failed to compile
    #[error("invalid CSS selector '{0}'")]
    InvalidSelector(String),

    /// Browser driver failure
    #[error("browser error: {0}")]
    Browser(#[from] propscout_browser::BrowserError),

    /// Record store failure
    #[error("persistence error: {0}")]
    Database(#[from] propscout_db::DatabaseError),
}

/// Result type alias for scrape operations.
pub type Result<T> = std::result::Result<T, ScrapeError>;
