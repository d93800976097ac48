use thiserror::Error;

pub type Result<T> = std::result::Result<T, BrowserError>;

/// Failures surfaced by the browser driver adapter.
///
/// Everything except `SessionDied` is recoverable by the caller via
/// retry/backoff; `SessionDied` means the browser process is gone and the
/// owning crawl must abort.
#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("failed to launch browser: {0}")]
    Launch(String),

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("timed out waiting for page content: {0}")]
    NavigationTimeout(String),

    #[error("response indicates bot blocking: {0}")]
    Blocked(String),

    #[error("browser session died: {0}")]
    SessionDied(String),
}

impl BrowserError {
    /// Whether the crawl loop may retry the fetch that produced this error.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::SessionDied(_) | Self::Launch(_))
    }
}
