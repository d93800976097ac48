//! Trait seam between the crawl loop and the real browser.
//!
//! The crawl loop only needs "give me the rendered HTML for this URL", so it
//! talks to a [`PageSource`] opened by a [`SessionFactory`]. The chromiumoxide
//! implementation lives in [`crate::session`]; tests substitute scripted
//! sources.

use crate::error::Result;
use crate::fingerprint::FingerprintConfig;
use crate::session::BrowserSession;
use propscout_core::BrowserConfig;
use std::time::Duration;

/// A rendered page as returned by the driver: final URL plus DOM content.
#[derive(Debug, Clone)]
pub struct RawPage {
    /// URL the page was fetched from
    pub url: String,
    /// Rendered document HTML
    pub html: String,
}

/// One exclusive browser session, owned by a single crawl loop.
#[async_trait::async_trait]
pub trait PageSource: Send + Sync {
    /// Fetch a URL and return its rendered content once the listing
    /// container has appeared (or fail with a bounded timeout).
    async fn fetch_page(&self, url: &str) -> Result<RawPage>;

    /// Tear down the session, releasing the underlying browser process.
    async fn close(self: Box<Self>);
}

/// Opens fresh [`PageSource`] sessions, one per job.
#[async_trait::async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open(&self) -> Result<Box<dyn PageSource>>;
}

/// Factory producing real chromiumoxide-backed sessions.
pub struct ChromiumFactory {
    config: BrowserConfig,
    wait_selector: String,
}

impl ChromiumFactory {
    /// Create a factory. `wait_selector` is the CSS selector of the listing
    /// container whose appearance marks a page as rendered.
    #[must_use]
    pub fn new(config: BrowserConfig, wait_selector: impl Into<String>) -> Self {
        Self {
            config,
            wait_selector: wait_selector.into(),
        }
    }
}

#[async_trait::async_trait]
impl SessionFactory for ChromiumFactory {
    async fn open(&self) -> Result<Box<dyn PageSource>> {
        let session = BrowserSession::launch(&self.config, FingerprintConfig::randomized()).await?;
        Ok(Box::new(ChromiumSource {
            session,
            wait_selector: self.wait_selector.clone(),
            timeout: Duration::from_secs(self.config.fetch_timeout_secs),
        }))
    }
}

struct ChromiumSource {
    session: BrowserSession,
    wait_selector: String,
    timeout: Duration,
}

#[async_trait::async_trait]
impl PageSource for ChromiumSource {
    async fn fetch_page(&self, url: &str) -> Result<RawPage> {
        self.session
            .fetch_page(url, &self.wait_selector, self.timeout)
            .await
    }

    async fn close(self: Box<Self>) {
        self.session.close().await;
    }
}
