use crate::error::{BrowserError, Result};
use crate::fingerprint::FingerprintConfig;
use crate::source::RawPage;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::Page;
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Interval between checks for the listing container after navigation.
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// One headless Chromium process plus its CDP event loop.
///
/// A session is exclusively owned by the crawl loop that opened it and is
/// torn down on every exit path: [`BrowserSession::close`] on the normal
/// path, the `Drop` impl otherwise (chromiumoxide kills the child process
/// when the `Browser` handle drops).
pub struct BrowserSession {
    browser: Browser,
    handler_task: JoinHandle<()>,
    alive: Arc<AtomicBool>,
}

impl BrowserSession {
    /// Launch a browser with the given settings and fingerprint.
    pub async fn launch(
        config: &propscout_core::BrowserConfig,
        fingerprint: FingerprintConfig,
    ) -> Result<Self> {
        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .window_size(fingerprint.viewport_width, fingerprint.viewport_height)
            .arg(format!("--user-agent={}", fingerprint.user_agent));

        if !config.headless {
            builder = builder.with_head();
        }

        let browser_config = builder.build().map_err(BrowserError::Launch)?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| BrowserError::Launch(e.to_string()))?;

        let alive = Arc::new(AtomicBool::new(true));
        let alive_flag = alive.clone();

        // Drive CDP events until the browser process goes away
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                let _ = event;
            }
            alive_flag.store(false, Ordering::SeqCst);
            tracing::warn!("browser event loop terminated");
        });

        tracing::debug!(
            user_agent = %fingerprint.user_agent,
            "launched browser session"
        );

        Ok(Self {
            browser,
            handler_task,
            alive,
        })
    }

    /// Fetch a URL and return its rendered DOM once `wait_selector` has
    /// appeared, or fail with [`BrowserError::NavigationTimeout`] when the
    /// deadline elapses first.
    ///
    /// A response carrying bot-check markers fails with
    /// [`BrowserError::Blocked`]; a dead browser process with
    /// [`BrowserError::SessionDied`].
    pub async fn fetch_page(
        &self,
        url: &str,
        wait_selector: &str,
        timeout: Duration,
    ) -> Result<RawPage> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(BrowserError::SessionDied(
                "browser event loop terminated".to_string(),
            ));
        }

        let deadline = tokio::time::Instant::now() + timeout;
        let timed_out = || {
            BrowserError::NavigationTimeout(format!(
                "'{wait_selector}' did not appear within {timeout:?} at {url}"
            ))
        };

        let page = match tokio::time::timeout_at(deadline, self.browser.new_page(url)).await {
            Ok(opened) => opened.map_err(|e| self.classify(&e.to_string()))?,
            Err(_) => return Err(timed_out()),
        };

        // The tab must be closed whether rendering succeeds, fails, or runs
        // out of time; leaked tabs accumulate over a long crawl.
        let result = match tokio::time::timeout_at(deadline, self.render(&page, url, wait_selector))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(timed_out()),
        };
        if let Err(e) = page.close().await {
            tracing::debug!("failed to close page: {}", e);
        }
        result
    }

    async fn render(&self, page: &Page, url: &str, wait_selector: &str) -> Result<RawPage> {
        // new_page returns after navigation, but the portal renders listings
        // client-side; poll until the container exists (bounded by the
        // caller's deadline).
        while page.find_element(wait_selector).await.is_err() {
            if !self.alive.load(Ordering::SeqCst) {
                return Err(BrowserError::SessionDied(
                    "browser event loop terminated".to_string(),
                ));
            }
            tokio::time::sleep(WAIT_POLL_INTERVAL).await;
        }

        let html = page
            .content()
            .await
            .map_err(|e| self.classify(&e.to_string()))?;

        if let Some(marker) = detect_blocking(&html) {
            return Err(BrowserError::Blocked(format!("{marker} marker at {url}")));
        }

        Ok(RawPage {
            url: url.to_string(),
            html,
        })
    }

    fn classify(&self, message: &str) -> BrowserError {
        if self.alive.load(Ordering::SeqCst) {
            BrowserError::Navigation(message.to_string())
        } else {
            BrowserError::SessionDied(message.to_string())
        }
    }

    /// Tear the session down gracefully.
    pub async fn close(mut self) {
        self.alive.store(false, Ordering::SeqCst);
        if let Err(e) = self.browser.close().await {
            tracing::debug!("browser close failed: {}", e);
        }
        if let Err(e) = self.browser.wait().await {
            tracing::debug!("browser wait failed: {}", e);
        }
        self.handler_task.abort();
        tracing::debug!("browser session closed");
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        // The Browser handle kills the child process on drop; the event loop
        // task must not outlive it.
        self.handler_task.abort();
    }
}

/// Check rendered content for bot-blocking markers.
///
/// Returns the matched marker for the error message, or `None` for a normal
/// page.
fn detect_blocking(html: &str) -> Option<&'static str> {
    let lowered = html.to_lowercase();
    for marker in ["g-recaptcha", "recaptcha", "captcha", "access denied"] {
        if lowered.contains(marker) {
            return Some(marker);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_blocking() {
        assert_eq!(
            detect_blocking(r#"<div class="g-recaptcha"></div>"#),
            Some("g-recaptcha")
        );
        assert_eq!(
            detect_blocking("<h1>Access Denied</h1>"),
            Some("access denied")
        );
        assert_eq!(detect_blocking(r#"<div class="search-results"></div>"#), None);
    }

    #[test]
    fn test_detect_blocking_case_insensitive() {
        assert!(detect_blocking("<div id=\"CAPTCHA-box\"></div>").is_some());
    }
}
