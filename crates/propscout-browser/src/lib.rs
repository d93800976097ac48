//! Browser driver adapter for the JavaScript-rendered listing portal.
//!
//! Owns a headless Chromium session per crawl, resolves navigation and
//! bounded waits into rendered DOM content, and classifies failures into
//! the recoverable/fatal taxonomy the crawl loop retries against.

pub mod error;
pub mod fingerprint;
pub mod session;
pub mod source;

pub use error::{BrowserError, Result};
pub use fingerprint::FingerprintConfig;
pub use session::BrowserSession;
pub use source::{ChromiumFactory, PageSource, RawPage, SessionFactory};
