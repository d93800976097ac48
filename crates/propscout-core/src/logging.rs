//! Tracing subscriber setup.
//!
//! The workspace has no binary member, so the embedding application (or a
//! test harness) calls [`init`] once at startup.

use std::sync::Once;
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Install a global tracing subscriber with `RUST_LOG`-style filtering.
///
/// Defaults to `info` for propscout crates when `RUST_LOG` is unset.
/// Safe to call more than once; only the first call installs.
pub fn init() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,propscout=debug"));

        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    });
}
