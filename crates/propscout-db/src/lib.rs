//! Propscout Record Store
//!
//! Provides `SQLite` persistence for broker listing records and scrape run
//! summaries. Uses `SQLx` with embedded migrations.
//!
//! # Architecture
//!
//! - **Dedup store**: listing records are keyed by the portal's listing id;
//!   re-scraping the same listing overwrites the row instead of duplicating it
//! - **Run history**: a summary row is written when a scrape job finishes
//! - **Migrations**: SQL migrations are embedded and versioned using `SQLx`
//! - **Connection Pooling**: WAL mode with a busy timeout so job workers and
//!   query callers can share the store
//!
//! # Example
//!
//! ```ignore
//! use propscout_db::Database;
//!
//! let db = Database::new("sqlite://propscout.db").await?;
//! db.run_migrations().await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod connection;
pub mod error;
pub mod migrations;
pub mod records;
pub mod scrape_runs;

// Re-export commonly used types
pub use connection::StorePool;
pub use error::{DatabaseError, Result};
pub use records::{BrokerRecord, FilterCriteria};
pub use scrape_runs::ScrapeRun;

/// High-level database interface with migrations.
///
/// Wraps `StorePool` and handles initialization and migration in one place.
#[derive(Debug)]
pub struct Database {
    pool: StorePool,
}

impl Database {
    /// Open the record store at the given SQLite URL.
    ///
    /// # Errors
    /// Returns `DatabaseError` if the database cannot be opened.
    pub async fn new(url: &str) -> Result<Self> {
        let pool = StorePool::new(url).await?;
        Ok(Self { pool })
    }

    /// Open the record store using the configured URL.
    ///
    /// Falls back to `DATABASE_URL`, then a local file under the data
    /// directory, when the config carries no explicit URL.
    ///
    /// # Errors
    /// Returns `DatabaseError` if no location can be resolved or the
    /// database cannot be opened.
    pub async fn from_config(config: &propscout_core::DatabaseConfig) -> Result<Self> {
        let url = match &config.url {
            Some(url) if !url.trim().is_empty() => url.clone(),
            _ => StorePool::resolve_url()?,
        };
        Self::new(&url).await
    }

    /// Run all pending database migrations.
    ///
    /// # Errors
    /// Returns `DatabaseError::Migration` if any migration fails.
    pub async fn run_migrations(&self) -> Result<()> {
        migrations::run_migrations(self.pool.pool()).await
    }

    /// Get the current schema version.
    ///
    /// # Errors
    /// Returns `DatabaseError` if the version cannot be queried.
    pub async fn get_schema_version(&self) -> Result<i64> {
        migrations::get_schema_version(self.pool.pool()).await
    }

    /// Get a reference to the underlying connection pool.
    #[must_use]
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Sqlite> {
        self.pool.pool()
    }

    /// Close the database connection gracefully.
    pub async fn close(self) {
        self.pool.close().await;
    }
}
