//! Database connection management.
//!
//! Provides a `StorePool` wrapper around `SQLx` that resolves the connection
//! string (explicit, `DATABASE_URL`, or a local file under the data
//! directory) and applies the SQLite pragmas the store relies on.

use crate::error::{DatabaseError, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::str::FromStr;
use std::time::Duration;

/// Record store connection pool.
#[derive(Debug)]
pub struct StorePool {
    pool: Pool<Sqlite>,
}

impl StorePool {
    /// Create a new connection pool for the given SQLite URL or file path.
    ///
    /// The database file is created if missing. WAL mode plus a busy timeout
    /// keep concurrent job workers and the polling/query path from tripping
    /// over each other's writes.
    ///
    /// # Errors
    /// Returns `DatabaseError::Open` if the URL is malformed or the file
    /// cannot be opened.
    pub async fn new(url: &str) -> Result<Self> {
        let connect_options = SqliteConnectOptions::from_str(url)
            .map_err(|e| DatabaseError::Open(format!("invalid connection string '{url}': {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5))
            .foreign_keys(true);

        // An in-memory database exists per connection; a second pooled
        // connection would see an empty schema.
        let max_connections = if url.contains(":memory:") { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(connect_options)
            .await
            .map_err(|e| DatabaseError::Open(format!("failed to connect to '{url}': {e}")))?;

        tracing::info!("record store pool created at {}", url);

        Ok(Self { pool })
    }

    /// Resolve the connection URL from the environment.
    ///
    /// `DATABASE_URL` wins when set and non-empty; otherwise a
    /// `propscout.db` file under the XDG data directory is used (created on
    /// first run).
    pub fn resolve_url() -> Result<String> {
        if let Ok(url) = std::env::var("DATABASE_URL") {
            let url = url.trim().to_string();
            if !url.is_empty() {
                return Ok(url);
            }
        }

        let data_dir = propscout_core::AppConfig::data_dir()
            .map_err(|e| DatabaseError::Open(format!("no data directory: {e}")))?;
        std::fs::create_dir_all(&data_dir)?;
        Ok(format!("sqlite://{}/propscout.db", data_dir.display()))
    }

    /// Get a reference to the underlying `SQLx` pool.
    #[must_use]
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Verify that the database is reachable.
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Close the connection pool gracefully.
    pub async fn close(self) {
        self.pool.close().await;
        tracing::info!("record store pool closed");
    }
}
