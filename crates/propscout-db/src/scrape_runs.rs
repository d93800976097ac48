//! Scrape run summaries.
//!
//! A row is written to `scrape_runs` when a job reaches a terminal state, so
//! run history survives process restarts even though live job progress is
//! tracked in memory.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Row, Sqlite};

use crate::error::{DatabaseError, Result};

/// Persisted summary of a finished scrape job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeRun {
    /// Identifier of the job this run summarizes
    pub job_id: String,
    /// The search URL the job crawled
    pub target_url: String,
    /// Terminal status: `Completed`, `Failed`, or `Cancelled`
    pub status: String,
    /// Number of pages successfully fetched and parsed
    pub pages_fetched: u32,
    /// Number of distinct records extracted during the run
    pub records_found: u32,
    /// Number of listing cards that failed to parse
    pub records_failed: u32,
    /// When the job started running
    pub started_at: DateTime<Utc>,
    /// When the job reached its terminal state
    pub finished_at: Option<DateTime<Utc>>,
    /// Failure reason, present only for failed runs
    pub error_message: Option<String>,
}

/// Insert a run summary for a finished job.
///
/// # Errors
/// Returns `DatabaseError` if the insert fails, including when a summary for
/// the same job id already exists.
pub async fn insert_run(pool: &Pool<Sqlite>, run: &ScrapeRun) -> Result<()> {
    sqlx::query(
        "INSERT INTO scrape_runs (job_id, target_url, status, pages_fetched,
                                  records_found, records_failed, started_at,
                                  finished_at, error_message)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&run.job_id)
    .bind(&run.target_url)
    .bind(&run.status)
    .bind(i64::from(run.pages_fetched))
    .bind(i64::from(run.records_found))
    .bind(i64::from(run.records_failed))
    .bind(run.started_at.to_rfc3339())
    .bind(run.finished_at.map(|dt| dt.to_rfc3339()))
    .bind(&run.error_message)
    .execute(pool)
    .await?;

    Ok(())
}

/// Get the run summary for a specific job.
///
/// # Errors
/// Returns `DatabaseError::NotFound` if the job has no persisted summary.
pub async fn get_run(pool: &Pool<Sqlite>, job_id: &str) -> Result<ScrapeRun> {
    let row = sqlx::query(
        "SELECT job_id, target_url, status, pages_fetched, records_found,
                records_failed, started_at, finished_at, error_message
         FROM scrape_runs
         WHERE job_id = ?",
    )
    .bind(job_id)
    .fetch_optional(pool)
    .await?
    .ok_or(DatabaseError::NotFound)?;

    parse_run_from_row(&row)
}

/// List run summaries, most recently started first.
///
/// # Errors
/// Returns `DatabaseError` if the query fails.
pub async fn list_runs(pool: &Pool<Sqlite>, limit: u32) -> Result<Vec<ScrapeRun>> {
    let rows = sqlx::query(
        "SELECT job_id, target_url, status, pages_fetched, records_found,
                records_failed, started_at, finished_at, error_message
         FROM scrape_runs
         ORDER BY started_at DESC
         LIMIT ?",
    )
    .bind(i64::from(limit))
    .fetch_all(pool)
    .await?;

    rows.iter().map(parse_run_from_row).collect()
}

/// Get the most recently started run, or `None` when no job has finished yet.
///
/// # Errors
/// Returns `DatabaseError` if the query fails.
pub async fn latest_run(pool: &Pool<Sqlite>) -> Result<Option<ScrapeRun>> {
    Ok(list_runs(pool, 1).await?.into_iter().next())
}

fn parse_run_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<ScrapeRun> {
    let started_at_str: String = row.try_get("started_at")?;
    let started_at = DateTime::parse_from_rfc3339(&started_at_str)
        .map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc));

    let finished_at: Option<String> = row.try_get("finished_at")?;
    let finished_at = finished_at.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    });

    let pages_fetched: i64 = row.try_get("pages_fetched")?;
    let records_found: i64 = row.try_get("records_found")?;
    let records_failed: i64 = row.try_get("records_failed")?;

    Ok(ScrapeRun {
        job_id: row.try_get("job_id")?,
        target_url: row.try_get("target_url")?,
        status: row.try_get("status")?,
        pages_fetched: u32::try_from(pages_fetched)
            .map_err(|_| DatabaseError::Decode("negative pages_fetched".to_string()))?,
        records_found: u32::try_from(records_found)
            .map_err(|_| DatabaseError::Decode("negative records_found".to_string()))?,
        records_failed: u32::try_from(records_failed)
            .map_err(|_| DatabaseError::Decode("negative records_failed".to_string()))?,
        started_at,
        finished_at,
        error_message: row.try_get("error_message")?,
    })
}
