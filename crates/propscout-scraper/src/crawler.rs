//! Crawl loop and the engine facade.
//!
//! `ScrapeEngine` is the surface the route layer talks to: start, poll,
//! cancel, query. Each started job gets one spawned worker that exclusively
//! owns a browser session and drives the paginated crawl, upserting records
//! as it goes so partial results survive any failure.

use crate::error::{Result, ScrapeError};
use crate::jobs::{JobTracker, ScrapeJob};
use crate::parser::ListingParser;
use crate::site::SiteConfig;
use propscout_browser::{BrowserError, PageSource, SessionFactory};
use propscout_core::{JobId, ListingId, ScrapeConfig};
use propscout_db::records::FilterCriteria;
use propscout_db::{records, scrape_runs, BrokerRecord, Database, ScrapeRun};
use rand::Rng;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How a crawl ended, before the tracker is updated.
enum CrawlOutcome {
    Completed,
    Cancelled,
    Failed(String),
}

/// Scraping job engine facade.
///
/// Owns the job tracker, the record store handle, and the session factory.
/// Clone-cheap: hand one to the route layer and it fans out internally.
#[derive(Clone)]
pub struct ScrapeEngine {
    config: ScrapeConfig,
    site: SiteConfig,
    tracker: Arc<JobTracker>,
    db: Arc<Database>,
    sessions: Arc<dyn SessionFactory>,
    parser: Arc<ListingParser>,
}

impl ScrapeEngine {
    /// Build an engine over the given record store and session factory.
    ///
    /// # Errors
    /// Returns `ScrapeError::InvalidSelector` if the site's selectors fail
    /// to compile.
    pub fn new(
        config: ScrapeConfig,
        site: SiteConfig,
        db: Arc<Database>,
        sessions: Arc<dyn SessionFactory>,
    ) -> Result<Self> {
        let parser = Arc::new(ListingParser::new(site.clone())?);
        Ok(Self {
            config,
            site,
            tracker: Arc::new(JobTracker::new()),
            db,
            sessions,
            parser,
        })
    }

    /// Start a scrape job for the given search URL.
    ///
    /// Spawns a background worker; progress is observed via [`Self::job_status`].
    ///
    /// # Errors
    /// - `ScrapeError::InvalidUrl` if the URL does not parse
    /// - `ScrapeError::JobLimitReached` if the concurrency ceiling is hit
    /// - `ScrapeError::AlreadyRunning` if an active job targets the same URL
    pub fn start_job(&self, target_url: &str) -> Result<JobId> {
        let normalized = self.site.normalize_target(target_url)?;

        let (job_id, cancel) = self.tracker.create(
            target_url.to_string(),
            normalized,
            self.config.max_concurrent_jobs,
        )?;

        info!(job_id = %job_id, target = target_url, "starting scrape job");

        let engine = self.clone();
        let worker_job_id = job_id.clone();
        let target = target_url.to_string();
        tokio::spawn(async move {
            engine.run_worker(worker_job_id, target, cancel).await;
        });

        Ok(job_id)
    }

    /// Get a snapshot of a job's progress.
    ///
    /// # Errors
    /// Returns `ScrapeError::NotFound` for an unknown id.
    pub fn job_status(&self, job_id: &JobId) -> Result<ScrapeJob> {
        self.tracker.get(job_id)
    }

    /// Request cancellation of a running job. No-op when already terminal.
    ///
    /// # Errors
    /// Returns `ScrapeError::NotFound` for an unknown id.
    pub fn cancel_job(&self, job_id: &JobId) -> Result<()> {
        self.tracker.request_cancel(job_id)
    }

    /// Snapshot all tracked jobs, most recently started first.
    #[must_use]
    pub fn list_jobs(&self) -> Vec<ScrapeJob> {
        self.tracker.list_all()
    }

    /// Query stored records matching the filter.
    ///
    /// # Errors
    /// Returns `ScrapeError::Database` if the query fails.
    pub async fn query_records(&self, filter: &FilterCriteria) -> Result<Vec<BrokerRecord>> {
        Ok(records::query_records(self.db.pool(), filter).await?)
    }

    /// Count all stored records.
    ///
    /// # Errors
    /// Returns `ScrapeError::Database` if the query fails.
    pub async fn record_count(&self) -> Result<u64> {
        Ok(records::count_records(self.db.pool(), &FilterCriteria::default()).await?)
    }

    /// List persisted run summaries, most recent first.
    ///
    /// # Errors
    /// Returns `ScrapeError::Database` if the query fails.
    pub async fn run_history(&self, limit: u32) -> Result<Vec<ScrapeRun>> {
        Ok(scrape_runs::list_runs(self.db.pool(), limit).await?)
    }

    async fn run_worker(&self, job_id: JobId, target: String, cancel: CancellationToken) {
        self.tracker.mark_running(&job_id);

        let outcome = match self.sessions.open().await {
            Ok(source) => {
                let budget = Duration::from_secs(self.config.job_timeout_secs);
                let crawl = self.crawl_pages(source.as_ref(), &job_id, &target, &cancel);
                let outcome = match tokio::time::timeout(budget, crawl).await {
                    Ok(outcome) => outcome,
                    Err(_) => CrawlOutcome::Failed(
                        ScrapeError::Timeout(self.config.job_timeout_secs).to_string(),
                    ),
                };
                // Session teardown happens on every exit path, including the
                // wall-clock timeout above.
                source.close().await;
                outcome
            }
            Err(e) => CrawlOutcome::Failed(format!("failed to open browser session: {e}")),
        };

        match outcome {
            CrawlOutcome::Completed => {
                info!(job_id = %job_id, "scrape job completed");
                self.tracker.mark_completed(&job_id);
            }
            CrawlOutcome::Cancelled => {
                info!(job_id = %job_id, "scrape job cancelled");
                self.tracker.mark_cancelled(&job_id);
            }
            CrawlOutcome::Failed(message) => {
                warn!(job_id = %job_id, error = %message, "scrape job failed");
                self.tracker.mark_failed(&job_id, message);
            }
        }

        self.persist_run(&job_id).await;
    }

    async fn crawl_pages(
        &self,
        source: &dyn PageSource,
        job_id: &JobId,
        target: &str,
        cancel: &CancellationToken,
    ) -> CrawlOutcome {
        let mut seen: HashSet<ListingId> = HashSet::new();
        let mut consecutive_blocked = 0u32;
        let mut empty_streak = 0u32;
        let mut page = 1u32;

        loop {
            if cancel.is_cancelled() {
                return CrawlOutcome::Cancelled;
            }

            let url = match self.site.page_url(target, page) {
                Ok(url) => url,
                Err(e) => return CrawlOutcome::Failed(e.to_string()),
            };

            debug!(job_id = %job_id, page, url = %url, "fetching results page");
            let raw = match self.fetch_with_retry(source, &url, cancel).await {
                Ok(raw) => raw,
                Err(e) => {
                    if cancel.is_cancelled() {
                        return CrawlOutcome::Cancelled;
                    }
                    match e {
                        BrowserError::Blocked(reason) => {
                            consecutive_blocked += 1;
                            if consecutive_blocked >= self.config.max_consecutive_blocked {
                                return CrawlOutcome::Failed(format!(
                                    "aborting after {consecutive_blocked} consecutive blocked fetches: {reason}"
                                ));
                            }
                            let delay = backoff_delay(&self.config, consecutive_blocked);
                            warn!(
                                job_id = %job_id,
                                page,
                                consecutive_blocked,
                                delay_ms = delay.as_millis() as u64,
                                "blocked by site, backing off"
                            );
                            tokio::select! {
                                () = cancel.cancelled() => return CrawlOutcome::Cancelled,
                                () = tokio::time::sleep(delay) => {}
                            }
                            continue; // retry the same page
                        }
                        e => return CrawlOutcome::Failed(format!("page fetch failed: {e}")),
                    }
                }
            };
            consecutive_blocked = 0;

            let parsed = self.parser.parse(&raw);
            let mut new_records = 0u32;
            for record in &parsed.records {
                if let Err(e) = records::upsert_record(self.db.pool(), record).await {
                    return CrawlOutcome::Failed(format!("persistence error: {e}"));
                }
                if seen.insert(record.listing_id.clone()) {
                    new_records += 1;
                }
            }
            self.tracker
                .record_page(job_id, new_records, parsed.parse_failures);

            debug!(
                job_id = %job_id,
                page,
                new_records,
                parse_failures = parsed.parse_failures,
                has_next = parsed.has_next_page,
                "page processed"
            );

            if new_records == 0 {
                empty_streak += 1;
            } else {
                empty_streak = 0;
            }

            if !parsed.has_next_page {
                return CrawlOutcome::Completed;
            }
            if empty_streak >= self.config.max_consecutive_empty_pages {
                info!(job_id = %job_id, empty_streak, "stopping after consecutive empty pages");
                return CrawlOutcome::Completed;
            }
            if page >= self.config.max_pages {
                info!(job_id = %job_id, max_pages = self.config.max_pages, "page ceiling reached");
                return CrawlOutcome::Completed;
            }
            page += 1;

            let delay = Duration::from_millis(
                self.config.base_delay_ms + jitter_ms(self.config.jitter_ms),
            );
            tokio::select! {
                () = cancel.cancelled() => return CrawlOutcome::Cancelled,
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Fetch one page, retrying transient navigation failures.
    ///
    /// `Blocked` and `SessionDied` are never retried here; the crawl loop
    /// owns the backoff and abort policy for those.
    async fn fetch_with_retry(
        &self,
        source: &dyn PageSource,
        url: &str,
        cancel: &CancellationToken,
    ) -> std::result::Result<propscout_browser::RawPage, BrowserError> {
        let mut attempt = 0u32;
        loop {
            match source.fetch_page(url).await {
                Ok(raw) => return Ok(raw),
                Err(e @ (BrowserError::Navigation(_) | BrowserError::NavigationTimeout(_)))
                    if attempt + 1 < self.config.max_fetch_retries =>
                {
                    attempt += 1;
                    warn!(url, attempt, error = %e, "transient fetch failure, retrying");
                    let delay = Duration::from_millis(self.config.base_delay_ms);
                    tokio::select! {
                        () = cancel.cancelled() => return Err(e),
                        () = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Write the terminal snapshot to the run history table.
    async fn persist_run(&self, job_id: &JobId) {
        let snapshot = match self.tracker.get(job_id) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "no tracker entry for finished job");
                return;
            }
        };

        let run = ScrapeRun {
            job_id: snapshot.job_id.to_string(),
            target_url: snapshot.target_url,
            status: snapshot.status.to_string(),
            pages_fetched: snapshot.pages_fetched,
            records_found: snapshot.records_found,
            records_failed: snapshot.records_failed,
            started_at: snapshot.started_at,
            finished_at: snapshot.finished_at,
            error_message: snapshot.error_message,
        };

        if let Err(e) = scrape_runs::insert_run(self.db.pool(), &run).await {
            warn!(job_id = %job_id, error = %e, "failed to persist run summary");
        }
    }
}

/// Doubling backoff capped at the configured maximum, plus jitter.
fn backoff_delay(config: &ScrapeConfig, consecutive_blocked: u32) -> Duration {
    let exponent = consecutive_blocked.min(16);
    let doubled = config
        .base_delay_ms
        .saturating_mul(1u64 << exponent)
        .min(config.max_delay_ms);
    Duration::from_millis(doubled + jitter_ms(config.jitter_ms))
}

fn jitter_ms(max: u64) -> u64 {
    if max == 0 {
        0
    } else {
        rand::thread_rng().gen_range(0..=max)
    }
}
