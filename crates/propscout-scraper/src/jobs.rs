//! In-process scrape job registry.
//!
//! Maps job ids to live job state behind a lock, for polling by the route
//! layer while crawl workers mutate their own job. Counter and status updates
//! for a page are applied as a unit under the write lock, so a poller never
//! observes a half-updated snapshot. Terminal states are immutable.

use crate::error::{Result, ScrapeError};
use chrono::{DateTime, Utc};
use propscout_core::JobId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Lifecycle state of a scrape job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    /// Created, worker not yet running
    Pending,
    /// Crawl loop is executing
    Running,
    /// Crawl finished normally
    Completed,
    /// Crawl aborted with an error
    Failed,
    /// Crawl stopped by an external cancel request
    Cancelled,
}

impl JobStatus {
    /// Whether this status is terminal (no further transitions).
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Running => write!(f, "Running"),
            Self::Completed => write!(f, "Completed"),
            Self::Failed => write!(f, "Failed"),
            Self::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// Snapshot of one scrape job's progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeJob {
    /// Job identifier, generated at creation
    pub job_id: JobId,
    /// The search URL the job crawls
    pub target_url: String,
    /// Current lifecycle state
    pub status: JobStatus,
    /// Pages successfully fetched and parsed so far
    pub pages_fetched: u32,
    /// Distinct records found so far (first sighting per job)
    pub records_found: u32,
    /// Listing fragments that failed to parse so far
    pub records_failed: u32,
    /// When the job was created
    pub started_at: DateTime<Utc>,
    /// Set when the job reaches a terminal state
    pub finished_at: Option<DateTime<Utc>>,
    /// Failure reason, set only in `Failed`
    pub error_message: Option<String>,
}

struct TrackedJob {
    job: ScrapeJob,
    normalized_target: String,
    cancel: CancellationToken,
}

/// Process-wide registry of scrape jobs.
///
/// Entries are kept for the lifetime of the process so finished jobs remain
/// pollable; durable history lives in the `scrape_runs` table.
pub struct JobTracker {
    jobs: RwLock<HashMap<JobId, TrackedJob>>,
}

impl JobTracker {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
        }
    }

    /// Create a new job in `Pending` for the given target.
    ///
    /// `normalized_target` is used for duplicate detection: a second start
    /// request for a target that already has a pending or running job fails
    /// without creating an entry. The duplicate check, the `max_active`
    /// ceiling check, and the insert all happen under one write-lock hold,
    /// so two racing starts cannot both slip under the ceiling.
    ///
    /// # Errors
    /// - `ScrapeError::AlreadyRunning` on a duplicate active target
    /// - `ScrapeError::JobLimitReached` when `max_active` jobs are already
    ///   pending or running
    pub fn create(
        &self,
        target_url: String,
        normalized_target: String,
        max_active: usize,
    ) -> Result<(JobId, CancellationToken)> {
        let mut jobs = self.jobs.write().expect("acquire write lock on jobs");

        let duplicate = jobs.values().any(|tracked| {
            !tracked.job.status.is_terminal() && tracked.normalized_target == normalized_target
        });
        if duplicate {
            return Err(ScrapeError::AlreadyRunning(target_url));
        }

        let active = jobs
            .values()
            .filter(|tracked| !tracked.job.status.is_terminal())
            .count();
        if active >= max_active {
            return Err(ScrapeError::JobLimitReached(active));
        }

        let job_id = JobId::generate();
        let cancel = CancellationToken::new();
        let job = ScrapeJob {
            job_id: job_id.clone(),
            target_url,
            status: JobStatus::Pending,
            pages_fetched: 0,
            records_found: 0,
            records_failed: 0,
            started_at: Utc::now(),
            finished_at: None,
            error_message: None,
        };

        debug!(job_id = %job_id, "created scrape job");
        jobs.insert(
            job_id.clone(),
            TrackedJob {
                job,
                normalized_target,
                cancel: cancel.clone(),
            },
        );

        Ok((job_id, cancel))
    }

    /// Get a consistent snapshot of a job.
    ///
    /// # Errors
    /// Returns `ScrapeError::NotFound` if the id is unknown.
    pub fn get(&self, job_id: &JobId) -> Result<ScrapeJob> {
        let jobs = self.jobs.read().expect("acquire read lock on jobs");
        jobs.get(job_id)
            .map(|tracked| tracked.job.clone())
            .ok_or_else(|| ScrapeError::NotFound(job_id.clone()))
    }

    /// Snapshot every tracked job, most recently started first.
    #[must_use]
    pub fn list_all(&self) -> Vec<ScrapeJob> {
        let jobs = self.jobs.read().expect("acquire read lock on jobs");
        let mut all: Vec<ScrapeJob> = jobs.values().map(|tracked| tracked.job.clone()).collect();
        all.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        all
    }

    /// Request cancellation of a job.
    ///
    /// Trips the job's cancellation token, which the crawl loop observes
    /// before each fetch and during backoff waits. No-op when the job is
    /// already terminal.
    ///
    /// # Errors
    /// Returns `ScrapeError::NotFound` if the id is unknown.
    pub fn request_cancel(&self, job_id: &JobId) -> Result<()> {
        let jobs = self.jobs.read().expect("acquire read lock on jobs");
        let tracked = jobs
            .get(job_id)
            .ok_or_else(|| ScrapeError::NotFound(job_id.clone()))?;

        if tracked.job.status.is_terminal() {
            debug!(job_id = %job_id, status = %tracked.job.status, "cancel request ignored, job already terminal");
            return Ok(());
        }

        debug!(job_id = %job_id, "cancellation requested");
        tracked.cancel.cancel();
        Ok(())
    }

    /// Get the cancellation token for a job.
    ///
    /// # Errors
    /// Returns `ScrapeError::NotFound` if the id is unknown.
    pub fn cancel_token(&self, job_id: &JobId) -> Result<CancellationToken> {
        let jobs = self.jobs.read().expect("acquire read lock on jobs");
        jobs.get(job_id)
            .map(|tracked| tracked.cancel.clone())
            .ok_or_else(|| ScrapeError::NotFound(job_id.clone()))
    }

    /// Mark a pending job as running.
    pub fn mark_running(&self, job_id: &JobId) {
        self.mutate(job_id, |job| {
            if job.status == JobStatus::Pending {
                job.status = JobStatus::Running;
            }
        });
    }

    /// Apply one page's results to the job counters as a unit.
    ///
    /// Counters only move forward; updates are dropped once the job is
    /// terminal.
    pub fn record_page(&self, job_id: &JobId, new_records: u32, parse_failures: u32) {
        self.mutate(job_id, |job| {
            job.pages_fetched += 1;
            job.records_found += new_records;
            job.records_failed += parse_failures;
        });
    }

    /// Mark a job completed.
    pub fn mark_completed(&self, job_id: &JobId) {
        self.finish(job_id, JobStatus::Completed, None);
    }

    /// Mark a job failed with a human-readable reason.
    pub fn mark_failed(&self, job_id: &JobId, error_message: String) {
        self.finish(job_id, JobStatus::Failed, Some(error_message));
    }

    /// Mark a job cancelled.
    pub fn mark_cancelled(&self, job_id: &JobId) {
        self.finish(job_id, JobStatus::Cancelled, None);
    }

    fn finish(&self, job_id: &JobId, status: JobStatus, error_message: Option<String>) {
        self.mutate(job_id, |job| {
            job.status = status;
            job.finished_at = Some(Utc::now());
            job.error_message = error_message;
        });
    }

    /// Run a mutation under the write lock, skipping terminal jobs.
    fn mutate(&self, job_id: &JobId, apply: impl FnOnce(&mut ScrapeJob)) {
        let mut jobs = self.jobs.write().expect("acquire write lock on jobs");
        match jobs.get_mut(job_id) {
            Some(tracked) if !tracked.job.status.is_terminal() => apply(&mut tracked.job),
            Some(tracked) => {
                debug!(job_id = %job_id, status = %tracked.job.status, "update ignored, job already terminal");
            }
            None => warn!(job_id = %job_id, "update for unknown job ignored"),
        }
    }
}

impl Default for JobTracker {
    fn default() -> Self {
        Self::new()
    }
}
