//! End-to-end engine tests over a scripted page source.
//!
//! No real browser: a scripted `PageSource` plays back a fixed sequence of
//! pages and failures, so crawl behavior (termination, backoff, cancellation,
//! dedup) is exercised deterministically against an in-memory record store.

use async_trait::async_trait;
use propscout_browser::{BrowserError, PageSource, RawPage, SessionFactory};
use propscout_core::{JobId, ScrapeConfig};
use propscout_db::records::FilterCriteria;
use propscout_db::Database;
use propscout_scraper::{JobStatus, ScrapeEngine, ScrapeError, ScrapeJob, SiteConfig};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One scripted response from the fake browser.
enum Step {
    Page(String),
    Blocked,
    Navigation,
    SessionDied,
    Hang,
}

struct ScriptedSource {
    steps: Arc<Mutex<VecDeque<Step>>>,
    closed: Arc<AtomicBool>,
    fetches: Arc<AtomicUsize>,
}

#[async_trait]
impl PageSource for ScriptedSource {
    async fn fetch_page(&self, url: &str) -> propscout_browser::Result<RawPage> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let step = self.steps.lock().expect("lock steps").pop_front();
        match step {
            Some(Step::Page(html)) => Ok(RawPage {
                url: url.to_string(),
                html,
            }),
            Some(Step::Blocked) => Err(BrowserError::Blocked("captcha marker".to_string())),
            Some(Step::Navigation) => Err(BrowserError::Navigation("dns failure".to_string())),
            Some(Step::SessionDied) => {
                Err(BrowserError::SessionDied("browser process exited".to_string()))
            }
            Some(Step::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                unreachable!("hang step should outlive any test timeout");
            }
            // Script exhausted: an empty final page without a next control
            None => Ok(RawPage {
                url: url.to_string(),
                html: listing_page(&[], false),
            }),
        }
    }

    async fn close(self: Box<Self>) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

struct ScriptedFactory {
    steps: Arc<Mutex<VecDeque<Step>>>,
    closed: Arc<AtomicBool>,
    fetches: Arc<AtomicUsize>,
}

impl ScriptedFactory {
    fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: Arc::new(Mutex::new(steps.into())),
            closed: Arc::new(AtomicBool::new(false)),
            fetches: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl SessionFactory for ScriptedFactory {
    async fn open(&self) -> propscout_browser::Result<Box<dyn PageSource>> {
        Ok(Box::new(ScriptedSource {
            steps: Arc::clone(&self.steps),
            closed: Arc::clone(&self.closed),
            fetches: Arc::clone(&self.fetches),
        }))
    }
}

/// Build a results page with one card per (id, name, agency) and optionally
/// a next-page control, matching the default `SiteConfig` selectors.
fn listing_page(brokers: &[(&str, &str, &str)], has_next: bool) -> String {
    let mut cards = String::new();
    for (id, name, agency) in brokers {
        cards.push_str(&format!(
            "<div data-testid='broker-card' data-broker-id='{id}'>
               <span data-testid='broker-name'>{name}</span>
               <span data-testid='broker-agency'>{agency}</span>
             </div>"
        ));
    }
    let next = if has_next {
        "<a data-testid='pagination-page-next-link' href='?page=2'>Next</a>"
    } else {
        ""
    };
    format!("<html><body><div data-testid='broker-list'>{cards}</div>{next}</body></html>")
}

fn fast_config() -> ScrapeConfig {
    ScrapeConfig {
        base_delay_ms: 1,
        jitter_ms: 0,
        max_delay_ms: 5,
        max_consecutive_blocked: 3,
        max_fetch_retries: 2,
        max_consecutive_empty_pages: 2,
        max_pages: 10,
        max_concurrent_jobs: 2,
        job_timeout_secs: 30,
    }
}

async fn engine_with(config: ScrapeConfig, steps: Vec<Step>) -> (ScrapeEngine, Arc<AtomicBool>) {
    let db = Database::new("sqlite::memory:").await.expect("open db");
    db.run_migrations().await.expect("run migrations");

    let factory = ScriptedFactory::new(steps);
    let closed = Arc::clone(&factory.closed);
    let engine = ScrapeEngine::new(
        config,
        SiteConfig::default(),
        Arc::new(db),
        Arc::new(factory),
    )
    .expect("build engine");
    (engine, closed)
}

async fn wait_terminal(engine: &ScrapeEngine, job_id: &JobId, budget: Duration) -> ScrapeJob {
    let deadline = tokio::time::Instant::now() + budget;
    loop {
        let job = engine.job_status(job_id).expect("job status");
        if job.status.is_terminal() {
            return job;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "job did not reach a terminal state within {budget:?}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

const TARGET: &str = "https://portal.example/find-broker/search";

#[tokio::test]
async fn three_page_crawl_completes_with_all_records() {
    // Scenario: pages 1 and 2 have next controls, page 3 does not;
    // 10 distinct listings in total.
    let steps = vec![
        Step::Page(listing_page(
            &[
                ("b-1", "Alice", "Acme Realty"),
                ("b-2", "Bob", "Acme Realty"),
                ("b-3", "Cara", "Harbour Homes"),
                ("b-4", "Dan", "Harbour Homes"),
            ],
            true,
        )),
        Step::Page(listing_page(
            &[
                ("b-5", "Eve", "Acme Realty"),
                ("b-6", "Finn", "Skyline"),
                ("b-7", "Gus", "Skyline"),
                ("b-8", "Hana", "Skyline"),
            ],
            true,
        )),
        Step::Page(listing_page(
            &[("b-9", "Ivy", "Acme Realty"), ("b-10", "Jon", "Skyline")],
            false,
        )),
    ];
    let (engine, closed) = engine_with(fast_config(), steps).await;

    let job_id = engine.start_job(TARGET).expect("start job");
    let job = wait_terminal(&engine, &job_id, Duration::from_secs(5)).await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.pages_fetched, 3);
    assert_eq!(job.records_found, 10);
    assert_eq!(job.records_failed, 0);
    assert!(job.finished_at.is_some());

    assert_eq!(engine.record_count().await.expect("count"), 10);
    assert!(closed.load(Ordering::SeqCst), "session must be closed");

    // Run summary persisted with the terminal snapshot
    let runs = engine.run_history(10).await.expect("run history");
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, "Completed");
    assert_eq!(runs[0].records_found, 10);
}

#[tokio::test]
async fn repeated_blocks_fail_job_but_keep_page_one_records() {
    // Scenario: page 2 is blocked three consecutive times (configured max).
    let steps = vec![
        Step::Page(listing_page(
            &[
                ("b-1", "Alice", "Acme Realty"),
                ("b-2", "Bob", "Acme Realty"),
                ("b-3", "Cara", "Harbour Homes"),
            ],
            true,
        )),
        Step::Blocked,
        Step::Blocked,
        Step::Blocked,
    ];
    let db = Database::new("sqlite::memory:").await.expect("open db");
    db.run_migrations().await.expect("run migrations");
    let factory = ScriptedFactory::new(steps);
    let closed = Arc::clone(&factory.closed);
    let fetches = Arc::clone(&factory.fetches);
    let engine = ScrapeEngine::new(
        fast_config(),
        SiteConfig::default(),
        Arc::new(db),
        Arc::new(factory),
    )
    .expect("build engine");

    let job_id = engine.start_job(TARGET).expect("start job");
    let job = wait_terminal(&engine, &job_id, Duration::from_secs(5)).await;

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.pages_fetched, 1);
    assert_eq!(job.records_found, 3);
    assert_eq!(fetches.load(Ordering::SeqCst), 4); // page 1 plus three blocked attempts
    assert!(job
        .error_message
        .as_deref()
        .is_some_and(|m| m.contains("blocked")));

    // Partial results are never discarded
    assert_eq!(engine.record_count().await.expect("count"), 3);
    assert!(closed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn agency_filter_matches_substring_case_insensitively() {
    let steps = vec![Step::Page(listing_page(
        &[
            ("b-1", "Alice", "Acme Realty"),
            ("b-2", "Bob", "ACME Partners"),
            ("b-3", "Cara", "Harbour Homes"),
        ],
        false,
    ))];
    let (engine, _) = engine_with(fast_config(), steps).await;

    let job_id = engine.start_job(TARGET).expect("start job");
    wait_terminal(&engine, &job_id, Duration::from_secs(5)).await;

    let filter = FilterCriteria {
        agency: Some("Acme".to_string()),
        ..Default::default()
    };
    let matched = engine.query_records(&filter).await.expect("query");
    assert_eq!(matched.len(), 2);
    assert!(matched.iter().all(|r| r
        .agency
        .as_deref()
        .is_some_and(|a| a.to_lowercase().contains("acme"))));

    // Empty criteria returns everything
    let all = engine
        .query_records(&FilterCriteria::default())
        .await
        .expect("query all");
    assert_eq!(all.len(), 3);
}

#[tokio::test]
async fn duplicate_target_rejected_while_running() {
    // A slow inter-page delay keeps the first job running
    let mut config = fast_config();
    config.base_delay_ms = 60_000;

    let steps = vec![
        Step::Page(listing_page(&[("b-1", "Alice", "Acme Realty")], true)),
        Step::Page(listing_page(&[("b-2", "Bob", "Acme Realty")], false)),
    ];
    let (engine, _) = engine_with(config, steps).await;

    let job_id = engine.start_job(TARGET).expect("start first job");

    // Wait until the worker is actually mid-crawl
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if engine.job_status(&job_id).expect("status").pages_fetched >= 1 {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // Same target (modulo page param and trailing slash) is rejected and no
    // second tracker entry appears
    let result = engine.start_job(&format!("{TARGET}/?page=3"));
    assert!(matches!(result, Err(ScrapeError::AlreadyRunning(_))));
    assert_eq!(engine.list_jobs().len(), 1);

    engine.cancel_job(&job_id).expect("cancel job");
    let job = wait_terminal(&engine, &job_id, Duration::from_secs(5)).await;
    assert_eq!(job.status, JobStatus::Cancelled);

    // Once terminal, the same target may be crawled again
    assert!(engine.start_job(TARGET).is_ok());
}

#[tokio::test]
async fn cancel_during_backoff_is_prompt() {
    // Huge delays: without prompt cancellation this test cannot finish
    let mut config = fast_config();
    config.base_delay_ms = 60_000;
    config.max_delay_ms = 600_000;

    let steps = vec![
        Step::Page(listing_page(&[("b-1", "Alice", "Acme Realty")], true)),
        Step::Blocked,
    ];
    let (engine, closed) = engine_with(config, steps).await;

    let job_id = engine.start_job(TARGET).expect("start job");

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if engine.job_status(&job_id).expect("status").pages_fetched >= 1 {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    engine.cancel_job(&job_id).expect("cancel job");
    let job = wait_terminal(&engine, &job_id, Duration::from_secs(1)).await;

    assert_eq!(job.status, JobStatus::Cancelled);
    assert!(job.error_message.is_none());
    assert!(closed.load(Ordering::SeqCst));

    // Records persisted before the cancellation point remain queryable
    assert_eq!(engine.record_count().await.expect("count"), 1);
}

#[tokio::test]
async fn session_death_fails_job_and_keeps_partial_results() {
    let steps = vec![
        Step::Page(listing_page(&[("b-1", "Alice", "Acme Realty")], true)),
        Step::SessionDied,
    ];
    let (engine, closed) = engine_with(fast_config(), steps).await;

    let job_id = engine.start_job(TARGET).expect("start job");
    let job = wait_terminal(&engine, &job_id, Duration::from_secs(5)).await;

    assert_eq!(job.status, JobStatus::Failed);
    assert!(job
        .error_message
        .as_deref()
        .is_some_and(|m| m.contains("browser process exited")));
    assert_eq!(engine.record_count().await.expect("count"), 1);
    assert!(closed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn transient_navigation_failure_is_retried() {
    let steps = vec![
        Step::Navigation,
        Step::Page(listing_page(&[("b-1", "Alice", "Acme Realty")], false)),
    ];
    let (engine, _) = engine_with(fast_config(), steps).await;

    let job_id = engine.start_job(TARGET).expect("start job");
    let job = wait_terminal(&engine, &job_id, Duration::from_secs(5)).await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.pages_fetched, 1);
    assert_eq!(job.records_found, 1);
}

#[tokio::test]
async fn consecutive_empty_pages_end_the_crawl() {
    // Every page claims a next control but yields no records
    let steps = vec![
        Step::Page(listing_page(&[], true)),
        Step::Page(listing_page(&[], true)),
        Step::Page(listing_page(&[], true)),
    ];
    let (engine, _) = engine_with(fast_config(), steps).await;

    let job_id = engine.start_job(TARGET).expect("start job");
    let job = wait_terminal(&engine, &job_id, Duration::from_secs(5)).await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.pages_fetched, 2); // stops at the configured empty-page streak
}

#[tokio::test]
async fn repeated_listing_ids_count_once_per_job() {
    let steps = vec![
        Step::Page(listing_page(
            &[("b-1", "Alice", "Acme Realty"), ("b-2", "Bob", "Acme Realty")],
            true,
        )),
        Step::Page(listing_page(
            &[("b-1", "Alice Updated", "Acme Realty"), ("b-3", "Cara", "Skyline")],
            false,
        )),
    ];
    let (engine, _) = engine_with(fast_config(), steps).await;

    let job_id = engine.start_job(TARGET).expect("start job");
    let job = wait_terminal(&engine, &job_id, Duration::from_secs(5)).await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.records_found, 3); // b-1 seen twice, counted once

    // The refresh overwrote rather than duplicated
    assert_eq!(engine.record_count().await.expect("count"), 3);
    let filter = FilterCriteria {
        name: Some("Alice Updated".to_string()),
        ..Default::default()
    };
    assert_eq!(engine.query_records(&filter).await.expect("query").len(), 1);
}

#[tokio::test]
async fn concurrency_ceiling_rejects_excess_starts() {
    let mut config = fast_config();
    config.max_concurrent_jobs = 1;
    config.base_delay_ms = 60_000;

    let steps = vec![
        Step::Page(listing_page(&[("b-1", "Alice", "Acme Realty")], true)),
        Step::Page(listing_page(&[("b-2", "Bob", "Acme Realty")], false)),
    ];
    let (engine, _) = engine_with(config, steps).await;

    let job_id = engine.start_job(TARGET).expect("start first job");
    let result = engine.start_job("https://portal.example/other-search");
    assert!(matches!(result, Err(ScrapeError::JobLimitReached(1))));

    engine.cancel_job(&job_id).expect("cancel job");
    wait_terminal(&engine, &job_id, Duration::from_secs(5)).await;

    assert!(engine.start_job("https://portal.example/other-search").is_ok());
}

#[tokio::test]
async fn wall_clock_ceiling_fails_a_hung_job() {
    let mut config = fast_config();
    config.job_timeout_secs = 1;

    let steps = vec![
        Step::Page(listing_page(&[("b-1", "Alice", "Acme Realty")], true)),
        Step::Hang,
    ];
    let (engine, closed) = engine_with(config, steps).await;

    let job_id = engine.start_job(TARGET).expect("start job");
    let job = wait_terminal(&engine, &job_id, Duration::from_secs(5)).await;

    assert_eq!(job.status, JobStatus::Failed);
    assert!(job
        .error_message
        .as_deref()
        .is_some_and(|m| m.contains("time limit")));
    // Partial data preserved and session torn down despite the timeout
    assert_eq!(engine.record_count().await.expect("count"), 1);
    assert!(closed.load(Ordering::SeqCst));

    let runs = engine.run_history(10).await.expect("run history");
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, "Failed");
}

#[tokio::test]
async fn invalid_target_url_is_rejected_up_front() {
    let (engine, _) = engine_with(fast_config(), Vec::new()).await;
    let result = engine.start_job("not a url");
    assert!(matches!(result, Err(ScrapeError::InvalidUrl(_))));
    assert!(engine.list_jobs().is_empty());
}
