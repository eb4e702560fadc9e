// src/orchestrator/mod.rs
// =============================================================================
// The public face of the engine.
//
// check_links:
// 1. create the task in the store (failure here is the only hard error)
// 2. derive ONE deadline for the whole batch
// 3. spawn one check per link; each check must win a permit from the shared
//    semaphore before touching the network, and gives up as NotAvailable if
//    the deadline fires first
// 4. merge the outcomes under a mutex and wait for every check to finish
// 5. persist the result; if that fails, hand the result to the background
//    retrier and report it as deferred
//
// generate_report hands the IDs to the report worker pool.
// wait drains the background retrier before shutdown.
//
// Rust concepts:
// - Arc<Semaphore>: a counting permit set shared by every batch
// - JoinSet: owns the spawned checks, so none outlives the call
// - tokio::time::timeout_at: one absolute deadline shared by many futures
// =============================================================================

mod report;
mod retrier;

pub use report::{ReportQueue, ReportRenderer, TextReport, DEFAULT_REPORT_WORKERS};
pub use retrier::{PersistenceRetrier, RetryPolicy};

use crate::checker::Checker;
use crate::clock::{Clock, SystemClock};
use crate::domain::{LinkStatus, ResultMap, TaskId};
use crate::error::{ReportError, StoreResult};
use crate::store::TaskStore;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{error, info, warn};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_WORKERS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    /// Deadline for a whole check_links call.
    pub timeout: Duration,
    /// Outbound checks allowed at the same time, across all calls.
    pub max_workers: usize,
    pub report_workers: usize,
    pub retry: RetryPolicy,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            max_workers: DEFAULT_MAX_WORKERS,
            report_workers: DEFAULT_REPORT_WORKERS,
            retry: RetryPolicy::default(),
        }
    }
}

/// What check_links hands back to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckOutcome {
    #[serde(rename = "links_num")]
    pub task_id: TaskId,
    #[serde(rename = "links")]
    pub results: ResultMap,
    /// True when the result is not yet durable and a retry is running.
    #[serde(skip)]
    pub deferred: bool,
}

impl CheckOutcome {
    pub fn unavailable(&self) -> usize {
        self.results.values().filter(|s| !s.is_available()).count()
    }
}

pub struct Orchestrator {
    store: Arc<dyn TaskStore>,
    checker: Arc<Checker>,
    permits: Arc<Semaphore>,
    timeout: Duration,
    retrier: PersistenceRetrier,
    reports: ReportQueue,
}

impl Orchestrator {
    /// Wire up the engine. Must be called from within a tokio runtime since
    /// it starts the report workers.
    pub fn new(store: Arc<dyn TaskStore>, checker: Arc<Checker>, settings: Settings) -> Self {
        Self::with_clock(store, checker, settings, Arc::new(SystemClock))
    }

    /// Like `new`, with the clock the persistence retrier waits on.
    pub fn with_clock(
        store: Arc<dyn TaskStore>,
        checker: Arc<Checker>,
        settings: Settings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::with_renderer(store, checker, settings, clock, Arc::new(TextReport))
    }

    pub fn with_renderer(
        store: Arc<dyn TaskStore>,
        checker: Arc<Checker>,
        settings: Settings,
        clock: Arc<dyn Clock>,
        renderer: Arc<dyn ReportRenderer>,
    ) -> Self {
        let max_workers = if settings.max_workers == 0 {
            DEFAULT_MAX_WORKERS
        } else {
            settings.max_workers
        };
        let timeout = if settings.timeout.is_zero() {
            DEFAULT_TIMEOUT
        } else {
            settings.timeout
        };

        Self {
            retrier: PersistenceRetrier::new(store.clone(), clock, settings.retry),
            reports: ReportQueue::start(store.clone(), renderer, settings.report_workers),
            store,
            checker,
            permits: Arc::new(Semaphore::new(max_workers)),
            timeout,
        }
    }

    /// Check every link in one batch.
    ///
    /// `caller_deadline` can only shorten the configured timeout. Once the
    /// task has been created this never fails: unfinished checks become
    /// NotAvailable and persistence failures become `deferred`.
    pub async fn check_links(
        &self,
        links: Vec<String>,
        caller_deadline: Option<Instant>,
    ) -> StoreResult<CheckOutcome> {
        let task = self.store.create_task(links).await?;
        let started = Instant::now();
        let mut deadline = started + self.timeout;
        if let Some(caller) = caller_deadline {
            deadline = deadline.min(caller);
        }

        let results = Arc::new(Mutex::new(ResultMap::new()));
        let mut checks = JoinSet::new();

        for link in task.links.iter().cloned() {
            let checker = self.checker.clone();
            let permits = self.permits.clone();
            let results = results.clone();

            checks.spawn(async move {
                let status = match tokio::time::timeout_at(deadline, permits.acquire_owned()).await {
                    Ok(Ok(_permit)) => checker.check(&link, deadline).await,
                    // Deadline fired (or the semaphore closed) before a permit was free
                    _ => LinkStatus::NotAvailable,
                };
                lock(&results).insert(link, status);
            });
        }

        while let Some(joined) = checks.join_next().await {
            if let Err(e) = joined {
                error!(task_id = task.id, error = %e, "link check task failed");
            }
        }

        let mut results = std::mem::take(&mut *lock(&results));
        // A check that panicked left no entry behind
        for link in &task.links {
            results.entry(link.clone()).or_insert(LinkStatus::NotAvailable);
        }

        let available = results.values().filter(|s| s.is_available()).count();
        info!(
            task_id = task.id,
            links = task.links.len(),
            available,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "link batch checked"
        );

        let deferred = match self.store.update_task_result(task.id, results.clone()).await {
            Ok(()) => false,
            Err(e) => {
                warn!(task_id = task.id, error = %e, "task result not persisted, retrying in background");
                self.retrier.submit(task.id, results.clone()).await;
                true
            }
        };

        Ok(CheckOutcome {
            task_id: task.id,
            results,
            deferred,
        })
    }

    /// Render a report for the given task IDs before `deadline`.
    pub async fn generate_report(
        &self,
        ids: Vec<TaskId>,
        deadline: Instant,
    ) -> Result<Vec<u8>, ReportError> {
        self.reports.generate(ids, deadline).await
    }

    /// Wait for every background persistence retry to finish.
    pub async fn wait(&self) {
        self.retrier.drain().await;
    }
}

fn lock(results: &Mutex<ResultMap>) -> std::sync::MutexGuard<'_, ResultMap> {
    results.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// -----------------------------------------------------------------------------
// BEGINNER NOTES:
//
// 1. Why one deadline instead of a timeout per link?
//    - The caller waits for the whole batch, so the batch is what gets a
//      time budget
//    - Every check gets the same absolute Instant; a check that starts late
//      simply has less time left
//
// 2. What does acquire_owned() give us?
//    - An OwnedSemaphorePermit that can move into a spawned task
//    - Dropping the permit hands the slot to the next waiting check
//
// 3. Why is the retrier a separate spawned task?
//    - The caller already has the answer; only the disk write is late
//    - Keeping it off the request path means a slow disk never delays
//      the response
// -----------------------------------------------------------------------------
