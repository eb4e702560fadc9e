// src/orchestrator/retrier.rs
// =============================================================================
// Background retries for results that could not be persisted right away.
//
// When the synchronous update in check_links fails, the caller already has
// its answer. The result is handed over here as an owned job and written
// again from a separate tokio task, with exponential backoff:
//
//   attempt 1 -> wait 1s -> attempt 2 -> wait 2s -> ... -> attempt 5 -> give up
//
// Giving up is logged and the result is dropped. Persistence is best effort,
// not exactly-once.
//
// `drain` waits for every job handed over so far, so a shutdown does not
// exit while a retry is still in flight.
// =============================================================================

use crate::clock::Clock;
use crate::domain::{ResultMap, TaskId};
use crate::store::TaskStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_secs(1),
        }
    }
}

// One result waiting to be written
struct RetryJob {
    task_id: TaskId,
    result: ResultMap,
}

pub struct PersistenceRetrier {
    store: Arc<dyn TaskStore>,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
    in_flight: Mutex<JoinSet<()>>,
}

impl PersistenceRetrier {
    pub fn new(store: Arc<dyn TaskStore>, clock: Arc<dyn Clock>, policy: RetryPolicy) -> Self {
        Self {
            store,
            clock,
            policy,
            in_flight: Mutex::new(JoinSet::new()),
        }
    }

    /// Start retrying the update for `task_id` in the background.
    pub async fn submit(&self, task_id: TaskId, result: ResultMap) {
        let job = RetryJob { task_id, result };
        let store = self.store.clone();
        let clock = self.clock.clone();
        let policy = self.policy;

        let mut in_flight = self.in_flight.lock().await;
        // Reap jobs that already finished so the set does not grow unbounded
        while in_flight.try_join_next().is_some() {}
        in_flight.spawn(run_job(store, clock, policy, job));
    }

    /// Block until every submitted job has succeeded or given up.
    pub async fn drain(&self) {
        let mut in_flight = self.in_flight.lock().await;
        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "persistence retry task panicked");
            }
        }
    }

    /// Jobs that have been submitted and not yet reaped.
    pub async fn pending(&self) -> usize {
        self.in_flight.lock().await.len()
    }
}

async fn run_job(
    store: Arc<dyn TaskStore>,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
    job: RetryJob,
) {
    let attempts = policy.max_attempts.max(1);
    let mut backoff = policy.initial_backoff;

    for attempt in 1..=attempts {
        match store.update_task_result(job.task_id, job.result.clone()).await {
            Ok(()) => {
                info!(task_id = job.task_id, attempt, "task result persisted after retry");
                return;
            }
            Err(e) if attempt == attempts => {
                error!(
                    task_id = job.task_id,
                    attempts,
                    error = %e,
                    "giving up on persisting task result"
                );
            }
            Err(e) => {
                warn!(
                    task_id = job.task_id,
                    attempt,
                    error = %e,
                    retry_in_ms = backoff.as_millis() as u64,
                    "task result persistence failed, retrying"
                );
                clock.sleep(backoff).await;
                backoff = backoff.saturating_mul(2);
            }
        }
    }
}
