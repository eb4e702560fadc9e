// src/orchestrator/report.rs
// =============================================================================
// Report generation on a small pool of background workers.
//
// A caller submits a job (deadline, task IDs, reply slot) on a shared bounded
// queue and waits on its private reply slot. Each worker:
//
// 1. replies Cancelled if the job's deadline has already passed
// 2. loads the tasks from the store
// 3. checks the deadline again
// 4. renders the artifact and sends it back
//
// The reply slot is a oneshot channel, so replying never blocks: if the
// caller stopped waiting, the send just fails and the worker moves on.
// Submitting honours the caller's deadline when the queue is full.
// =============================================================================

use crate::domain::{Task, TaskId};
use crate::error::ReportError;
use crate::store::TaskStore;
use std::fmt::Write as _;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::Instant;
use tracing::debug;

pub const DEFAULT_REPORT_WORKERS: usize = 2;

/// Turns stored tasks into a report artifact.
pub trait ReportRenderer: Send + Sync {
    fn render(&self, tasks: &[Task]) -> Result<Vec<u8>, ReportError>;
}

// Plain-text report
//
//   Links report
//
//   Task #1
//     example.com - available
//     go.dev - not available
#[derive(Debug, Clone, Copy, Default)]
pub struct TextReport;

impl ReportRenderer for TextReport {
    fn render(&self, tasks: &[Task]) -> Result<Vec<u8>, ReportError> {
        let mut out = String::from("Links report\n");
        for task in tasks {
            writeln!(out, "\nTask #{}", task.id).map_err(|e| ReportError::Render(e.to_string()))?;
            for link in &task.links {
                writeln!(out, "  {} - {}", link, task.status_of(link))
                    .map_err(|e| ReportError::Render(e.to_string()))?;
            }
        }
        Ok(out.into_bytes())
    }
}

struct ReportJob {
    deadline: Instant,
    ids: Vec<TaskId>,
    reply: oneshot::Sender<Result<Vec<u8>, ReportError>>,
}

pub struct ReportQueue {
    jobs: mpsc::Sender<ReportJob>,
}

impl ReportQueue {
    /// Start `workers` background workers (0 means the default of 2).
    ///
    /// Must be called from within a tokio runtime. The workers stop once
    /// the queue is dropped.
    pub fn start(
        store: Arc<dyn TaskStore>,
        renderer: Arc<dyn ReportRenderer>,
        workers: usize,
    ) -> Self {
        let workers = if workers == 0 { DEFAULT_REPORT_WORKERS } else { workers };
        let (jobs, rx) = mpsc::channel(workers);
        let rx = Arc::new(Mutex::new(rx));

        for worker in 0..workers {
            let rx = rx.clone();
            let store = store.clone();
            let renderer = renderer.clone();
            tokio::spawn(async move {
                loop {
                    // The lock is only held while waiting for the next job
                    let job = rx.lock().await.recv().await;
                    let Some(job) = job else { break };
                    handle_job(store.as_ref(), renderer.as_ref(), job).await;
                }
                debug!(worker, "report worker stopped");
            });
        }

        Self { jobs }
    }

    /// Build a report for `ids`, giving up once `deadline` passes.
    pub async fn generate(&self, ids: Vec<TaskId>, deadline: Instant) -> Result<Vec<u8>, ReportError> {
        let (reply, response) = oneshot::channel();
        let job = ReportJob {
            deadline,
            ids,
            reply,
        };

        match tokio::time::timeout_at(deadline, self.jobs.send(job)).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => return Err(ReportError::QueueClosed),
            Err(_) => return Err(ReportError::Cancelled),
        }

        match tokio::time::timeout_at(deadline, response).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ReportError::QueueClosed),
            Err(_) => Err(ReportError::Cancelled),
        }
    }
}

async fn handle_job(store: &dyn TaskStore, renderer: &dyn ReportRenderer, job: ReportJob) {
    let result = build(store, renderer, &job).await;
    // A closed reply slot means the caller already gave up
    let _ = job.reply.send(result);
}

async fn build(
    store: &dyn TaskStore,
    renderer: &dyn ReportRenderer,
    job: &ReportJob,
) -> Result<Vec<u8>, ReportError> {
    if Instant::now() >= job.deadline {
        return Err(ReportError::Cancelled);
    }
    let tasks = store.get_tasks(&job.ids).await?;
    if Instant::now() >= job.deadline {
        return Err(ReportError::Cancelled);
    }
    renderer.render(&tasks)
}
