// src/store/mod.rs
// =============================================================================
// Durable task storage.
//
// The log (log.rs) is the only source of truth. FileStore keeps an in-memory
// index of tasks that is rebuilt by replaying the log on load and kept in
// step with every successful append afterwards.
//
// Locking:
// - `writer` (async mutex) serializes every append, so the order of lines in
//   the log is the order in which creates and updates were accepted
// - `index` (RwLock) guards the in-memory tasks; readers only take it shared
//   and never wait on a slow disk write
//
// The index is only touched after the matching log line is on disk, so a
// reader can never see a task whose create has not been persisted.
// =============================================================================

mod log;

pub use log::{LogEntry, LogFile, LogOp, Replay, DEFAULT_MAX_BYTES, DEFAULT_RETENTION};

use crate::domain::{ResultMap, Task, TaskId};
use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Persistence operations the orchestrator and the report workers need.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Assign the next ID, persist the new task and return a copy of it.
    async fn create_task(&self, links: Vec<String>) -> StoreResult<Task>;

    /// Persist the result of a checked task.
    async fn update_task_result(&self, id: TaskId, result: ResultMap) -> StoreResult<()>;

    /// Copies of the requested tasks. Unknown IDs are skipped.
    async fn get_tasks(&self, ids: &[TaskId]) -> StoreResult<Vec<Task>>;
}

// State only the writer touches
struct Writer {
    log: LogFile,
    next_id: TaskId,
}

pub struct FileStore {
    writer: Mutex<Writer>,
    index: RwLock<HashMap<TaskId, Task>>,
}

impl FileStore {
    /// An empty store writing to `log`. Call `load` to pick up existing entries.
    pub fn new(log: LogFile) -> Self {
        Self {
            writer: Mutex::new(Writer { log, next_id: 1 }),
            index: RwLock::new(HashMap::new()),
        }
    }

    /// Build a store and replay its log.
    pub async fn open(log: LogFile) -> StoreResult<Self> {
        let store = Self::new(log);
        store.load().await?;
        Ok(store)
    }

    /// Rebuild the index from the log.
    ///
    /// Creates insert tasks and move the next ID past them. Updates replace
    /// the result of a known task; updates for unknown IDs are ignored.
    pub async fn load(&self) -> StoreResult<()> {
        let mut writer = self.writer.lock().await;
        let replay = writer.log.replay().await?;

        let mut tasks = HashMap::new();
        let mut next_id: TaskId = 1;
        let mut ignored = 0usize;
        let entries = replay.entries.len();

        for entry in replay.entries {
            match entry.op {
                LogOp::Create { task } => {
                    next_id = next_id.max(task.id.saturating_add(1));
                    tasks.insert(task.id, task);
                }
                LogOp::Update { task_id, result } => match tasks.get_mut(&task_id) {
                    Some(task) => task.result = result,
                    None => ignored += 1,
                },
            }
        }

        if ignored > 0 {
            debug!(ignored, "ignored updates for unknown tasks during replay");
        }
        info!(
            path = %writer.log.path().display(),
            segments = replay.segments,
            entries,
            tasks = tasks.len(),
            next_id,
            "task log replayed"
        );

        writer.next_id = next_id;
        *self.index_mut() = tasks;
        Ok(())
    }

    /// Total number of tasks, and how many of them have a stored result.
    pub fn stats(&self) -> (usize, usize) {
        let index = self.index();
        let completed = index.values().filter(|t| t.is_completed()).count();
        (index.len(), completed)
    }

    // The index only ever holds fully-applied tasks, so a poisoned lock
    // still guards consistent data.
    fn index(&self) -> RwLockReadGuard<'_, HashMap<TaskId, Task>> {
        self.index.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn index_mut(&self) -> RwLockWriteGuard<'_, HashMap<TaskId, Task>> {
        self.index.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl TaskStore for FileStore {
    async fn create_task(&self, links: Vec<String>) -> StoreResult<Task> {
        let mut writer = self.writer.lock().await;

        // The ID is spent even if the append fails, so it can never be
        // handed out twice.
        // TaskId::MAX is never handed out; it only marks the space as used up
        let id = writer.next_id;
        if id == TaskId::MAX {
            return Err(StoreError::IdsExhausted);
        }
        writer.next_id += 1;

        let task = Task::new(id, links);
        writer.log.append(&LogEntry::create(task.clone())).await?;
        self.index_mut().insert(id, task.clone());

        debug!(task_id = id, links = task.links.len(), "task created");
        Ok(task)
    }

    async fn update_task_result(&self, id: TaskId, result: ResultMap) -> StoreResult<()> {
        let writer = self.writer.lock().await;

        if !self.index().contains_key(&id) {
            return Err(StoreError::NotFound(id));
        }
        writer.log.append(&LogEntry::update(id, result.clone())).await?;

        if let Some(task) = self.index_mut().get_mut(&id) {
            task.result = result;
        }
        Ok(())
    }

    async fn get_tasks(&self, ids: &[TaskId]) -> StoreResult<Vec<Task>> {
        let index = self.index();
        Ok(ids.iter().filter_map(|id| index.get(id).cloned()).collect())
    }
}
