// src/error.rs
// =============================================================================
// Error types for the library modules.
//
// The binary wraps these in anyhow::Error with extra context; inside the
// library each layer returns its own enum so callers can tell a missing task
// apart from a failed disk write.
//
// Not every failure is an error here: malformed links, blocked hosts and
// network failures all end up as LinkStatus::NotAvailable instead.
// =============================================================================

use crate::domain::TaskId;
use thiserror::Error;

/// Result alias for task store operations.
pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("task log I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode log entry: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("corrupt log entry in {path} at line {line}: {reason}")]
    Corrupt {
        path: String,
        line: usize,
        reason: String,
    },

    // Updates always follow a successful create, so this is a logic error
    #[error("task {0} not found")]
    NotFound(TaskId),

    #[error("no task IDs left to assign")]
    IdsExhausted,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("report generation cancelled: deadline exceeded")]
    Cancelled,

    #[error("report queue is closed")]
    QueueClosed,

    #[error("failed to load tasks: {0}")]
    Store(#[from] StoreError),

    #[error("failed to render report: {0}")]
    Render(String),
}

impl ReportError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ReportError::Cancelled)
    }
}
