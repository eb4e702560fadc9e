// src/domain.rs
// =============================================================================
// Core data types shared by the checker, the store and the orchestrator.
//
// - LinkStatus: the terminal outcome of checking one link
// - ResultMap: link string -> status, filled in once a batch finishes
// - Task: one submitted batch of links with its assigned ID
//
// The serialized forms here are also the on-disk forms in the task log, so
// renaming a field or a variant changes the log format.
// =============================================================================

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Task identifiers are assigned by the store and never reused.
pub type TaskId = u64;

/// Per-link results of one batch.
///
/// A BTreeMap keeps the serialized order stable, which keeps log lines
/// and reports deterministic.
pub type ResultMap = BTreeMap<String, LinkStatus>;

// The outcome of checking a single link
//
// There are only two states and both are terminal: once a check has
// produced one, it is never re-evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LinkStatus {
    /// The host answered with a status in [200, 400)
    #[serde(rename = "available")]
    Available,
    /// Anything else: bad syntax, blocked host, open breaker, errors, timeouts
    #[serde(rename = "not available")]
    NotAvailable,
}

impl LinkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkStatus::Available => "available",
            LinkStatus::NotAvailable => "not available",
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, LinkStatus::Available)
    }
}

impl fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// A batch of links submitted together
//
// `links` keeps the submission order and may contain duplicates.
// `result` stays empty until the batch has been checked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub links: Vec<String>,
    #[serde(default)]
    pub result: ResultMap,
}

impl Task {
    pub fn new(id: TaskId, links: Vec<String>) -> Self {
        Self {
            id,
            links,
            result: ResultMap::new(),
        }
    }

    /// A task counts as completed once any result has been stored for it.
    pub fn is_completed(&self) -> bool {
        !self.result.is_empty()
    }

    /// Status of a link as it should be shown to a reader.
    ///
    /// Links without a stored status (the task was never updated, or the
    /// check never ran) are reported as not available.
    pub fn status_of(&self, link: &str) -> LinkStatus {
        self.result
            .get(link)
            .copied()
            .unwrap_or(LinkStatus::NotAvailable)
    }
}
