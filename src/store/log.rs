// src/store/log.rs
// =============================================================================
// The append-only task log.
//
// One JSON object per line:
//
//   {"op":"create","task":{"id":1,"links":["a.com"],"result":{}},"ts":"..."}
//   {"op":"update","task_id":1,"result":{"a.com":"available"},"ts":"..."}
//
// Each append opens the active file, writes one full line and fsyncs before
// returning. If the write fails the file is cut back to its previous length.
//
// Rotation: before an append, an active file at or above `max_bytes` is
// renamed to `<stem>-<YYYY-MM-DD>.<ext>` (with `.N` added when that name is
// taken) and the append goes to a fresh file. Rotated segments older than the
// retention window are deleted at the same time.
//
// Replay reads the retained rotated segments oldest first, then the active
// file. A malformed final line is a torn write from a crash and is skipped;
// a malformed line anywhere else is reported as corruption.
// =============================================================================

use crate::domain::{ResultMap, Task, TaskId};
use crate::error::{StoreError, StoreResult};
use chrono::{DateTime, Local, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

pub const DEFAULT_MAX_BYTES: u64 = 100 << 20;
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum LogOp {
    Create { task: Task },
    Update { task_id: TaskId, result: ResultMap },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    #[serde(flatten)]
    pub op: LogOp,
    pub ts: DateTime<Utc>,
}

impl LogEntry {
    pub fn create(task: Task) -> Self {
        Self {
            op: LogOp::Create { task },
            ts: Utc::now(),
        }
    }

    pub fn update(task_id: TaskId, result: ResultMap) -> Self {
        Self {
            op: LogOp::Update { task_id, result },
            ts: Utc::now(),
        }
    }
}

/// Everything read back from the log, plus what it took to get there.
#[derive(Debug, Default)]
pub struct Replay {
    pub entries: Vec<LogEntry>,
    /// Segments read, oldest first (the active file last, when present).
    pub segments: usize,
    /// Whether a torn final line was dropped from the active file.
    pub repaired: bool,
}

#[derive(Debug, Clone)]
pub struct LogFile {
    path: PathBuf,
    max_bytes: u64,
    retention: Duration,
}

impl LogFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_bytes: DEFAULT_MAX_BYTES,
            retention: DEFAULT_RETENTION,
        }
    }

    /// Size threshold for rotation and how long rotated segments are kept.
    /// A zero retention keeps rotated segments forever.
    pub fn with_rotation(mut self, max_bytes: u64, retention: Duration) -> Self {
        if max_bytes > 0 {
            self.max_bytes = max_bytes;
        }
        self.retention = retention;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every retained entry in the order it was written.
    ///
    /// A missing active file is not an error. A torn final line in the
    /// active file is cut off so later appends start on a clean line.
    pub async fn replay(&self) -> StoreResult<Replay> {
        let mut replay = Replay::default();

        for segment in self.rotated_segments().await? {
            let bytes = fs::read(&segment).await?;
            let parsed = parse_segment(&segment, &bytes)?;
            if parsed.torn {
                warn!(segment = %segment.display(), "skipping torn final entry in rotated segment");
            }
            replay.entries.extend(parsed.entries);
            replay.segments += 1;
        }

        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(replay),
            Err(e) => return Err(e.into()),
        };
        let parsed = parse_segment(&self.path, &bytes)?;
        replay.entries.extend(parsed.entries);
        replay.segments += 1;

        if parsed.torn || parsed.clean_len < bytes.len() as u64 || !parsed.ends_with_newline {
            self.repair_tail(parsed.clean_len, parsed.ends_with_newline).await?;
            replay.repaired = parsed.torn;
            if parsed.torn {
                warn!(
                    path = %self.path.display(),
                    kept_bytes = parsed.clean_len,
                    "dropped torn final entry from task log"
                );
            }
        }

        Ok(replay)
    }

    /// Append one entry and fsync it.
    pub async fn append(&self, entry: &LogEntry) -> StoreResult<()> {
        self.maybe_rotate().await?;

        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        let len_before = file.metadata().await?.len();

        let written = async {
            file.write_all(&line).await?;
            file.flush().await?;
            file.sync_all().await
        }
        .await;

        if let Err(e) = written {
            // Leave no partial line behind for the next append to land on
            if let Err(rollback) = file.set_len(len_before).await {
                warn!(
                    path = %self.path.display(),
                    error = %rollback,
                    "failed to roll back partial log write"
                );
            }
            return Err(e.into());
        }
        Ok(())
    }

    /// Rotate when the active file has reached the size threshold.
    async fn maybe_rotate(&self) -> StoreResult<()> {
        let size = match fs::metadata(&self.path).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        if size < self.max_bytes {
            return Ok(());
        }
        self.rotate().await.map(|_| ())
    }

    /// Move the active file aside under a dated name and prune old segments.
    ///
    /// Returns the rotated path, or None when there was nothing to rotate.
    pub async fn rotate(&self) -> StoreResult<Option<PathBuf>> {
        if fs::metadata(&self.path).await.is_err() {
            return Ok(None);
        }

        let date = Local::now().format("%Y-%m-%d").to_string();
        let mut counter = 0u32;
        let target = loop {
            let candidate = self.segment_path(&date, counter);
            if fs::metadata(&candidate).await.is_err() {
                break candidate;
            }
            counter += 1;
        };

        fs::rename(&self.path, &target).await?;
        info!(from = %self.path.display(), to = %target.display(), "rotated task log");

        let removed = self.remove_expired().await?;
        if removed > 0 {
            info!(removed, "removed expired task log segments");
        }
        Ok(Some(target))
    }

    async fn remove_expired(&self) -> StoreResult<usize> {
        if self.retention.is_zero() {
            return Ok(0);
        }
        let Some(cutoff) = SystemTime::now().checked_sub(self.retention) else {
            return Ok(0);
        };

        let mut removed = 0;
        for segment in self.rotated_segments().await? {
            let modified = fs::metadata(&segment).await?.modified()?;
            if modified > cutoff {
                continue;
            }
            match fs::remove_file(&segment).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(removed)
    }

    // Rotated segments next to the active file, oldest first
    async fn rotated_segments(&self) -> StoreResult<Vec<PathBuf>> {
        let dir = self.dir();
        let mut listing = match fs::read_dir(&dir).await {
            Ok(listing) => listing,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let (stem, ext) = self.name_parts();
        let mut found = Vec::new();
        while let Some(entry) = listing.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(key) = parse_segment_name(name, &stem, ext.as_deref()) {
                found.push((key, entry.path()));
            }
        }
        found.sort();
        Ok(found.into_iter().map(|(_, path)| path).collect())
    }

    fn segment_path(&self, date: &str, counter: u32) -> PathBuf {
        let (stem, ext) = self.name_parts();
        let mut name = format!("{}-{}", stem, date);
        if counter > 0 {
            name.push_str(&format!(".{}", counter));
        }
        if let Some(ext) = ext {
            name.push('.');
            name.push_str(&ext);
        }
        self.dir().join(name)
    }

    fn name_parts(&self) -> (String, Option<String>) {
        let stem = self
            .path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("tasks")
            .to_string();
        let ext = self
            .path
            .extension()
            .and_then(|s| s.to_str())
            .map(str::to_string);
        (stem, ext)
    }

    fn dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    async fn repair_tail(&self, clean_len: u64, ends_with_newline: bool) -> StoreResult<()> {
        let mut file = OpenOptions::new().write(true).open(&self.path).await?;
        file.set_len(clean_len).await?;
        if clean_len > 0 && !ends_with_newline {
            file = OpenOptions::new().append(true).open(&self.path).await?;
            file.write_all(b"\n").await?;
            file.flush().await?;
        }
        file.sync_all().await?;
        Ok(())
    }
}

struct ParsedSegment {
    entries: Vec<LogEntry>,
    torn: bool,
    // Bytes up to the end of the last good line
    clean_len: u64,
    ends_with_newline: bool,
}

fn parse_segment(path: &Path, bytes: &[u8]) -> StoreResult<ParsedSegment> {
    let lines: Vec<&[u8]> = bytes.split_inclusive(|b| *b == b'\n').collect();
    let last_content = lines.iter().rposition(|line| !is_blank(line));

    let mut parsed = ParsedSegment {
        entries: Vec::new(),
        torn: false,
        clean_len: 0,
        ends_with_newline: true,
    };
    let mut offset = 0u64;

    for (index, line) in lines.iter().enumerate() {
        offset += line.len() as u64;
        if is_blank(line) {
            continue;
        }
        match serde_json::from_slice::<LogEntry>(line) {
            Ok(entry) => {
                parsed.entries.push(entry);
                parsed.clean_len = offset;
                parsed.ends_with_newline = line.ends_with(b"\n");
            }
            Err(_) if Some(index) == last_content => {
                parsed.torn = true;
                break;
            }
            Err(e) => {
                return Err(StoreError::Corrupt {
                    path: path.display().to_string(),
                    line: index + 1,
                    reason: e.to_string(),
                })
            }
        }
    }
    Ok(parsed)
}

fn is_blank(line: &[u8]) -> bool {
    line.iter().all(|b| b.is_ascii_whitespace())
}

// Sort key for "<stem>-<YYYY-MM-DD>[.N][.ext]", or None if `name` is not a
// rotated segment of this log
fn parse_segment_name(name: &str, stem: &str, ext: Option<&str>) -> Option<(NaiveDate, u32)> {
    let rest = name.strip_prefix(stem)?.strip_prefix('-')?;
    let rest = match ext {
        Some(ext) => rest.strip_suffix(ext)?.strip_suffix('.')?,
        None => rest,
    };
    let date = NaiveDate::parse_from_str(rest.get(..10)?, "%Y-%m-%d").ok()?;
    let counter = match &rest[10..] {
        "" => 0,
        suffix => suffix.strip_prefix('.')?.parse().ok()?,
    };
    Some((date, counter))
}
