//! ## vaktpost-core::sink
//! **Log Sink boundary**
//!
//! Append-only time-series storage of classified flows. Entries are ordered
//! by `(time, source, destination)` and partitioned by UTC day so range
//! scans by time or endpoint only touch the relevant partitions.
//!
//! ### Implementations:
//! - `JsonlLogSink`: one JSON-lines file per day under a directory
//! - `MemoryLogSink`: in-process, same query semantics

use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::error::CoreError;
use crate::events::{Direction, FlowRecord, Protocol, Severity};

const PARTITION_PREFIX: &str = "flows-";
const PARTITION_SUFFIX: &str = ".jsonl";

/// A persisted, classified flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub time: DateTime<Utc>,
    #[serde(rename = "type")]
    pub direction: Direction,
    pub source: String,
    pub destination: String,
    pub port: String,
    pub protocol: Protocol,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl LogEntry {
    /// Builds an entry from a record whose time has already been normalized.
    pub fn from_record(record: &FlowRecord, time: DateTime<Utc>, severity: Severity) -> Self {
        Self {
            time,
            direction: record.direction,
            source: record.source.clone(),
            destination: record.destination.clone(),
            port: record.port.clone(),
            protocol: record.protocol,
            severity,
            pid: record.pid,
            path: record.path.clone(),
        }
    }

    fn order_key(&self) -> (&DateTime<Utc>, &str, &str) {
        (&self.time, &self.source, &self.destination)
    }

    fn partition(&self) -> NaiveDate {
        self.time.date_naive()
    }
}

fn by_order_key(a: &LogEntry, b: &LogEntry) -> Ordering {
    a.order_key().cmp(&b.order_key())
}

/// Filter for [`LogSink::query`]. Unset fields match everything; the time
/// range is inclusive on both ends.
#[derive(Debug, Clone, Default)]
pub struct LogQuery {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub source: Option<String>,
    pub destination: Option<String>,
    pub port: Option<String>,
    pub direction: Option<Direction>,
}

impl LogQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn until(mut self, until: DateTime<Utc>) -> Self {
        self.until = Some(until);
        self
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = Some(destination.into());
        self
    }

    pub fn port(mut self, port: impl Into<String>) -> Self {
        self.port = Some(port.into());
        self
    }

    pub fn direction(mut self, direction: Direction) -> Self {
        self.direction = Some(direction);
        self
    }

    pub fn matches(&self, entry: &LogEntry) -> bool {
        self.since.map_or(true, |since| entry.time >= since)
            && self.until.map_or(true, |until| entry.time <= until)
            && self.source.as_ref().map_or(true, |s| &entry.source == s)
            && self
                .destination
                .as_ref()
                .map_or(true, |d| &entry.destination == d)
            && self.port.as_ref().map_or(true, |p| &entry.port == p)
            && self.direction.map_or(true, |d| entry.direction == d)
    }

    /// Whether the partition for `day` can hold matching entries.
    fn covers(&self, day: NaiveDate) -> bool {
        self.since.map_or(true, |since| day >= since.date_naive())
            && self.until.map_or(true, |until| day <= until.date_naive())
    }
}

#[async_trait]
pub trait LogSink: Send + Sync {
    async fn append(&self, entry: &LogEntry) -> Result<(), CoreError>;

    /// Matching entries sorted by `(time, source, destination)`.
    async fn query(&self, query: &LogQuery) -> Result<Vec<LogEntry>, CoreError>;
}

#[async_trait]
impl<T: LogSink + ?Sized> LogSink for std::sync::Arc<T> {
    async fn append(&self, entry: &LogEntry) -> Result<(), CoreError> {
        (**self).append(entry).await
    }

    async fn query(&self, query: &LogQuery) -> Result<Vec<LogEntry>, CoreError> {
        (**self).query(query).await
    }
}

#[derive(Debug, Default)]
pub struct MemoryLogSink {
    entries: Mutex<Vec<LogEntry>>,
}

impl MemoryLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[async_trait]
impl LogSink for MemoryLogSink {
    async fn append(&self, entry: &LogEntry) -> Result<(), CoreError> {
        self.entries.lock().push(entry.clone());
        Ok(())
    }

    async fn query(&self, query: &LogQuery) -> Result<Vec<LogEntry>, CoreError> {
        let mut found: Vec<LogEntry> = self
            .entries
            .lock()
            .iter()
            .filter(|e| query.matches(e))
            .cloned()
            .collect();
        found.sort_by(by_order_key);
        Ok(found)
    }
}

/// Day-partitioned JSON-lines sink.
///
/// Each UTC day is stored in `flows-YYYYMMDD.jsonl` under `dir`; the
/// directory is created on first append if absent.
#[derive(Debug)]
pub struct JsonlLogSink {
    dir: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonlLogSink {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn partition_path(&self, day: NaiveDate) -> PathBuf {
        self.dir.join(format!(
            "{PARTITION_PREFIX}{}{PARTITION_SUFFIX}",
            day.format("%Y%m%d")
        ))
    }

    fn partition_day(file_name: &str) -> Option<NaiveDate> {
        let stamp = file_name
            .strip_prefix(PARTITION_PREFIX)?
            .strip_suffix(PARTITION_SUFFIX)?;
        NaiveDate::parse_from_str(stamp, "%Y%m%d").ok()
    }

    async fn partitions(&self, query: &LogQuery) -> Result<Vec<PathBuf>, CoreError> {
        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut paths = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name();
            let Some(day) = name.to_str().and_then(Self::partition_day) else {
                continue;
            };
            if query.covers(day) {
                paths.push(entry.path());
            }
        }
        paths.sort();
        Ok(paths)
    }
}

#[async_trait]
impl LogSink for JsonlLogSink {
    async fn append(&self, entry: &LogEntry) -> Result<(), CoreError> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().await;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| CoreError::Sink(format!("create {}: {e}", self.dir.display())))?;

        let path = self.partition_path(entry.partition());
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| CoreError::Sink(format!("open {}: {e}", path.display())))?;
        file.write_all(&line)
            .await
            .map_err(|e| CoreError::Sink(format!("write {}: {e}", path.display())))?;
        file.flush().await?;

        debug!(partition = %path.display(), "Appended flow log entry");
        Ok(())
    }

    async fn query(&self, query: &LogQuery) -> Result<Vec<LogEntry>, CoreError> {
        let mut found = Vec::new();
        for path in self.partitions(query).await? {
            let raw = tokio::fs::read_to_string(&path).await?;
            for (lineno, line) in raw.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<LogEntry>(line) {
                    Ok(entry) if query.matches(&entry) => found.push(entry),
                    Ok(_) => {}
                    Err(e) => warn!(
                        partition = %path.display(),
                        line = lineno + 1,
                        "Skipping unreadable log entry: {e}"
                    ),
                }
            }
        }
        found.sort_by(by_order_key);
        Ok(found)
    }
}
