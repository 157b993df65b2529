// SPDX-License-Identifier: Apache-2.0

//! Bounded per-tag log rings with a merged chronological view.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

/// Default number of records retained per tag.
pub const DEFAULT_CAPACITY: usize = 1000;

/// Severity of a log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

/// One record in the ring. Timestamps are assigned on append.
#[derive(Debug, Clone, Serialize)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub tag: String,
    pub message: String,
    #[serde(skip)]
    seq: u64,
}

impl LogRecord {
    /// Global insertion sequence, used as the chronological tie-breaker.
    pub fn sequence(&self) -> u64 {
        self.seq
    }
}

/// Bounded per-tag circular log buffers.
///
/// Each tag keeps its newest `capacity` records behind its own mutex.
/// Readers receive cloned snapshots; appenders hold a lock only long
/// enough to push one record.
pub struct LogRing {
    capacity: usize,
    rings: RwLock<HashMap<String, Arc<Mutex<VecDeque<LogRecord>>>>>,
    seq: AtomicU64,
    shared: Option<SharedLogSink>,
}

impl LogRing {
    pub fn new(capacity: usize) -> Self {
        LogRing {
            capacity: capacity.max(1),
            rings: RwLock::new(HashMap::new()),
            seq: AtomicU64::new(0),
            shared: None,
        }
    }

    /// Attaches a best-effort shared JSONL sink; sink failures never
    /// surface to append callers.
    pub fn with_shared_sink(mut self, sink: SharedLogSink) -> Self {
        self.shared = Some(sink);
        self
    }

    /// Appends one record under a tag, evicting the oldest on overflow.
    pub fn append(&self, tag: &str, level: LogLevel, message: impl Into<String>) {
        let record = LogRecord {
            timestamp: Utc::now(),
            level,
            tag: tag.to_string(),
            message: message.into(),
            seq: self.seq.fetch_add(1, Ordering::SeqCst) + 1,
        };

        let ring = self.ring_for(tag);
        {
            let mut ring = ring.lock().unwrap_or_else(|p| p.into_inner());
            if ring.len() == self.capacity {
                ring.pop_front();
            }
            ring.push_back(record.clone());
        }

        if let Some(shared) = &self.shared {
            shared.append(&record);
        }
    }

    /// Last `n` records for one tag, in chronological order.
    pub fn tail_by_tag(&self, tag: &str, n: usize) -> Vec<LogRecord> {
        let rings = self.rings.read().unwrap_or_else(|p| p.into_inner());
        let Some(ring) = rings.get(tag) else {
            return Vec::new();
        };
        let ring = ring.lock().unwrap_or_else(|p| p.into_inner());
        let skip = ring.len().saturating_sub(n);
        ring.iter().skip(skip).cloned().collect()
    }

    /// Last `n` records across all tags, stable-sorted by timestamp with
    /// insertion order breaking ties.
    pub fn merged(&self, n: usize) -> Vec<LogRecord> {
        let mut all = self.snapshot(None);
        all.sort_by_key(|r| (r.timestamp, r.seq));
        let skip = all.len().saturating_sub(n);
        all.split_off(skip)
    }

    /// Records appended after `min_seq`, optionally filtered to one tag.
    pub fn since(&self, min_seq: u64, tag: Option<&str>) -> Vec<LogRecord> {
        let mut records = self.snapshot(tag);
        records.retain(|r| r.seq > min_seq);
        records.sort_by_key(|r| r.seq);
        records
    }

    /// Sequence number of the newest record appended so far.
    pub fn latest_seq(&self) -> u64 {
        self.seq.load(Ordering::SeqCst)
    }

    /// Tags with at least one record, sorted.
    pub fn tags(&self) -> Vec<String> {
        let rings = self.rings.read().unwrap_or_else(|p| p.into_inner());
        let mut tags: Vec<String> = rings.keys().cloned().collect();
        tags.sort();
        tags
    }

    /// Clears one tag's ring, or every ring when `tag` is `None`.
    pub fn clear(&self, tag: Option<&str>) {
        let rings = self.rings.read().unwrap_or_else(|p| p.into_inner());
        for (name, ring) in rings.iter() {
            if tag.is_none_or(|t| t == name.as_str()) {
                ring.lock().unwrap_or_else(|p| p.into_inner()).clear();
            }
        }
    }

    fn snapshot(&self, tag: Option<&str>) -> Vec<LogRecord> {
        let rings = self.rings.read().unwrap_or_else(|p| p.into_inner());
        let mut all = Vec::new();
        for (name, ring) in rings.iter() {
            if tag.is_some_and(|t| t != name.as_str()) {
                continue;
            }
            let ring = ring.lock().unwrap_or_else(|p| p.into_inner());
            all.extend(ring.iter().cloned());
        }
        all
    }

    fn ring_for(&self, tag: &str) -> Arc<Mutex<VecDeque<LogRecord>>> {
        {
            let rings = self.rings.read().unwrap_or_else(|p| p.into_inner());
            if let Some(ring) = rings.get(tag) {
                return Arc::clone(ring);
            }
        }
        let mut rings = self.rings.write().unwrap_or_else(|p| p.into_inner());
        Arc::clone(
            rings
                .entry(tag.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(VecDeque::new()))),
        )
    }
}

impl Default for LogRing {
    fn default() -> Self {
        LogRing::new(DEFAULT_CAPACITY)
    }
}

/// Shared-file record layout, one JSON object per line.
#[derive(Debug, Serialize, Deserialize)]
struct SharedRecord {
    timestamp: DateTime<Utc>,
    level: LogLevel,
    tag: String,
    message: String,
    pid: u32,
}

/// Append-only JSONL sink shared between supervisor instances.
///
/// The file is opened per record and never held open between appends.
#[derive(Debug, Clone)]
pub struct SharedLogSink {
    path: PathBuf,
}

impl SharedLogSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        SharedLogSink { path: path.into() }
    }

    /// Default shared log location under the OS temp directory.
    pub fn default_path() -> PathBuf {
        std::env::temp_dir().join("guvnor-shared.log")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, record: &LogRecord) {
        let shared = SharedRecord {
            timestamp: record.timestamp,
            level: record.level,
            tag: record.tag.clone(),
            message: record.message.clone(),
            pid: std::process::id(),
        };
        let Ok(line) = serde_json::to_string(&shared) else {
            return;
        };
        let _ = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut file| writeln!(file, "{line}"));
    }

    /// Reads every decodable record from the shared file, skipping bad lines.
    pub fn read_all(&self) -> Vec<(DateTime<Utc>, LogLevel, String, String)> {
        let Ok(content) = std::fs::read_to_string(&self.path) else {
            return Vec::new();
        };
        content
            .lines()
            .filter_map(|line| serde_json::from_str::<SharedRecord>(line.trim()).ok())
            .map(|r| (r.timestamp, r.level, r.tag, r.message))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_evicts_oldest_beyond_capacity() {
        let ring = LogRing::new(3);
        for i in 0..5 {
            ring.append("web", LogLevel::Info, format!("line {i}"));
        }

        let tail = ring.tail_by_tag("web", 10);
        assert_eq!(tail.len(), 3);
        assert_eq!(tail[0].message, "line 2");
        assert_eq!(tail[2].message, "line 4");
    }

    #[test]
    fn tail_returns_last_n_in_order() {
        let ring = LogRing::new(10);
        for i in 0..6 {
            ring.append("web", LogLevel::Info, format!("line {i}"));
        }

        let tail = ring.tail_by_tag("web", 2);
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].message, "line 4");
        assert_eq!(tail[1].message, "line 5");
    }

    #[test]
    fn merged_interleaves_tags_by_insertion() {
        let ring = LogRing::new(10);
        ring.append("web", LogLevel::Info, "w0");
        ring.append("api", LogLevel::Info, "a0");
        ring.append("web", LogLevel::Info, "w1");

        let merged = ring.merged(10);
        let messages: Vec<&str> = merged.iter().map(|r| r.message.as_str()).collect();
        assert_eq!(messages, vec!["w0", "a0", "w1"]);
    }

    #[test]
    fn merged_limits_to_newest_records() {
        let ring = LogRing::new(10);
        for i in 0..4 {
            ring.append("web", LogLevel::Info, format!("{i}"));
        }
        let merged = ring.merged(2);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].message, "2");
    }

    #[test]
    fn since_filters_by_sequence_and_tag() {
        let ring = LogRing::new(10);
        ring.append("web", LogLevel::Info, "w0");
        let mark = ring.latest_seq();
        ring.append("api", LogLevel::Info, "a0");
        ring.append("web", LogLevel::Warn, "w1");

        let fresh = ring.since(mark, None);
        assert_eq!(fresh.len(), 2);
        let web_only = ring.since(mark, Some("web"));
        assert_eq!(web_only.len(), 1);
        assert_eq!(web_only[0].message, "w1");
    }

    #[test]
    fn clear_scopes_to_one_tag() {
        let ring = LogRing::new(10);
        ring.append("web", LogLevel::Info, "w0");
        ring.append("api", LogLevel::Info, "a0");

        ring.clear(Some("web"));
        assert!(ring.tail_by_tag("web", 10).is_empty());
        assert_eq!(ring.tail_by_tag("api", 10).len(), 1);

        ring.clear(None);
        assert!(ring.tail_by_tag("api", 10).is_empty());
    }

    #[test]
    fn tags_are_sorted() {
        let ring = LogRing::new(10);
        ring.append("web", LogLevel::Info, "w");
        ring.append("api", LogLevel::Info, "a");
        assert_eq!(ring.tags(), vec!["api", "web"]);
    }

    #[test]
    fn shared_sink_appends_jsonl_records() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("shared.log");
        let ring = LogRing::new(10).with_shared_sink(SharedLogSink::new(&path));

        ring.append("web", LogLevel::Error, "boom");
        ring.append("api", LogLevel::Info, "ok");

        let sink = SharedLogSink::new(&path);
        let records = sink.read_all();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].2, "web");
        assert_eq!(records[0].3, "boom");
    }

    #[test]
    fn shared_sink_skips_undecodable_lines() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("shared.log");
        std::fs::write(&path, "not json\n").unwrap();

        let ring = LogRing::new(10).with_shared_sink(SharedLogSink::new(&path));
        ring.append("web", LogLevel::Info, "ok");

        let records = SharedLogSink::new(&path).read_all();
        assert_eq!(records.len(), 1);
    }
}
