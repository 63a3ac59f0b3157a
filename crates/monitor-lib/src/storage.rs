//! Snapshot persistence
//!
//! The pipeline keeps its working set in memory; a `SnapshotStore` receives
//! every raw snapshot and small named blobs of component state. Two backends
//! are provided: a bounded in-memory store and a compacted JSON-lines file.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::config::RetentionConfig;
use crate::error::{MonitorError, Result};
use crate::models::{MetricSnapshot, TimeRange};

/// Append/query contract for durable snapshot storage
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Append one snapshot
    async fn append(&self, snapshot: &MetricSnapshot) -> Result<()>;

    /// Snapshots within `range`, optionally for a single source, in time order
    async fn query(&self, source: Option<&str>, range: TimeRange) -> Result<Vec<MetricSnapshot>>;

    /// Replace the state blob stored under `key`
    async fn persist_state(&self, key: &str, state: &serde_json::Value) -> Result<()>;

    /// Load the state blob stored under `key`, if any
    async fn load_state(&self, key: &str) -> Result<Option<serde_json::Value>>;
}

fn in_query(snapshot: &MetricSnapshot, source: Option<&str>, range: &TimeRange) -> bool {
    range.contains(snapshot.timestamp) && source.map_or(true, |s| snapshot.source == s)
}

/// Bounded in-memory store; the oldest snapshots are evicted first
pub struct MemoryStore {
    max_snapshots: usize,
    snapshots: RwLock<VecDeque<MetricSnapshot>>,
    state: RwLock<HashMap<String, serde_json::Value>>,
}

impl MemoryStore {
    pub fn new(max_snapshots: usize) -> Self {
        Self {
            max_snapshots: max_snapshots.max(1),
            snapshots: RwLock::new(VecDeque::new()),
            state: RwLock::new(HashMap::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.snapshots.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.snapshots.read().await.is_empty()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    async fn append(&self, snapshot: &MetricSnapshot) -> Result<()> {
        let mut snapshots = self.snapshots.write().await;
        snapshots.push_back(snapshot.clone());
        while snapshots.len() > self.max_snapshots {
            snapshots.pop_front();
        }
        Ok(())
    }

    async fn query(&self, source: Option<&str>, range: TimeRange) -> Result<Vec<MetricSnapshot>> {
        if !range.is_valid() {
            return Err(MonitorError::InvalidTimeRange {
                start: range.start,
                end: range.end,
            });
        }
        let snapshots = self.snapshots.read().await;
        let mut matched: Vec<MetricSnapshot> = snapshots
            .iter()
            .filter(|s| in_query(s, source, &range))
            .cloned()
            .collect();
        matched.sort_by_key(|s| s.timestamp);
        Ok(matched)
    }

    async fn persist_state(&self, key: &str, state: &serde_json::Value) -> Result<()> {
        self.state
            .write()
            .await
            .insert(key.to_string(), state.clone());
        Ok(())
    }

    async fn load_state(&self, key: &str) -> Result<Option<serde_json::Value>> {
        Ok(self.state.read().await.get(key).cloned())
    }
}

/// JSON-lines file store with retention
///
/// Layout under `dir`:
/// - `snapshots.jsonl`: one serialized snapshot per line
/// - `state/<key>.json`: state blobs, written atomically
///
/// The snapshot file is compacted in place once it grows past
/// `max_snapshots` plus a tenth of slack: only the newest `max_snapshots`
/// lines no older than `max_age_ms` (relative to the newest line) survive.
pub struct JsonLinesStore {
    dir: PathBuf,
    max_snapshots: usize,
    max_age_ms: i64,
    /// Lines currently in the snapshot file; also serializes writers
    lines: Mutex<usize>,
}

impl JsonLinesStore {
    /// Open with the default retention
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        Self::open_with_retention(dir, &RetentionConfig::default()).await
    }

    pub async fn open_with_retention(
        dir: impl Into<PathBuf>,
        retention: &RetentionConfig,
    ) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(dir.join("state")).await?;

        let mut lines = 0;
        if let Some(mut reader) = open_lines(&dir.join("snapshots.jsonl")).await? {
            while reader.next_line().await?.is_some() {
                lines += 1;
            }
        }
        debug!(path = %dir.display(), lines = lines, "Opened snapshot store");

        Ok(Self {
            dir,
            max_snapshots: retention.max_snapshots.max(1),
            max_age_ms: retention.max_age_ms(),
            lines: Mutex::new(lines),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn snapshots_path(&self) -> PathBuf {
        self.dir.join("snapshots.jsonl")
    }

    fn state_path(&self, key: &str) -> PathBuf {
        let sanitized: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join("state").join(format!("{}.json", sanitized))
    }

    fn compaction_threshold(&self) -> usize {
        self.max_snapshots + (self.max_snapshots / 10).max(1)
    }

    /// Rewrite the snapshot file down to the retained lines; returns how
    /// many lines remain. Malformed lines are dropped.
    pub async fn compact(&self) -> Result<usize> {
        let mut lines = self.lines.lock().await;
        *lines = self.compact_locked().await?;
        Ok(*lines)
    }

    async fn compact_locked(&self) -> Result<usize> {
        let path = self.snapshots_path();
        let Some(mut reader) = open_lines(&path).await? else {
            return Ok(0);
        };

        let mut kept: VecDeque<(i64, String)> = VecDeque::with_capacity(self.max_snapshots + 1);
        let mut newest = i64::MIN;
        while let Some(line) = reader.next_line().await? {
            let Ok(snapshot) = serde_json::from_str::<MetricSnapshot>(&line) else {
                continue;
            };
            newest = newest.max(snapshot.timestamp);
            kept.push_back((snapshot.timestamp, line));
            if kept.len() > self.max_snapshots {
                kept.pop_front();
            }
        }
        let cutoff = newest.saturating_sub(self.max_age_ms);
        kept.retain(|(timestamp, _)| *timestamp >= cutoff);

        let mut data = Vec::new();
        for (_, line) in &kept {
            data.extend_from_slice(line.as_bytes());
            data.push(b'\n');
        }
        write_atomically(&path, &data).await?;
        debug!(kept = kept.len(), "Compacted snapshot file");
        Ok(kept.len())
    }
}

async fn open_lines(path: &Path) -> Result<Option<tokio::io::Lines<BufReader<fs::File>>>> {
    match fs::File::open(path).await {
        Ok(file) => Ok(Some(BufReader::new(file).lines())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Write via a temp file and rename so readers never see partial content
async fn write_atomically(path: &Path, data: &[u8]) -> Result<()> {
    let temp_path = path.with_extension("tmp");
    let mut file = fs::File::create(&temp_path).await?;
    file.write_all(data).await?;
    file.sync_all().await?;
    drop(file);

    fs::rename(&temp_path, path).await.map_err(|e| {
        MonitorError::Storage(format!(
            "failed to rename {} to {}: {}",
            temp_path.display(),
            path.display(),
            e
        ))
    })
}

#[async_trait]
impl SnapshotStore for JsonLinesStore {
    async fn append(&self, snapshot: &MetricSnapshot) -> Result<()> {
        let mut line = serde_json::to_vec(snapshot)?;
        line.push(b'\n');

        let mut lines = self.lines.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.snapshots_path())
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        drop(file);
        *lines += 1;

        if *lines > self.compaction_threshold() {
            match self.compact_locked().await {
                Ok(kept) => *lines = kept,
                Err(e) => warn!(error = %e, "Failed to compact snapshot file"),
            }
        }
        Ok(())
    }

    async fn query(&self, source: Option<&str>, range: TimeRange) -> Result<Vec<MetricSnapshot>> {
        if !range.is_valid() {
            return Err(MonitorError::InvalidTimeRange {
                start: range.start,
                end: range.end,
            });
        }

        let _lines = self.lines.lock().await;
        let Some(mut reader) = open_lines(&self.snapshots_path()).await? else {
            return Ok(Vec::new());
        };

        let mut matched = Vec::new();
        let mut line_no = 0;
        while let Some(line) = reader.next_line().await? {
            line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<MetricSnapshot>(&line) {
                Ok(snapshot) if in_query(&snapshot, source, &range) => matched.push(snapshot),
                Ok(_) => {}
                Err(e) => {
                    warn!(line = line_no, error = %e, "Skipping malformed snapshot line");
                }
            }
        }
        matched.sort_by_key(|s| s.timestamp);
        Ok(matched)
    }

    async fn persist_state(&self, key: &str, state: &serde_json::Value) -> Result<()> {
        let json = serde_json::to_vec_pretty(state)?;
        write_atomically(&self.state_path(key), &json).await
    }

    async fn load_state(&self, key: &str) -> Result<Option<serde_json::Value>> {
        match fs::read(self.state_path(key)).await {
            Ok(data) => Ok(Some(serde_json::from_slice(&data)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
