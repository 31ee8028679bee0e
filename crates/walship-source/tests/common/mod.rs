//! Shared helpers for the replication source integration tests: a small
//! WAL writer over the reference framing, entry builders, and fixtures.

#![allow(dead_code)]

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use walship_core::{codec, Cell, Entry, EntryKey, WalEdit};
use walship_observability::{Registry, ReplicationMetrics, SourceMetrics};
use walship_source::{LogQueue, ReaderConfig};

pub const FAKE_WAL_GROUP: &str = "fake-wal-group";

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64
}

pub fn source_metrics() -> SourceMetrics {
    ReplicationMetrics::new(&Registry::new())
        .unwrap()
        .source("1", FAKE_WAL_GROUP)
}

pub fn log_queue(metrics: &SourceMetrics) -> Arc<LogQueue> {
    Arc::new(LogQueue::new(metrics.clone()))
}

/// Fast-retry config so tests settle in milliseconds.
pub fn test_config() -> ReaderConfig {
    ReaderConfig {
        retry_sleep_ms: 10,
        ..ReaderConfig::default()
    }
}

pub fn row_entry(row: &str) -> Entry {
    family_entry(row, "column")
}

pub fn family_entry(row: &str, family: &str) -> Entry {
    Entry::new(
        EntryKey::new("tablename", now_ms()),
        WalEdit::with_cells(vec![Cell::new(
            row.to_owned(),
            family,
            "qualifier",
            "value",
            now_ms(),
        )]),
    )
}

pub fn first_row(entry: &Entry) -> String {
    String::from_utf8_lossy(&entry.edit.cells[0].row).into_owned()
}

/// Writes framed entries to a WAL file the way the primary write path
/// would.
pub struct TestWal {
    pub path: PathBuf,
    file: std::fs::File,
}

impl TestWal {
    /// Create a WAL with a valid header.
    pub fn create(dir: &Path, name: &str) -> Self {
        let path = dir.join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(&codec::file_header()).unwrap();
        file.flush().unwrap();
        Self { path, file }
    }

    /// Create a zero-length file, as an uncleanly stopped writer leaves
    /// behind.
    pub fn create_zero_length(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::File::create(&path).unwrap();
        path
    }

    pub fn append(&mut self, entry: &Entry) {
        self.file
            .write_all(&codec::encode_entry(entry).unwrap())
            .unwrap();
        self.file.flush().unwrap();
    }

    pub fn append_row(&mut self, row: &str) -> Entry {
        let entry = row_entry(row);
        self.append(&entry);
        entry
    }

    /// Append a frame with its final bytes missing, as a writer that died
    /// mid-flush leaves behind.
    pub fn append_truncated(&mut self, entry: &Entry, drop_bytes: usize) {
        let frame = codec::encode_entry(entry).unwrap();
        self.file
            .write_all(&frame[..frame.len() - drop_bytes])
            .unwrap();
        self.file.flush().unwrap();
    }

    pub fn len(&self) -> u64 {
        std::fs::metadata(&self.path).unwrap().len()
    }
}

/// Poll `condition` until it holds or two seconds pass.
pub async fn wait_until(mut condition: impl FnMut() -> bool, what: &str) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}
