//! Tail one WAL group end to end: write a few entries, roll the log, and
//! print the batches the reader ships.
//!
//! Run with: `cargo run -p walship-source --example tail_wal_group`

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use walship_core::{codec, Cell, Entry, EntryKey, PassThroughFilter, WalEdit};
use walship_observability::metrics;
use walship_source::{
    FileEntryReaderFactory, LogQueue, PeerState, QuotaController, ReaderConfig, SourceInfo,
    WalSourceReader,
};

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64
}

fn write_wal(dir: &Path, name: &str, rows: &[&str]) -> PathBuf {
    let path = dir.join(name);
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(&codec::file_header()).unwrap();
    for row in rows {
        let entry = Entry::new(
            EntryKey::new("orders", now_ms()),
            WalEdit::with_cells(vec![Cell::new(
                row.to_string(),
                "info",
                "qualifier",
                "value",
                now_ms(),
            )]),
        );
        file.write_all(&codec::encode_entry(&entry).unwrap())
            .unwrap();
    }
    path
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().init();

    let dir = tempfile::tempdir().unwrap();
    let config = ReaderConfig {
        retry_sleep_ms: 100,
        ..ReaderConfig::default()
    };

    let source_metrics = metrics::global().source("demo-peer", "group-a");
    let queue = Arc::new(LogQueue::new(source_metrics.clone()));
    queue.enqueue(write_wal(dir.path(), "log.1", &["alpha", "bravo"]));
    // a rolled log with more entries
    queue.enqueue(write_wal(dir.path(), "log.2", &["charlie"]));

    let quota = Arc::new(QuotaController::new(config.quota_bytes));
    let reader = WalSourceReader::new(
        SourceInfo::recovered("demo-peer", "group-a"),
        queue,
        0,
        Arc::new(FileEntryReaderFactory),
        Arc::new(PassThroughFilter),
        quota.clone(),
        source_metrics.clone(),
        PeerState::new(true),
        config,
    );
    let mut handle = reader.spawn();

    while let Some(batch) = handle.take().await {
        println!(
            "batch: {} entries, {} row keys, heap {} bytes, ends at {:?}, more={}",
            batch.len(),
            batch.nb_row_keys(),
            batch.heap_size(),
            batch.end_position(),
            batch.more_entries(),
        );
        for (entry, size) in batch.entries() {
            for cell in &entry.edit.cells {
                println!(
                    "  {}  row={} family={} ({size} bytes)",
                    entry.key.table,
                    String::from_utf8_lossy(&cell.row),
                    cell.family,
                );
            }
        }
        // the shipper gives the buffered bytes back once a batch is sent
        for (entry, _) in batch.entries() {
            quota.release(walship_source::entry_size_excluding_bulk_load(entry));
        }
    }
    println!(
        "done: read {} edits, completed {} wals",
        source_metrics.log_edits_read(),
        source_metrics.completed_wal(),
    );
    handle.shutdown().await;
}
