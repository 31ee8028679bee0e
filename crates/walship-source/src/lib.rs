//! Walship Replication Source
//!
//! The per-WAL-group tailing reader of the walship inter-cluster
//! replication pipeline. It turns an ever-growing sequence of WAL files on
//! a shared filesystem into a bounded, back-pressured stream of filtered,
//! ship-ready batches.
//!
//! ## The Problem
//!
//! The write path appends to the current WAL and rolls to a new file
//! whenever it pleases; writers crash and leave zero-length or truncated
//! files behind; the remote peer can be slow or administratively paused.
//! The reader must tail through all of that without losing an entry,
//! duplicating one, or buffering unbounded memory.
//!
//! ## Architecture
//!
//! ```text
//! writer rolls ──► LogQueue (paths, FIFO)
//!                      │ head
//!                      ▼
//!                 EntryStream ──► FilterChain ──► Batch
//!                      │                            │
//!                      │ exact positions            ▼
//!                      │                      ready queue (bounded)
//!                      │                            │
//!                      ▼                            ▼
//!              QuotaController ◄─── release ─── shipper
//! ```
//!
//! One [`WalSourceReader`] task runs per WAL group. It is the sole mutator
//! of the stream position; everything shared (queue, quota, metrics, peer
//! flag) is an explicit injected handle, so tests substitute fakes freely.
//!
//! ## Guarantees
//!
//! - Within a group, batches carry entries in strict WAL order, and each
//!   batch's end position is the exact byte offset after its last entry:
//!   restarting from a shipped position yields the unshipped suffix,
//!   nothing more and nothing less.
//! - Memory is bounded by the per-batch caps plus the process-wide
//!   [`QuotaController`]; a blocked shipper stalls the reader instead of
//!   growing queues.
//!
//! ## Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use walship_core::PassThroughFilter;
//! use walship_observability::metrics;
//! use walship_source::{
//!     FileEntryReaderFactory, LogQueue, PeerState, QuotaController,
//!     ReaderConfig, SourceInfo, WalSourceReader,
//! };
//!
//! let config = ReaderConfig::default();
//! let source_metrics = metrics::global().source("peer-2", "group-a");
//! let queue = Arc::new(LogQueue::new(source_metrics.clone()));
//! queue.enqueue(current_wal_path);
//!
//! let reader = WalSourceReader::new(
//!     SourceInfo::live("peer-2", "group-a"),
//!     queue.clone(),
//!     0,
//!     Arc::new(FileEntryReaderFactory),
//!     Arc::new(PassThroughFilter),
//!     Arc::new(QuotaController::new(config.quota_bytes)),
//!     source_metrics,
//!     PeerState::new(true),
//!     config,
//! );
//! let mut handle = reader.spawn();
//!
//! while let Some(batch) = handle.take().await {
//!     ship_to_peer(&batch).await?;
//!     persist_position(batch.end_position());
//! }
//! ```

pub mod batch;
pub mod config;
pub mod entry_reader;
pub mod entry_stream;
pub mod error;
pub mod log_queue;
pub mod quota;
pub mod reader;

pub use batch::{
    entry_size_excluding_bulk_load, entry_size_including_bulk_load, Batch,
};
pub use config::ReaderConfig;
pub use entry_reader::{EntryReader, EntryReaderFactory, FileEntryReader, FileEntryReaderFactory};
pub use entry_stream::EntryStream;
pub use error::{Error, Result};
pub use log_queue::LogQueue;
pub use quota::QuotaController;
pub use reader::{PeerState, SourceInfo, SourceReaderHandle, WalSourceReader};
