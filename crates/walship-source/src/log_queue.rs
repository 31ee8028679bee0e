//! Per-Group WAL File Queue
//!
//! FIFO of WAL file paths for one WAL group. Writers append to the tail
//! from their roll callbacks; the owning reader consumes from the head.
//! The head is always the file currently being (or last being) read, and
//! it is only removed once the reader has advanced past its end into a
//! successor.
//!
//! Insertion order is never reordered; for a live group the queue always
//! holds at least the current WAL.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::debug;
use walship_observability::SourceMetrics;

/// Ordered queue of WAL files awaiting replication.
pub struct LogQueue {
    queue: Mutex<VecDeque<PathBuf>>,
    metrics: SourceMetrics,
}

impl LogQueue {
    pub fn new(metrics: SourceMetrics) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            metrics,
        }
    }

    /// Append a rolled WAL to the tail. Safe to call from any writer
    /// thread.
    pub fn enqueue(&self, path: PathBuf) {
        debug!(wal = %path.display(), "enqueueing wal for replication");
        let mut queue = self.queue.lock().expect("log queue poisoned");
        queue.push_back(path);
        self.metrics.incr_size_of_log_queue();
    }

    /// The head of the queue, without removing it.
    pub fn peek(&self) -> Option<PathBuf> {
        self.queue.lock().expect("log queue poisoned").front().cloned()
    }

    /// Drop the head. Only the owning reader calls this, after it has
    /// fully consumed the file (or force-removed it during EOF recovery).
    pub fn remove_head(&self) -> Option<PathBuf> {
        let removed = self.queue.lock().expect("log queue poisoned").pop_front();
        if let Some(path) = &removed {
            debug!(wal = %path.display(), "removed wal from replication queue");
            self.metrics.decr_size_of_log_queue();
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.queue.lock().expect("log queue poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the queued paths, head first.
    pub fn snapshot(&self) -> Vec<PathBuf> {
        self.queue
            .lock()
            .expect("log queue poisoned")
            .iter()
            .cloned()
            .collect()
    }
}
