//! WAL Entry Stream
//!
//! Presents the files of a [`LogQueue`] as one lazy sequence of entries.
//! The stream hides the two awkward realities of tailing a live WAL:
//!
//! 1. **The head file may still be growing.** Reaching end of file means
//!    nothing while the writer is alive; later `has_next()` calls re-stat
//!    the file and reopen the reader when it grew.
//! 2. **The head file may have been rolled.** Once a successor exists and
//!    the head is fully consumed, the stream dequeues it and continues at
//!    the start of the next file, without losing or repeating an entry.
//!
//! ```text
//! OPEN_CURRENT → HAS_ENTRY ⇄ DRAINED
//!                    │            │
//!                    │            ↓
//!                    │        TRY_ADVANCE
//!                    │          /     \
//!                    │     SAME_FILE   ROLL_DETECTED
//!                    │     (writer     (successor queued,
//!                    │      grew it)    head consumed)
//!                    │            \     /
//!                    └─────────── RE-OPEN
//! ```
//!
//! `position()` always reports the byte offset immediately past the last
//! entry returned by `next()` within the current file, which is what makes
//! shipped batches resumable.
//!
//! A `Truncated` failure in the middle of a *sealed* file (one with a
//! queued successor) cannot heal itself: the writer is gone and the tail
//! bytes will never be completed. The stream skips such tails, counts
//! them, and moves on. The same failure on the live tail propagates to
//! the reader loop, which backs off and retries.

use crate::entry_reader::{EntryReader, EntryReaderFactory};
use crate::error::{Error, Result};
use crate::log_queue::LogQueue;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use walship_core::{Entry, Position};
use walship_observability::SourceMetrics;

/// Lazy iterator over the concatenation of a WAL group's files.
pub struct EntryStream {
    queue: Arc<LogQueue>,
    factory: Arc<dyn EntryReaderFactory>,
    metrics: SourceMetrics,
    fs_timeout: Duration,
    /// Resume point, applied to the first file opened if it matches.
    start: Option<Position>,
    current_path: Option<PathBuf>,
    reader: Option<Box<dyn EntryReader>>,
    position: u64,
    peeked: Option<(Entry, u64)>,
}

impl EntryStream {
    pub fn new(
        queue: Arc<LogQueue>,
        factory: Arc<dyn EntryReaderFactory>,
        start: Option<Position>,
        metrics: SourceMetrics,
        fs_timeout: Duration,
    ) -> Self {
        let position = start.as_ref().map(|p| p.offset).unwrap_or(0);
        Self {
            queue,
            factory,
            metrics,
            fs_timeout,
            start,
            current_path: None,
            reader: None,
            position,
            peeked: None,
        }
    }

    /// Whether another entry is available right now.
    pub async fn has_next(&mut self) -> Result<bool> {
        if self.peeked.is_some() {
            return Ok(true);
        }
        loop {
            if self.reader.is_none() && !self.open_initial().await? {
                return Ok(false);
            }
            let Some(reader) = self.reader.as_mut() else {
                return Ok(false);
            };
            match reader.next_entry().await {
                Ok(Some(entry)) => {
                    let post = reader.position();
                    self.peeked = Some((entry, post));
                    return Ok(true);
                }
                Ok(None) => {
                    if !self.try_advance().await? {
                        return Ok(false);
                    }
                }
                Err(e) => {
                    if !self.skip_unclean_tail(&e).await? {
                        return Err(e);
                    }
                }
            }
        }
    }

    /// The next entry. Call only after `has_next()` returned `true`.
    pub async fn next(&mut self) -> Result<Entry> {
        if self.peeked.is_none() {
            self.has_next().await?;
        }
        let (entry, post) = self.peeked.take().ok_or(Error::NoMoreEntries)?;
        self.metrics.incr_log_edits_read();
        self.metrics
            .incr_log_read_bytes(post.saturating_sub(self.position));
        self.position = post;
        Ok(entry)
    }

    /// Byte offset just past the last entry returned by `next()`.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// The file currently being read.
    pub fn current_path(&self) -> Option<&Path> {
        self.current_path.as_deref()
    }

    /// Close and reopen the reader at the current position, releasing the
    /// file handle and any buffered data. Called after a batch is shipped.
    pub async fn reset(&mut self) -> Result<()> {
        self.peeked = None;
        if let Some(path) = self.current_path.clone() {
            self.metrics.incr_restarted_wal_reading();
            let position = self.position;
            self.open_at(&path, position).await?;
        }
        Ok(())
    }

    async fn open_initial(&mut self) -> Result<bool> {
        let Some(head) = self.queue.peek() else {
            return Ok(false);
        };
        let offset = match self.start.take() {
            Some(start) if start.path == head => start.offset,
            _ => 0,
        };
        self.open_at(&head, offset).await?;
        Ok(true)
    }

    async fn open_at(&mut self, path: &Path, offset: u64) -> Result<()> {
        // drop the previous handle before opening the next one
        self.reader = None;
        let reader = self.factory.open(path, offset).await?;
        let base = reader.position();
        if base > offset {
            // file header consumed on a fresh open
            self.metrics.incr_log_read_bytes(base - offset);
        }
        self.position = base;
        self.current_path = Some(path.to_owned());
        self.reader = Some(reader);
        Ok(())
    }

    /// The current reader hit a clean end of file. Figure out whether more
    /// data can be reached: the file grew, a successor is queued, or the
    /// head was swapped out underneath us.
    async fn try_advance(&mut self) -> Result<bool> {
        let Some(current) = self.current_path.clone() else {
            return Ok(false);
        };
        let Some(head) = self.queue.peek() else {
            return Ok(false);
        };
        if head != current {
            // Recovery force-removed the file we were on; start over on
            // the new head.
            debug!(
                old = %current.display(),
                new = %head.display(),
                "queue head changed, reopening"
            );
            self.open_at(&head, 0).await?;
            return Ok(true);
        }

        let len = self.file_length(&head).await?;
        if len > self.position {
            // the writer appended since the reader last saw end of file
            self.metrics.incr_restarted_wal_reading();
            let position = self.position;
            self.open_at(&head, position).await?;
            return Ok(true);
        }

        if self.queue.len() > 1 {
            // fully consumed, and a successor exists
            info!(wal = %current.display(), "finished reading wal");
            self.metrics.incr_completed_wal();
            self.queue.remove_head();
            match self.queue.peek() {
                Some(next) => {
                    self.open_at(&next, 0).await?;
                    Ok(true)
                }
                None => Ok(false),
            }
        } else {
            // live tail: nothing new flushed yet
            Ok(false)
        }
    }

    /// A sealed file (successor queued) failed with a truncated tail: the
    /// writer died mid-record and those bytes will never complete. Skip
    /// them and move on. Returns `false` when the failure is not ours to
    /// absorb (live tail, header failures, non-truncation errors).
    async fn skip_unclean_tail(&mut self, err: &Error) -> Result<bool> {
        if !err.is_truncation() {
            return Ok(false);
        }
        if self.queue.len() <= 1 {
            return Ok(false);
        }
        let Some(current) = self.current_path.clone() else {
            return Ok(false);
        };
        match self.queue.peek() {
            Some(head) if head == current => {}
            _ => return Ok(false),
        }
        let skipped = match self.file_length(&current).await {
            Ok(len) => len.saturating_sub(self.position),
            Err(_) => return Ok(false),
        };
        warn!(
            wal = %current.display(),
            skipped_bytes = skipped,
            "wal was not closed cleanly, skipping unparseable tail"
        );
        self.metrics.incr_uncleanly_closed_wals();
        self.metrics
            .incr_bytes_skipped_in_uncleanly_closed_wals(skipped);
        self.metrics.incr_completed_wal();
        self.queue.remove_head();
        match self.queue.peek() {
            Some(next) => {
                self.open_at(&next, 0).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn file_length(&self, path: &Path) -> Result<u64> {
        match tokio::time::timeout(self.fs_timeout, tokio::fs::metadata(path)).await {
            Err(_) => {
                self.metrics.incr_unknown_file_length_for_closed_wal();
                warn!(wal = %path.display(), "timed out statting wal");
                Err(Error::MetadataTimeout(path.to_owned()))
            }
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::FileNotFound(path.to_owned()))
            }
            Ok(Err(e)) => Err(e.into()),
            Ok(Ok(metadata)) => Ok(metadata.len()),
        }
    }
}
