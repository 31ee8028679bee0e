//! Replication WAL Reader Loop
//!
//! One long-running task per WAL group. It drives the entry stream through
//! the filter chain into batches, and pushes finished batches onto a
//! bounded ready queue for the shipper:
//!
//! ```text
//! LogQueue ──► EntryStream ──► FilterChain ──► Batch ──► ready queue ──► shipper
//!                  ▲                                         │
//!                  └──────── reset after every ship ◄────────┘
//! ```
//!
//! The loop owns all mutable reading state (`last_read_path`,
//! `last_read_position`, the in-progress batch); everything it shares is
//! an explicit handle: the log queue, the quota controller, the metrics,
//! and a [`PeerState`] flag for "is the peer administratively enabled".
//!
//! ## Suspension points
//!
//! - ready queue full → blocked in `send` (backpressure from the shipper)
//! - peer disabled, quota exceeded, empty live queue, truncated stream →
//!   backoff sleep
//!
//! Every suspension races the shutdown token, so `stop()` exits promptly
//! and releases the quota held by any batch that never made it onto the
//! ready queue.
//!
//! ## End-of-file recovery
//!
//! A truncated read normally just means the writer is still flushing, so
//! the loop backs off and retries at the same position. The exception is a
//! zero-length file left at the queue head by an unclean writer shutdown:
//! with `eof.autorecovery` enabled, and only when the source is recovered
//! or more files are queued behind it, the loop force-removes that head,
//! ships what it has, and restarts the stream on the successor. The sole
//! file of a live queue is never removed; the writer may come back.

use crate::batch::{entry_size_excluding_bulk_load, entry_size_including_bulk_load, Batch};
use crate::config::ReaderConfig;
use crate::entry_reader::EntryReaderFactory;
use crate::entry_stream::EntryStream;
use crate::error::{Error, Result};
use crate::log_queue::LogQueue;
use crate::quota::QuotaController;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use walship_core::{Entry, EntryFilter, Position};
use walship_observability::SourceMetrics;

/// Identifies the replication source a reader works for.
#[derive(Debug, Clone)]
pub struct SourceInfo {
    /// Remote peer cluster id.
    pub peer_id: String,
    /// WAL group this reader tails.
    pub wal_group: String,
    /// A recovered queue was inherited from a dead peer: it is finite and
    /// never appended to, so draining it ends the reader.
    pub recovered: bool,
}

impl SourceInfo {
    pub fn live(peer_id: impl Into<String>, wal_group: impl Into<String>) -> Self {
        Self {
            peer_id: peer_id.into(),
            wal_group: wal_group.into(),
            recovered: false,
        }
    }

    pub fn recovered(peer_id: impl Into<String>, wal_group: impl Into<String>) -> Self {
        Self {
            peer_id: peer_id.into(),
            wal_group: wal_group.into(),
            recovered: true,
        }
    }
}

/// Shared view of "is the replication peer enabled". The reader only ever
/// observes it; administration flips it from outside.
#[derive(Debug, Clone)]
pub struct PeerState {
    enabled: Arc<AtomicBool>,
}

impl PeerState {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: Arc::new(AtomicBool::new(enabled)),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }
}

#[derive(Debug, Default)]
struct Cursor {
    path: Option<PathBuf>,
    offset: u64,
}

/// The per-WAL-group reader. Construct, then [`spawn`](Self::spawn) it.
pub struct WalSourceReader {
    info: SourceInfo,
    queue: Arc<LogQueue>,
    factory: Arc<dyn EntryReaderFactory>,
    filter: Arc<dyn EntryFilter>,
    quota: Arc<QuotaController>,
    metrics: SourceMetrics,
    peer: PeerState,
    config: ReaderConfig,

    last_read_path: Option<PathBuf>,
    last_read_position: u64,
    cursor: Arc<Mutex<Cursor>>,
    pending: Option<Batch>,
    pending_path: Option<PathBuf>,
    pending_quota: u64,
    sleep_multiplier: u32,

    running: Arc<AtomicBool>,
    shutdown: CancellationToken,
    sender: mpsc::Sender<Batch>,
    receiver: Option<mpsc::Receiver<Batch>>,
}

impl WalSourceReader {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        info: SourceInfo,
        queue: Arc<LogQueue>,
        start_offset: u64,
        factory: Arc<dyn EntryReaderFactory>,
        filter: Arc<dyn EntryFilter>,
        quota: Arc<QuotaController>,
        metrics: SourceMetrics,
        peer: PeerState,
        config: ReaderConfig,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(config.batch_queue_capacity.max(1));
        let last_read_path = queue.peek();
        let cursor = Arc::new(Mutex::new(Cursor {
            path: last_read_path.clone(),
            offset: start_offset,
        }));
        Self {
            info,
            queue,
            factory,
            filter,
            quota,
            metrics,
            peer,
            config,
            last_read_path,
            last_read_position: start_offset,
            cursor,
            pending: None,
            pending_path: None,
            pending_quota: 0,
            sleep_multiplier: 1,
            running: Arc::new(AtomicBool::new(true)),
            shutdown: CancellationToken::new(),
            sender,
            receiver: Some(receiver),
        }
    }

    /// Start the reader task and return the handle the shipper side uses.
    pub fn spawn(mut self) -> SourceReaderHandle {
        let receiver = match self.receiver.take() {
            Some(receiver) => receiver,
            None => {
                let (sender, receiver) = mpsc::channel(self.config.batch_queue_capacity.max(1));
                self.sender = sender;
                receiver
            }
        };
        let running = self.running.clone();
        let shutdown = self.shutdown.clone();
        let cursor = self.cursor.clone();
        let join = tokio::spawn(self.run());
        SourceReaderHandle {
            receiver,
            running,
            shutdown,
            cursor,
            join,
        }
    }

    async fn run(mut self) {
        info!(
            peer = %self.info.peer_id,
            wal_group = %self.info.wal_group,
            batch_size_capacity = self.config.batch_size_capacity,
            batch_count_capacity = self.config.batch_count_capacity,
            batch_queue_capacity = self.config.batch_queue_capacity,
            "replication wal reader started"
        );
        while self.is_running() {
            let start = self.stream_start();
            let mut stream = EntryStream::new(
                self.queue.clone(),
                self.factory.clone(),
                start,
                self.metrics.clone(),
                self.config.fs_timeout(),
            );
            if let Err(e) = self.drive(&mut stream).await {
                self.handle_failure(e).await;
            }
        }
        if self.pending_quota > 0 {
            // the batch being assembled never reached the shipper
            self.quota.release(self.pending_quota);
            self.pending_quota = 0;
        }
        self.running.store(false, Ordering::SeqCst);
        info!(
            peer = %self.info.peer_id,
            wal_group = %self.info.wal_group,
            "replication wal reader stopped"
        );
    }

    /// Keep batching from one stream until it fails or the reader stops.
    async fn drive(&mut self, stream: &mut EntryStream) -> Result<()> {
        while self.is_running() {
            if !self.peer.enabled() {
                self.sleep_backoff(1).await;
                continue;
            }
            if !self.quota.acquire_check() {
                self.sleep_backoff(1).await;
                continue;
            }
            self.refresh_oldest_wal_age().await;
            if self.pending.is_none() {
                self.pending = Some(Batch::with_capacity(self.config.batch_count_capacity));
            }
            let has_more = self.read_batch(stream).await?;
            self.ship(Some(&mut *stream), has_more).await?;
        }
        Ok(())
    }

    /// Fill the pending batch until a close condition triggers. Returns
    /// whether the stream still has data.
    async fn read_batch(&mut self, stream: &mut EntryStream) -> Result<bool> {
        let mut has_next = stream.has_next().await?;
        while has_next && self.is_running() {
            let entry = stream.next().await?;
            if let Some(entry) = self.filter_entry(entry) {
                if !entry.edit.is_empty() {
                    let size_full = entry_size_including_bulk_load(&entry);
                    let size_quota = entry_size_excluding_bulk_load(&entry);
                    let Some(batch) = self.pending.as_mut() else {
                        break;
                    };
                    batch.add_entry(entry, size_full, stream.position());
                    self.pending_path = stream.current_path().map(Path::to_path_buf);
                    let over_quota = self.quota.add(size_quota);
                    self.pending_quota += size_quota;
                    let batch = match self.pending.as_ref() {
                        Some(batch) => batch,
                        None => break,
                    };
                    if over_quota
                        || batch.heap_size() >= self.config.batch_size_capacity
                        || batch.len() >= self.config.batch_count_capacity
                    {
                        break;
                    }
                }
            }
            has_next = stream.has_next().await?;
        }
        Ok(has_next)
    }

    fn filter_entry(&self, entry: Entry) -> Option<Entry> {
        let filtered = self.filter.filter(entry);
        if filtered.is_none() {
            self.metrics.incr_log_edits_filtered();
        }
        filtered
    }

    /// Finalize the pending batch and, when shippable, enqueue it for the
    /// shipper. `stream` is `None` on the EOF-recovery path, where the
    /// stream no longer has trustworthy position information and the
    /// `last_read_*` cursor is used instead.
    async fn ship(&mut self, mut stream: Option<&mut EntryStream>, has_more: bool) -> Result<bool> {
        let Some(mut batch) = self.pending.take() else {
            return Ok(false);
        };
        self.pending_path = None;
        match stream.as_deref() {
            Some(s) => batch.update_position(
                s.current_path()
                    .map(Path::to_path_buf)
                    .or_else(|| self.last_read_path.clone()),
                s.position(),
            ),
            None => batch.update_position(self.last_read_path.clone(), self.last_read_position),
        }
        batch.set_more_entries(!self.info.recovered || has_more);
        if batch.is_empty() {
            trace!("did not read any new entries from wal");
        } else {
            trace!(
                entries = batch.len(),
                "read wal entries eligible for replication"
            );
        }

        let shippable = !batch.is_empty() || self.wal_rolled(&batch) || !batch.more_entries();
        if !shippable {
            drop(batch);
            self.sleep_backoff(1).await;
            if let Some(s) = stream.as_deref_mut() {
                self.advance_cursor(s);
                s.reset().await?;
            }
            return Ok(false);
        }

        if let Some((last, _)) = batch.entries().last() {
            let age = now_ms().saturating_sub(last.key.write_time);
            self.metrics.set_age_of_last_shipped_op(age as i64);
        }
        let stop_after = !batch.more_entries();
        let entries = batch.len();
        tokio::select! {
            _ = self.shutdown.cancelled() => {
                debug!("reader cancelled while enqueueing batch");
                self.set_running(false);
                return Ok(false);
            }
            result = self.sender.send(batch) => {
                result.map_err(|_| Error::ReadyQueueClosed)?;
            }
        }
        self.pending_quota = 0;
        debug!(entries, "enqueued replication batch");
        if stop_after {
            debug!("recovered queue fully drained, stopping reader");
            self.metrics.incr_completed_recovery_queue();
            self.set_running(false);
        }
        if let Some(s) = stream.as_deref_mut() {
            self.advance_cursor(s);
            s.reset().await?;
        }
        self.sleep_multiplier = 1;
        Ok(true)
    }

    async fn handle_failure(&mut self, error: Error) {
        match &error {
            Error::ReadyQueueClosed => {
                info!("ready batch queue closed, stopping reader");
                self.set_running(false);
            }
            Error::Corrupt { .. } => {
                error!(
                    error = %error,
                    "corrupt wal record, stopping reader for this group"
                );
                self.set_running(false);
            }
            e if e.is_stream_failure() => match self.try_eof_autorecovery(e).await {
                Ok(true) => self.sleep_multiplier = 1,
                Ok(false) => self.backoff_after(&error).await,
                Err(Error::ReadyQueueClosed) => {
                    info!("ready batch queue closed, stopping reader");
                    self.set_running(false);
                }
                Err(inner) => {
                    warn!(error = %inner, "eof recovery failed");
                    self.backoff_after(&error).await;
                }
            },
            _ => self.backoff_after(&error).await,
        }
    }

    async fn backoff_after(&mut self, error: &Error) {
        if self.sleep_multiplier < self.config.max_retries_multiplier {
            debug!(error = %error, "failed to read replication entry stream");
            self.sleep_multiplier += 1;
        } else {
            error!(error = %error, "failed to read replication entry stream");
        }
        self.sleep_backoff(self.sleep_multiplier).await;
    }

    /// Handle a truncated tail caused by an unclean writer shutdown: when
    /// allowed, force-remove a zero-length head and ship what we have so
    /// the shipper can record a position past the dead file.
    async fn try_eof_autorecovery(&mut self, error: &Error) -> Result<bool> {
        if !error.is_truncation() || !self.config.eof_autorecovery {
            return Ok(false);
        }
        // Never remove the sole file of a live queue: the writer may still
        // be appending to it.
        if !(self.info.recovered || self.queue.len() > 1) {
            return Ok(false);
        }
        let Some(head) = self.queue.peek() else {
            return Ok(false);
        };
        let len = match tokio::time::timeout(self.config.fs_timeout(), tokio::fs::metadata(&head))
            .await
        {
            Ok(Ok(metadata)) => metadata.len(),
            Ok(Err(e)) => {
                self.metrics.incr_unknown_file_length_for_closed_wal();
                warn!(
                    wal = %head.display(),
                    error = %e,
                    "couldn't get file length for wal at queue head"
                );
                return Ok(false);
            }
            Err(_) => {
                self.metrics.incr_unknown_file_length_for_closed_wal();
                warn!(
                    wal = %head.display(),
                    "timed out getting file length for wal at queue head"
                );
                return Ok(false);
            }
        };
        if len != 0 {
            return Ok(false);
        }

        warn!(
            wal = %head.display(),
            "forcing removal of zero length wal from queue"
        );
        self.metrics.incr_uncleanly_closed_wals();
        self.last_read_path = Some(head.clone());
        self.last_read_position = 0;
        self.publish_cursor();
        self.queue.remove_head();
        let has_more = !self.queue.is_empty();
        if self.pending.is_none() {
            self.pending = Some(Batch::with_capacity(self.config.batch_count_capacity));
        }
        self.ship(None, has_more).await?;
        Ok(true)
    }

    fn wal_rolled(&self, batch: &Batch) -> bool {
        match (&self.last_read_path, batch.last_path()) {
            (None, Some(_)) => true,
            (Some(last), Some(current)) => last != current,
            _ => false,
        }
    }

    fn stream_start(&self) -> Option<Position> {
        // A retained partial batch already consumed entries past the
        // durable cursor; restart the stream after them, not before.
        if let (Some(batch), Some(path)) = (&self.pending, &self.pending_path) {
            if !batch.is_empty() {
                return Some(Position::new(path.clone(), batch.last_position()));
            }
        }
        self.last_read_path
            .clone()
            .map(|path| Position::new(path, self.last_read_position))
    }

    fn advance_cursor(&mut self, stream: &EntryStream) {
        self.last_read_position = stream.position();
        if let Some(path) = stream.current_path() {
            self.last_read_path = Some(path.to_owned());
        }
        self.publish_cursor();
    }

    fn publish_cursor(&self) {
        let mut cursor = self.cursor.lock().expect("cursor poisoned");
        cursor.path = self.last_read_path.clone();
        cursor.offset = self.last_read_position;
    }

    async fn refresh_oldest_wal_age(&self) {
        let Some(head) = self.queue.peek() else {
            return;
        };
        let Ok(Ok(metadata)) =
            tokio::time::timeout(self.config.fs_timeout(), tokio::fs::metadata(&head)).await
        else {
            return;
        };
        let Ok(modified) = metadata.modified() else {
            return;
        };
        let age = SystemTime::now()
            .duration_since(modified)
            .unwrap_or_default();
        self.metrics.set_oldest_wal_age(age.as_millis() as i64);
    }

    async fn sleep_backoff(&self, multiplier: u32) {
        let duration = self.config.retry_sleep() * multiplier;
        tokio::select! {
            _ = self.shutdown.cancelled() => {}
            _ = tokio::time::sleep(duration) => {}
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst) && !self.shutdown.is_cancelled()
    }

    fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }
}

/// Shipper-side handle to a spawned [`WalSourceReader`].
pub struct SourceReaderHandle {
    receiver: mpsc::Receiver<Batch>,
    running: Arc<AtomicBool>,
    shutdown: CancellationToken,
    cursor: Arc<Mutex<Cursor>>,
    join: JoinHandle<()>,
}

impl SourceReaderHandle {
    /// Wait for the next ready batch. `None` once the reader has stopped
    /// and drained.
    pub async fn take(&mut self) -> Option<Batch> {
        self.receiver.recv().await
    }

    /// Wait up to `timeout` for a ready batch.
    pub async fn poll(&mut self, timeout: Duration) -> Option<Batch> {
        tokio::time::timeout(timeout, self.receiver.recv())
            .await
            .ok()
            .flatten()
    }

    /// Take a batch only if one is already queued.
    pub fn try_take(&mut self) -> Option<Batch> {
        self.receiver.try_recv().ok()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// The durable cursor as of the last shipped (or skipped-over) batch.
    pub fn last_read_position(&self) -> Option<Position> {
        let cursor = self.cursor.lock().expect("cursor poisoned");
        cursor
            .path
            .clone()
            .map(|path| Position::new(path, cursor.offset))
    }

    /// The byte offset part of the durable cursor.
    pub fn last_read_offset(&self) -> u64 {
        self.cursor.lock().expect("cursor poisoned").offset
    }

    /// Ask the reader to stop. Any blocked send or sleep wakes up and the
    /// task exits after releasing unshipped quota.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.shutdown.cancel();
    }

    /// Stop and wait for the reader task to finish.
    pub async fn shutdown(self) {
        self.stop();
        let _ = self.join.await;
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
