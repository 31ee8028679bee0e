//! Entry stream integration tests: tailing a growing WAL, detecting rolls,
//! resuming from positions, and surviving unclean writer shutdowns.

mod common;

use common::*;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use walship_core::{codec, Position};
use walship_observability::SourceMetrics;
use walship_source::{EntryStream, Error, FileEntryReaderFactory, LogQueue};

fn make_stream(
    queue: &Arc<LogQueue>,
    start: Option<Position>,
    metrics: &SourceMetrics,
) -> EntryStream {
    EntryStream::new(
        queue.clone(),
        Arc::new(FileEntryReaderFactory),
        start,
        metrics.clone(),
        Duration::from_secs(2),
    )
}

#[tokio::test]
async fn test_appends_with_rolls() {
    let dir = TempDir::new().unwrap();
    let metrics = source_metrics();
    let queue = log_queue(&metrics);
    let mut wal = TestWal::create(dir.path(), "log.1");
    queue.enqueue(wal.path.clone());
    wal.append_row("1");

    // One entry in the log: read it, then the stream is drained and
    // reading past the end errors.
    let mut old_position;
    {
        let mut stream = make_stream(&queue, None, &metrics);
        assert!(stream.has_next().await.unwrap());
        assert_eq!(first_row(&stream.next().await.unwrap()), "1");
        assert!(!stream.has_next().await.unwrap());
        assert!(matches!(stream.next().await, Err(Error::NoMoreEntries)));
        old_position = stream.position();
    }

    // A later stream resumes exactly where the last one stopped.
    wal.append_row("2");
    {
        let start = Some(Position::new(&wal.path, old_position));
        let mut stream = make_stream(&queue, start, &metrics);
        assert_eq!(first_row(&stream.next().await.unwrap()), "2");
        assert_ne!(stream.position(), old_position);
        old_position = stream.position();
    }

    // A roll happens; we still drain the tail of the old log before moving
    // to the new one.
    wal.append_row("3");
    let mut rolled = TestWal::create(dir.path(), "log.2");
    queue.enqueue(rolled.path.clone());
    rolled.append_row("4");

    let start = Some(Position::new(&wal.path, old_position));
    let mut stream = make_stream(&queue, start, &metrics);
    assert_eq!(first_row(&stream.next().await.unwrap()), "3");
    assert_eq!(first_row(&stream.next().await.unwrap()), "4");
    assert_eq!(stream.current_path(), Some(rolled.path.as_path()));
    assert!(!stream.has_next().await.unwrap());
}

#[tokio::test]
async fn test_logroll_while_streaming() {
    let dir = TempDir::new().unwrap();
    let metrics = source_metrics();
    let queue = log_queue(&metrics);
    let mut wal = TestWal::create(dir.path(), "log.1");
    queue.enqueue(wal.path.clone());
    wal.append_row("1");
    wal.append_row("2");

    let mut stream = make_stream(&queue, None, &metrics);
    assert_eq!(first_row(&stream.next().await.unwrap()), "1");

    // An append lands in the old log after the reader opened, then the
    // writer rolls.
    wal.append_row("3");
    let mut rolled = TestWal::create(dir.path(), "log.2");
    queue.enqueue(rolled.path.clone());
    rolled.append_row("4");

    assert_eq!(first_row(&stream.next().await.unwrap()), "2");
    // still an entry left in the first log, so it must not be dequeued yet
    assert_eq!(queue.len(), 2);
    // a broken implementation would skip "3" and jump to the rolled log
    assert_eq!(first_row(&stream.next().await.unwrap()), "3");
    assert_eq!(first_row(&stream.next().await.unwrap()), "4");
    assert_eq!(queue.len(), 1);
    assert!(!stream.has_next().await.unwrap());
    assert_eq!(metrics.completed_wal(), 1);
}

#[tokio::test]
async fn test_new_entries_visible_after_drain() {
    let dir = TempDir::new().unwrap();
    let metrics = source_metrics();
    let queue = log_queue(&metrics);
    let mut wal = TestWal::create(dir.path(), "log.1");
    queue.enqueue(wal.path.clone());
    wal.append_row("1");

    let mut stream = make_stream(&queue, None, &metrics);
    assert_eq!(first_row(&stream.next().await.unwrap()), "1");
    assert!(!stream.has_next().await.unwrap());

    // the writer keeps appending to the live tail; has_next re-checks the
    // on-disk length and picks the new entries up
    wal.append_row("2");
    wal.append_row("3");
    assert!(stream.has_next().await.unwrap());
    assert_eq!(first_row(&stream.next().await.unwrap()), "2");
    assert_eq!(first_row(&stream.next().await.unwrap()), "3");
    assert!(!stream.has_next().await.unwrap());
}

#[tokio::test]
async fn test_reset_reopens_at_position() {
    let dir = TempDir::new().unwrap();
    let metrics = source_metrics();
    let queue = log_queue(&metrics);
    let mut wal = TestWal::create(dir.path(), "log.1");
    queue.enqueue(wal.path.clone());
    wal.append_row("1");

    let mut stream = make_stream(&queue, None, &metrics);
    assert_eq!(first_row(&stream.next().await.unwrap()), "1");
    let position = stream.position();

    wal.append_row("2");
    let restarted_before = metrics.restarted_wal_reading();
    stream.reset().await.unwrap();
    assert_eq!(stream.position(), position);
    assert_eq!(first_row(&stream.next().await.unwrap()), "2");
    assert!(metrics.restarted_wal_reading() > restarted_before);
}

#[tokio::test]
async fn test_resume_from_position_skips_shipped_prefix() {
    let dir = TempDir::new().unwrap();
    let metrics = source_metrics();
    let queue = log_queue(&metrics);
    let mut wal = TestWal::create(dir.path(), "log.1");
    queue.enqueue(wal.path.clone());
    for row in ["1", "2", "3"] {
        wal.append_row(row);
    }

    // read only one entry
    let position = {
        let mut stream = make_stream(&queue, None, &metrics);
        stream.next().await.unwrap();
        stream.position()
    };

    // a fresh stream from that position sees exactly the two remaining
    let start = Some(Position::new(&wal.path, position));
    let mut stream = make_stream(&queue, start, &metrics);
    assert_eq!(first_row(&stream.next().await.unwrap()), "2");
    assert_eq!(first_row(&stream.next().await.unwrap()), "3");
    assert!(!stream.has_next().await.unwrap());
    assert_eq!(queue.len(), 1);
}

#[tokio::test]
async fn test_empty_log_and_empty_queue() {
    let dir = TempDir::new().unwrap();
    let metrics = source_metrics();

    // empty queue
    let queue = log_queue(&metrics);
    assert!(!make_stream(&queue, None, &metrics)
        .has_next()
        .await
        .unwrap());

    // header-only log
    let wal = TestWal::create(dir.path(), "log.1");
    queue.enqueue(wal.path.clone());
    let mut stream = make_stream(&queue, None, &metrics);
    assert!(!stream.has_next().await.unwrap());
    assert_eq!(stream.position(), codec::HEADER_LEN);
}

#[tokio::test]
async fn test_zero_length_head_is_truncated() {
    let dir = TempDir::new().unwrap();
    let metrics = source_metrics();
    let queue = log_queue(&metrics);
    let path = TestWal::create_zero_length(dir.path(), "empty.1");
    queue.enqueue(path);

    let mut stream = make_stream(&queue, None, &metrics);
    assert!(matches!(
        stream.has_next().await,
        Err(Error::Truncated { offset: 0, .. })
    ));
    // the stream never removes the head itself
    assert_eq!(queue.len(), 1);
}

#[tokio::test]
async fn test_missing_head_is_file_not_found() {
    let dir = TempDir::new().unwrap();
    let metrics = source_metrics();
    let queue = log_queue(&metrics);
    queue.enqueue(dir.path().join("not-yet-visible.1"));

    let mut stream = make_stream(&queue, None, &metrics);
    assert!(matches!(
        stream.has_next().await,
        Err(Error::FileNotFound(_))
    ));
}

#[tokio::test]
async fn test_truncated_live_tail_propagates() {
    let dir = TempDir::new().unwrap();
    let metrics = source_metrics();
    let queue = log_queue(&metrics);
    let mut wal = TestWal::create(dir.path(), "log.1");
    queue.enqueue(wal.path.clone());
    wal.append_row("1");
    wal.append_truncated(&row_entry("2"), 3);

    let mut stream = make_stream(&queue, None, &metrics);
    assert_eq!(first_row(&stream.next().await.unwrap()), "1");
    // sole file of the queue: the writer may still be flushing, so the
    // failure must reach the reader loop instead of being skipped
    assert!(matches!(
        stream.has_next().await,
        Err(Error::Truncated { .. })
    ));
    assert_eq!(metrics.uncleanly_closed_wals(), 0);
}

#[tokio::test]
async fn test_sealed_unclean_tail_is_skipped() {
    let dir = TempDir::new().unwrap();
    let metrics = source_metrics();
    let queue = log_queue(&metrics);

    // first wal: one good entry, then a frame the dead writer never
    // finished
    let mut wal = TestWal::create(dir.path(), "log.1");
    queue.enqueue(wal.path.clone());
    wal.append_row("1");
    wal.append_truncated(&row_entry("lost"), 3);
    let wal_len = wal.len();

    // the writer restarted on a new wal
    let mut rolled = TestWal::create(dir.path(), "log.2");
    queue.enqueue(rolled.path.clone());
    rolled.append_row("2");

    let mut stream = make_stream(&queue, None, &metrics);
    assert_eq!(first_row(&stream.next().await.unwrap()), "1");
    let position_after_good = stream.position();
    // the unparseable tail of the sealed wal is skipped, not retried
    assert_eq!(first_row(&stream.next().await.unwrap()), "2");
    assert!(!stream.has_next().await.unwrap());

    assert_eq!(queue.len(), 1);
    assert_eq!(metrics.uncleanly_closed_wals(), 1);
    assert_eq!(
        metrics.bytes_skipped_in_uncleanly_closed_wals(),
        wal_len - position_after_good
    );
    assert_eq!(metrics.completed_wal(), 1);
}

#[tokio::test]
async fn test_read_metrics_accumulate() {
    let dir = TempDir::new().unwrap();
    let metrics = source_metrics();
    let queue = log_queue(&metrics);
    let mut wal = TestWal::create(dir.path(), "log.1");
    queue.enqueue(wal.path.clone());
    wal.append_row("a");
    wal.append_row("b");

    let mut stream = make_stream(&queue, None, &metrics);
    while stream.has_next().await.unwrap() {
        stream.next().await.unwrap();
    }
    assert_eq!(metrics.log_edits_read(), 2);
    // everything written has been consumed, header included
    assert_eq!(metrics.log_read_bytes(), wal.len());
}
