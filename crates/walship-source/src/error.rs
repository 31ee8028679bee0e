//! Replication Source Error Types
//!
//! ## Error Categories
//!
//! ### Stream Errors (retryable)
//! - `Truncated`: the file ends mid-record. On a live tail this usually
//!   means the writer has not finished flushing; the reader backs off and
//!   retries at the same position.
//! - `FileNotFound` / `MetadataTimeout` / `Io`: shared-filesystem hiccups;
//!   same backoff-and-retry treatment.
//!
//! ### Fatal Errors
//! - `Corrupt`: a record failed its checksum or framing. Retrying cannot
//!   help; the reader for this WAL group stops and an operator must act.
//! - `ReadyQueueClosed`: the shipper went away; treated as shutdown.
//!
//! All operations return `Result<T>`, aliased below, so errors propagate
//! with `?`.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The file ends in the middle of a record. Retryable: the writer may
    /// still be flushing the rest.
    #[error("truncated wal record in {path} at offset {offset}")]
    Truncated { path: PathBuf, offset: u64 },

    /// Checksum or framing failure. Not retryable for this file.
    #[error("corrupt wal record in {path} at offset {offset}: {reason}")]
    Corrupt {
        path: PathBuf,
        offset: u64,
        reason: String,
    },

    /// A queued WAL path is missing from the shared filesystem. Retryable;
    /// creation may not be visible yet.
    #[error("wal file not found: {0}")]
    FileNotFound(PathBuf),

    /// A filesystem metadata call exceeded the configured timeout.
    #[error("timed out reading filesystem metadata for {0}")]
    MetadataTimeout(PathBuf),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The shipper dropped its end of the ready-batch queue.
    #[error("ready batch queue closed")]
    ReadyQueueClosed,

    /// `next()` was called with no entry available.
    #[error("no more wal entries")]
    NoMoreEntries,
}

impl Error {
    /// Whether the root cause is a truncated tail (the unclean-shutdown
    /// signature that EOF autorecovery may act on).
    pub fn is_truncation(&self) -> bool {
        matches!(self, Error::Truncated { .. })
    }

    /// Whether this error came out of the entry stream and warrants the
    /// backoff-and-rebuild path rather than an immediate stop.
    pub fn is_stream_failure(&self) -> bool {
        matches!(
            self,
            Error::Truncated { .. }
                | Error::FileNotFound(_)
                | Error::MetadataTimeout(_)
                | Error::Io(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncation_classification() {
        let e = Error::Truncated {
            path: "a.wal".into(),
            offset: 8,
        };
        assert!(e.is_truncation());
        assert!(e.is_stream_failure());
    }

    #[test]
    fn test_corrupt_is_not_retryable_stream_failure() {
        let e = Error::Corrupt {
            path: "a.wal".into(),
            offset: 8,
            reason: "checksum".into(),
        };
        assert!(!e.is_truncation());
        assert!(!e.is_stream_failure());
    }

    #[test]
    fn test_io_is_stream_failure() {
        let e = Error::Io(std::io::Error::other("boom"));
        assert!(e.is_stream_failure());
        assert!(!e.is_truncation());
    }

    #[test]
    fn test_queue_closed_is_terminal() {
        assert!(!Error::ReadyQueueClosed.is_stream_failure());
    }
}
