//! Reader Configuration
//!
//! Tunables for one replication WAL reader. All fields deserialize from
//! the operator-facing dotted key names and fall back to defaults when
//! absent, so a partial config document is always valid:
//!
//! ```ignore
//! let config: ReaderConfig = serde_json::from_str(
//!     r#"{ "batch.count.capacity": 500, "eof.autorecovery": true }"#,
//! )?;
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReaderConfig {
    /// Per-batch heap size cap in bytes (default: 64 MiB).
    #[serde(rename = "batch.size.capacity", default = "default_batch_size_capacity")]
    pub batch_size_capacity: u64,

    /// Per-batch entry count cap (default: 25 000).
    #[serde(
        rename = "batch.count.capacity",
        default = "default_batch_count_capacity"
    )]
    pub batch_count_capacity: usize,

    /// Depth of the ready-batch queue between reader and shipper
    /// (default: 1). Total reader memory is roughly
    /// `batch.size.capacity * (batch.queue.capacity + 1)`: the queued
    /// batches plus the one being assembled.
    #[serde(
        rename = "batch.queue.capacity",
        default = "default_batch_queue_capacity"
    )]
    pub batch_queue_capacity: usize,

    /// Process-wide cap on bytes buffered across all WAL groups
    /// (default: 256 MiB).
    #[serde(rename = "quota.bytes", default = "default_quota_bytes")]
    pub quota_bytes: u64,

    /// Base backoff between retries in milliseconds (default: 1 000).
    #[serde(rename = "retry.sleep.ms", default = "default_retry_sleep_ms")]
    pub retry_sleep_ms: u64,

    /// Cap on the backoff multiplier (default: 300, i.e. 5 minutes at the
    /// default base sleep).
    #[serde(
        rename = "retry.max.multiplier",
        default = "default_max_retries_multiplier"
    )]
    pub max_retries_multiplier: u32,

    /// Allow force-removal of a zero-length WAL at the queue head after an
    /// unclean writer shutdown (default: false).
    #[serde(rename = "eof.autorecovery", default)]
    pub eof_autorecovery: bool,

    /// Timeout for shared-filesystem metadata calls in milliseconds
    /// (default: 5 000).
    #[serde(rename = "fs.timeout.ms", default = "default_fs_timeout_ms")]
    pub fs_timeout_ms: u64,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            batch_size_capacity: default_batch_size_capacity(),
            batch_count_capacity: default_batch_count_capacity(),
            batch_queue_capacity: default_batch_queue_capacity(),
            quota_bytes: default_quota_bytes(),
            retry_sleep_ms: default_retry_sleep_ms(),
            max_retries_multiplier: default_max_retries_multiplier(),
            eof_autorecovery: false,
            fs_timeout_ms: default_fs_timeout_ms(),
        }
    }
}

impl ReaderConfig {
    pub fn retry_sleep(&self) -> Duration {
        Duration::from_millis(self.retry_sleep_ms)
    }

    pub fn fs_timeout(&self) -> Duration {
        Duration::from_millis(self.fs_timeout_ms)
    }
}

fn default_batch_size_capacity() -> u64 {
    64 * 1024 * 1024 // 64 MiB
}

fn default_batch_count_capacity() -> usize {
    25_000
}

fn default_batch_queue_capacity() -> usize {
    1
}

fn default_quota_bytes() -> u64 {
    256 * 1024 * 1024 // 256 MiB
}

fn default_retry_sleep_ms() -> u64 {
    1_000
}

fn default_max_retries_multiplier() -> u32 {
    300
}

fn default_fs_timeout_ms() -> u64 {
    5_000
}
