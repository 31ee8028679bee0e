//! Process-Wide Buffer Quota
//!
//! One shared counter bounds the bytes buffered in in-flight batches
//! across every WAL group in the process. Readers account entries as they
//! batch them; the shipper releases the bytes once a batch has been sent.
//!
//! The controller never blocks. It only reports: a reader that sees the
//! quota exceeded sleeps and retries instead of assembling a new batch,
//! and a reader that crosses the quota mid-batch closes the batch early.
//! The quota is therefore a soft ceiling; it can overshoot by at most one
//! entry per reader.

use std::sync::atomic::{AtomicU64, Ordering};

/// Shared accounting for in-flight replication bytes.
#[derive(Debug)]
pub struct QuotaController {
    used: AtomicU64,
    quota: u64,
}

impl QuotaController {
    pub fn new(quota_bytes: u64) -> Self {
        Self {
            used: AtomicU64::new(0),
            quota: quota_bytes,
        }
    }

    /// Account `bytes` of a newly batched entry. Returns `true` when the
    /// total is now at or over the quota, signalling the reader to close
    /// its batch.
    pub fn add(&self, bytes: u64) -> bool {
        let after = self.used.fetch_add(bytes, Ordering::SeqCst) + bytes;
        after >= self.quota
    }

    /// Release `bytes` once a batch has been shipped. Clamped at zero.
    pub fn release(&self, bytes: u64) {
        let mut current = self.used.load(Ordering::SeqCst);
        loop {
            let next = current.saturating_sub(bytes);
            match self.used.compare_exchange_weak(
                current,
                next,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }

    /// Whether a reader may start assembling a new batch.
    pub fn acquire_check(&self) -> bool {
        self.used.load(Ordering::SeqCst) <= self.quota
    }

    /// Bytes currently accounted.
    pub fn used(&self) -> u64 {
        self.used.load(Ordering::SeqCst)
    }

    /// The configured ceiling.
    pub fn quota(&self) -> u64 {
        self.quota
    }
}
