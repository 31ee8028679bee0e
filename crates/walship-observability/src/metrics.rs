//! Replication source metrics.
//!
//! [`ReplicationMetrics`] owns the per-process collector vecs and registers
//! them against an injected [`Registry`]; [`SourceMetrics`] is the
//! label-bound view one replication source updates. Tests build their own
//! registry so assertions never see another test's counts; production code
//! uses [`global()`].

use lazy_static::lazy_static;
use prometheus::{IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry};

const LABELS: &[&str] = &["peer", "wal_group"];

lazy_static! {
    /// Registry backing the process-wide default metrics.
    pub static ref REGISTRY: Registry = Registry::new();
    static ref GLOBAL: ReplicationMetrics =
        ReplicationMetrics::new(&REGISTRY).expect("metrics can be registered");
}

/// The process-wide default metrics, registered against [`struct@REGISTRY`].
pub fn global() -> &'static ReplicationMetrics {
    &GLOBAL
}

/// All replication collector vecs, registered against one registry.
pub struct ReplicationMetrics {
    size_of_log_queue: IntGaugeVec,
    oldest_wal_age_ms: IntGaugeVec,
    age_of_last_shipped_op_ms: IntGaugeVec,
    log_edits_read: IntCounterVec,
    log_edits_filtered: IntCounterVec,
    log_read_bytes: IntCounterVec,
    unknown_file_length_for_closed_wal: IntCounterVec,
    uncleanly_closed_wals: IntCounterVec,
    bytes_skipped_in_uncleanly_closed_wals: IntCounterVec,
    restarted_wal_reading: IntCounterVec,
    completed_wal: IntCounterVec,
    completed_recovery_queue: IntCounterVec,
}

fn gauge_vec(registry: &Registry, name: &str, help: &str) -> prometheus::Result<IntGaugeVec> {
    let vec = IntGaugeVec::new(Opts::new(name, help), LABELS)?;
    registry.register(Box::new(vec.clone()))?;
    Ok(vec)
}

fn counter_vec(registry: &Registry, name: &str, help: &str) -> prometheus::Result<IntCounterVec> {
    let vec = IntCounterVec::new(Opts::new(name, help), LABELS)?;
    registry.register(Box::new(vec.clone()))?;
    Ok(vec)
}

impl ReplicationMetrics {
    /// Create and register all replication collectors on `registry`.
    pub fn new(registry: &Registry) -> prometheus::Result<Self> {
        Ok(Self {
            size_of_log_queue: gauge_vec(
                registry,
                "walship_size_of_log_queue",
                "Number of WAL files queued for replication",
            )?,
            oldest_wal_age_ms: gauge_vec(
                registry,
                "walship_oldest_wal_age_ms",
                "Age of the oldest queued WAL file in milliseconds",
            )?,
            age_of_last_shipped_op_ms: gauge_vec(
                registry,
                "walship_age_of_last_shipped_op_ms",
                "Age of the newest edit in the last shipped batch in milliseconds",
            )?,
            log_edits_read: counter_vec(
                registry,
                "walship_log_edits_read",
                "WAL entries read by the entry stream",
            )?,
            log_edits_filtered: counter_vec(
                registry,
                "walship_log_edits_filtered",
                "WAL entries dropped by the filter chain",
            )?,
            log_read_bytes: counter_vec(
                registry,
                "walship_log_read_bytes",
                "Bytes consumed from WAL files",
            )?,
            unknown_file_length_for_closed_wal: counter_vec(
                registry,
                "walship_unknown_file_length_for_closed_wal",
                "Failed or timed-out WAL length lookups",
            )?,
            uncleanly_closed_wals: counter_vec(
                registry,
                "walship_uncleanly_closed_wals",
                "WAL files abandoned by a writer without a clean close",
            )?,
            bytes_skipped_in_uncleanly_closed_wals: counter_vec(
                registry,
                "walship_bytes_skipped_in_uncleanly_closed_wals",
                "Unparseable trailing bytes skipped in uncleanly closed WALs",
            )?,
            restarted_wal_reading: counter_vec(
                registry,
                "walship_restarted_wal_reading",
                "Times the entry stream re-opened a WAL file",
            )?,
            completed_wal: counter_vec(
                registry,
                "walship_completed_wal",
                "WAL files fully consumed",
            )?,
            completed_recovery_queue: counter_vec(
                registry,
                "walship_completed_recovery_queue",
                "Recovered WAL queues fully drained",
            )?,
        })
    }

    /// The label-bound metrics handle for one replication source.
    pub fn source(&self, peer: &str, wal_group: &str) -> SourceMetrics {
        let labels = &[peer, wal_group];
        SourceMetrics {
            size_of_log_queue: self.size_of_log_queue.with_label_values(labels),
            oldest_wal_age_ms: self.oldest_wal_age_ms.with_label_values(labels),
            age_of_last_shipped_op_ms: self.age_of_last_shipped_op_ms.with_label_values(labels),
            log_edits_read: self.log_edits_read.with_label_values(labels),
            log_edits_filtered: self.log_edits_filtered.with_label_values(labels),
            log_read_bytes: self.log_read_bytes.with_label_values(labels),
            unknown_file_length_for_closed_wal: self
                .unknown_file_length_for_closed_wal
                .with_label_values(labels),
            uncleanly_closed_wals: self.uncleanly_closed_wals.with_label_values(labels),
            bytes_skipped_in_uncleanly_closed_wals: self
                .bytes_skipped_in_uncleanly_closed_wals
                .with_label_values(labels),
            restarted_wal_reading: self.restarted_wal_reading.with_label_values(labels),
            completed_wal: self.completed_wal.with_label_values(labels),
            completed_recovery_queue: self.completed_recovery_queue.with_label_values(labels),
        }
    }
}

/// Metrics handle for one `(peer, wal_group)` replication source.
///
/// Cloning is cheap; all clones share the same underlying collectors.
#[derive(Clone)]
pub struct SourceMetrics {
    size_of_log_queue: IntGauge,
    oldest_wal_age_ms: IntGauge,
    age_of_last_shipped_op_ms: IntGauge,
    log_edits_read: IntCounter,
    log_edits_filtered: IntCounter,
    log_read_bytes: IntCounter,
    unknown_file_length_for_closed_wal: IntCounter,
    uncleanly_closed_wals: IntCounter,
    bytes_skipped_in_uncleanly_closed_wals: IntCounter,
    restarted_wal_reading: IntCounter,
    completed_wal: IntCounter,
    completed_recovery_queue: IntCounter,
}

impl SourceMetrics {
    pub fn incr_size_of_log_queue(&self) {
        self.size_of_log_queue.inc();
    }

    pub fn decr_size_of_log_queue(&self) {
        self.size_of_log_queue.dec();
    }

    pub fn size_of_log_queue(&self) -> i64 {
        self.size_of_log_queue.get()
    }

    pub fn set_oldest_wal_age(&self, age_ms: i64) {
        self.oldest_wal_age_ms.set(age_ms);
    }

    pub fn oldest_wal_age(&self) -> i64 {
        self.oldest_wal_age_ms.get()
    }

    pub fn set_age_of_last_shipped_op(&self, age_ms: i64) {
        self.age_of_last_shipped_op_ms.set(age_ms);
    }

    pub fn age_of_last_shipped_op(&self) -> i64 {
        self.age_of_last_shipped_op_ms.get()
    }

    pub fn incr_log_edits_read(&self) {
        self.log_edits_read.inc();
    }

    pub fn log_edits_read(&self) -> u64 {
        self.log_edits_read.get()
    }

    pub fn incr_log_edits_filtered(&self) {
        self.log_edits_filtered.inc();
    }

    pub fn log_edits_filtered(&self) -> u64 {
        self.log_edits_filtered.get()
    }

    pub fn incr_log_read_bytes(&self, bytes: u64) {
        self.log_read_bytes.inc_by(bytes);
    }

    pub fn log_read_bytes(&self) -> u64 {
        self.log_read_bytes.get()
    }

    pub fn incr_unknown_file_length_for_closed_wal(&self) {
        self.unknown_file_length_for_closed_wal.inc();
    }

    pub fn unknown_file_length_for_closed_wal(&self) -> u64 {
        self.unknown_file_length_for_closed_wal.get()
    }

    pub fn incr_uncleanly_closed_wals(&self) {
        self.uncleanly_closed_wals.inc();
    }

    pub fn uncleanly_closed_wals(&self) -> u64 {
        self.uncleanly_closed_wals.get()
    }

    pub fn incr_bytes_skipped_in_uncleanly_closed_wals(&self, bytes: u64) {
        self.bytes_skipped_in_uncleanly_closed_wals.inc_by(bytes);
    }

    pub fn bytes_skipped_in_uncleanly_closed_wals(&self) -> u64 {
        self.bytes_skipped_in_uncleanly_closed_wals.get()
    }

    pub fn incr_restarted_wal_reading(&self) {
        self.restarted_wal_reading.inc();
    }

    pub fn restarted_wal_reading(&self) -> u64 {
        self.restarted_wal_reading.get()
    }

    pub fn incr_completed_wal(&self) {
        self.completed_wal.inc();
    }

    pub fn completed_wal(&self) -> u64 {
        self.completed_wal.get()
    }

    pub fn incr_completed_recovery_queue(&self) {
        self.completed_recovery_queue.inc();
    }

    pub fn completed_recovery_queue(&self) -> u64 {
        self.completed_recovery_queue.get()
    }
}
