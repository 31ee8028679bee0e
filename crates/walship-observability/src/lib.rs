//! Walship Observability
//!
//! Prometheus metrics for the replication pipeline, consumed by the
//! operator UI to answer "how far behind is replication and why".
//!
//! All series are labeled `(peer, wal_group)` so one process can run many
//! replication sources without the metrics blurring together.
//!
//! ## Usage
//!
//! ```ignore
//! use walship_observability::{metrics, Registry, ReplicationMetrics};
//!
//! // Production: one registry for the whole process.
//! let source = metrics::global().source("peer-2", "group-a");
//! source.incr_log_edits_read();
//!
//! // Tests: a private registry per test, no cross-test bleed.
//! let registry = Registry::new();
//! let metrics = ReplicationMetrics::new(&registry).unwrap();
//! let source = metrics.source("1", "fake-wal-group");
//! ```

pub mod metrics;

pub use metrics::{ReplicationMetrics, SourceMetrics};
pub use prometheus::Registry;
