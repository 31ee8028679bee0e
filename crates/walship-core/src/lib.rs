//! Walship Core Data Model
//!
//! Shared domain types for the walship inter-cluster replication pipeline:
//! WAL entries, resume positions, the record framing codec, and the entry
//! filter capability.
//!
//! This crate is deliberately free of async and I/O. The tailing reader,
//! batching, and backpressure live in `walship-source`; metrics live in
//! `walship-observability`.
//!
//! ## Main Types
//!
//! - [`Entry`] / [`EntryKey`] / [`WalEdit`] / [`Cell`]: one decoded WAL
//!   record and its parts.
//! - [`Position`]: a `(file, byte offset)` resume point, always on a
//!   record boundary.
//! - [`codec`]: the reference WAL file framing (magic header, CRC32'd
//!   frames) shared between the write path and the tailing reader.
//! - [`EntryFilter`] and the built-in filters: scope-based and
//!   table/family-based replication filtering.

pub mod codec;
pub mod entry;
pub mod filter;
pub mod position;

pub use entry::{
    BulkLoadDescriptor, Cell, Entry, EntryKey, ReplicationScope, StoreDescriptor, WalEdit,
    BULK_LOAD_QUALIFIER,
};
pub use filter::{EntryFilter, FilterChain, PassThroughFilter, ScopeFilter, TableFamilyFilter};
pub use position::Position;
