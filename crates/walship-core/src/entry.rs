//! WAL Entry Data Model
//!
//! This module defines the domain objects a replication source reads out of
//! write-ahead-log files: cells, edits, keys, and the assembled `Entry`.
//!
//! ## Structure
//!
//! ```text
//! Entry
//! ├── EntryKey
//! │   ├── table          which table the mutation belongs to
//! │   ├── write_time     wall clock of origin (ms since epoch)
//! │   └── scopes         per-family replication scope (Local / Global)
//! └── WalEdit
//!     └── cells          the mutation payload
//! ```
//!
//! ## Bulk-load references
//!
//! A cell whose qualifier equals [`BULK_LOAD_QUALIFIER`] does not inline
//! data; its value carries a serialized [`BulkLoadDescriptor`] naming the
//! store files that were bulk-loaded. Replication must ship those files in
//! addition to the inline edits, so batch sizing distinguishes "heap size
//! including referenced store files" from "bytes actually buffered".
//!
//! ## Design Decisions
//!
//! - Row keys, qualifiers, and values are `bytes::Bytes` for zero-copy
//!   cloning between the reader, the batch, and the shipper.
//! - Families are `String`: they name column families and key the scope
//!   map, and map keys must be strings for the JSON payload encoding.
//! - Sizes are estimates, not exact heap measurements. They only feed
//!   batch capping and quota accounting.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Qualifier marking a cell as a bulk-load reference.
pub const BULK_LOAD_QUALIFIER: &[u8] = b"__bulk_load__";

/// Replication scope of a column family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplicationScope {
    /// Mutations stay in the local cluster.
    Local,
    /// Mutations are eligible for inter-cluster replication.
    Global,
}

/// A single cell of a WAL edit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cell {
    /// Row key the mutation applies to.
    pub row: Bytes,
    /// Column family name.
    pub family: String,
    /// Column qualifier.
    pub qualifier: Bytes,
    /// Cell payload.
    pub value: Bytes,
    /// Cell timestamp in milliseconds since epoch.
    pub timestamp: u64,
}

impl Cell {
    pub fn new(
        row: impl Into<Bytes>,
        family: impl Into<String>,
        qualifier: impl Into<Bytes>,
        value: impl Into<Bytes>,
        timestamp: u64,
    ) -> Self {
        Self {
            row: row.into(),
            family: family.into(),
            qualifier: qualifier.into(),
            value: value.into(),
            timestamp,
        }
    }

    /// Build a bulk-load reference cell carrying the given descriptor.
    pub fn bulk_load(
        row: impl Into<Bytes>,
        family: impl Into<String>,
        descriptor: &BulkLoadDescriptor,
        timestamp: u64,
    ) -> Result<Self, serde_json::Error> {
        let value = serde_json::to_vec(descriptor)?;
        Ok(Self {
            row: row.into(),
            family: family.into(),
            qualifier: Bytes::from_static(BULK_LOAD_QUALIFIER),
            value: Bytes::from(value),
            timestamp,
        })
    }

    /// Whether two cells belong to the same row.
    pub fn matching_row(&self, other: &Cell) -> bool {
        self.row == other.row
    }

    /// Whether this cell is a bulk-load reference.
    pub fn is_bulk_load(&self) -> bool {
        self.qualifier.as_ref() == BULK_LOAD_QUALIFIER
    }

    /// Decode the bulk-load descriptor carried in this cell's value.
    pub fn bulk_load_descriptor(&self) -> Result<BulkLoadDescriptor, serde_json::Error> {
        serde_json::from_slice(&self.value)
    }

    /// Estimated in-memory size of this cell in bytes.
    pub fn heap_size(&self) -> u64 {
        (self.row.len() + self.family.len() + self.qualifier.len() + self.value.len()) as u64 + 8
    }
}

/// Store files referenced by one bulk-load operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkLoadDescriptor {
    pub stores: Vec<StoreDescriptor>,
}

/// Store files bulk-loaded into a single column family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreDescriptor {
    /// Column family the files were loaded into.
    pub family: String,
    /// Names of the loaded store files.
    pub store_files: Vec<String>,
    /// Total on-disk size of the loaded files in bytes.
    pub store_file_size_bytes: u64,
}

/// The mutation payload of one WAL entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalEdit {
    pub cells: Vec<Cell>,
}

impl WalEdit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cells(cells: Vec<Cell>) -> Self {
        Self { cells }
    }

    pub fn add(&mut self, cell: Cell) {
        self.cells.push(cell);
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Estimated in-memory size of all cells in bytes.
    pub fn heap_size(&self) -> u64 {
        self.cells.iter().map(Cell::heap_size).sum()
    }
}

/// Metadata of one WAL entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryKey {
    /// Table the edit belongs to.
    pub table: String,
    /// Wall clock of the originating write in milliseconds since epoch.
    pub write_time: u64,
    /// Replication scope per column family.
    pub scopes: BTreeMap<String, ReplicationScope>,
}

impl EntryKey {
    pub fn new(table: impl Into<String>, write_time: u64) -> Self {
        Self {
            table: table.into(),
            write_time,
            scopes: BTreeMap::new(),
        }
    }

    pub fn with_scope(mut self, family: impl Into<String>, scope: ReplicationScope) -> Self {
        self.scopes.insert(family.into(), scope);
        self
    }

    /// Estimated serialized size of the key in bytes.
    pub fn estimated_size(&self) -> u64 {
        let scopes: usize = self.scopes.keys().map(|f| f.len() + 1).sum();
        (self.table.len() + scopes) as u64 + 8
    }
}

/// One decoded WAL record: a key plus its edit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub key: EntryKey,
    pub edit: WalEdit,
}

impl Entry {
    pub fn new(key: EntryKey, edit: WalEdit) -> Self {
        Self { key, edit }
    }

    /// Estimated in-memory size of the entry, excluding any store files it
    /// merely references.
    pub fn heap_size(&self) -> u64 {
        self.key.estimated_size() + self.edit.heap_size()
    }
}
