//! Replication Batches
//!
//! A [`Batch`] is the unit handed to the shipper: an ordered run of
//! filtered entries, the statistics the operator UI wants, and the durable
//! resume position just past the last included entry. The reader loop is
//! the only mutator; once a batch lands on the ready queue it is read-only.
//!
//! Two sizes are tracked per entry:
//!
//! - **heap size** counts the inline edit bytes *plus* the store files a
//!   bulk-load cell references, because the shipper must move both;
//! - **quota size** counts only the inline bytes, because referenced store
//!   files are never buffered by the reader.

use std::path::PathBuf;
use tracing::error;
use walship_core::{Entry, Position, WalEdit};

/// A batch of WAL entries ready to ship, with statistics.
#[derive(Debug)]
pub struct Batch {
    entries: Vec<(Entry, u64)>,
    last_path: Option<PathBuf>,
    last_position: u64,
    nb_row_keys: u64,
    nb_hfile_refs: u64,
    heap_size: u64,
    more_entries: bool,
}

impl Batch {
    pub fn with_capacity(max_entries: usize) -> Self {
        Self {
            entries: Vec::with_capacity(max_entries),
            last_path: None,
            last_position: 0,
            nb_row_keys: 0,
            nb_hfile_refs: 0,
            heap_size: 0,
            more_entries: true,
        }
    }

    /// Append an entry and fold it into the batch statistics. `position`
    /// is the stream offset immediately past the entry.
    pub fn add_entry(&mut self, entry: Entry, size: u64, position: u64) {
        if !entry.edit.is_empty() {
            self.heap_size += size;
            let (rows, hfiles) = count_distinct_row_keys_and_store_files(&entry.edit);
            self.nb_row_keys += rows;
            self.nb_hfile_refs += hfiles;
        }
        self.last_position = position;
        self.entries.push((entry, size));
    }

    /// Record the resume point the shipper should persist for this batch.
    pub fn update_position(&mut self, path: Option<PathBuf>, position: u64) {
        self.last_path = path;
        self.last_position = position;
    }

    pub fn entries(&self) -> &[(Entry, u64)] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<Entry> {
        self.entries.into_iter().map(|(entry, _)| entry).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Batch heap size, including referenced bulk-load store files.
    pub fn heap_size(&self) -> u64 {
        self.heap_size
    }

    /// Distinct row keys across all entries.
    pub fn nb_row_keys(&self) -> u64 {
        self.nb_row_keys
    }

    /// Bulk-load store files referenced across all entries.
    pub fn nb_hfile_refs(&self) -> u64 {
        self.nb_hfile_refs
    }

    /// Total operations the shipper will perform for this batch.
    pub fn nb_operations(&self) -> u64 {
        self.nb_row_keys + self.nb_hfile_refs
    }

    /// Path of the last WAL read for this batch.
    pub fn last_path(&self) -> Option<&PathBuf> {
        self.last_path.as_ref()
    }

    /// Offset just past the last entry of this batch.
    pub fn last_position(&self) -> u64 {
        self.last_position
    }

    /// The durable resume point, when a path is known.
    pub fn end_position(&self) -> Option<Position> {
        self.last_path
            .as_ref()
            .map(|path| Position::new(path.clone(), self.last_position))
    }

    /// `false` only when a recovered queue has been fully drained; the
    /// shipper treats such a batch as the source's last.
    pub fn more_entries(&self) -> bool {
        self.more_entries
    }

    pub fn set_more_entries(&mut self, more_entries: bool) {
        self.more_entries = more_entries;
    }
}

/// Entry size excluding referenced bulk-load store files: the bytes the
/// reader actually buffers, used for quota accounting.
pub fn entry_size_excluding_bulk_load(entry: &Entry) -> u64 {
    entry.heap_size()
}

/// Entry size including referenced bulk-load store files: what the shipper
/// must move, used for batch heap capping.
pub fn entry_size_including_bulk_load(entry: &Entry) -> u64 {
    entry_size_excluding_bulk_load(entry) + size_of_store_files(&entry.edit)
}

/// Total on-disk size of store files referenced by bulk-load cells.
fn size_of_store_files(edit: &WalEdit) -> u64 {
    let mut total = 0;
    for cell in &edit.cells {
        if !cell.is_bulk_load() {
            continue;
        }
        match cell.bulk_load_descriptor() {
            Ok(descriptor) => {
                total += descriptor
                    .stores
                    .iter()
                    .map(|s| s.store_file_size_bytes)
                    .sum::<u64>();
            }
            Err(e) => {
                error!(
                    error = %e,
                    "failed to decode bulk load descriptor, its store file \
                     sizes will not count toward the batch"
                );
            }
        }
    }
    total
}

/// Count distinct row keys (comparing successive cells) and referenced
/// bulk-load store files in one edit. Assumes at least one cell.
pub fn count_distinct_row_keys_and_store_files(edit: &WalEdit) -> (u64, u64) {
    let Some(first) = edit.cells.first() else {
        return (0, 0);
    };
    let mut distinct_rows = 1u64;
    let mut store_files = 0u64;
    let mut last = first;
    for cell in &edit.cells {
        if cell.is_bulk_load() {
            match cell.bulk_load_descriptor() {
                Ok(descriptor) => {
                    store_files += descriptor
                        .stores
                        .iter()
                        .map(|s| s.store_files.len() as u64)
                        .sum::<u64>();
                }
                Err(e) => {
                    error!(
                        error = %e,
                        "failed to decode bulk load descriptor, its files \
                         will not count toward batch statistics"
                    );
                }
            }
        }
        if !cell.matching_row(last) {
            distinct_rows += 1;
        }
        last = cell;
    }
    (distinct_rows, store_files)
}
