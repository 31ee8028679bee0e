//! Entry Filters
//!
//! Filters decide which WAL entries are eligible for replication and may
//! rewrite an entry on the way through (typically by dropping cells that
//! are out of scope for the peer).
//!
//! A filter is a small stateless capability: it sees one entry at a time
//! and must not depend on cross-entry ordering. Filters compose
//! left-to-right in a [`FilterChain`]; the first filter to return `None`
//! short-circuits the rest.

use crate::entry::{Entry, ReplicationScope};
use std::collections::HashMap;

/// Decides whether (and in what shape) an entry is replicated.
pub trait EntryFilter: Send + Sync {
    /// Return the entry (possibly rewritten) to keep it, or `None` to drop
    /// it entirely.
    fn filter(&self, entry: Entry) -> Option<Entry>;
}

/// Passes every entry through unchanged.
#[derive(Debug, Default)]
pub struct PassThroughFilter;

impl EntryFilter for PassThroughFilter {
    fn filter(&self, entry: Entry) -> Option<Entry> {
        Some(entry)
    }
}

/// Composes filters left-to-right; `None` short-circuits.
#[derive(Default)]
pub struct FilterChain {
    filters: Vec<Box<dyn EntryFilter>>,
}

impl FilterChain {
    pub fn new(filters: Vec<Box<dyn EntryFilter>>) -> Self {
        Self { filters }
    }

    pub fn push(&mut self, filter: Box<dyn EntryFilter>) {
        self.filters.push(filter);
    }
}

impl EntryFilter for FilterChain {
    fn filter(&self, entry: Entry) -> Option<Entry> {
        let mut entry = entry;
        for filter in &self.filters {
            entry = filter.filter(entry)?;
        }
        Some(entry)
    }
}

/// Keeps only cells whose family is marked [`ReplicationScope::Global`] in
/// the entry's own scope map. Entries with an empty scope map, or with no
/// globally-scoped cell, are dropped.
#[derive(Debug, Default)]
pub struct ScopeFilter;

impl EntryFilter for ScopeFilter {
    fn filter(&self, mut entry: Entry) -> Option<Entry> {
        if entry.key.scopes.is_empty() {
            return None;
        }
        let scopes = entry.key.scopes.clone();
        entry
            .edit
            .cells
            .retain(|cell| scopes.get(&cell.family) == Some(&ReplicationScope::Global));
        if entry.edit.is_empty() {
            return None;
        }
        Some(entry)
    }
}

/// Per-table column-family allow-list.
///
/// Tables absent from the map are dropped wholesale. A table mapped to
/// `None` replicates all of its families; a table mapped to a list keeps
/// only cells of the listed families. Entries left with no cells are
/// dropped.
pub struct TableFamilyFilter {
    table_families: HashMap<String, Option<Vec<String>>>,
}

impl TableFamilyFilter {
    pub fn new(table_families: HashMap<String, Option<Vec<String>>>) -> Self {
        Self { table_families }
    }
}

impl EntryFilter for TableFamilyFilter {
    fn filter(&self, mut entry: Entry) -> Option<Entry> {
        let families = self.table_families.get(&entry.key.table)?;
        if let Some(families) = families {
            entry
                .edit
                .cells
                .retain(|cell| families.iter().any(|f| f == &cell.family));
        }
        if entry.edit.is_empty() {
            return None;
        }
        Some(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{Cell, EntryKey, WalEdit};

    fn entry(table: &str, families: &[&str]) -> Entry {
        let cells = families
            .iter()
            .map(|f| Cell::new("row", *f, "q", "v", 1))
            .collect();
        Entry::new(EntryKey::new(table, 1), WalEdit::with_cells(cells))
    }

    #[test]
    fn test_pass_through_keeps_entry() {
        let e = entry("t", &["fam"]);
        assert_eq!(PassThroughFilter.filter(e.clone()), Some(e));
    }

    #[test]
    fn test_scope_filter_drops_unscoped_entry() {
        assert!(ScopeFilter.filter(entry("t", &["fam"])).is_none());
    }

    #[test]
    fn test_scope_filter_keeps_global_cells_only() {
        let mut e = entry("t", &["keep", "drop"]);
        e.key = EntryKey::new("t", 1)
            .with_scope("keep", ReplicationScope::Global)
            .with_scope("drop", ReplicationScope::Local);
        let filtered = ScopeFilter.filter(e).unwrap();
        assert_eq!(filtered.edit.len(), 1);
        assert_eq!(filtered.edit.cells[0].family, "keep");
    }

    #[test]
    fn test_scope_filter_drops_when_nothing_survives() {
        let mut e = entry("t", &["local"]);
        e.key = EntryKey::new("t", 1).with_scope("local", ReplicationScope::Local);
        assert!(ScopeFilter.filter(e).is_none());
    }

    #[test]
    fn test_table_filter_drops_unknown_table() {
        let filter = TableFamilyFilter::new(HashMap::from([("known".to_owned(), None)]));
        assert!(filter.filter(entry("unknown", &["fam"])).is_none());
    }

    #[test]
    fn test_table_filter_none_means_whole_table() {
        let filter = TableFamilyFilter::new(HashMap::from([("t".to_owned(), None)]));
        let filtered = filter.filter(entry("t", &["a", "b"])).unwrap();
        assert_eq!(filtered.edit.len(), 2);
    }

    #[test]
    fn test_table_filter_restricts_families() {
        let filter = TableFamilyFilter::new(HashMap::from([(
            "t".to_owned(),
            Some(vec!["fam".to_owned()]),
        )]));
        let filtered = filter.filter(entry("t", &["fam", "other"])).unwrap();
        assert_eq!(filtered.edit.len(), 1);
        assert_eq!(filtered.edit.cells[0].family, "fam");

        assert!(filter.filter(entry("t", &["other"])).is_none());
    }

    #[test]
    fn test_chain_short_circuits_on_none() {
        struct DropAll;
        impl EntryFilter for DropAll {
            fn filter(&self, _entry: Entry) -> Option<Entry> {
                None
            }
        }
        struct Panics;
        impl EntryFilter for Panics {
            fn filter(&self, _entry: Entry) -> Option<Entry> {
                panic!("must not run after a drop");
            }
        }
        let chain = FilterChain::new(vec![Box::new(DropAll), Box::new(Panics)]);
        assert!(chain.filter(entry("t", &["fam"])).is_none());
    }

    #[test]
    fn test_chain_applies_left_to_right() {
        let chain = FilterChain::new(vec![
            Box::new(TableFamilyFilter::new(HashMap::from([(
                "t".to_owned(),
                Some(vec!["fam".to_owned(), "other".to_owned()]),
            )]))),
            Box::new(TableFamilyFilter::new(HashMap::from([(
                "t".to_owned(),
                Some(vec!["fam".to_owned()]),
            )]))),
        ]);
        let filtered = chain.filter(entry("t", &["fam", "other", "third"])).unwrap();
        assert_eq!(filtered.edit.len(), 1);
        assert_eq!(filtered.edit.cells[0].family, "fam");
    }

    #[test]
    fn test_empty_chain_passes_through() {
        let chain = FilterChain::default();
        let e = entry("t", &["fam"]);
        assert_eq!(chain.filter(e.clone()), Some(e));
    }
}
