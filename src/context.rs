//! Import context: the identifier-keyed entry tables of one import.
//!
//! Parsing fills the tables, resolution only reads them. A context lives
//! for exactly one import call.

use std::collections::{BTreeMap, HashMap};

use crate::gnc::{AccountEntry, CommodityEntry, PriceEntry, SplitEntry, TransactionEntry};

/// Entries of one kind in document order, indexed by id.
///
/// Inserting an id that is already present replaces the earlier entry in
/// place and hands it back, so the caller can report the duplicate.
#[derive(Debug, Clone)]
pub struct EntryTable<T> {
    entries: Vec<T>,
    index: HashMap<String, usize>,
}

impl<T> Default for EntryTable<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<T> EntryTable<T> {
    pub fn insert(&mut self, id: impl Into<String>, entry: T) -> Option<T> {
        let id = id.into();
        match self.index.get(&id) {
            Some(&pos) => Some(std::mem::replace(&mut self.entries[pos], entry)),
            None => {
                self.index.insert(id, self.entries.len());
                self.entries.push(entry);
                None
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&T> {
        self.index.get(id).map(|&pos| &self.entries[pos])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Entries in the order their ids were first seen
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<'a, T> IntoIterator for &'a EntryTable<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Everything parsed from one document
#[derive(Debug, Default)]
pub struct ImportContext {
    /// Keyed by `space:id`
    pub commodities: EntryTable<CommodityEntry>,
    pub accounts: EntryTable<AccountEntry>,
    pub prices: EntryTable<PriceEntry>,
    pub transactions: EntryTable<TransactionEntry>,
    pub splits: EntryTable<SplitEntry>,
    /// `gnc:count-data` values by `cd:type`
    pub count_data: BTreeMap<String, i64>,
    transaction_ordinal: usize,
}

impl ImportContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ordinal for the next transaction element
    pub fn next_transaction_ordinal(&mut self) -> usize {
        let ordinal = self.transaction_ordinal;
        self.transaction_ordinal += 1;
        ordinal
    }

    /// Declared count of an entity kind (`account`, `transaction`, ...)
    pub fn declared_count(&self, kind: &str) -> Option<i64> {
        self.count_data.get(kind).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_replaces_in_place() {
        let mut table = EntryTable::default();
        assert_eq!(table.insert("a", 1), None);
        assert_eq!(table.insert("b", 2), None);
        assert_eq!(table.insert("a", 3), Some(1));

        assert_eq!(table.len(), 2);
        assert_eq!(table.get("a"), Some(&3));
        let order: Vec<_> = table.iter().copied().collect();
        assert_eq!(order, vec![3, 2]);
    }

    #[test]
    fn test_transaction_ordinals() {
        let mut ctx = ImportContext::new();
        assert_eq!(ctx.next_transaction_ordinal(), 0);
        assert_eq!(ctx.next_transaction_ordinal(), 1);
        assert!(ctx.declared_count("account").is_none());
    }
}
