// 📚 Record Book - arena storage for engine records
//
// Records live in a Vec (iteration order = insertion order) with an
// id -> index map for lookups by id.

use std::collections::HashMap;

use crate::models::{DuplicateGroup, ReconciliationConflict, ReconciliationMatch};

/// Anything stored in a book has a stable string id
pub trait Record {
    fn record_id(&self) -> &str;
}

impl Record for ReconciliationMatch {
    fn record_id(&self) -> &str {
        &self.id
    }
}

impl Record for ReconciliationConflict {
    fn record_id(&self) -> &str {
        &self.id
    }
}

impl Record for DuplicateGroup {
    fn record_id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone)]
pub struct RecordBook<T> {
    records: Vec<T>,
    index: HashMap<String, usize>,
}

impl<T: Record> RecordBook<T> {
    pub fn new() -> Self {
        RecordBook {
            records: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Build from a list; a later record with a repeated id replaces the earlier one
    pub fn from_records(records: Vec<T>) -> Self {
        let mut book = RecordBook::new();
        for record in records {
            book.insert(record);
        }
        book
    }

    /// Insert or replace by id
    pub fn insert(&mut self, record: T) {
        match self.index.get(record.record_id()) {
            Some(&slot) => self.records[slot] = record,
            None => {
                self.index
                    .insert(record.record_id().to_string(), self.records.len());
                self.records.push(record);
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&T> {
        self.index.get(id).map(|&slot| &self.records[slot])
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut T> {
        match self.index.get(id) {
            Some(&slot) => self.records.get_mut(slot),
            None => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.records.iter()
    }

    pub fn records(&self) -> &[T] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Keep only records for which `keep` returns true, preserving order
    pub fn retain<F>(&mut self, keep: F)
    where
        F: FnMut(&T) -> bool,
    {
        self.records.retain(keep);
        self.reindex();
    }

    fn reindex(&mut self) {
        self.index = self
            .records
            .iter()
            .enumerate()
            .map(|(slot, record)| (record.record_id().to_string(), slot))
            .collect();
    }
}

impl<T: Record> Default for RecordBook<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Note {
        id: String,
        text: String,
    }

    impl Record for Note {
        fn record_id(&self) -> &str {
            &self.id
        }
    }

    fn note(id: &str, text: &str) -> Note {
        Note {
            id: id.to_string(),
            text: text.to_string(),
        }
    }

    #[test]
    fn test_insert_and_lookup() {
        let mut book = RecordBook::new();
        book.insert(note("a", "first"));
        book.insert(note("b", "second"));

        assert_eq!(book.len(), 2);
        assert_eq!(book.get("b").unwrap().text, "second");
        assert!(book.get("c").is_none());
    }

    #[test]
    fn test_insert_replaces_same_id() {
        let mut book = RecordBook::new();
        book.insert(note("a", "first"));
        book.insert(note("a", "updated"));

        assert_eq!(book.len(), 1);
        assert_eq!(book.get("a").unwrap().text, "updated");
    }

    #[test]
    fn test_retain_keeps_index_consistent() {
        let mut book = RecordBook::from_records(vec![
            note("a", "1"),
            note("b", "2"),
            note("c", "3"),
        ]);

        book.retain(|n| n.id != "a");

        assert_eq!(book.len(), 2);
        assert!(book.get("a").is_none());
        assert_eq!(book.get("c").unwrap().text, "3");
        assert_eq!(book.records()[0].id, "b");

        book.get_mut("c").unwrap().text = "changed".to_string();
        assert_eq!(book.get("c").unwrap().text, "changed");
    }
}
