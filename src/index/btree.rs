//! Balanced ordered tree index backend.
//!
//! Backed by `std::collections::BTreeMap`, which is itself a B-tree keeping keys in
//! lexicographic order; a single reader-writer lock provides thread safety, matching
//! the capability set the other two backends expose.

use std::collections::BTreeMap;
use std::sync::RwLock;

use super::{IndexIterator, Indexer, SnapshotIterator};
use crate::error::Result;
use crate::record::LogRecordPos;

/// In-memory balanced-tree index.
pub struct BalancedTreeIndexer {
    tree: RwLock<BTreeMap<Vec<u8>, LogRecordPos>>,
}

impl BalancedTreeIndexer {
    pub fn new() -> Self {
        Self {
            tree: RwLock::new(BTreeMap::new()),
        }
    }
}

impl Default for BalancedTreeIndexer {
    fn default() -> Self {
        Self::new()
    }
}

impl Indexer for BalancedTreeIndexer {
    fn put(&self, key: Vec<u8>, pos: LogRecordPos) -> Result<Option<LogRecordPos>> {
        let mut tree = self.tree.write().expect("index lock poisoned");
        Ok(tree.insert(key, pos))
    }

    fn get(&self, key: &[u8]) -> Option<LogRecordPos> {
        let tree = self.tree.read().expect("index lock poisoned");
        tree.get(key).copied()
    }

    fn delete(&self, key: &[u8]) -> Result<(Option<LogRecordPos>, bool)> {
        let mut tree = self.tree.write().expect("index lock poisoned");
        let old = tree.remove(key);
        let removed = old.is_some();
        Ok((old, removed))
    }

    fn size(&self) -> usize {
        let tree = self.tree.read().expect("index lock poisoned");
        tree.len()
    }

    fn iterator(&self, reverse: bool) -> Box<dyn IndexIterator> {
        let tree = self.tree.read().expect("index lock poisoned");
        let items: Vec<_> = tree.iter().map(|(k, v)| (k.clone(), *v)).collect();
        Box::new(SnapshotIterator::new(items, reverse))
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(offset: u64) -> LogRecordPos {
        LogRecordPos {
            file_id: 0,
            offset,
            size: 10,
        }
    }

    #[test]
    fn put_then_get() {
        let idx = BalancedTreeIndexer::new();
        assert!(idx.put(b"a".to_vec(), pos(1)).unwrap().is_none());
        assert_eq!(idx.get(b"a"), Some(pos(1)));
    }

    #[test]
    fn put_returns_displaced_position() {
        let idx = BalancedTreeIndexer::new();
        idx.put(b"a".to_vec(), pos(1)).unwrap();
        let displaced = idx.put(b"a".to_vec(), pos(2)).unwrap();
        assert_eq!(displaced, Some(pos(1)));
        assert_eq!(idx.get(b"a"), Some(pos(2)));
    }

    #[test]
    fn delete_reports_presence() {
        let idx = BalancedTreeIndexer::new();
        idx.put(b"a".to_vec(), pos(1)).unwrap();
        let (old, removed) = idx.delete(b"a").unwrap();
        assert!(removed);
        assert_eq!(old, Some(pos(1)));
        assert_eq!(idx.get(b"a"), None);

        let (old, removed) = idx.delete(b"missing").unwrap();
        assert!(!removed);
        assert!(old.is_none());
    }

    #[test]
    fn iterator_yields_lexicographic_order() {
        let idx = BalancedTreeIndexer::new();
        for key in [b"banana".to_vec(), b"apple".to_vec(), b"cherry".to_vec()] {
            idx.put(key, pos(1)).unwrap();
        }
        let mut it = idx.iterator(false);
        let mut seen = Vec::new();
        while it.valid() {
            seen.push(it.key().to_vec());
            it.next();
        }
        assert_eq!(seen, vec![b"apple".to_vec(), b"banana".to_vec(), b"cherry".to_vec()]);
    }

    #[test]
    fn size_tracks_entries() {
        let idx = BalancedTreeIndexer::new();
        assert_eq!(idx.size(), 0);
        idx.put(b"a".to_vec(), pos(1)).unwrap();
        idx.put(b"b".to_vec(), pos(2)).unwrap();
        assert_eq!(idx.size(), 2);
    }
}
