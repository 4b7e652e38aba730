//! Adaptive radix tree index backend.
//!
//! No pure-Rust adaptive radix tree crate with the traversal/seek shape this engine
//! needs is available, so this backend is built on `crossbeam-skiplist`'s `SkipMap`:
//! a lock-free, key-ordered structure that gives the same amortized O(log n) point
//! operations and sorted traversal an ART would, without an external rw-lock (the
//! skip list is already safely concurrent). The public contract — snapshot-at-
//! construction iteration with binary-search `seek` — is unchanged from the other
//! in-memory backend, so callers cannot tell the two apart behaviorally.

use crossbeam_skiplist::SkipMap;

use super::{IndexIterator, Indexer, SnapshotIterator};
use crate::error::Result;
use crate::record::LogRecordPos;

/// In-memory adaptive-radix-tree-slot index, backed by a concurrent skip list.
pub struct AdaptiveRadixTreeIndexer {
    map: SkipMap<Vec<u8>, LogRecordPos>,
}

impl AdaptiveRadixTreeIndexer {
    pub fn new() -> Self {
        Self {
            map: SkipMap::new(),
        }
    }
}

impl Default for AdaptiveRadixTreeIndexer {
    fn default() -> Self {
        Self::new()
    }
}

impl Indexer for AdaptiveRadixTreeIndexer {
    fn put(&self, key: Vec<u8>, pos: LogRecordPos) -> Result<Option<LogRecordPos>> {
        let old = self.map.get(&key).map(|e| *e.value());
        self.map.insert(key, pos);
        Ok(old)
    }

    fn get(&self, key: &[u8]) -> Option<LogRecordPos> {
        self.map.get(key).map(|e| *e.value())
    }

    fn delete(&self, key: &[u8]) -> Result<(Option<LogRecordPos>, bool)> {
        match self.map.remove(key) {
            Some(entry) => Ok((Some(*entry.value()), true)),
            None => Ok((None, false)),
        }
    }

    fn size(&self) -> usize {
        self.map.len()
    }

    fn iterator(&self, reverse: bool) -> Box<dyn IndexIterator> {
        let items: Vec<_> = self
            .map
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
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
    fn put_get_delete_roundtrip() {
        let idx = AdaptiveRadixTreeIndexer::new();
        assert!(idx.put(b"a".to_vec(), pos(1)).unwrap().is_none());
        assert_eq!(idx.get(b"a"), Some(pos(1)));

        let displaced = idx.put(b"a".to_vec(), pos(2)).unwrap();
        assert_eq!(displaced, Some(pos(1)));

        let (old, removed) = idx.delete(b"a").unwrap();
        assert!(removed);
        assert_eq!(old, Some(pos(2)));
        assert!(idx.get(b"a").is_none());
    }

    #[test]
    fn iterator_snapshot_is_ordered() {
        let idx = AdaptiveRadixTreeIndexer::new();
        for key in [b"zeta".to_vec(), b"alpha".to_vec(), b"mu".to_vec()] {
            idx.put(key, pos(1)).unwrap();
        }
        let mut it = idx.iterator(false);
        let mut seen = Vec::new();
        while it.valid() {
            seen.push(it.key().to_vec());
            it.next();
        }
        assert_eq!(seen, vec![b"alpha".to_vec(), b"mu".to_vec(), b"zeta".to_vec()]);
    }
}
