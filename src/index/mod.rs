//! The in-memory/durable key → position index, and its three interchangeable backends.
//!
//! All three satisfy the same [`Indexer`] trait; the engine only ever talks to a
//! `Box<dyn Indexer>` and never knows which backend it is holding.

mod art;
mod bptree;
mod btree;

pub use art::AdaptiveRadixTreeIndexer;
pub use bptree::PersistentBPlusTreeIndexer;
pub use btree::BalancedTreeIndexer;

use std::path::Path;

use crate::error::Result;
use crate::options::IndexType;
use crate::record::LogRecordPos;

/// Ordered map from a user key to the location of its most recent live record.
pub trait Indexer: Send + Sync {
    /// Inserts or replaces the position for `key`, returning the position it displaced.
    fn put(&self, key: Vec<u8>, pos: LogRecordPos) -> Result<Option<LogRecordPos>>;
    /// Looks up the current position of `key`.
    fn get(&self, key: &[u8]) -> Option<LogRecordPos>;
    /// Removes `key`, returning the position it held and whether it was present.
    fn delete(&self, key: &[u8]) -> Result<(Option<LogRecordPos>, bool)>;
    /// Number of keys currently indexed.
    fn size(&self) -> usize;
    /// Creates an iterator over this index snapshot, ascending unless `reverse`.
    fn iterator(&self, reverse: bool) -> Box<dyn IndexIterator>;
    /// Releases any resources (durable backends flush state here).
    fn close(&self) -> Result<()>;
}

/// An ordered cursor over an index snapshot.
///
/// Positioned at the first (or last, if constructed in reverse) entry. `seek`
/// performs binary-search-style positioning: the first key `>= target` when
/// iterating forward, or the last key `<= target` when iterating in reverse.
pub trait IndexIterator {
    fn rewind(&mut self);
    fn seek(&mut self, key: &[u8]);
    fn next(&mut self);
    fn valid(&self) -> bool;
    fn key(&self) -> &[u8];
    fn value(&self) -> LogRecordPos;
    /// Releases any resources the iterator holds. A no-op for snapshot-backed
    /// iterators, which hold nothing beyond the `Vec` they already own; a
    /// cursor-backed iterator would override this to drop its transaction.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Constructs the index backend selected by `index_type`.
pub fn new_indexer(index_type: IndexType, dir_path: &Path) -> Result<Box<dyn Indexer>> {
    Ok(match index_type {
        IndexType::BalancedTree => Box::new(BalancedTreeIndexer::new()),
        IndexType::AdaptiveRadixTree => Box::new(AdaptiveRadixTreeIndexer::new()),
        IndexType::PersistentBPlusTree => Box::new(PersistentBPlusTreeIndexer::open(dir_path)?),
    })
}

/// Snapshot-and-binary-search iterator shared by the two in-memory backends.
///
/// Both the balanced tree and the adaptive radix tree only expose visitor-style
/// traversal, so `iterator()` takes a consistent snapshot into a sorted `Vec` once,
/// up front, and `seek` binary-searches that array rather than re-walking the tree.
pub(crate) struct SnapshotIterator {
    items: Vec<(Vec<u8>, LogRecordPos)>,
    cursor: usize,
    reverse: bool,
}

impl SnapshotIterator {
    /// `items` must already be sorted ascending by key; `reverse` flips traversal
    /// direction without re-sorting.
    pub(crate) fn new(mut items: Vec<(Vec<u8>, LogRecordPos)>, reverse: bool) -> Self {
        if reverse {
            items.reverse();
        }
        Self {
            items,
            cursor: 0,
            reverse,
        }
    }
}

impl IndexIterator for SnapshotIterator {
    fn rewind(&mut self) {
        self.cursor = 0;
    }

    fn seek(&mut self, key: &[u8]) {
        // `items` is sorted ascending (or descending, when reverse) by construction;
        // partition_point finds the first position of "the predicate is false", which
        // is exactly the boundary `seek`'s contract asks for in either direction.
        self.cursor = if self.reverse {
            self.items.partition_point(|(k, _)| k.as_slice() > key)
        } else {
            self.items.partition_point(|(k, _)| k.as_slice() < key)
        };
    }

    fn next(&mut self) {
        self.cursor += 1;
    }

    fn valid(&self) -> bool {
        self.cursor < self.items.len()
    }

    fn key(&self) -> &[u8] {
        &self.items[self.cursor].0
    }

    fn value(&self) -> LogRecordPos {
        self.items[self.cursor].1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(offset: u64) -> LogRecordPos {
        LogRecordPos {
            file_id: 0,
            offset,
            size: 1,
        }
    }

    #[test]
    fn snapshot_iterator_forward_order_and_seek() {
        let items = vec![
            (b"a".to_vec(), pos(1)),
            (b"b".to_vec(), pos(2)),
            (b"d".to_vec(), pos(3)),
        ];
        let mut it = SnapshotIterator::new(items, false);
        assert_eq!(it.key(), b"a");
        it.seek(b"c");
        assert_eq!(it.key(), b"d");
        it.next();
        assert!(!it.valid());
    }

    #[test]
    fn snapshot_iterator_reverse_order_and_seek() {
        let items = vec![
            (b"a".to_vec(), pos(1)),
            (b"b".to_vec(), pos(2)),
            (b"d".to_vec(), pos(3)),
        ];
        let mut it = SnapshotIterator::new(items, true);
        assert_eq!(it.key(), b"d");
        it.seek(b"c");
        assert_eq!(it.key(), b"b");
    }
}
