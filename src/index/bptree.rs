//! Persistent B+ tree index backend.
//!
//! Backed by `jammdb`, the Rust analog of the `bbolt`/`bolt` family of embedded B+
//! tree stores this project's original Go counterpart uses for the same role: a
//! durable, internally-locked index that survives process restarts without needing
//! a hint-file replay, at the cost of every `put`/`delete` paying for its own disk
//! transaction.
//!
//! Unlike `bbolt`'s cursor, `jammdb`'s cursor borrows from the transaction that
//! created it, and this backend's [`IndexIterator`] must outlive the call that
//! built it. Rather than store a self-referential transaction/cursor pair, a
//! snapshot is taken (exactly as the two in-memory backends do) from one
//! read-only transaction which is then dropped.

use std::io;
use std::path::Path;

use jammdb::{Data, DB};

use super::{IndexIterator, Indexer, SnapshotIterator};
use crate::error::{Error, Result};
use crate::record::LogRecordPos;

const BPTREE_INDEX_FILE_NAME: &str = "bptree-index";
const INDEX_BUCKET_NAME: &[u8] = b"bitcask-index";

/// Durable B+ tree index, internally concurrent — callers need no external lock.
pub struct PersistentBPlusTreeIndexer {
    tree: DB,
}

impl PersistentBPlusTreeIndexer {
    /// Opens (creating if absent) the B+ tree file under `dir_path`.
    pub fn open(dir_path: &Path) -> Result<Self> {
        let tree =
            DB::open(dir_path.join(BPTREE_INDEX_FILE_NAME)).map_err(|e| Error::Io(io::Error::other(e)))?;
        {
            let tx = tree.tx(true).map_err(|e| Error::Io(io::Error::other(e)))?;
            tx.get_or_create_bucket(INDEX_BUCKET_NAME)
                .map_err(|_| Error::IndexUpdateFailed)?;
            tx.commit().map_err(|_| Error::IndexUpdateFailed)?;
        }
        Ok(Self { tree })
    }
}

impl Indexer for PersistentBPlusTreeIndexer {
    fn put(&self, key: Vec<u8>, pos: LogRecordPos) -> Result<Option<LogRecordPos>> {
        let tx = self.tree.tx(true).map_err(|_| Error::IndexUpdateFailed)?;
        let bucket = tx
            .get_or_create_bucket(INDEX_BUCKET_NAME)
            .map_err(|_| Error::IndexUpdateFailed)?;
        let old = bucket
            .get(key.as_slice())
            .map(|data| LogRecordPos::decode(data.kv().value()))
            .transpose()?;
        bucket
            .put(key, pos.encode())
            .map_err(|_| Error::IndexUpdateFailed)?;
        tx.commit().map_err(|_| Error::IndexUpdateFailed)?;
        Ok(old)
    }

    fn get(&self, key: &[u8]) -> Option<LogRecordPos> {
        let tx = self.tree.tx(false).ok()?;
        let bucket = tx.get_bucket(INDEX_BUCKET_NAME).ok()?;
        let data = bucket.get(key)?;
        LogRecordPos::decode(data.kv().value()).ok()
    }

    fn delete(&self, key: &[u8]) -> Result<(Option<LogRecordPos>, bool)> {
        let tx = self.tree.tx(true).map_err(|_| Error::IndexUpdateFailed)?;
        let bucket = tx
            .get_or_create_bucket(INDEX_BUCKET_NAME)
            .map_err(|_| Error::IndexUpdateFailed)?;
        if bucket.get(key).is_none() {
            tx.commit().map_err(|_| Error::IndexUpdateFailed)?;
            return Ok((None, false));
        }
        let removed = bucket.delete(key).map_err(|_| Error::IndexUpdateFailed)?;
        let old = LogRecordPos::decode(removed.kv().value())?;
        tx.commit().map_err(|_| Error::IndexUpdateFailed)?;
        Ok((Some(old), true))
    }

    fn size(&self) -> usize {
        let Ok(tx) = self.tree.tx(false) else {
            return 0;
        };
        let Ok(bucket) = tx.get_bucket(INDEX_BUCKET_NAME) else {
            return 0;
        };
        bucket.cursor().count()
    }

    fn iterator(&self, reverse: bool) -> Box<dyn IndexIterator> {
        let items = (|| -> Option<Vec<(Vec<u8>, LogRecordPos)>> {
            let tx = self.tree.tx(false).ok()?;
            let bucket = tx.get_bucket(INDEX_BUCKET_NAME).ok()?;
            let mut items = Vec::with_capacity(bucket.cursor().count());
            for data in bucket.cursor() {
                if let Data::KeyValue(kv) = data {
                    let pos = LogRecordPos::decode(kv.value()).ok()?;
                    items.push((kv.key().to_vec(), pos));
                }
            }
            Some(items)
        })()
        .unwrap_or_default();
        Box::new(SnapshotIterator::new(items, reverse))
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn pos(offset: u64) -> LogRecordPos {
        LogRecordPos {
            file_id: 0,
            offset,
            size: 10,
        }
    }

    #[test]
    fn put_get_delete_roundtrip() {
        let dir = tempdir().unwrap();
        let idx = PersistentBPlusTreeIndexer::open(dir.path()).unwrap();

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
    fn survives_reopen() {
        let dir = tempdir().unwrap();
        {
            let idx = PersistentBPlusTreeIndexer::open(dir.path()).unwrap();
            idx.put(b"durable".to_vec(), pos(7)).unwrap();
        }
        let idx = PersistentBPlusTreeIndexer::open(dir.path()).unwrap();
        assert_eq!(idx.get(b"durable"), Some(pos(7)));
    }

    #[test]
    fn iterator_snapshot_is_ordered() {
        let dir = tempdir().unwrap();
        let idx = PersistentBPlusTreeIndexer::open(dir.path()).unwrap();
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
