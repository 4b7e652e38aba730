//! Atomic batch writer: buffers a set of Put/Delete operations and commits
//! them under a single sequence number, guarded by a terminator record.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Mutex;

use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::options::{IndexType, WriteBatchOptions};
use crate::record::{
    key_with_seq, LogRecord, LogRecordType, NON_TRANSACTION_SEQ_NO, TXN_FIN_KEY,
};

/// A buffered set of writes committed atomically under one sequence number.
pub struct WriteBatch<'a> {
    engine: &'a Engine,
    options: WriteBatchOptions,
    pending: Mutex<HashMap<Vec<u8>, LogRecord>>,
}

impl Engine {
    /// Creates a write batch over this engine.
    ///
    /// Fails fast with [`Error::UnableToUseWriteBatch`] when the index is the
    /// persistent B+ tree and no sequence-number file was found on open — the
    /// engine has no trustworthy next sequence number to hand out in that case.
    pub fn new_write_batch(&self, options: WriteBatchOptions) -> Result<WriteBatch<'_>> {
        if self.options.index_type == IndexType::PersistentBPlusTree
            && !self.seq_no_file_exists
            && !self.is_initial
        {
            return Err(Error::UnableToUseWriteBatch);
        }
        Ok(WriteBatch {
            engine: self,
            options,
            pending: Mutex::new(HashMap::new()),
        })
    }
}

impl WriteBatch<'_> {
    /// Buffers a Put. Last write for a given key within the batch wins.
    pub fn put(&self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Result<()> {
        let key = key.into();
        if key.is_empty() {
            return Err(Error::KeyIsEmpty);
        }
        let mut pending = self.pending.lock().expect("batch lock poisoned");
        pending.insert(
            key.clone(),
            LogRecord {
                key,
                value: value.into(),
                rec_type: LogRecordType::Normal,
            },
        );
        Ok(())
    }

    /// Buffers a Delete. If the key is absent from both the engine's index and
    /// the pending set there is nothing to delete; if it is only pending
    /// (never committed), the pending entry is simply dropped rather than
    /// staging a tombstone for a key that was never written to disk.
    pub fn delete(&self, key: impl Into<Vec<u8>>) -> Result<()> {
        let key = key.into();
        if key.is_empty() {
            return Err(Error::KeyIsEmpty);
        }
        let mut pending = self.pending.lock().expect("batch lock poisoned");
        if self.engine.index.get(&key).is_none() {
            pending.remove(&key);
            return Ok(());
        }
        pending.insert(
            key.clone(),
            LogRecord {
                key,
                value: Vec::new(),
                rec_type: LogRecordType::Deleted,
            },
        );
        Ok(())
    }

    /// Commits the pending set atomically: appended records are not indexed
    /// until the terminator record has been durably written, so a crash
    /// anywhere before that point leaves the index exactly as it was.
    pub fn commit(&self) -> Result<()> {
        let mut pending = self.pending.lock().expect("batch lock poisoned");
        if pending.is_empty() {
            return Ok(());
        }
        if pending.len() > self.options.max_batch_num {
            return Err(Error::ExceedMaxBatchNum);
        }

        let _commit_guard = self
            .engine
            .batch_commit_lock
            .lock()
            .expect("batch commit lock poisoned");

        let seq_no = self.engine.seq_no.fetch_add(1, Ordering::AcqRel) + 1;
        debug_assert_ne!(seq_no, NON_TRANSACTION_SEQ_NO);

        let mut applied = Vec::with_capacity(pending.len());
        for record in pending.values() {
            let on_disk = LogRecord {
                key: key_with_seq(&record.key, seq_no),
                value: record.value.clone(),
                rec_type: record.rec_type,
            };
            let pos = self.engine.append_log_record(&on_disk)?;
            applied.push((record.key.clone(), record.rec_type, pos));
        }

        let terminator = LogRecord {
            key: key_with_seq(TXN_FIN_KEY, seq_no),
            value: Vec::new(),
            rec_type: LogRecordType::TxnFinished,
        };
        self.engine.append_log_record(&terminator)?;

        if self.options.sync_writes {
            self.engine.sync()?;
        }

        for (key, rec_type, pos) in applied {
            match rec_type {
                LogRecordType::Deleted => {
                    let (old, _) = self.engine.index.delete(&key)?;
                    if let Some(old) = old {
                        self.engine
                            .reclaim_size
                            .fetch_add(u64::from(old.size), Ordering::AcqRel);
                    }
                    self.engine
                        .reclaim_size
                        .fetch_add(u64::from(pos.size), Ordering::AcqRel);
                }
                LogRecordType::Normal => {
                    if let Some(old) = self.engine.index.put(key, pos)? {
                        self.engine
                            .reclaim_size
                            .fetch_add(u64::from(old.size), Ordering::AcqRel);
                    }
                }
                LogRecordType::TxnFinished => unreachable!("pending writes are never terminators"),
            }
        }

        pending.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::Options;
    use tempfile::tempdir;

    fn test_options(dir: &std::path::Path) -> Options {
        Options {
            dir_path: dir.to_path_buf(),
            ..Options::default()
        }
    }

    #[test]
    fn commit_makes_writes_visible() {
        let dir = tempdir().unwrap();
        let engine = Engine::open(test_options(dir.path())).unwrap();
        let batch = engine.new_write_batch(WriteBatchOptions::default()).unwrap();
        batch.put(b"a".to_vec(), b"1".to_vec()).unwrap();
        batch.put(b"b".to_vec(), b"2".to_vec()).unwrap();
        assert!(matches!(engine.get(b"a"), Err(Error::KeyNotFound)));
        batch.commit().unwrap();
        assert_eq!(engine.get(b"a").unwrap(), b"1");
        assert_eq!(engine.get(b"b").unwrap(), b"2");
    }

    #[test]
    fn uncommitted_batch_is_invisible_across_reopen() {
        let dir = tempdir().unwrap();
        {
            let engine = Engine::open(test_options(dir.path())).unwrap();
            let batch = engine.new_write_batch(WriteBatchOptions::default()).unwrap();
            batch.put(b"a".to_vec(), b"1".to_vec()).unwrap();
            batch.put(b"b".to_vec(), b"2".to_vec()).unwrap();
            // Deliberately never committed.
            engine.close().unwrap();
        }
        let engine = Engine::open(test_options(dir.path())).unwrap();
        assert!(matches!(engine.get(b"a"), Err(Error::KeyNotFound)));
        assert!(matches!(engine.get(b"b"), Err(Error::KeyNotFound)));
    }

    #[test]
    fn delete_of_pending_only_key_drops_without_tombstone() {
        let dir = tempdir().unwrap();
        let engine = Engine::open(test_options(dir.path())).unwrap();
        let batch = engine.new_write_batch(WriteBatchOptions::default()).unwrap();
        batch.put(b"fresh".to_vec(), b"v".to_vec()).unwrap();
        batch.delete(b"fresh".to_vec()).unwrap();
        batch.commit().unwrap();
        assert!(matches!(engine.get(b"fresh"), Err(Error::KeyNotFound)));
    }

    #[test]
    fn exceeding_max_batch_num_fails() {
        let dir = tempdir().unwrap();
        let engine = Engine::open(test_options(dir.path())).unwrap();
        let opts = WriteBatchOptions {
            max_batch_num: 1,
            sync_writes: false,
        };
        let batch = engine.new_write_batch(opts).unwrap();
        batch.put(b"a".to_vec(), b"1".to_vec()).unwrap();
        batch.put(b"b".to_vec(), b"2".to_vec()).unwrap();
        assert!(matches!(batch.commit(), Err(Error::ExceedMaxBatchNum)));
    }

    #[test]
    fn empty_batch_commit_is_a_no_op() {
        let dir = tempdir().unwrap();
        let engine = Engine::open(test_options(dir.path())).unwrap();
        let batch = engine.new_write_batch(WriteBatchOptions::default()).unwrap();
        assert!(batch.commit().is_ok());
    }

    /// Scenario 4 / invariant 5: a crash between the last buffered record and the
    /// terminator leaves neither key visible after recovery. Reproduced here by
    /// appending the records a commit would have appended, stopping exactly where
    /// a truncation right before the terminator would — rather than writing the
    /// terminator, which is precisely what distinguishes a completed commit.
    #[test]
    fn crash_before_terminator_leaves_no_partial_effects() {
        let dir = tempdir().unwrap();
        {
            let engine = Engine::open(test_options(dir.path())).unwrap();
            let seq_no = engine.seq_no.fetch_add(1, Ordering::AcqRel) + 1;
            for (key, value) in [(b"a".to_vec(), b"1".to_vec()), (b"b".to_vec(), b"2".to_vec())] {
                let record = LogRecord {
                    key: key_with_seq(&key, seq_no),
                    value,
                    rec_type: LogRecordType::Normal,
                };
                engine.append_log_record(&record).unwrap();
            }
            engine.sync().unwrap();
            // The crash happens here: the terminator record is never written.
            engine.close().unwrap();
        }
        let engine = Engine::open(test_options(dir.path())).unwrap();
        assert!(matches!(engine.get(b"a"), Err(Error::KeyNotFound)));
        assert!(matches!(engine.get(b"b"), Err(Error::KeyNotFound)));
    }
}
