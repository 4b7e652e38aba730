//! The engine: owns the active file, the older files, the index, and the
//! write-path coordination that ties them together.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};

use fs2::FileExt;

use crate::data_file::{DataFile, DATA_FILE_SUFFIX, HINT_FILE_NAME, MERGE_FINISHED_FILE_NAME};
use crate::error::{Error, Result};
use crate::index::{self, Indexer};
use crate::options::{IndexType, Options};
use crate::record::{
    key_with_seq, parse_log_record_key, LogRecord, LogRecordPos, LogRecordType, ReadLogRecord,
    NON_TRANSACTION_SEQ_NO,
};

pub(crate) const FILE_LOCK_NAME: &str = "flock";
pub(crate) const SEQ_NO_KEY: &[u8] = b"seq-no";
pub(crate) const MERGE_FINISHED_KEY: &[u8] = b"merge-finished";
const INITIAL_FILE_ID: u32 = 0;

/// Snapshot of engine-wide counters, returned by [`Engine::stat`].
#[derive(Debug, Clone, Copy)]
pub struct Stat {
    pub num_keys: usize,
    pub num_files: usize,
    pub reclaimable_bytes: u64,
    pub disk_size: u64,
}

/// The mutable, lock-protected half of engine state: the file set.
pub(crate) struct EngineState {
    pub(crate) active_file: DataFile,
    pub(crate) older_files: HashMap<u32, DataFile>,
}

/// An open storage engine instance, rooted at a single data directory.
pub struct Engine {
    pub(crate) options: Options,
    pub(crate) state: RwLock<EngineState>,
    pub(crate) index: Box<dyn Indexer>,
    pub(crate) batch_commit_lock: Mutex<()>,
    pub(crate) seq_no: AtomicU64,
    pub(crate) reclaim_size: AtomicU64,
    pub(crate) is_merging: AtomicBool,
    pub(crate) bytes_since_sync: AtomicU64,
    pub(crate) seq_no_file_exists: bool,
    pub(crate) is_initial: bool,
    lock_file: std::fs::File,
}

impl Engine {
    /// Opens (creating if absent) the engine rooted at `options.dir_path`.
    pub fn open(options: Options) -> Result<Self> {
        options.validate()?;

        let is_initial = !options.dir_path.is_dir();
        if is_initial {
            fs::create_dir_all(&options.dir_path)?;
        }
        let lock_file = acquire_dir_lock(&options.dir_path)?;

        crate::merge::load_merge_files(&options.dir_path)?;

        let mut file_ids = load_data_file_ids(&options.dir_path)?;
        file_ids.sort_unstable();

        let index = index::new_indexer(options.index_type, &options.dir_path)?;

        let mut older_files = HashMap::new();
        let active_file = if file_ids.is_empty() {
            file_ids.push(INITIAL_FILE_ID);
            DataFile::open(&options.dir_path, INITIAL_FILE_ID)?
        } else {
            let active_id = *file_ids.last().expect("checked non-empty");
            for &id in &file_ids[..file_ids.len() - 1] {
                let file = if options.mmap_at_startup {
                    DataFile::open_mmap(&options.dir_path, id)?
                } else {
                    DataFile::open(&options.dir_path, id)?
                };
                older_files.insert(id, file);
            }
            DataFile::open(&options.dir_path, active_id)?
        };

        let mut engine = Self {
            options: options.clone(),
            state: RwLock::new(EngineState {
                active_file,
                older_files,
            }),
            index,
            batch_commit_lock: Mutex::new(()),
            seq_no: AtomicU64::new(NON_TRANSACTION_SEQ_NO),
            reclaim_size: AtomicU64::new(0),
            is_merging: AtomicBool::new(false),
            bytes_since_sync: AtomicU64::new(0),
            seq_no_file_exists: false,
            is_initial,
            lock_file,
        };

        if options.index_type == IndexType::PersistentBPlusTree {
            engine.seq_no_file_exists = engine.load_seq_no_file()?;
            engine.recover_active_write_off(&file_ids)?;
        } else {
            let non_merge_file_id = engine.load_merge_finished_marker()?;
            if engine.options.dir_path.join(HINT_FILE_NAME).exists() {
                engine.load_index_from_hint_file()?;
            }
            engine.load_index_from_data_files(&file_ids, non_merge_file_id)?;
        }

        tracing::info!(
            dir_path = %engine.options.dir_path.display(),
            num_files = file_ids.len(),
            is_initial,
            "opened engine"
        );
        Ok(engine)
    }

    /// Inserts or overwrites `key` with `value`. `key` must be non-empty.
    pub fn put(&self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Result<()> {
        let key = key.into();
        if key.is_empty() {
            return Err(Error::KeyIsEmpty);
        }
        let record = LogRecord {
            key: key_with_seq(&key, NON_TRANSACTION_SEQ_NO),
            value: value.into(),
            rec_type: LogRecordType::Normal,
        };
        let pos = self.append_log_record(&record)?;
        if let Some(old) = self.index.put(key, pos)? {
            self.reclaim_size
                .fetch_add(u64::from(old.size), Ordering::AcqRel);
        }
        Ok(())
    }

    /// Looks up `key`, returning `KeyNotFound` if it is absent or tombstoned.
    pub fn get(&self, key: impl AsRef<[u8]>) -> Result<Vec<u8>> {
        let key = key.as_ref();
        if key.is_empty() {
            return Err(Error::KeyIsEmpty);
        }
        let pos = self.index.get(key).ok_or(Error::KeyNotFound)?;
        self.get_value_by_position(&pos)
    }

    /// Removes `key`. A no-op (not an error) if the key is already absent.
    pub fn delete(&self, key: impl AsRef<[u8]>) -> Result<()> {
        let key = key.as_ref();
        if key.is_empty() {
            return Err(Error::KeyIsEmpty);
        }
        if self.index.get(key).is_none() {
            return Ok(());
        }
        let record = LogRecord {
            key: key_with_seq(key, NON_TRANSACTION_SEQ_NO),
            value: Vec::new(),
            rec_type: LogRecordType::Deleted,
        };
        let pos = self.append_log_record(&record)?;
        let (old, _) = self.index.delete(key)?;
        if let Some(old) = old {
            self.reclaim_size
                .fetch_add(u64::from(old.size), Ordering::AcqRel);
        }
        self.reclaim_size
            .fetch_add(u64::from(pos.size), Ordering::AcqRel);
        Ok(())
    }

    /// Returns every key currently live, in index order.
    pub fn list_keys(&self) -> Vec<Vec<u8>> {
        let mut it = self.index.iterator(false);
        let mut keys = Vec::with_capacity(self.index.size());
        while it.valid() {
            keys.push(it.key().to_vec());
            it.next();
        }
        keys
    }

    /// Visits every live `(key, value)` pair in index order until `f` returns `false`.
    pub fn fold(&self, mut f: impl FnMut(&[u8], &[u8]) -> bool) -> Result<()> {
        let mut it = self.index.iterator(false);
        while it.valid() {
            let value = self.get_value_by_position(&it.value())?;
            if !f(it.key(), &value) {
                break;
            }
            it.next();
        }
        Ok(())
    }

    /// Fsyncs the active data file.
    pub fn sync(&self) -> Result<()> {
        let state = self.state.read().expect("engine lock poisoned");
        state.active_file.sync()
    }

    /// Reports engine-wide counters.
    pub fn stat(&self) -> Result<Stat> {
        let state = self.state.read().expect("engine lock poisoned");
        let mut disk_size = 0u64;
        for entry in fs::read_dir(&self.options.dir_path)? {
            disk_size += entry?.metadata()?.len();
        }
        Ok(Stat {
            num_keys: self.index.size(),
            num_files: state.older_files.len() + 1,
            reclaimable_bytes: self.reclaim_size.load(Ordering::Acquire),
            disk_size,
        })
    }

    /// Flushes pending writes, persists the sequence number file (B+ tree index
    /// only), closes the index, and releases the directory lock.
    pub fn close(&self) -> Result<()> {
        if !self.options.dir_path.is_dir() {
            return Ok(());
        }
        self.sync()?;
        if self.options.index_type == IndexType::PersistentBPlusTree {
            self.persist_seq_no_file()?;
        }
        self.index.close()?;
        FileExt::unlock(&self.lock_file)?;
        Ok(())
    }

    pub(crate) fn get_value_by_position(&self, pos: &LogRecordPos) -> Result<Vec<u8>> {
        let state = self.state.read().expect("engine lock poisoned");
        let read = if pos.file_id == state.active_file.file_id() {
            state.active_file.read_log_record(pos.offset)?
        } else {
            let file = state
                .older_files
                .get(&pos.file_id)
                .ok_or(Error::DataFileNotFound { file_id: pos.file_id })?;
            file.read_log_record(pos.offset)?
        };
        let Some(read) = read else {
            return Err(Error::DataDirectoryCorrupted);
        };
        if read.record.rec_type == LogRecordType::Deleted {
            // Defensive: tombstones are never indexed, so this should be unreachable.
            return Err(Error::KeyNotFound);
        }
        Ok(read.record.value)
    }

    /// Encodes and appends `record` to the active file, rotating first if needed.
    pub(crate) fn append_log_record(&self, record: &LogRecord) -> Result<LogRecordPos> {
        let dir_path = self.options.dir_path.clone();
        let encoded = record.encode();
        let encoded_len = encoded.len() as u64;

        let mut state = self.state.write().expect("engine lock poisoned");

        if state.active_file.write_off() + encoded_len > self.options.data_file_size {
            state.active_file.sync()?;
            let old_file_id = state.active_file.file_id();
            let new_active = DataFile::open(&dir_path, old_file_id + 1)?;
            let old_active = std::mem::replace(&mut state.active_file, new_active);
            tracing::info!(
                dir_path = %dir_path.display(),
                old_file_id,
                new_file_id = old_file_id + 1,
                "rotated active data file"
            );
            state.older_files.insert(old_file_id, old_active);
        }

        let write_off = state.active_file.write_off();
        state.active_file.write(&encoded)?;

        let mut should_sync = self.options.sync_writes;
        if !should_sync && self.options.bytes_per_sync > 0 {
            let total = self.bytes_since_sync.fetch_add(encoded_len, Ordering::AcqRel) + encoded_len;
            if total >= self.options.bytes_per_sync {
                should_sync = true;
            }
        }
        if should_sync {
            state.active_file.sync()?;
            self.bytes_since_sync.store(0, Ordering::Release);
        }

        Ok(LogRecordPos {
            file_id: state.active_file.file_id(),
            offset: write_off,
            size: encoded_len as u32,
        })
    }

    fn load_index_from_hint_file(&self) -> Result<()> {
        let hint_file = DataFile::open_hint_file(&self.options.dir_path)?;
        let mut offset = 0u64;
        while let Some(read) = hint_file.read_log_record(offset)? {
            let pos = LogRecordPos::decode(&read.record.value)?;
            self.index.put(read.record.key.clone(), pos)?;
            offset += read.size as u64;
        }
        Ok(())
    }

    fn load_merge_finished_marker(&self) -> Result<u32> {
        let path = self.options.dir_path.join(MERGE_FINISHED_FILE_NAME);
        if !path.exists() {
            return Ok(0);
        }
        let marker_file = DataFile::open_merge_finished_file(&self.options.dir_path)?;
        let Some(read) = marker_file.read_log_record(0)? else {
            return Ok(0);
        };
        debug_assert_eq!(read.record.key, MERGE_FINISHED_KEY);
        let text = String::from_utf8(read.record.value).map_err(|_| Error::DataDirectoryCorrupted)?;
        text.parse().map_err(|_| Error::DataDirectoryCorrupted)
    }

    fn load_seq_no_file(&self) -> Result<bool> {
        let path = self.options.dir_path.join(crate::data_file::SEQ_NO_FILE_NAME);
        if !path.exists() {
            return Ok(false);
        }
        let file = DataFile::open_seq_no_file(&self.options.dir_path)?;
        let Some(read) = file.read_log_record(0)? else {
            return Ok(false);
        };
        debug_assert_eq!(read.record.key, SEQ_NO_KEY);
        let text = String::from_utf8(read.record.value).map_err(|_| Error::DataDirectoryCorrupted)?;
        let seq_no: u64 = text.parse().map_err(|_| Error::DataDirectoryCorrupted)?;
        self.seq_no.store(seq_no, Ordering::Release);
        Ok(true)
    }

    fn persist_seq_no_file(&self) -> Result<()> {
        let file = DataFile::open_seq_no_file(&self.options.dir_path)?;
        let record = LogRecord {
            key: SEQ_NO_KEY.to_vec(),
            value: self.seq_no.load(Ordering::Acquire).to_string().into_bytes(),
            rec_type: LogRecordType::Normal,
        };
        file.write(&record.encode())?;
        file.sync()
    }

    /// With a durable index, the on-disk files are not replayed to rebuild the
    /// index, but the active file's write cursor still needs to land past any
    /// trailing partial record left by a crash.
    fn recover_active_write_off(&mut self, file_ids: &[u32]) -> Result<()> {
        if file_ids.is_empty() {
            return Ok(());
        }
        let state = self.state.get_mut().expect("engine lock poisoned");
        let mut offset = 0u64;
        loop {
            match state.active_file.read_log_record(offset) {
                Ok(Some(read)) => offset += read.size as u64,
                Ok(None) | Err(_) => break,
            }
        }
        state.active_file.set_write_off(offset);
        Ok(())
    }

    fn load_index_from_data_files(&mut self, file_ids: &[u32], non_merge_file_id: u32) -> Result<()> {
        if file_ids.is_empty() {
            return Ok(());
        }
        let mut pending: HashMap<u64, Vec<(LogRecord, LogRecordPos)>> = HashMap::new();
        let mut max_seq_no = NON_TRANSACTION_SEQ_NO;
        let last_id = *file_ids.last().expect("checked non-empty");

        for &file_id in file_ids {
            if file_id < non_merge_file_id {
                continue;
            }
            let mut offset = 0u64;
            loop {
                let read_result = {
                    let state = self.state.read().expect("engine lock poisoned");
                    if file_id == state.active_file.file_id() {
                        state.active_file.read_log_record(offset)
                    } else if let Some(file) = state.older_files.get(&file_id) {
                        file.read_log_record(offset)
                    } else {
                        Ok(None)
                    }
                };
                let read: ReadLogRecord = match read_result {
                    Ok(Some(read)) => read,
                    Ok(None) => break,
                    Err(_) => break,
                };

                let pos = LogRecordPos {
                    file_id,
                    offset,
                    size: read.size as u32,
                };
                let (real_key, seq_no) = parse_log_record_key(&read.record.key)?;
                max_seq_no = max_seq_no.max(seq_no);

                if seq_no == NON_TRANSACTION_SEQ_NO {
                    self.apply_recovered_record(real_key, read.record.rec_type, pos);
                } else if read.record.rec_type == LogRecordType::TxnFinished {
                    if let Some(batch) = pending.remove(&seq_no) {
                        for (record, pos) in batch {
                            let (key, _) = parse_log_record_key(&record.key)?;
                            self.apply_recovered_record(key, record.rec_type, pos);
                        }
                    }
                } else {
                    pending.entry(seq_no).or_default().push((
                        LogRecord {
                            key: real_key,
                            value: read.record.value,
                            rec_type: read.record.rec_type,
                        },
                        pos,
                    ));
                }

                offset += read.size as u64;
            }

            if file_id == last_id {
                let state = self.state.read().expect("engine lock poisoned");
                state.active_file.set_write_off(offset);
            }
        }

        self.seq_no.store(max_seq_no, Ordering::Release);
        Ok(())
    }

    fn apply_recovered_record(&self, key: Vec<u8>, rec_type: LogRecordType, pos: LogRecordPos) {
        match rec_type {
            LogRecordType::Deleted => {
                if let Ok((Some(old), _)) = self.index.delete(&key) {
                    self.reclaim_size
                        .fetch_add(u64::from(old.size), Ordering::AcqRel);
                }
                self.reclaim_size
                    .fetch_add(u64::from(pos.size), Ordering::AcqRel);
            }
            LogRecordType::Normal => {
                if let Ok(Some(old)) = self.index.put(key, pos) {
                    self.reclaim_size
                        .fetch_add(u64::from(old.size), Ordering::AcqRel);
                }
            }
            LogRecordType::TxnFinished => {}
        }
    }
}

fn acquire_dir_lock(dir_path: &Path) -> Result<std::fs::File> {
    let lock_path = dir_path.join(FILE_LOCK_NAME);
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .open(lock_path)?;
    file.try_lock_exclusive().map_err(|_| Error::DatabaseIsUsing)?;
    Ok(file)
}

/// Enumerates the numeric ids of every `*.data` file directly under `dir_path`.
pub(crate) fn load_data_file_ids(dir_path: &Path) -> Result<Vec<u32>> {
    let mut ids = Vec::new();
    for entry in fs::read_dir(dir_path)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if let Some(stem) = name.strip_suffix(DATA_FILE_SUFFIX) {
            if let Ok(id) = stem.parse::<u32>() {
                ids.push(id);
            }
        }
    }
    ids.sort_unstable();
    Ok(ids)
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::error!(error = %e, "failed to cleanly close engine on drop");
        }
    }
}
