//! Engine configuration.

use std::path::PathBuf;

use crate::error::{Error, Result};

/// Selects which index backend an [`crate::Engine`] uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndexType {
    /// In-memory balanced ordered tree (`std::collections::BTreeMap`), rw-lock protected.
    #[default]
    BalancedTree,
    /// In-memory adaptive radix tree, rw-lock protected.
    AdaptiveRadixTree,
    /// Durable, internally-concurrent B+ tree; requires a persisted sequence-number file.
    PersistentBPlusTree,
}

/// Configuration for opening an [`crate::Engine`].
#[derive(Debug, Clone)]
pub struct Options {
    /// Directory the engine stores its data files in. Required.
    pub dir_path: PathBuf,
    /// Rotation threshold for the active data file, in bytes.
    pub data_file_size: u64,
    /// Fsync the active file after every single append.
    pub sync_writes: bool,
    /// Fsync the active file once this many bytes have accumulated since the last sync.
    /// Zero disables background sync (the default).
    pub bytes_per_sync: u64,
    /// Which index backend to use.
    pub index_type: IndexType,
    /// Use memory-mapped I/O for older (immutable) files during startup recovery.
    pub mmap_at_startup: bool,
    /// Minimum `reclaim_size / disk_size` ratio required before `Merge` will run.
    pub data_file_merge_ratio: f64,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            dir_path: std::env::temp_dir().join("shale"),
            data_file_size: 256 * 1024 * 1024,
            sync_writes: false,
            bytes_per_sync: 0,
            index_type: IndexType::BalancedTree,
            mmap_at_startup: false,
            data_file_merge_ratio: 0.5,
        }
    }
}

impl Options {
    /// Validates option values, per the Engine-opening preconditions.
    pub fn validate(&self) -> Result<()> {
        if self.dir_path.as_os_str().is_empty() {
            return Err(Error::DirPathIsEmpty);
        }
        if self.data_file_size == 0 {
            return Err(Error::DataFileSizeNonPositive);
        }
        if !(0.0..=1.0).contains(&self.data_file_merge_ratio) {
            return Err(Error::InvalidMergeRatio);
        }
        Ok(())
    }
}

/// Options controlling a single [`crate::Iterator`].
#[derive(Debug, Clone, Default)]
pub struct IteratorOptions {
    /// Only yield keys starting with this prefix. Empty means no filter.
    pub prefix: Vec<u8>,
    /// Iterate in reverse (descending key) order.
    pub reverse: bool,
}

/// Options controlling a single [`crate::WriteBatch`].
#[derive(Debug, Clone)]
pub struct WriteBatchOptions {
    /// Maximum number of buffered writes a batch may hold before `Commit` fails.
    pub max_batch_num: usize,
    /// Fsync the active file as part of `Commit`.
    pub sync_writes: bool,
}

impl Default for WriteBatchOptions {
    fn default() -> Self {
        Self {
            max_batch_num: 10_000,
            sync_writes: true,
        }
    }
}
