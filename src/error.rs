//! Error taxonomy for the storage engine.

use std::io;

use thiserror::Error;

/// Errors produced by the storage engine.
#[derive(Debug, Error)]
pub enum Error {
    #[error("the key must not be empty")]
    KeyIsEmpty,

    #[error("key not found")]
    KeyNotFound,

    #[error("failed to update index")]
    IndexUpdateFailed,

    #[error("data file {file_id} not found")]
    DataFileNotFound { file_id: u32 },

    #[error("data directory is corrupted")]
    DataDirectoryCorrupted,

    #[error("invalid crc, log record may be corrupted")]
    InvalidCRC,

    #[error("exceeded the maximum batch size")]
    ExceedMaxBatchNum,

    #[error("a merge is already in progress")]
    MergeIsProgress,

    #[error("the database directory is in use by another process")]
    DatabaseIsUsing,

    #[error("reclaimable ratio has not reached the configured merge ratio")]
    MergeRatioUnreached,

    #[error("not enough free disk space to perform a merge")]
    NoEnoughSpaceForMerge,

    #[error("dir_path option must not be empty")]
    DirPathIsEmpty,

    #[error("data_file_size option must be greater than zero")]
    DataFileSizeNonPositive,

    #[error("data_file_merge_ratio must be between 0 and 1")]
    InvalidMergeRatio,

    #[error("write batch is not usable: persistent index has no seq-no file yet")]
    UnableToUseWriteBatch,

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
