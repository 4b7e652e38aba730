//! A single append-only log file, plus the handful of auxiliary files
//! (hint index, merge marker, sequence-number file) that share its write path.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{Error, Result};
use crate::io::{FileIo, IoManager, MmapIo};
use crate::record::{
    self, LogRecord, LogRecordPos, LogRecordType, ReadLogRecord, MAX_LOG_RECORD_HEADER_SIZE,
};

pub const DATA_FILE_SUFFIX: &str = ".data";
pub const HINT_FILE_NAME: &str = "hint-index";
pub const MERGE_FINISHED_FILE_NAME: &str = "merge-finished";
pub const SEQ_NO_FILE_NAME: &str = "seq-no";

/// Builds the path of the data file with the given `file_id`, zero-padded to 9 digits.
pub fn data_file_name(dir_path: &Path, file_id: u32) -> PathBuf {
    dir_path.join(format!("{file_id:09}{DATA_FILE_SUFFIX}"))
}

/// An append-only log file: positioned I/O plus the record codec.
pub struct DataFile {
    file_id: u32,
    write_off: AtomicU64,
    io: Box<dyn IoManager>,
}

impl DataFile {
    /// Opens (creating if absent) the numbered data file in `dir_path` for standard I/O.
    pub fn open(dir_path: &Path, file_id: u32) -> Result<Self> {
        let io = FileIo::new(data_file_name(dir_path, file_id))?;
        let write_off = io.size();
        Ok(Self {
            file_id,
            write_off: AtomicU64::new(write_off),
            io: Box::new(io),
        })
    }

    /// Opens an existing, immutable data file for memory-mapped reads.
    pub fn open_mmap(dir_path: &Path, file_id: u32) -> Result<Self> {
        let io = MmapIo::new(data_file_name(dir_path, file_id))?;
        let write_off = io.size();
        Ok(Self {
            file_id,
            write_off: AtomicU64::new(write_off),
            io: Box::new(io),
        })
    }

    fn open_aux(path: PathBuf) -> Result<Self> {
        let io = FileIo::new(path)?;
        let write_off = io.size();
        Ok(Self {
            file_id: 0,
            write_off: AtomicU64::new(write_off),
            io: Box::new(io),
        })
    }

    pub fn open_hint_file(dir_path: &Path) -> Result<Self> {
        Self::open_aux(dir_path.join(HINT_FILE_NAME))
    }

    pub fn open_merge_finished_file(dir_path: &Path) -> Result<Self> {
        Self::open_aux(dir_path.join(MERGE_FINISHED_FILE_NAME))
    }

    pub fn open_seq_no_file(dir_path: &Path) -> Result<Self> {
        Self::open_aux(dir_path.join(SEQ_NO_FILE_NAME))
    }

    pub fn file_id(&self) -> u32 {
        self.file_id
    }

    pub fn write_off(&self) -> u64 {
        self.write_off.load(Ordering::Acquire)
    }

    pub fn set_write_off(&self, offset: u64) {
        self.write_off.store(offset, Ordering::Release);
    }

    pub fn file_size(&self) -> u64 {
        self.io.size()
    }

    /// Reads and decodes the record starting at `offset`.
    ///
    /// Reads up to [`MAX_LOG_RECORD_HEADER_SIZE`] header bytes (clamped to what is left
    /// in the file), decodes the header to learn `keysize + valuesize`, then reads
    /// exactly that many more bytes before verifying the CRC.
    pub fn read_log_record(&self, offset: u64) -> Result<Option<ReadLogRecord>> {
        let file_size = self.io.size();
        let header_cap =
            (file_size.saturating_sub(offset) as usize).min(MAX_LOG_RECORD_HEADER_SIZE);
        let mut header_buf = vec![0u8; header_cap];
        if header_cap > 0 {
            self.io.read(&mut header_buf, offset)?;
        }

        let Some(header) = record::decode_header(&header_buf)? else {
            return Ok(None);
        };

        let body_len = header.body_len();
        let mut body = vec![0u8; body_len];
        if body_len > 0 {
            let n = self
                .io
                .read(&mut body, offset + header.header_len() as u64)?;
            if n < body_len {
                return Err(Error::Io(std::io::Error::from(
                    std::io::ErrorKind::UnexpectedEof,
                )));
            }
        }
        record::assemble_record(header, &body).map(Some)
    }

    /// Appends `buf` and advances `write_off` by the number of bytes written.
    pub fn write(&self, buf: &[u8]) -> Result<usize> {
        let n = self.io.write(buf)?;
        self.write_off.fetch_add(n as u64, Ordering::AcqRel);
        Ok(n)
    }

    /// Appends a hint record mapping `key` to `pos` to this (hint) file.
    pub fn write_hint_record(&self, key: Vec<u8>, pos: LogRecordPos) -> Result<()> {
        let record = LogRecord {
            key,
            value: pos.encode(),
            rec_type: LogRecordType::Normal,
        };
        self.write(&record.encode())?;
        Ok(())
    }

    pub fn sync(&self) -> Result<()> {
        self.io.sync()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{key_with_seq, NON_TRANSACTION_SEQ_NO};
    use tempfile::tempdir;

    #[test]
    fn open_creates_file_with_zero_write_off() {
        let dir = tempdir().unwrap();
        let file = DataFile::open(dir.path(), 0).unwrap();
        assert_eq!(file.file_id(), 0);
        assert_eq!(file.write_off(), 0);
    }

    #[test]
    fn write_then_read_log_record() {
        let dir = tempdir().unwrap();
        let file = DataFile::open(dir.path(), 1).unwrap();

        let record = LogRecord {
            key: key_with_seq(b"key-a", NON_TRANSACTION_SEQ_NO),
            value: b"value-a".to_vec(),
            rec_type: LogRecordType::Normal,
        };
        let encoded = record.encode();
        file.write(&encoded).unwrap();

        let read = file.read_log_record(0).unwrap().unwrap();
        assert_eq!(read.record, record);
        assert_eq!(read.size, encoded.len());
    }

    #[test]
    fn sequential_records_read_back_at_their_offsets() {
        let dir = tempdir().unwrap();
        let file = DataFile::open(dir.path(), 2).unwrap();

        let mut offset = 0u64;
        let mut written = Vec::new();
        for i in 0..5 {
            let record = LogRecord {
                key: key_with_seq(format!("key-{i}").as_bytes(), NON_TRANSACTION_SEQ_NO),
                value: format!("value-{i}").into_bytes(),
                rec_type: LogRecordType::Normal,
            };
            let encoded = record.encode();
            file.write(&encoded).unwrap();
            written.push((offset, record));
            offset += encoded.len() as u64;
        }

        for (offset, expected) in written {
            let read = file.read_log_record(offset).unwrap().unwrap();
            assert_eq!(read.record, expected);
        }
    }

    #[test]
    fn write_hint_record_roundtrips_through_read_log_record() {
        let dir = tempdir().unwrap();
        let hint_file = DataFile::open_hint_file(dir.path()).unwrap();
        let pos = LogRecordPos {
            file_id: 3,
            offset: 128,
            size: 64,
        };
        hint_file.write_hint_record(b"real-key".to_vec(), pos).unwrap();

        let read = hint_file.read_log_record(0).unwrap().unwrap();
        assert_eq!(read.record.key, b"real-key");
        assert_eq!(LogRecordPos::decode(&read.record.value).unwrap(), pos);
    }
}
