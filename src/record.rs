//! Log record codec: the binary format every byte on disk is made of.
//!
//! # Record Format
//!
//! ```text
//! [crc:u32 LE][type:u8][keysize:varint][valuesize:varint][key][value]
//! ```
//!
//! `crc` is CRC32 (IEEE polynomial) over every byte following the CRC field itself.
//! `keysize`/`valuesize` are signed zig-zag varints (see [`crate::varint`]); the header
//! is therefore at most `4 + 1 + 2 * MAX_VARINT_LEN32 = 15` bytes. A header whose CRC
//! and both sizes decode to zero marks the zero-padded tail of a file (EOF sentinel),
//! not a real record.

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{Error, Result};
use crate::varint::{self, MAX_VARINT_LEN32};

/// Maximum possible header size: `crc(4) + type(1) + 2 * MAX_VARINT_LEN32`.
pub const MAX_LOG_RECORD_HEADER_SIZE: usize = 4 + 1 + 2 * MAX_VARINT_LEN32;

/// Non-transactional writes are stamped with sequence number zero.
pub const NON_TRANSACTION_SEQ_NO: u64 = 0;

/// The on-disk key suffix of the terminator record that closes out a batch commit.
pub const TXN_FIN_KEY: &[u8] = b"txn-fin";

/// The kind of a [`LogRecord`], stored as a single tag byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogRecordType {
    /// A live Put.
    Normal = 0,
    /// A tombstone written by Delete.
    Deleted = 1,
    /// Terminator marking a batch commit as durable.
    TxnFinished = 2,
}

impl LogRecordType {
    fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Normal),
            1 => Some(Self::Deleted),
            2 => Some(Self::TxnFinished),
            _ => None,
        }
    }
}

/// A single record as it is appended to a data file.
///
/// `key` here is the *on-disk* key — already prefixed with its sequence number
/// via [`key_with_seq`]. Callers working with user-facing keys strip the prefix
/// with [`parse_log_record_key`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub rec_type: LogRecordType,
}

impl LogRecord {
    /// Encodes this record to its on-disk byte representation.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(
            MAX_LOG_RECORD_HEADER_SIZE + self.key.len() + self.value.len(),
        );
        // Reserve the CRC field; it is backpatched once the rest is written.
        buf.put_u32_le(0);
        buf.put_u8(self.rec_type as u8);
        varint::encode_varint(self.key.len() as i64, &mut buf);
        varint::encode_varint(self.value.len() as i64, &mut buf);
        buf.extend_from_slice(&self.key);
        buf.extend_from_slice(&self.value);

        let crc = crc32fast::hash(&buf[4..]);
        buf[0..4].copy_from_slice(&crc.to_le_bytes());
        buf.to_vec()
    }
}

/// A decoded header plus the number of bytes it occupied.
pub(crate) struct Header {
    crc: u32,
    rec_type: LogRecordType,
    pub(crate) key_size: usize,
    pub(crate) value_size: usize,
    header_len: usize,
}

impl Header {
    /// Total bytes the body (key + value) following this header occupies.
    pub(crate) fn body_len(&self) -> usize {
        self.key_size + self.value_size
    }

    /// Number of on-disk bytes the header itself occupied.
    pub(crate) fn header_len(&self) -> usize {
        self.header_len
    }
}

/// Decodes a record header from the front of `buf`.
///
/// `buf` may be shorter than [`MAX_LOG_RECORD_HEADER_SIZE`] when it was read near the
/// physical end of the file; the decode still succeeds as long as the varints it
/// contains fit in what was supplied. Returns `None` for the all-zero EOF sentinel.
pub(crate) fn decode_header(buf: &[u8]) -> Result<Option<Header>> {
    if buf.len() < 5 {
        return Ok(None);
    }
    let mut cursor = buf;
    let crc = cursor.get_u32_le();
    let rec_type_byte = cursor.get_u8();

    let before_key = cursor.len();
    let key_size = varint::decode_varint(&mut cursor)?;
    let key_varint_len = before_key - cursor.len();

    let before_value = cursor.len();
    let value_size = varint::decode_varint(&mut cursor)?;
    let value_varint_len = before_value - cursor.len();

    if crc == 0 && key_size == 0 && value_size == 0 {
        return Ok(None);
    }

    let rec_type = LogRecordType::from_u8(rec_type_byte).ok_or(Error::DataDirectoryCorrupted)?;
    let header_len = 4 + 1 + key_varint_len + value_varint_len;
    Ok(Some(Header {
        crc,
        rec_type,
        key_size: key_size as usize,
        value_size: value_size as usize,
        header_len,
    }))
}

/// A record decoded from a data file, plus the number of bytes it occupied on disk.
pub struct ReadLogRecord {
    pub record: LogRecord,
    pub size: usize,
}

/// Assembles a decoded header and its already-read body bytes into a [`ReadLogRecord`],
/// verifying the CRC along the way. `body` must be exactly `header.body_len()` bytes.
pub(crate) fn assemble_record(header: Header, body: &[u8]) -> Result<ReadLogRecord> {
    debug_assert_eq!(body.len(), header.body_len());
    let key = body[..header.key_size].to_vec();
    let value = body[header.key_size..].to_vec();

    let mut check_buf = Vec::with_capacity(1 + 2 * MAX_VARINT_LEN32 + body.len());
    check_buf.push(header.rec_type as u8);
    // Re-encode canonically rather than reuse the original header bytes: the writer
    // always emits the minimal-length varint, so this reproduces them exactly while
    // keeping the header's on-disk byte range out of this function's signature.
    varint::encode_varint(header.key_size as i64, &mut check_buf);
    varint::encode_varint(header.value_size as i64, &mut check_buf);
    check_buf.extend_from_slice(body);

    let computed_crc = crc32fast::hash(&check_buf);
    if computed_crc != header.crc {
        return Err(Error::InvalidCRC);
    }

    Ok(ReadLogRecord {
        record: LogRecord {
            key,
            value,
            rec_type: header.rec_type,
        },
        size: header.header_len + header.key_size + header.value_size,
    })
}

/// Decodes a full record (header + key + value) from `buf`, which must contain the
/// entire record: header, key, and value back to back. Convenience entry point for
/// callers that already have the whole record in memory (tests, the merge scan).
/// Returns `Ok(None)` on the EOF sentinel (an all-zero header).
pub fn decode_record(buf: &[u8]) -> Result<Option<ReadLogRecord>> {
    let probe_len = MAX_LOG_RECORD_HEADER_SIZE.min(buf.len());
    let Some(header) = decode_header(&buf[..probe_len])? else {
        return Ok(None);
    };
    let header_len = header.header_len;
    if buf.len() < header_len + header.body_len() {
        return Err(Error::Io(std::io::Error::from(
            std::io::ErrorKind::UnexpectedEof,
        )));
    }
    assemble_record(header, &buf[header_len..header_len + header.body_len()]).map(Some)
}

/// In-memory location of a live record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogRecordPos {
    pub file_id: u32,
    pub offset: u64,
    /// Encoded byte length of the record this position refers to.
    pub size: u32,
}

impl LogRecordPos {
    /// Encodes this position for storage as a hint-file record value:
    /// `varint(file_id) || varint(offset) || varint(size)`.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        varint::encode_uvarint(u64::from(self.file_id), &mut buf);
        varint::encode_uvarint(self.offset, &mut buf);
        varint::encode_uvarint(u64::from(self.size), &mut buf);
        buf.to_vec()
    }

    /// Decodes a position previously written by [`LogRecordPos::encode`].
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut cursor = buf;
        let file_id = varint::decode_uvarint(&mut cursor)?;
        let offset = varint::decode_uvarint(&mut cursor)?;
        let size = varint::decode_uvarint(&mut cursor)?;
        Ok(Self {
            file_id: file_id as u32,
            offset,
            size: size as u32,
        })
    }
}

/// Prefixes `key` with its sequence number, producing the on-disk key.
pub fn key_with_seq(key: &[u8], seq_no: u64) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(MAX_VARINT_LEN32_U64 + key.len());
    varint::encode_uvarint(seq_no, &mut buf);
    buf.extend_from_slice(key);
    buf.to_vec()
}

const MAX_VARINT_LEN32_U64: usize = 10;

/// Splits an on-disk key back into `(user_key, seq_no)`.
pub fn parse_log_record_key(on_disk_key: &[u8]) -> Result<(Vec<u8>, u64)> {
    let mut cursor = on_disk_key;
    let seq_no = varint::decode_uvarint(&mut cursor)?;
    Ok((cursor.to_vec(), seq_no))
}
