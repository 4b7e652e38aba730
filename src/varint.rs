//! Variable-length integer encoding shared by the record header and the hint-file position codec.
//!
//! Unsigned values (sequence numbers, hint-file `file_id`/`offset`/`size`) use plain
//! unsigned LEB128 via [`prost::encoding`]. Record-header key/value lengths use the
//! signed zig-zag variant, matching the wire format this engine targets.

use bytes::{Buf, BufMut};

use crate::error::{Error, Result};

/// Maximum bytes a zig-zag-encoded 32-bit-range length can occupy.
pub const MAX_VARINT_LEN32: usize = 5;

/// Encodes an unsigned value as a plain LEB128 varint.
pub fn encode_uvarint(value: u64, buf: &mut impl BufMut) {
    prost::encoding::encode_varint(value, buf);
}

/// Decodes a plain LEB128 varint.
pub fn decode_uvarint(buf: &mut impl Buf) -> Result<u64> {
    prost::encoding::decode_varint(buf).map_err(|_| Error::DataDirectoryCorrupted)
}

/// Zig-zag encodes a signed length and writes it as an unsigned varint.
///
/// Record-header key/value sizes are always non-negative, so this only ever
/// doubles the magnitude, but the wire format is defined in terms of signed
/// varints and we follow it rather than special-case the sign bit away.
pub fn encode_varint(value: i64, buf: &mut impl BufMut) {
    let zigzagged = ((value << 1) ^ (value >> 63)) as u64;
    encode_uvarint(zigzagged, buf);
}

/// Decodes a zig-zag-encoded signed varint.
pub fn decode_varint(buf: &mut impl Buf) -> Result<i64> {
    let zigzagged = decode_uvarint(buf)?;
    Ok(((zigzagged >> 1) as i64) ^ -((zigzagged & 1) as i64))
}
