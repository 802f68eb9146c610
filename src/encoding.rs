//! Byte-level primitives shared by the wire codecs: fixed-width little-endian
//! integers, CompactSize variable-length integers and byte reversal.
//!
//! Every reader takes the name of the field it is decoding so that a short or
//! malformed buffer surfaces as a [`LedgerError::Decode`] naming that field.

use std::io::{Cursor, Read};

use crate::error::{LedgerError, Result};

/// Largest value representable with the supported VarInt prefixes (`0xfe` + 4 bytes).
pub const MAX_VARINT: u64 = u32::MAX as u64;

/// Bytes left to read in the cursor.
#[inline]
pub fn remaining(cursor: &Cursor<&[u8]>) -> usize {
    let len = cursor.get_ref().len();
    len.saturating_sub(cursor.position() as usize)
}

/// Read exactly `N` bytes into an array.
pub fn read_array<const N: usize>(
    cursor: &mut Cursor<&[u8]>,
    field: &'static str,
) -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    cursor.read_exact(&mut buf).map_err(|_| {
        LedgerError::decode(field, format!("expected {N} bytes, found {}", remaining(cursor)))
    })?;
    Ok(buf)
}

/// Read `len` bytes into a fresh vector, refusing to allocate past the end of the buffer.
pub fn read_bytes(cursor: &mut Cursor<&[u8]>, len: usize, field: &'static str) -> Result<Vec<u8>> {
    let available = remaining(cursor);
    if len > available {
        return Err(LedgerError::decode(
            field,
            format!("declared length {len} exceeds the {available} bytes remaining"),
        ));
    }
    let mut buf = vec![0u8; len];
    cursor
        .read_exact(&mut buf)
        .map_err(|e| LedgerError::decode(field, e.to_string()))?;
    Ok(buf)
}

pub fn read_u8(cursor: &mut Cursor<&[u8]>, field: &'static str) -> Result<u8> {
    Ok(read_array::<1>(cursor, field)?[0])
}

pub fn read_u16_le(cursor: &mut Cursor<&[u8]>, field: &'static str) -> Result<u16> {
    Ok(u16::from_le_bytes(read_array(cursor, field)?))
}

pub fn read_u32_le(cursor: &mut Cursor<&[u8]>, field: &'static str) -> Result<u32> {
    Ok(u32::from_le_bytes(read_array(cursor, field)?))
}

pub fn read_u64_le(cursor: &mut Cursor<&[u8]>, field: &'static str) -> Result<u64> {
    Ok(u64::from_le_bytes(read_array(cursor, field)?))
}

/// Decode a CompactSize integer.
///
/// `< 0xfd` is the value itself, `0xfd` is followed by a 2-byte little-endian
/// payload and `0xfe` by a 4-byte one. The 8-byte `0xff` form is not supported
/// and is reported as [`LedgerError::Unsupported`].
pub fn read_varint(cursor: &mut Cursor<&[u8]>, field: &'static str) -> Result<u64> {
    match read_u8(cursor, field)? {
        0xfd => Ok(u64::from(read_u16_le(cursor, field)?)),
        0xfe => Ok(u64::from(read_u32_le(cursor, field)?)),
        0xff => Err(LedgerError::Unsupported(format!(
            "64-bit VarInt in {field}"
        ))),
        n => Ok(u64::from(n)),
    }
}

/// Read a VarInt used as a length or count and convert it to `usize`.
pub fn read_len(cursor: &mut Cursor<&[u8]>, field: &'static str) -> Result<usize> {
    let n = read_varint(cursor, field)?;
    usize::try_from(n).map_err(|_| LedgerError::decode(field, format!("length {n} overflows usize")))
}

/// Encode a CompactSize integer.
///
/// Values above [`MAX_VARINT`] would need the `0xff` form and are rejected
/// instead of being truncated.
pub fn encode_varint(n: u64) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(5);
    write_varint(&mut out, n)?;
    Ok(out)
}

/// Append a CompactSize integer to `out`.
pub fn write_varint(out: &mut Vec<u8>, n: u64) -> Result<()> {
    if n < 0xfd {
        out.push(n as u8);
    } else if n <= u64::from(u16::MAX) {
        out.push(0xfd);
        out.extend_from_slice(&(n as u16).to_le_bytes());
    } else if n <= MAX_VARINT {
        out.push(0xfe);
        out.extend_from_slice(&(n as u32).to_le_bytes());
    } else {
        return Err(LedgerError::Unsupported(format!(
            "VarInt value {n} needs the 64-bit form"
        )));
    }
    Ok(())
}

/// Append a length-prefixed byte string.
pub fn write_var_bytes(out: &mut Vec<u8>, bytes: &[u8]) -> Result<()> {
    write_varint(out, bytes.len() as u64)?;
    out.extend_from_slice(bytes);
    Ok(())
}

/// Copy a slice into a fixed-size array, failing on any length other than `N`.
pub fn to_array<const N: usize>(bytes: &[u8], field: &'static str) -> Result<[u8; N]> {
    bytes.try_into().map_err(|_| {
        LedgerError::decode(field, format!("expected {N} bytes, found {}", bytes.len()))
    })
}

/// Return a reversed copy of a 32-byte hash (internal order <-> display order).
#[must_use]
pub fn reversed(hash: &[u8; 32]) -> [u8; 32] {
    let mut out = *hash;
    out.reverse();
    out
}

/// Hex string of a hash in display (byte-reversed) order.
#[must_use]
pub fn display_hex(hash: &[u8; 32]) -> String {
    hex::encode(reversed(hash))
}

/// Fail if a decoder left bytes unread.
pub fn expect_end(cursor: &Cursor<&[u8]>, field: &'static str) -> Result<()> {
    match remaining(cursor) {
        0 => Ok(()),
        n => Err(LedgerError::decode(field, format!("{n} trailing bytes"))),
    }
}
