//! Script integers: little-endian sign-magnitude byte strings.
//!
//! The most significant bit of the last byte is the sign. Zero is the empty
//! string, though `[0x00]` and `[0x80]` (negative zero) also read as zero.

use crate::interpreter::ScriptError;

/// Longest operand arithmetic opcodes accept
pub const MAX_NUM_SIZE: usize = 4;

/// Longest result arithmetic opcodes may produce
pub const MAX_RESULT_SIZE: usize = 5;

/// Decode a stack element as an integer, rejecting operands longer than `max_size`
pub fn decode_num(bytes: &[u8], max_size: usize) -> Result<i64, ScriptError> {
    if bytes.len() > max_size {
        return Err(ScriptError::NumOverflow(bytes.len()));
    }
    let Some((&last, _)) = bytes.split_last() else {
        return Ok(0);
    };

    let mut result: i64 = 0;
    for (i, &byte) in bytes.iter().enumerate() {
        result |= i64::from(byte) << (8 * i);
    }

    if last & 0x80 != 0 {
        let sign_bit = 0x80i64 << (8 * (bytes.len() - 1));
        Ok(-(result & !sign_bit))
    } else {
        Ok(result)
    }
}

/// Minimal encoding of `n`
#[must_use]
pub fn encode_num(n: i64) -> Vec<u8> {
    if n == 0 {
        return Vec::new();
    }

    let negative = n < 0;
    let mut abs = n.unsigned_abs();
    let mut out = Vec::with_capacity(9);
    while abs > 0 {
        out.push((abs & 0xff) as u8);
        abs >>= 8;
    }

    // The sign lives in the top bit of the last byte; add a byte if it is taken
    match out.last_mut() {
        Some(last) if *last & 0x80 != 0 => out.push(if negative { 0x80 } else { 0x00 }),
        Some(last) if negative => *last |= 0x80,
        _ => {}
    }
    out
}

/// Encode an arithmetic result, failing if it needs more than [`MAX_RESULT_SIZE`] bytes
pub fn encode_result(n: i64) -> Result<Vec<u8>, ScriptError> {
    let out = encode_num(n);
    if out.len() > MAX_RESULT_SIZE {
        return Err(ScriptError::NumOverflow(out.len()));
    }
    Ok(out)
}

/// False for the empty string and any encoding of zero, including negative zero
#[must_use]
pub fn is_true(bytes: &[u8]) -> bool {
    match bytes.split_last() {
        None => false,
        Some((&last, rest)) => rest.iter().any(|&b| b != 0) || (last & 0x7f) != 0,
    }
}

/// Canonical boolean results: `[1]` for true, the empty string for false
#[must_use]
pub fn encode_bool(b: bool) -> Vec<u8> {
    if b { vec![1] } else { Vec::new() }
}
