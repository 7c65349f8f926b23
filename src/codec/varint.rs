//! Varint and ZigZag encoding
//!
//! Unsigned integers are written 7 bits at a time, least significant group
//! first, with the high bit of each byte set when more bytes follow. Signed
//! deltas go through ZigZag first so that small negative numbers stay short.

use bytes::{Buf, BufMut};

use crate::error::{Result, RidgeError};

/// Longest encoding of a `u32`
pub const MAX_VARINT32_LEN: usize = 5;

/// Longest encoding of a `u64`
pub const MAX_VARINT64_LEN: usize = 10;

const CONTINUATION: u8 = 0x80;
const PAYLOAD: u8 = 0x7F;

/// Append `value` as a varint (1-5 bytes)
pub fn put_varint32<B: BufMut>(value: u32, dst: &mut B) {
    put_varint64(u64::from(value), dst);
}

/// Append `value` as a varint (1-10 bytes)
pub fn put_varint64<B: BufMut>(mut value: u64, dst: &mut B) {
    while value >= u64::from(CONTINUATION) {
        dst.put_u8((value as u8 & PAYLOAD) | CONTINUATION);
        value >>= 7;
    }
    dst.put_u8(value as u8);
}

/// Read a varint that must fit in 5 bytes
pub fn get_varint32<B: Buf>(src: &mut B) -> Result<u32> {
    let value = get_varint(src, MAX_VARINT32_LEN)?;
    u32::try_from(value).map_err(|_| {
        RidgeError::MalformedEncoding(format!("varint {} overflows 32 bits", value))
    })
}

/// Read a varint that must fit in 10 bytes
pub fn get_varint64<B: Buf>(src: &mut B) -> Result<u64> {
    get_varint(src, MAX_VARINT64_LEN)
}

fn get_varint<B: Buf>(src: &mut B, max_len: usize) -> Result<u64> {
    let mut result = 0u64;
    for i in 0..max_len {
        if !src.has_remaining() {
            return Err(RidgeError::truncated(i + 1, i));
        }
        let byte = src.get_u8();
        result |= u64::from(byte & PAYLOAD) << (7 * i);
        if byte & CONTINUATION == 0 {
            return Ok(result);
        }
    }
    Err(RidgeError::MalformedEncoding(format!(
        "varint exceeds {} bytes",
        max_len
    )))
}

/// Number of bytes `put_varint64(value)` writes
pub fn varint_len(value: u64) -> usize {
    if value == 0 {
        return 1;
    }
    let bits = 64 - value.leading_zeros() as usize;
    (bits + 6) / 7
}

/// Read the varint whose terminating byte sits at `buf[end]`.
///
/// Walks right-to-left over the continuation bytes that precede `end`, then
/// decodes forward. Returns the value and the index of its first byte.
pub fn read_varint_backward(buf: &[u8], end: usize) -> Result<(u64, usize)> {
    let last = *buf
        .get(end)
        .ok_or_else(|| RidgeError::truncated(end + 1, buf.len()))?;
    if last & CONTINUATION != 0 {
        return Err(RidgeError::MalformedEncoding(format!(
            "byte at {} is not a varint terminator",
            end
        )));
    }

    let mut start = end;
    while start > 0 && buf[start - 1] & CONTINUATION != 0 {
        if end - start + 1 >= MAX_VARINT64_LEN {
            return Err(RidgeError::MalformedEncoding(format!(
                "varint ending at {} exceeds {} bytes",
                end, MAX_VARINT64_LEN
            )));
        }
        start -= 1;
    }

    let mut slice = &buf[start..=end];
    let value = get_varint64(&mut slice)?;
    Ok((value, start))
}

/// Map a signed integer onto an unsigned one, small magnitudes first
pub fn zigzag_encode(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

/// Inverse of [`zigzag_encode`]
pub fn zigzag_decode(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}
