//! Value-record codec
//!
//! Layout of one record:
//! ```text
//! ┌──────────────┬─────────────────────┬─────────────────────┬──────────────────┐
//! │ head (1)     │ ZigZag(version -    │ ZigZag(expire -     │ payload          │
//! │ flags|len<<4 │   base_version)     │   base_expire)      │ (varint len      │
//! │              │                     │ only if HAS_EXPIRY  │  unless INLINE)  │
//! └──────────────┴─────────────────────┴─────────────────────┴──────────────────┘
//! ```
//! Versions and expiry times inside one block cluster around the block's base
//! values, so the deltas usually collapse to a single byte. Payloads of at
//! most 15 bytes carry their length in the head byte.

use bytes::{Buf, BufMut, BytesMut};

use super::varint::{
    get_varint32, get_varint64, put_varint32, put_varint64, varint_len, zigzag_decode,
    zigzag_encode,
};
use crate::error::{Result, RidgeError};
use crate::types::ValueRecord;

/// Record has an expiry delta
pub const FLAG_EXPIRY: u8 = 0x1;
/// Payload is compressed
pub const FLAG_COMPRESSED: u8 = 0x2;
/// Unassigned
pub const FLAG_RESERVED: u8 = 0x4;
/// Payload length lives in the high nibble of the head byte
pub const FLAG_INLINE: u8 = 0x8;

/// Longest payload stored inline
pub const INLINE_MAX: usize = 15;

/// A decoded record plus the flags that do not belong to `ValueRecord`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedValue {
    pub record: ValueRecord,
    pub compressed: bool,
}

/// Append `record` relative to the block's base version and expiry
pub fn encode_value_record(
    record: &ValueRecord,
    base_version: i64,
    base_expire: i64,
    compressed: bool,
    dst: &mut BytesMut,
) {
    let len = record.payload.len();
    let mut head = 0u8;
    if record.expire_at.is_some() {
        head |= FLAG_EXPIRY;
    }
    if compressed {
        head |= FLAG_COMPRESSED;
    }
    if len <= INLINE_MAX {
        head |= FLAG_INLINE | ((len as u8) << 4);
    }

    dst.reserve(encoded_len(record, base_version, base_expire));
    dst.put_u8(head);
    put_varint64(
        zigzag_encode(record.version.wrapping_sub(base_version)),
        dst,
    );
    if let Some(expire_at) = record.expire_at {
        put_varint64(zigzag_encode(expire_at.wrapping_sub(base_expire)), dst);
    }
    if head & FLAG_INLINE == 0 {
        put_varint32(len as u32, dst);
    }
    dst.put_slice(&record.payload);
}

/// Decode one record, consuming exactly its bytes from `src`
pub fn decode_value_record<B: Buf>(
    src: &mut B,
    base_version: i64,
    base_expire: i64,
) -> Result<DecodedValue> {
    if !src.has_remaining() {
        return Err(RidgeError::truncated(1, 0));
    }
    let head = src.get_u8();
    let flags = head & 0x0F;
    if flags & FLAG_RESERVED != 0 {
        return Err(RidgeError::DecodeFieldMismatch(format!(
            "reserved flag set in value head {:#04x}",
            head
        )));
    }

    let version = base_version.wrapping_add(zigzag_decode(get_varint64(src)?));
    let expire_at = if flags & FLAG_EXPIRY != 0 {
        Some(base_expire.wrapping_add(zigzag_decode(get_varint64(src)?)))
    } else {
        None
    };

    let len = if flags & FLAG_INLINE != 0 {
        usize::from(head >> 4)
    } else {
        get_varint32(src)? as usize
    };
    if src.remaining() < len {
        return Err(RidgeError::truncated(len, src.remaining()));
    }
    let mut payload = vec![0u8; len];
    src.copy_to_slice(&mut payload);

    Ok(DecodedValue {
        record: ValueRecord {
            payload,
            version,
            expire_at,
        },
        compressed: flags & FLAG_COMPRESSED != 0,
    })
}

/// Exact size of the encoding of `record`
pub fn encoded_len(record: &ValueRecord, base_version: i64, base_expire: i64) -> usize {
    let len = record.payload.len();
    let mut size = 1 + varint_len(zigzag_encode(record.version.wrapping_sub(base_version)));
    if let Some(expire_at) = record.expire_at {
        size += varint_len(zigzag_encode(expire_at.wrapping_sub(base_expire)));
    }
    if len > INLINE_MAX {
        size += varint_len(len as u64);
    }
    size + len
}
