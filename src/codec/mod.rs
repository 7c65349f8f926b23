//! Codec Module
//!
//! Integer and value encodings shared by the block, SSTable and index formats.
//!
//! ## Responsibilities
//! - Unsigned varints (LEB128-style, 1-10 bytes)
//! - ZigZag mapping of signed deltas
//! - Compact value records relative to a block's base version/expiry

pub mod value;
pub mod varint;

pub use value::{decode_value_record, encode_value_record, DecodedValue, INLINE_MAX};
pub use varint::{
    get_varint32, get_varint64, put_varint32, put_varint64, read_varint_backward, varint_len,
    zigzag_decode, zigzag_encode,
};
