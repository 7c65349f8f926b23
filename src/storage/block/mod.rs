//! Block Module
//!
//! Prefix-compressed, restart-indexed run of sorted entries.
//!
//! ## Block Format
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Entry 0 (restart)                                            │
//! │ ┌────────────┬──────────────┬─────────────┬────────┬───────┐ │
//! │ │ shared (v) │ unshared (v) │ val_len (v) │ key... │ val...│ │
//! │ └────────────┴──────────────┴─────────────┴────────┴───────┘ │
//! │ Entry 1 .. N-1 (shared > 0 except at restarts)               │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Trailer                                                      │
//! │   entry_count (v) | restart_count (v) | restart_offset (v)*  │
//! │   base_version (v) | base_expire (v)                         │
//! ├──────────────────────────────────────────────────────────────┤
//! │ CRC32C of everything above (u32 LE)                          │
//! └──────────────────────────────────────────────────────────────┘
//! (v) = varint
//! ```
//! Restart entries store the full key so a reader can binary-search them.

mod builder;
mod reader;

use crc::{Crc, CRC_32_ISCSI};

pub use builder::BlockBuilder;
pub use reader::Block;

/// CRC32C (Castagnoli) used for block checksums
pub(crate) const CRC32C: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

/// Size of the trailing checksum
pub const CHECKSUM_SIZE: usize = 4;
