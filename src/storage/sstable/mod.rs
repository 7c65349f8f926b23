//! SSTable Module
//!
//! Sorted String Table - immutable on-disk sorted key-value storage.
//!
//! ## File Format
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ Data Blocks (variable)                                  │
//! │   prefix-compressed blocks, see `storage::block`        │
//! │   each value slot: [value record][tombstone: u8]        │
//! ├─────────────────────────────────────────────────────────┤
//! │ Index (variable)                                        │
//! │   count (v)                                             │
//! │   [key_len (v)][first key][offset (v)][length (v)]      │
//! │   ... one per block ...                                 │
//! ├─────────────────────────────────────────────────────────┤
//! │ Footer (24 bytes)                                       │
//! │   IndexOffset: u64 | MaxVersion: u64 | IndexCRC: u32 |  │
//! │   Magic: "RKV1"                                         │
//! └─────────────────────────────────────────────────────────┘
//! ```

mod builder;
mod reader;

use std::path::{Path, PathBuf};

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::codec::{decode_value_record, encode_value_record};
use crate::config::Config;
use crate::error::{Result, RidgeError};
use crate::types::{Entry, ValueRecord};

pub use builder::SSTableBuilder;

// =============================================================================
// Shared Constants (used by builder and reader)
// =============================================================================

/// Magic bytes closing every RidgeKV SSTable file
pub(crate) const MAGIC: &[u8; 4] = b"RKV1";

/// Footer size: IndexOffset (8) + MaxVersion (8) + IndexCRC (4) + Magic (4)
pub(crate) const FOOTER_SIZE: u64 = 24;

// =============================================================================
// Index & Options
// =============================================================================

/// Location of one data block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    /// First key stored in the block
    pub start_key: Vec<u8>,
    pub offset: u64,
    pub length: u32,
}

/// Block layout parameters
#[derive(Debug, Clone, Copy)]
pub struct SSTableOptions {
    pub block_size: usize,
    pub restart_interval: usize,
}

impl Default for SSTableOptions {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for SSTableOptions {
    fn from(config: &Config) -> Self {
        Self {
            block_size: config.block_size,
            restart_interval: config.restart_interval,
        }
    }
}

// =============================================================================
// SSTable Handle
// =============================================================================

/// An open, immutable SSTable
///
/// Holds the block index in memory; data blocks are read with a file handle
/// opened per call, so a handle can be shared freely across threads.
#[derive(Debug)]
pub struct SSTable {
    path: PathBuf,
    index: Vec<IndexEntry>,
    index_offset: u64,
    max_version: u64,
    file_size: u64,
}

impl SSTable {
    /// Write a pre-sorted batch of entries to a new table at `path`
    pub fn write_data(path: &Path, entries: &[Entry], options: &SSTableOptions) -> Result<Self> {
        let mut builder = SSTableBuilder::new(path, *options)?;
        for entry in entries {
            builder.add(entry)?;
        }
        builder.finish()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn index(&self) -> &[IndexEntry] {
        &self.index
    }

    pub fn block_count(&self) -> usize {
        self.index.len()
    }

    /// Highest entry version written to this table
    pub fn max_version(&self) -> u64 {
        self.max_version
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Smallest key in the table
    pub fn first_key(&self) -> Option<&[u8]> {
        self.index.first().map(|e| e.start_key.as_slice())
    }
}

// =============================================================================
// Value Slots
// =============================================================================

/// Encode an entry's block value: `[value record][tombstone byte]`
pub(crate) fn encode_slot(entry: &Entry, base_version: i64, base_expire: i64) -> Bytes {
    let record = ValueRecord {
        payload: if entry.tombstone {
            Vec::new()
        } else {
            entry.value.clone().unwrap_or_default()
        },
        version: entry.version as i64,
        expire_at: entry.expire_at,
    };
    let mut buf = BytesMut::new();
    encode_value_record(&record, base_version, base_expire, false, &mut buf);
    buf.put_u8(u8::from(entry.tombstone));
    buf.freeze()
}

/// Decode a block value back into an entry
pub(crate) fn decode_slot(
    key: Vec<u8>,
    slot: &[u8],
    base_version: i64,
    base_expire: i64,
) -> Result<Entry> {
    let (&flag, record_bytes) = slot.split_last().ok_or_else(|| {
        RidgeError::DecodeFieldMismatch("empty value slot".into())
    })?;
    let tombstone = match flag {
        0 => false,
        1 => true,
        other => {
            return Err(RidgeError::DecodeFieldMismatch(format!(
                "tombstone byte {} is not 0 or 1",
                other
            )))
        }
    };

    let mut cursor = record_bytes;
    let decoded = decode_value_record(&mut cursor, base_version, base_expire)?;
    if cursor.has_remaining() {
        return Err(RidgeError::DecodeFieldMismatch(format!(
            "{} trailing bytes after value record",
            cursor.remaining()
        )));
    }

    let record = decoded.record;
    Ok(Entry {
        key,
        value: if tombstone { None } else { Some(record.payload) },
        tombstone,
        version: record.version as u64,
        expire_at: record.expire_at,
    })
}
