//! SSTable Reader
//!
//! Reopens SSTable files from their footer and serves block-level reads.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tracing::warn;

use super::{decode_slot, IndexEntry, SSTable, FOOTER_SIZE, MAGIC};
use crate::codec::{get_varint32, get_varint64};
use crate::error::{Result, RidgeError};
use crate::storage::block::Block;
use crate::types::{Entry, KeyRange};

impl SSTable {
    /// Open an existing SSTable and load its index into memory
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = open_for_read(path)?;
        let file_size = file.metadata()?.len();
        if file_size < FOOTER_SIZE {
            return Err(RidgeError::Storage(format!(
                "SSTable {} is too small ({} bytes) to hold a footer",
                path.display(),
                file_size
            )));
        }

        file.seek(SeekFrom::End(-(FOOTER_SIZE as i64)))?;
        let mut footer = [0u8; FOOTER_SIZE as usize];
        file.read_exact(&mut footer)?;

        if &footer[20..24] != MAGIC {
            return Err(RidgeError::Storage(format!(
                "Invalid SSTable magic in {}: {:?}",
                path.display(),
                &footer[20..24]
            )));
        }
        let index_offset = read_u64(&footer[0..8]);
        let max_version = read_u64(&footer[8..16]);
        let index_crc = read_u32(&footer[16..20]);

        let index_end = file_size - FOOTER_SIZE;
        if index_offset > index_end {
            return Err(RidgeError::Storage(format!(
                "SSTable {} index offset {} beyond {}",
                path.display(),
                index_offset,
                index_end
            )));
        }
        file.seek(SeekFrom::Start(index_offset))?;
        let mut index_data = vec![0u8; (index_end - index_offset) as usize];
        file.read_exact(&mut index_data)?;

        if crc32fast::hash(&index_data) != index_crc {
            return Err(RidgeError::Storage(format!(
                "SSTable {} index checksum mismatch",
                path.display()
            )));
        }
        let index = parse_index(&index_data)?;

        Ok(Self {
            path: path.to_path_buf(),
            index,
            index_offset,
            max_version,
            file_size,
        })
    }

    /// Point lookup
    ///
    /// Returns:
    /// - `Ok(Some(entry))`: key present (the entry may be a tombstone)
    /// - `Ok(None)`: key not in this table
    /// - `Err(IoRace)`: the file was removed underneath the read
    pub fn search(&self, key: &[u8]) -> Result<Option<Entry>> {
        // Greatest block whose first key is <= key
        let slot = self
            .index
            .partition_point(|e| e.start_key.as_slice() <= key);
        if slot == 0 {
            return Ok(None);
        }
        let handle = &self.index[slot - 1];

        let bytes = self.read_range(handle.offset, u64::from(handle.length))?;
        let block = match Block::decode(bytes) {
            Ok(block) => block,
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    offset = handle.offset,
                    error = %e,
                    "unreadable block, treating key as absent"
                );
                return Ok(None);
            }
        };

        match block.search(key) {
            Some(value) => decode_slot(
                key.to_vec(),
                &value,
                block.base_version(),
                block.base_expire(),
            )
            .map(Some),
            None => Ok(None),
        }
    }

    /// Decode every entry in key order
    pub fn get_all_entries(&self) -> Result<Vec<Entry>> {
        let data = self.read_range(0, self.index_offset)?;
        let mut entries = Vec::new();
        for handle in &self.index {
            decode_block_into(&data, 0, handle, None, &mut entries)?;
        }
        Ok(entries)
    }

    /// Entries whose key falls in `range`, decoding only overlapping blocks
    pub fn entries_in_range(&self, range: &KeyRange) -> Result<Vec<Entry>> {
        let first = match &range.from {
            Some(from) => self
                .index
                .partition_point(|e| e.start_key.as_slice() <= from.as_slice())
                .saturating_sub(1),
            None => 0,
        };
        let end = match &range.to {
            Some(to) => self
                .index
                .partition_point(|e| e.start_key.as_slice() < to.as_slice()),
            None => self.index.len(),
        };
        if first >= end {
            return Ok(Vec::new());
        }

        let span_start = self.index[first].offset;
        let last = &self.index[end - 1];
        let span_end = last.offset + u64::from(last.length);
        let data = self.read_range(span_start, span_end - span_start)?;

        let mut entries = Vec::new();
        for handle in &self.index[first..end] {
            decode_block_into(&data, span_start, handle, Some(range), &mut entries)?;
        }
        Ok(entries)
    }

    /// Read `len` bytes at `offset` with a handle opened for this call
    fn read_range(&self, offset: u64, len: u64) -> Result<Bytes> {
        let mut file = open_for_read(&self.path)?;
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; len as usize];
        file.read_exact(&mut buf).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                RidgeError::Storage(format!(
                    "SSTable {} truncated: wanted {} bytes at {}",
                    self.path.display(),
                    len,
                    offset
                ))
            } else {
                RidgeError::Io(e)
            }
        })?;
        Ok(Bytes::from(buf))
    }
}

fn decode_block_into(
    data: &Bytes,
    data_start: u64,
    handle: &IndexEntry,
    range: Option<&KeyRange>,
    out: &mut Vec<Entry>,
) -> Result<()> {
    let start = (handle.offset - data_start) as usize;
    let end = start + handle.length as usize;
    if end > data.len() {
        return Err(RidgeError::Storage(format!(
            "block at {} runs past the data section",
            handle.offset
        )));
    }
    let block = Block::decode(data.slice(start..end))?;
    for (key, value) in block.entries()? {
        if let Some(range) = range {
            // Keys are ascending; nothing after this one is in range
            if range.is_past_end(&key) {
                break;
            }
            if !range.contains(&key) {
                continue;
            }
        }
        out.push(decode_slot(
            key,
            &value,
            block.base_version(),
            block.base_expire(),
        )?);
    }
    Ok(())
}

fn parse_index(mut data: &[u8]) -> Result<Vec<IndexEntry>> {
    let count = get_varint64(&mut data)? as usize;
    let mut index = Vec::with_capacity(count.min(4096));
    for _ in 0..count {
        let key_len = get_varint32(&mut data)? as usize;
        if data.len() < key_len {
            return Err(RidgeError::truncated(key_len, data.len()));
        }
        let start_key = data[..key_len].to_vec();
        data = &data[key_len..];
        let offset = get_varint64(&mut data)?;
        let length = get_varint32(&mut data)?;
        index.push(IndexEntry {
            start_key,
            offset,
            length,
        });
    }
    Ok(index)
}

/// Open a table file; a missing file means compaction removed it
fn open_for_read(path: &Path) -> Result<File> {
    File::open(path).map_err(|e| {
        if e.kind() == io::ErrorKind::NotFound {
            RidgeError::IoRace {
                path: PathBuf::from(path),
            }
        } else {
            RidgeError::Io(e)
        }
    })
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    u64::from_le_bytes(buf)
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(bytes);
    u32::from_le_bytes(buf)
}
