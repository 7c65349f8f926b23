//! SSTable Builder
//!
//! Writes sorted entries to a new SSTable file, one block at a time.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use bytes::BytesMut;

use super::{encode_slot, IndexEntry, SSTable, SSTableOptions, MAGIC};
use crate::codec::{put_varint32, put_varint64};
use crate::error::Result;
use crate::storage::block::BlockBuilder;
use crate::types::Entry;
use crate::RidgeError;

/// Builder for creating new SSTables from sorted entries
///
/// Data goes to `<path>.tmp` and is renamed into place by `finish()`, so a
/// crash mid-write never leaves a half-built table under a real name.
pub struct SSTableBuilder {
    path: PathBuf,
    tmp_path: PathBuf,
    writer: BufWriter<File>,
    options: SSTableOptions,
    /// Block being filled
    block: BlockBuilder,
    /// First key of the current block
    block_start: Vec<u8>,
    /// Bytes written so far
    offset: u64,
    index: Vec<IndexEntry>,
    max_version: u64,
    last_key: Option<Vec<u8>>,
}

impl SSTableBuilder {
    /// Create a new SSTable builder
    ///
    /// Call `add()` in strictly ascending key order, then `finish()`.
    pub fn new(path: &Path, options: SSTableOptions) -> Result<Self> {
        let tmp_path = path.with_extension("sstable.tmp");
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)?;

        Ok(Self {
            path: path.to_path_buf(),
            tmp_path,
            writer: BufWriter::new(file),
            options,
            block: BlockBuilder::new(options.restart_interval),
            block_start: Vec::new(),
            offset: 0,
            index: Vec::new(),
            max_version: 0,
            last_key: None,
        })
    }

    /// Record at least `version` as the table's max version, even when no
    /// entry carries it
    pub fn with_min_version(mut self, version: u64) -> Self {
        self.max_version = self.max_version.max(version);
        self
    }

    /// Add an entry (value or tombstone)
    pub fn add(&mut self, entry: &Entry) -> Result<()> {
        if let Some(last) = &self.last_key {
            if entry.key.as_slice() <= last.as_slice() {
                return Err(RidgeError::Storage(format!(
                    "SSTable keys must be strictly ascending: {:?} after {:?}",
                    String::from_utf8_lossy(&entry.key),
                    String::from_utf8_lossy(last)
                )));
            }
        }

        if self.block.is_empty() {
            // Deltas inside a block are taken against its first entry
            self.block
                .set_base(entry.version as i64, entry.expire_at.unwrap_or(0));
            self.block_start = entry.key.clone();
        }

        let slot = encode_slot(entry, self.block.base_version(), self.block.base_expire());
        self.block.add(&entry.key, &slot);
        self.max_version = self.max_version.max(entry.version);
        self.last_key = Some(entry.key.clone());

        if self.block.estimated_size() >= self.options.block_size {
            self.finish_block()?;
        }
        Ok(())
    }

    /// Write the final block, index and footer, then move the file into place
    pub fn finish(mut self) -> Result<SSTable> {
        if !self.block.is_empty() {
            self.finish_block()?;
        }

        let index_offset = self.offset;
        let mut index = BytesMut::new();
        put_varint64(self.index.len() as u64, &mut index);
        for entry in &self.index {
            put_varint32(entry.start_key.len() as u32, &mut index);
            index.extend_from_slice(&entry.start_key);
            put_varint64(entry.offset, &mut index);
            put_varint32(entry.length, &mut index);
        }
        let index_crc = crc32fast::hash(&index);

        self.writer.write_all(&index)?;
        self.writer.write_all(&index_offset.to_le_bytes())?;
        self.writer.write_all(&self.max_version.to_le_bytes())?;
        self.writer.write_all(&index_crc.to_le_bytes())?;
        self.writer.write_all(MAGIC)?;
        self.writer.flush()?;

        let file = self
            .writer
            .into_inner()
            .map_err(|e| RidgeError::Storage(format!("Failed to flush SSTable: {}", e)))?;
        file.sync_all()?;
        let file_size = file.metadata()?.len();
        drop(file);

        fs::rename(&self.tmp_path, &self.path)?;

        Ok(SSTable {
            path: self.path,
            index: self.index,
            index_offset,
            max_version: self.max_version,
            file_size,
        })
    }

    fn finish_block(&mut self) -> Result<()> {
        let block = std::mem::replace(
            &mut self.block,
            BlockBuilder::new(self.options.restart_interval),
        );
        let bytes = block.finish();
        self.writer.write_all(&bytes)?;

        self.index.push(IndexEntry {
            start_key: std::mem::take(&mut self.block_start),
            offset: self.offset,
            length: bytes.len() as u32,
        });
        self.offset += bytes.len() as u64;
        Ok(())
    }
}
