//! Storage Module
//!
//! Persistent storage layer: blocks, SSTables and the level map.
//!
//! ## Responsibilities
//! - Encode sorted entries into checksummed, prefix-compressed blocks
//! - Write and reopen SSTable files
//! - Track which tables make up each level
//!
//! ## Layout on Disk
//! ```text
//! {data_dir}/
//!   ├── wal.log
//!   ├── level0-1700000000003.sstable   ← newest flush
//!   ├── level0-1700000000001.sstable
//!   └── level1-1700000000002.sstable   ← compaction output
//! ```

pub mod block;
pub mod manager;
pub mod sstable;

pub use manager::{StorageManager, TableHandle, TableSet};
pub use sstable::{IndexEntry, SSTable, SSTableBuilder, SSTableOptions};
