//! MemTable Module
//!
//! In-memory data structure for recent writes.
//!
//! ## Responsibilities
//! - Fast reads and writes in memory
//! - Concurrent readers alongside a writer
//! - Track size for flush triggers
//! - Ordered snapshot for SSTable creation
//!
//! ## Data Structure Choice
//! A crossbeam `SkipMap` keyed by the raw key bytes. Tombstones are stored as
//! regular entries so that a delete shadows older values on disk until the
//! memtable is flushed.

mod table;

pub use table::MemTable;
