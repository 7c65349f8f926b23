//! Configuration for RidgeKV
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

use crate::error::{Result, RidgeError};

/// Main configuration for a RidgeKV instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all data files
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── wal.log                      (write-ahead log)
    ///     └── level{N}-{millis}.sstable    (one file per SSTable)
    pub data_dir: PathBuf,

    // -------------------------------------------------------------------------
    // WAL Configuration
    // -------------------------------------------------------------------------
    /// Sync strategy: how often to fsync WAL
    pub wal_sync_strategy: WalSyncStrategy,

    // -------------------------------------------------------------------------
    // MemTable Configuration
    // -------------------------------------------------------------------------
    /// Max size of memtable before flush (in bytes)
    pub memtable_size_limit: usize,

    // -------------------------------------------------------------------------
    // SSTable Configuration
    // -------------------------------------------------------------------------
    /// Target size of a data block (in bytes)
    pub block_size: usize,

    /// Every N-th entry of a block stores its full key
    pub restart_interval: usize,

    // -------------------------------------------------------------------------
    // Compaction Configuration
    // -------------------------------------------------------------------------
    /// Number of SSTables in a level that triggers its compaction
    pub compaction_trigger: usize,

    /// Deepest level; tables there are never compacted further
    pub max_level: u32,

    /// When compaction may discard tombstones
    pub tombstone_policy: TombstonePolicy,
}

/// WAL sync strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalSyncStrategy {
    /// fsync after every write (safest, slowest)
    EveryWrite,

    /// fsync after N uncommitted entries (balanced durability/performance)
    EveryNEntries { count: usize },
}

/// Tombstone retention during compaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TombstonePolicy {
    /// Drop tombstones only when no deeper level holds any table
    LastLevelOnly,

    /// Drop tombstones at every compaction
    Eager,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./ridgekv_data"),
            wal_sync_strategy: WalSyncStrategy::EveryWrite,
            memtable_size_limit: 4 * 1024 * 1024, // 4 MB
            block_size: 4096,
            restart_interval: 16,
            compaction_trigger: 4,
            max_level: 4,
            tombstone_policy: TombstonePolicy::LastLevelOnly,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.memtable_size_limit == 0 {
            return Err(RidgeError::Config("memtable_size_limit must be > 0".into()));
        }
        if self.block_size == 0 {
            return Err(RidgeError::Config("block_size must be > 0".into()));
        }
        if self.restart_interval == 0 {
            return Err(RidgeError::Config("restart_interval must be > 0".into()));
        }
        if self.compaction_trigger < 2 {
            return Err(RidgeError::Config("compaction_trigger must be >= 2".into()));
        }
        if let WalSyncStrategy::EveryNEntries { count: 0 } = self.wal_sync_strategy {
            return Err(RidgeError::Config("EveryNEntries count must be > 0".into()));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for all storage)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the WAL sync strategy
    pub fn wal_sync_strategy(mut self, strategy: WalSyncStrategy) -> Self {
        self.config.wal_sync_strategy = strategy;
        self
    }

    /// Set the memtable size limit (in bytes)
    pub fn memtable_size_limit(mut self, size: usize) -> Self {
        self.config.memtable_size_limit = size;
        self
    }

    /// Set the target block size (in bytes)
    pub fn block_size(mut self, size: usize) -> Self {
        self.config.block_size = size;
        self
    }

    /// Set the restart interval for prefix compression
    pub fn restart_interval(mut self, interval: usize) -> Self {
        self.config.restart_interval = interval;
        self
    }

    /// Set the per-level table count that triggers compaction
    pub fn compaction_trigger(mut self, count: usize) -> Self {
        self.config.compaction_trigger = count;
        self
    }

    /// Set the deepest level
    pub fn max_level(mut self, level: u32) -> Self {
        self.config.max_level = level;
        self
    }

    /// Set the tombstone retention policy
    pub fn tombstone_policy(mut self, policy: TombstonePolicy) -> Self {
        self.config.tombstone_policy = policy;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
