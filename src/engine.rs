//! Engine Module
//!
//! The core storage engine that coordinates all components.
//!
//! ## Responsibilities
//! - Coordinate WAL, MemTable, and Storage
//! - Handle concurrent read/write access
//! - Trigger flushes when MemTable is full
//! - Hand full levels to the compaction worker
//! - Manage crash recovery on startup

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::Receiver;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::compaction::{needs_compaction, CompactionOutcome, CompactionSettings, CompactionWorker};
use crate::config::{Config, WalSyncStrategy};
use crate::error::{Result, RidgeError};
use crate::memtable::MemTable;
use crate::storage::{SSTableOptions, StorageManager, TableSet};
use crate::store::KeyValueStore;
use crate::types::{
    now_millis, DeleteOptions, DeleteOutcome, Entry, KeyRange, PutOptions, PutOutcome,
    ReadOptions, ScanCursor, ValueRecord,
};
use crate::wal::{FileWal, OpType, WriteAheadLog};

/// The main storage engine
///
/// ## Concurrency Model: Single-Writer / Multiple-Reader (SWMR)
///
/// - **Writes** (put/delete/flush): Serialized by `write_lock`
///   - Only ONE write operation at a time, so WAL order is memtable order
///   - Must acquire: write_lock → WAL → memtable → storage (on flush)
///
/// - **Reads** (get/scan): Never take `write_lock`
///   - MemTable is a concurrent skip list
///   - SSTables are read through an immutable `TableSet` snapshot; a table
///     deleted by compaction mid-read triggers one retry on a fresh snapshot
///
/// - **Compaction**: One background thread; swaps the table set atomically
pub struct Engine {
    /// Engine configuration
    config: Config,

    /// Write-ahead log for durability
    wal: Box<dyn WriteAheadLog>,

    /// In-memory table for recent writes
    memtable: MemTable,

    /// Level map and SSTable files
    storage: Arc<StorageManager>,

    /// Background compaction thread
    compactor: CompactionWorker,

    compaction_settings: CompactionSettings,

    /// Serializes write operations (put/delete/flush)
    write_lock: Mutex<()>,
}

/// Point-in-time counters for diagnostics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStats {
    pub memtable_entries: usize,
    pub memtable_bytes: usize,
    /// Table count per level, level 0 first
    pub tables_per_level: Vec<usize>,
    pub table_set_version: u64,
    pub total_table_bytes: u64,
}

impl Engine {
    // =========================================================================
    // Internal Path Constants
    // =========================================================================
    const WAL_FILENAME: &'static str = "wal.log";

    /// Open or create an engine with the given config
    ///
    /// On startup:
    /// 1. Open/create data directory
    /// 2. Load existing SSTables
    /// 3. Replay the WAL and flush what it held
    /// 4. Start the compaction worker
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.data_dir)?;

        let wal_path = config.data_dir.join(Self::WAL_FILENAME);
        let wal = FileWal::open(&wal_path, config.wal_sync_strategy)?;
        Self::open_with_wal(config, Box::new(wal))
    }

    /// Open with a path (convenience method)
    ///
    /// Uses default config with the specified data directory
    pub fn open_path(path: &Path) -> Result<Self> {
        Self::open(Config::builder().data_dir(path).build())
    }

    /// Open with a caller-supplied WAL implementation
    pub fn open_with_wal(config: Config, wal: Box<dyn WriteAheadLog>) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.data_dir)?;

        let storage = Arc::new(StorageManager::open(
            &config.data_dir,
            SSTableOptions::from(&config),
        )?);
        let memtable = MemTable::new(config.memtable_size_limit);

        let recovery = wal.recover(&mut |record| memtable.set(record.to_entry()))?;

        // Versions must keep increasing across restarts even when the WAL
        // was cleared by the last flush
        let last_version = storage.max_version().max(recovery.last_sequence);
        wal.resume_after(last_version);

        let compaction_settings = CompactionSettings::from(&config);
        let compactor = CompactionWorker::spawn(Arc::clone(&storage), compaction_settings)?;

        let engine = Self {
            config,
            wal,
            memtable,
            storage,
            compactor,
            compaction_settings,
            write_lock: Mutex::new(()),
        };

        // Make recovered data durable in an SSTable, then drop the old log
        if !engine.memtable.is_empty() {
            info!(
                entries = engine.memtable.len(),
                "flushing recovered WAL entries"
            );
            let _guard = engine.write_lock.lock();
            engine.flush_locked()?;
        } else {
            engine.compact()?;
        }

        info!(
            data_dir = %engine.config.data_dir.display(),
            tables = engine.storage.sstable_count(),
            last_version,
            "engine opened"
        );
        Ok(engine)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Get the live value of a key
    ///
    /// Search order:
    /// 1. MemTable (most recent writes)
    /// 2. SSTables: levels ascending, newest to oldest within a level
    ///
    /// A tombstone or an expired entry ends the search with `None`.
    pub fn get(&self, key: &[u8]) -> Result<Option<ValueRecord>> {
        let now = now_millis();
        Ok(self
            .lookup(key)?
            .filter(|entry| entry.is_live(now))
            .and_then(|entry| entry.to_record()))
    }

    /// Live entries in `[range.from, range.to)`, ascending by key
    pub fn scan(&self, range: KeyRange, options: &ReadOptions) -> Result<ScanCursor> {
        let now = now_millis();
        let mut runs = vec![self.memtable.range(&range)];

        let tables = match self.collect_ranges(&range, &self.storage.snapshot(), false) {
            Err(e) if e.is_race() => {
                debug!(error = %e, "table vanished during scan, retrying");
                self.collect_ranges(&range, &self.storage.snapshot(), true)?
            }
            other => other?,
        };
        runs.extend(tables);

        let merged = crate::compaction::merge_newest_wins(runs, true, now);
        let limit = options.limit.unwrap_or(usize::MAX);
        let items = merged
            .entries
            .into_iter()
            .filter_map(|entry| {
                let record = entry.to_record()?;
                Some((entry.key, record))
            })
            .take(limit)
            .collect();
        Ok(ScanCursor::new(items))
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Put a key-value pair
    ///
    /// Steps:
    /// 1. Acquire write lock
    /// 2. Check `expected_version` against the current live version
    /// 3. Write to WAL (durability); its sequence id is the new version
    /// 4. Write to MemTable
    /// 5. Flush if the MemTable is full
    pub fn put(&self, key: &[u8], value: &[u8], options: &PutOptions) -> Result<PutOutcome> {
        let _write_guard = self.write_lock.lock();

        let now = now_millis();
        let current = self.live_entry(key, now)?;
        check_expected_version(options.expected_version, current.as_ref())?;

        let expire_at = options.ttl.map(|ttl| expiry_after(now, ttl));
        let entry = Entry::put(key, value, 0).with_expiry(expire_at);
        let version = self.append(entry, options.sync)?;

        Ok(PutOutcome {
            created: current.is_none(),
            version,
        })
    }

    /// Delete a key
    ///
    /// Writes a tombstone through the same path as `put`. Deleting an absent
    /// key still records the tombstone.
    pub fn delete(&self, key: &[u8], options: &DeleteOptions) -> Result<DeleteOutcome> {
        let _write_guard = self.write_lock.lock();

        let current = self.live_entry(key, now_millis())?;
        check_expected_version(options.expected_version, current.as_ref())?;

        self.append(Entry::tombstone(key, 0), options.sync)?;

        Ok(DeleteOutcome {
            deleted: current.is_some(),
        })
    }

    /// Flush memtable to disk (public API)
    ///
    /// Forces a flush regardless of memtable size
    pub fn flush(&self) -> Result<()> {
        let _write_guard = self.write_lock.lock();
        self.flush_locked()
    }

    // =========================================================================
    // Compaction
    // =========================================================================

    /// Queue compaction for every level that has reached the trigger.
    /// Returns how many levels were queued.
    pub fn compact(&self) -> Result<usize> {
        let mut queued = 0;
        for level in 0..self.compaction_settings.max_level {
            if needs_compaction(&self.storage, &self.compaction_settings, level) {
                self.compactor.submit(level)?;
                queued += 1;
            }
        }
        Ok(queued)
    }

    /// Queue a compaction check for one level
    pub fn compact_level(&self, level: u32) -> Result<()> {
        self.compactor.submit(level)
    }

    /// Block until queued compactions have finished
    pub fn wait_for_compactions(&self) {
        self.compactor.wait_idle();
    }

    /// Reports from finished compaction tasks
    pub fn compaction_outcomes(&self) -> Receiver<CompactionOutcome> {
        self.compactor.outcomes()
    }

    /// Close the engine gracefully
    ///
    /// Flushes any pending data, syncs the WAL and waits for compaction
    pub fn close(self) -> Result<()> {
        if !self.memtable.is_empty() {
            self.flush()?;
        }
        self.wal.sync()?;
        self.wait_for_compactions();
        Ok(())
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    /// Get the data directory path
    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    /// Get the current memtable size
    pub fn memtable_size(&self) -> usize {
        self.memtable.size()
    }

    /// Get the memtable entry count
    pub fn memtable_entry_count(&self) -> usize {
        self.memtable.len()
    }

    /// Get the number of SSTables
    pub fn sstable_count(&self) -> usize {
        self.storage.sstable_count()
    }

    /// Current level map
    pub fn table_set(&self) -> Arc<TableSet> {
        self.storage.snapshot()
    }

    pub fn stats(&self) -> EngineStats {
        let tables = self.storage.snapshot();
        EngineStats {
            memtable_entries: self.memtable.len(),
            memtable_bytes: self.memtable.size(),
            tables_per_level: (0..tables.depth())
                .map(|level| tables.level(level).len())
                .collect(),
            table_set_version: tables.version(),
            total_table_bytes: tables.iter().map(|h| h.table().file_size()).sum(),
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    /// WAL then memtable; called with the write lock held
    fn append(&self, mut entry: Entry, sync: bool) -> Result<u64> {
        let version = self.wal.write(&entry, OpType::for_entry(&entry))?;
        if sync && self.config.wal_sync_strategy != WalSyncStrategy::EveryWrite {
            self.wal.sync()?;
        }

        entry.version = version;
        self.memtable.set(entry);

        if self.memtable.is_full() {
            self.flush_locked()?;
        }
        Ok(version)
    }

    /// Internal flush implementation (called with write lock held)
    fn flush_locked(&self) -> Result<()> {
        // Skip if memtable is empty
        if self.memtable.is_empty() {
            return Ok(());
        }

        let entries = self.memtable.snapshot_and_clear();
        let handle = match self.storage.flush(&entries) {
            Ok(handle) => handle,
            Err(e) => {
                self.memtable.restore_frozen();
                return Err(e);
            }
        };
        self.memtable.release_frozen();

        // Entries are now durable in the SSTable
        self.wal.clear()?;

        info!(
            path = %handle.path().display(),
            entries = entries.len(),
            "flushed memtable"
        );

        self.compact()?;
        Ok(())
    }

    /// Newest entry for `key` (tombstones included), memtable first
    fn lookup(&self, key: &[u8]) -> Result<Option<Entry>> {
        if let Some(entry) = self.memtable.get(key) {
            return Ok(Some(entry));
        }

        match self.search_tables(key, &self.storage.snapshot(), false) {
            Err(e) if e.is_race() => {
                debug!(error = %e, "table vanished during get, retrying");
                self.search_tables(key, &self.storage.snapshot(), true)
            }
            other => other,
        }
    }

    /// The entry a reader would currently see as live
    fn live_entry(&self, key: &[u8], now: i64) -> Result<Option<Entry>> {
        Ok(self.lookup(key)?.filter(|entry| entry.is_live(now)))
    }

    fn search_tables(
        &self,
        key: &[u8],
        tables: &TableSet,
        skip_vanished: bool,
    ) -> Result<Option<Entry>> {
        for handle in tables.iter() {
            match handle.table().search(key) {
                Ok(Some(entry)) => return Ok(Some(entry)),
                Ok(None) => continue,
                Err(e) if skip_vanished && e.is_race() => {
                    debug!(path = %handle.path().display(), "skipping vanished table");
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }

    fn collect_ranges(
        &self,
        range: &KeyRange,
        tables: &TableSet,
        skip_vanished: bool,
    ) -> Result<Vec<Vec<Entry>>> {
        let mut runs = Vec::with_capacity(tables.table_count());
        for handle in tables.iter() {
            match handle.table().entries_in_range(range) {
                Ok(entries) => runs.push(entries),
                Err(e) if skip_vanished && e.is_race() => {
                    debug!(path = %handle.path().display(), "skipping vanished table");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(runs)
    }
}

fn check_expected_version(expected: Option<u64>, current: Option<&Entry>) -> Result<()> {
    let actual = current.map_or(0, |entry| entry.version);
    match expected {
        Some(expected) if expected != actual => {
            Err(RidgeError::VersionMismatch { expected, actual })
        }
        _ => Ok(()),
    }
}

/// Absolute expiry for a TTL starting at `now`; saturates at `i64::MAX`
fn expiry_after(now: i64, ttl: Duration) -> i64 {
    i64::try_from(ttl.as_millis())
        .ok()
        .and_then(|ms| now.checked_add(ms))
        .unwrap_or(i64::MAX)
}

impl KeyValueStore for Engine {
    fn get(&self, key: &[u8]) -> Result<Option<ValueRecord>> {
        Engine::get(self, key)
    }

    fn put(&self, key: &[u8], value: &[u8], options: &PutOptions) -> Result<PutOutcome> {
        Engine::put(self, key, value, options)
    }

    fn delete(&self, key: &[u8], options: &DeleteOptions) -> Result<DeleteOutcome> {
        Engine::delete(self, key, options)
    }

    fn flush(&self) -> Result<()> {
        Engine::flush(self)
    }

    fn scan(&self, range: KeyRange, options: &ReadOptions) -> Result<ScanCursor> {
        Engine::scan(self, range, options)
    }
}
