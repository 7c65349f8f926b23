//! Storage Manager
//!
//! Owns the level map of SSTables and the files behind it.
//!
//! ## Responsibilities
//! - Discover existing SSTables on startup (`level<N>-<millis>.sstable`)
//! - Hand out immutable `TableSet` snapshots to readers
//! - Name, write and register new tables (flush and compaction outputs)
//! - Swap compaction inputs for outputs in one step, then delete the inputs
//! - Persist the version mark left behind when compaction drops every entry

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::error::{Result, RidgeError};
use crate::types::Entry;

use super::{SSTable, SSTableBuilder, SSTableOptions};

const TABLE_SUFFIX: &str = ".sstable";
const TMP_SUFFIX: &str = ".sstable.tmp";
const VERSION_MARK_FILE: &str = "version.mark";

// =============================================================================
// Table Handles
// =============================================================================

/// An SSTable together with its place in the level map
#[derive(Debug)]
pub struct TableHandle {
    level: u32,
    /// Creation timestamp from the file name; unique per directory
    timestamp: u64,
    table: SSTable,
}

impl TableHandle {
    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn table(&self) -> &SSTable {
        &self.table
    }

    pub fn path(&self) -> &Path {
        self.table.path()
    }
}

// =============================================================================
// TableSet
// =============================================================================

/// Immutable snapshot of the level map
///
/// `levels[n]` lists the tables of level `n`, newest first.
#[derive(Debug, Default)]
pub struct TableSet {
    version: u64,
    levels: Vec<Vec<Arc<TableHandle>>>,
}

impl TableSet {
    /// Monotonic counter bumped by every swap
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Tables of `level`, newest first
    pub fn level(&self, level: u32) -> &[Arc<TableHandle>] {
        self.levels
            .get(level as usize)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Number of levels that have ever held a table
    pub fn depth(&self) -> u32 {
        self.levels.len() as u32
    }

    /// Every table in read order: levels ascending, newest first within a level
    pub fn iter(&self) -> impl Iterator<Item = &Arc<TableHandle>> {
        self.levels.iter().flatten()
    }

    pub fn table_count(&self) -> usize {
        self.levels.iter().map(Vec::len).sum()
    }

    /// Whether any level deeper than `level` holds a table
    pub fn has_tables_below(&self, level: u32) -> bool {
        self.levels
            .iter()
            .skip(level as usize + 1)
            .any(|tables| !tables.is_empty())
    }

    /// Highest version stored in any table
    pub fn max_version(&self) -> u64 {
        self.iter()
            .map(|h| h.table.max_version())
            .max()
            .unwrap_or(0)
    }

    fn with_added(&self, handle: Arc<TableHandle>) -> TableSet {
        let mut levels = self.levels.clone();
        let level = handle.level as usize;
        if levels.len() <= level {
            levels.resize_with(level + 1, Vec::new);
        }
        levels[level].insert(0, handle);
        TableSet {
            version: self.version + 1,
            levels,
        }
    }

    fn contains(&self, handle: &Arc<TableHandle>) -> bool {
        self.level(handle.level)
            .iter()
            .any(|h| Arc::ptr_eq(h, handle))
    }

    fn without(&self, removed: &[Arc<TableHandle>]) -> TableSet {
        let levels = self
            .levels
            .iter()
            .map(|tables| {
                tables
                    .iter()
                    .filter(|h| !removed.iter().any(|r| Arc::ptr_eq(r, h)))
                    .cloned()
                    .collect()
            })
            .collect();
        TableSet {
            version: self.version + 1,
            levels,
        }
    }
}

// =============================================================================
// StorageManager
// =============================================================================

/// Manages the storage layer
///
/// ## Concurrency:
/// - `current`: readers clone the `Arc` under a brief read lock; flush and
///   compaction build a new set and swap it under the write lock
/// - `last_timestamp`: atomic, keeps file names strictly increasing
/// - `version_mark`: highest version ever dropped by compaction; the mutex
///   serializes rewrites of the mark file
pub struct StorageManager {
    data_dir: PathBuf,
    options: SSTableOptions,
    current: RwLock<Arc<TableSet>>,
    last_timestamp: AtomicU64,
    version_mark: Mutex<u64>,
}

impl StorageManager {
    /// Open or create storage in the given directory
    ///
    /// On startup:
    /// 1. Create directory if it doesn't exist
    /// 2. Remove leftover `.sstable.tmp` files from interrupted writes
    /// 3. Open every `level<N>-<millis>.sstable` (loads indexes into RAM)
    /// 4. Order each level newest first
    pub fn open(path: &Path, options: SSTableOptions) -> Result<Self> {
        fs::create_dir_all(path)?;

        let mut found: Vec<(u32, u64, PathBuf)> = Vec::new();
        for entry in fs::read_dir(path)? {
            let file_path = entry?.path();
            if !file_path.is_file() {
                continue;
            }
            let name = match file_path.file_name().and_then(|n| n.to_str()) {
                Some(name) => name,
                None => continue,
            };
            if name.ends_with(TMP_SUFFIX) {
                warn!(path = %file_path.display(), "removing incomplete SSTable");
                if let Err(e) = fs::remove_file(&file_path) {
                    warn!(path = %file_path.display(), error = %e, "failed to remove incomplete SSTable");
                }
                continue;
            }
            if let Some((level, timestamp)) = parse_table_name(name) {
                found.push((level, timestamp, file_path));
            }
        }

        // Newest first; flattening into levels keeps this order per level
        found.sort_by(|a, b| b.1.cmp(&a.1));

        let mut levels: Vec<Vec<Arc<TableHandle>>> = Vec::new();
        let mut last_timestamp = 0;
        for (level, timestamp, file_path) in found {
            let table = SSTable::open(&file_path)?;
            debug!(
                path = %file_path.display(),
                level,
                blocks = table.block_count(),
                "opened SSTable"
            );
            if levels.len() <= level as usize {
                levels.resize_with(level as usize + 1, Vec::new);
            }
            levels[level as usize].push(Arc::new(TableHandle {
                level,
                timestamp,
                table,
            }));
            last_timestamp = last_timestamp.max(timestamp);
        }

        let set = TableSet { version: 0, levels };
        if set.table_count() > 0 {
            info!(
                tables = set.table_count(),
                levels = set.depth(),
                "loaded existing SSTables"
            );
        }

        let version_mark = read_version_mark(path)?;

        Ok(Self {
            data_dir: path.to_path_buf(),
            options,
            current: RwLock::new(Arc::new(set)),
            last_timestamp: AtomicU64::new(last_timestamp),
            version_mark: Mutex::new(version_mark),
        })
    }

    /// Current level map
    pub fn snapshot(&self) -> Arc<TableSet> {
        Arc::clone(&*self.current.read())
    }

    /// Highest version ever written, including versions whose entries
    /// compaction has since dropped
    pub fn max_version(&self) -> u64 {
        self.snapshot().max_version().max(*self.version_mark.lock())
    }

    /// Durably record that versions up to `version` have been handed out
    pub fn record_version_mark(&self, version: u64) -> Result<()> {
        let mut mark = self.version_mark.lock();
        if version <= *mark {
            return Ok(());
        }
        let path = self.data_dir.join(VERSION_MARK_FILE);
        let tmp_path = path.with_extension("mark.tmp");
        let mut file = File::create(&tmp_path)?;
        file.write_all(&version.to_le_bytes())?;
        file.sync_all()?;
        drop(file);
        fs::rename(&tmp_path, &path)?;
        *mark = version;
        debug!(version, "recorded version mark");
        Ok(())
    }

    /// Write `entries` (sorted, unique keys) to a new table at `level`.
    /// The table is not visible to readers until registered.
    pub fn write_table(&self, level: u32, entries: &[Entry]) -> Result<Arc<TableHandle>> {
        self.write_table_with_min_version(level, entries, 0)
    }

    /// Like `write_table`, with the footer's max version raised to at least
    /// `min_version`
    pub fn write_table_with_min_version(
        &self,
        level: u32,
        entries: &[Entry],
        min_version: u64,
    ) -> Result<Arc<TableHandle>> {
        let timestamp = self.next_timestamp();
        let path = self.data_dir.join(table_file_name(level, timestamp));
        let mut builder = SSTableBuilder::new(&path, self.options)?.with_min_version(min_version);
        for entry in entries {
            builder.add(entry)?;
        }
        let table = builder.finish()?;
        debug!(
            path = %path.display(),
            level,
            entries = entries.len(),
            bytes = table.file_size(),
            "wrote SSTable"
        );
        Ok(Arc::new(TableHandle {
            level,
            timestamp,
            table,
        }))
    }

    /// Make a freshly written table visible as the newest in its level
    pub fn register(&self, handle: Arc<TableHandle>) {
        let mut current = self.current.write();
        *current = Arc::new(current.with_added(handle));
    }

    /// Flush sorted memtable contents to a new level-0 table
    pub fn flush(&self, entries: &[Entry]) -> Result<Arc<TableHandle>> {
        let handle = self.write_table(0, entries)?;
        self.register(Arc::clone(&handle));
        Ok(handle)
    }

    /// Atomically remove `inputs` and add `output` (if any)
    ///
    /// Fails without changing anything if an input is no longer registered.
    pub fn replace(
        &self,
        inputs: &[Arc<TableHandle>],
        output: Option<Arc<TableHandle>>,
    ) -> Result<()> {
        let mut current = self.current.write();
        if let Some(missing) = inputs.iter().find(|h| !current.contains(h)) {
            return Err(RidgeError::Compaction(format!(
                "input {} is no longer in the table set",
                missing.path().display()
            )));
        }
        let next = current.without(inputs);
        *current = Arc::new(match output {
            Some(handle) => next.with_added(handle),
            None => next,
        });
        Ok(())
    }

    /// Delete table files, logging failures
    pub fn remove_files(&self, handles: &[Arc<TableHandle>]) {
        for handle in handles {
            match fs::remove_file(handle.path()) {
                Ok(()) => debug!(path = %handle.path().display(), "deleted SSTable"),
                Err(e) => warn!(
                    path = %handle.path().display(),
                    error = %e,
                    "failed to delete SSTable"
                ),
            }
        }
    }

    /// Get the number of SSTables
    pub fn sstable_count(&self) -> usize {
        self.snapshot().table_count()
    }

    /// Get the data directory path
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    /// Wall-clock millis, bumped past the previous value when the clock
    /// has not advanced
    fn next_timestamp(&self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        let mut last = self.last_timestamp.load(Ordering::SeqCst);
        loop {
            let next = now.max(last + 1);
            match self.last_timestamp.compare_exchange(
                last,
                next,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return next,
                Err(actual) => last = actual,
            }
        }
    }
}

/// Version mark stored by `record_version_mark`, 0 when absent
fn read_version_mark(dir: &Path) -> Result<u64> {
    let mut file = match File::open(dir.join(VERSION_MARK_FILE)) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };
    let mut buf = [0u8; 8];
    file.read_exact(&mut buf).map_err(|e| {
        RidgeError::Storage(format!("unreadable {}: {}", VERSION_MARK_FILE, e))
    })?;
    Ok(u64::from_le_bytes(buf))
}

/// "level2-1700000000000.sstable"
pub fn table_file_name(level: u32, timestamp: u64) -> String {
    format!("level{}-{}{}", level, timestamp, TABLE_SUFFIX)
}

/// "level2-1700000000000.sstable" → Some((2, 1700000000000))
pub fn parse_table_name(name: &str) -> Option<(u32, u64)> {
    let stem = name.strip_suffix(TABLE_SUFFIX)?;
    let (level, timestamp) = stem.strip_prefix("level")?.split_once('-')?;
    Some((level.parse().ok()?, timestamp.parse().ok()?))
}
