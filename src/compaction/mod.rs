//! Compaction Module
//!
//! Leveled compaction: once a level holds `compaction_trigger` tables, all of
//! them are merged newest-wins into a single table one level down.
//!
//! ## Responsibilities
//! - Merge the tables of a level (`merge`)
//! - Swap inputs for the output in the level map, then delete the inputs
//! - Run tasks one at a time on a background thread (`worker`)

mod merge;
mod worker;

use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use crate::config::{Config, TombstonePolicy};
use crate::error::Result;
use crate::storage::StorageManager;
use crate::types::now_millis;

pub use merge::{merge_newest_wins, MergeOutput};
pub use worker::CompactionWorker;

/// Settings a compaction pass needs from `Config`
#[derive(Debug, Clone, Copy)]
pub struct CompactionSettings {
    pub trigger: usize,
    pub max_level: u32,
    pub tombstone_policy: TombstonePolicy,
}

impl From<&Config> for CompactionSettings {
    fn from(config: &Config) -> Self {
        Self {
            trigger: config.compaction_trigger,
            max_level: config.max_level,
            tombstone_policy: config.tombstone_policy,
        }
    }
}

/// Report for one finished compaction task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompactionOutcome {
    /// `inputs` tables of `level` merged into `output` at `level + 1`
    Compacted {
        level: u32,
        inputs: usize,
        /// `None` when every entry was dropped
        output: Option<PathBuf>,
        entries_written: usize,
        tombstones_dropped: usize,
    },
    /// The level no longer needed compacting when the task ran
    Skipped { level: u32 },
    Failed { level: u32, error: String },
}

/// Whether `level` is due for compaction in the current table set
pub fn needs_compaction(
    storage: &StorageManager,
    settings: &CompactionSettings,
    level: u32,
) -> bool {
    level < settings.max_level && storage.snapshot().level(level).len() >= settings.trigger
}

/// Merge every table of `level` into one table at `level + 1`
pub fn compact_level(
    storage: &Arc<StorageManager>,
    settings: &CompactionSettings,
    level: u32,
) -> Result<CompactionOutcome> {
    let snapshot = storage.snapshot();
    let inputs = snapshot.level(level).to_vec();
    if level >= settings.max_level || inputs.len() < settings.trigger {
        return Ok(CompactionOutcome::Skipped { level });
    }

    info!(level, tables = inputs.len(), "compacting level");

    let mut runs = Vec::with_capacity(inputs.len());
    for handle in &inputs {
        runs.push(handle.table().get_all_entries()?);
    }

    // Tombstones must survive while an older copy may still exist below
    let drop_tombstones = match settings.tombstone_policy {
        TombstonePolicy::Eager => true,
        TombstonePolicy::LastLevelOnly => !snapshot.has_tables_below(level),
    };
    let merged = merge_newest_wins(runs, drop_tombstones, now_millis());

    // Dropped entries may have carried the highest versions handed out so
    // far; the mark must outlive the inputs
    let inputs_max_version = inputs
        .iter()
        .map(|h| h.table().max_version())
        .max()
        .unwrap_or(0);
    let output = if merged.entries.is_empty() {
        storage.record_version_mark(inputs_max_version)?;
        None
    } else {
        Some(storage.write_table_with_min_version(
            level + 1,
            &merged.entries,
            inputs_max_version,
        )?)
    };
    let output_path = output.as_ref().map(|h| h.path().to_path_buf());

    if let Err(e) = storage.replace(&inputs, output.clone()) {
        if let Some(handle) = output {
            storage.remove_files(&[handle]);
        }
        return Err(e);
    }
    storage.remove_files(&inputs);

    info!(
        level,
        inputs = inputs.len(),
        entries = merged.entries.len(),
        shadowed = merged.shadowed,
        tombstones_dropped = merged.dropped,
        "compaction finished"
    );

    Ok(CompactionOutcome::Compacted {
        level,
        inputs: inputs.len(),
        output: output_path,
        entries_written: merged.entries.len(),
        tombstones_dropped: merged.dropped,
    })
}
