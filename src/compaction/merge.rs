//! Newest-wins merge of SSTable contents

use crate::types::Entry;

/// What a merge produced
#[derive(Debug, Default)]
pub struct MergeOutput {
    pub entries: Vec<Entry>,
    /// Older copies shadowed by a newer one
    pub shadowed: usize,
    /// Tombstones (and expired values) removed
    pub dropped: usize,
}

/// Merge sorted runs into one sorted run with one entry per key.
///
/// `runs[0]` is the newest input; for a key present in several runs the
/// entry from the lowest run index wins. With `drop_tombstones`, tombstones
/// and values expired at `now_ms` are removed from the result.
pub fn merge_newest_wins(
    runs: Vec<Vec<Entry>>,
    drop_tombstones: bool,
    now_ms: i64,
) -> MergeOutput {
    let total: usize = runs.iter().map(Vec::len).sum();
    let mut tagged: Vec<(usize, Entry)> = Vec::with_capacity(total);
    for (source, run) in runs.into_iter().enumerate() {
        tagged.extend(run.into_iter().map(|entry| (source, entry)));
    }
    // Stable order by (key, source): the newest copy of a key comes first
    tagged.sort_by(|(sa, a), (sb, b)| a.key.cmp(&b.key).then(sa.cmp(sb)));

    let mut out = MergeOutput {
        entries: Vec::with_capacity(tagged.len()),
        ..MergeOutput::default()
    };
    let mut last_key: Option<Vec<u8>> = None;
    for (_, entry) in tagged {
        if last_key.as_deref() == Some(entry.key.as_slice()) {
            out.shadowed += 1;
            continue;
        }
        last_key = Some(entry.key.clone());

        if drop_tombstones && !entry.is_live(now_ms) {
            out.dropped += 1;
            continue;
        }
        out.entries.push(entry);
    }
    out
}
