//! Shared data types
//!
//! Entries travel through memtable, WAL, SSTable and compaction; the option and
//! outcome types make up the public read/write API.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

// =============================================================================
// Entry
// =============================================================================

/// A single versioned mutation of a key
///
/// A tombstone has `value == None` and `tombstone == true`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub key: Vec<u8>,
    pub value: Option<Vec<u8>>,
    pub tombstone: bool,
    /// Write-sequence number assigned by the engine
    pub version: u64,
    /// Absolute expiry in unix milliseconds
    pub expire_at: Option<i64>,
}

impl Entry {
    /// A live value
    pub fn put(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>, version: u64) -> Self {
        Self {
            key: key.into(),
            value: Some(value.into()),
            tombstone: false,
            version,
            expire_at: None,
        }
    }

    /// A delete marker
    pub fn tombstone(key: impl Into<Vec<u8>>, version: u64) -> Self {
        Self {
            key: key.into(),
            value: None,
            tombstone: true,
            version,
            expire_at: None,
        }
    }

    pub fn with_expiry(mut self, expire_at: Option<i64>) -> Self {
        self.expire_at = expire_at;
        self
    }

    /// Whether the entry has passed its expiry at `now_ms`
    pub fn is_expired(&self, now_ms: i64) -> bool {
        matches!(self.expire_at, Some(t) if t <= now_ms)
    }

    /// Live (not deleted, not expired) at `now_ms`
    pub fn is_live(&self, now_ms: i64) -> bool {
        !self.tombstone && !self.is_expired(now_ms)
    }

    /// Bytes this entry contributes to the memtable budget
    pub fn charge(&self) -> usize {
        let value_len = if self.tombstone {
            0
        } else {
            self.value.as_ref().map_or(0, Vec::len)
        };
        self.key.len() + value_len + 1
    }

    /// Convert to the record handed back to readers
    pub fn to_record(&self) -> Option<ValueRecord> {
        if self.tombstone {
            return None;
        }
        Some(ValueRecord {
            payload: self.value.clone().unwrap_or_default(),
            version: self.version as i64,
            expire_at: self.expire_at,
        })
    }
}

/// Stored value plus its metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueRecord {
    pub payload: Vec<u8>,
    pub version: i64,
    pub expire_at: Option<i64>,
}

// =============================================================================
// Options & Outcomes
// =============================================================================

/// Options for a write
#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    /// Value expires this long after the write
    pub ttl: Option<Duration>,
    /// Write only if the current version equals this (0 = key absent)
    pub expected_version: Option<u64>,
    /// Force the WAL durable even under a relaxed sync strategy
    pub sync: bool,
}

impl PutOptions {
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl: Some(ttl),
            ..Self::default()
        }
    }
}

/// Options for a delete
#[derive(Debug, Clone, Default)]
pub struct DeleteOptions {
    pub expected_version: Option<u64>,
    pub sync: bool,
}

/// Options for a scan
#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    /// Stop after this many results
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PutOutcome {
    /// The key had no live value before this write
    pub created: bool,
    /// Version assigned to this write
    pub version: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteOutcome {
    /// A live value existed and is now deleted
    pub deleted: bool,
}

// =============================================================================
// Range Scans
// =============================================================================

/// Half-open key range `[from, to)`; `None` means unbounded
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyRange {
    pub from: Option<Vec<u8>>,
    pub to: Option<Vec<u8>>,
}

impl KeyRange {
    pub fn new(from: impl Into<Vec<u8>>, to: impl Into<Vec<u8>>) -> Self {
        Self {
            from: Some(from.into()),
            to: Some(to.into()),
        }
    }

    /// Every key
    pub fn all() -> Self {
        Self::default()
    }

    /// Keys starting with `prefix`
    pub fn prefix(prefix: &[u8]) -> Self {
        let mut end = prefix.to_vec();
        while let Some(last) = end.pop() {
            if last < u8::MAX {
                end.push(last + 1);
                return Self {
                    from: Some(prefix.to_vec()),
                    to: Some(end),
                };
            }
        }
        Self {
            from: Some(prefix.to_vec()),
            to: None,
        }
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        let after_start = self.from.as_deref().map_or(true, |from| key >= from);
        let before_end = self.to.as_deref().map_or(true, |to| key < to);
        after_start && before_end
    }

    /// Whether keys at or beyond `key` can no longer fall in the range
    pub fn is_past_end(&self, key: &[u8]) -> bool {
        self.to.as_deref().map_or(false, |to| key >= to)
    }
}

/// Results of a scan in ascending key order
#[derive(Debug)]
pub struct ScanCursor {
    inner: std::vec::IntoIter<(Vec<u8>, ValueRecord)>,
}

impl ScanCursor {
    pub(crate) fn new(items: Vec<(Vec<u8>, ValueRecord)>) -> Self {
        Self {
            inner: items.into_iter(),
        }
    }

    /// Entries not yet yielded
    pub fn remaining(&self) -> usize {
        self.inner.len()
    }
}

impl Iterator for ScanCursor {
    type Item = (Vec<u8>, ValueRecord);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

/// Current wall clock in unix milliseconds
pub(crate) fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
