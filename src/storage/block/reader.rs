//! Block Reader
//!
//! Verifies and decodes a finished block, then serves point lookups through
//! restart-point binary search and full scans for compaction.

use std::ops::Range;

use bytes::Bytes;
use tracing::warn;

use super::{CHECKSUM_SIZE, CRC32C};
use crate::codec::varint::MAX_VARINT64_LEN;
use crate::codec::{get_varint32, get_varint64, read_varint_backward};
use crate::error::{Result, RidgeError};

/// A decoded, checksum-verified block
#[derive(Debug, Clone)]
pub struct Block {
    /// Entry region only (trailer and checksum stripped)
    data: Bytes,
    restarts: Vec<u32>,
    entry_count: usize,
    base_version: i64,
    base_expire: i64,
}

impl Block {
    /// Verify the checksum and parse the trailer
    pub fn decode(bytes: Bytes) -> Result<Self> {
        if bytes.len() < CHECKSUM_SIZE + 4 {
            return Err(RidgeError::CorruptBlock(format!(
                "block of {} bytes is too short",
                bytes.len()
            )));
        }
        let body_len = bytes.len() - CHECKSUM_SIZE;
        let mut stored = [0u8; CHECKSUM_SIZE];
        stored.copy_from_slice(&bytes[body_len..]);
        let stored = u32::from_le_bytes(stored);
        let computed = CRC32C.checksum(&bytes[..body_len]);
        if stored != computed {
            return Err(RidgeError::CorruptBlock(format!(
                "checksum mismatch: stored {:#010x}, computed {:#010x}",
                stored, computed
            )));
        }

        let body = &bytes[..body_len];
        let (base_expire, p) = read_varint_backward(body, body_len - 1).map_err(corrupt)?;
        let (base_version, p) = read_varint_backward(body, before(p)?).map_err(corrupt)?;

        // A block with no entries: entry_count = 0, restart_count = 0
        if p == 2 && body[0] == 0 && body[1] == 0 {
            return Ok(Self {
                data: Bytes::new(),
                restarts: Vec::new(),
                entry_count: 0,
                base_version: base_version as i64,
                base_expire: base_expire as i64,
            });
        }

        // Restart offsets, read right-to-left until the first one (always 0)
        let mut restarts = Vec::new();
        let mut p = p;
        loop {
            let (offset, start) = read_varint_backward(body, before(p)?).map_err(corrupt)?;
            if let Some(&next) = restarts.last() {
                if offset >= u64::from(next) {
                    return Err(RidgeError::CorruptBlock(
                        "restart offsets are not ascending".into(),
                    ));
                }
            }
            restarts.push(offset as u32);
            p = start;
            if offset == 0 {
                break;
            }
        }
        restarts.reverse();

        let (restart_count, p) = read_varint_backward(body, before(p)?).map_err(corrupt)?;
        if restart_count as usize != restarts.len() {
            return Err(RidgeError::CorruptBlock(format!(
                "restart count {} does not match {} offsets",
                restart_count,
                restarts.len()
            )));
        }

        // entry_count ends at q; where it starts depends on where the data ends
        let q = before(p)?;
        if body[q] & 0x80 != 0 {
            return Err(RidgeError::CorruptBlock("entry count is unterminated".into()));
        }
        let mut s_min = q;
        while s_min > 0 && q - s_min + 1 < MAX_VARINT64_LEN && body[s_min - 1] & 0x80 != 0 {
            s_min -= 1;
        }
        let last_restart = restarts.last().map_or(0, |o| *o as usize);
        let data_end = find_data_end(body, last_restart, s_min, q)?;

        let mut count_bytes = &body[data_end..=q];
        let entry_count = get_varint64(&mut count_bytes).map_err(corrupt)? as usize;
        if entry_count < restarts.len() {
            return Err(RidgeError::CorruptBlock(format!(
                "{} entries cannot have {} restarts",
                entry_count,
                restarts.len()
            )));
        }

        Ok(Self {
            data: bytes.slice(..data_end),
            restarts,
            entry_count,
            base_version: base_version as i64,
            base_expire: base_expire as i64,
        })
    }

    pub fn len(&self) -> usize {
        self.entry_count
    }

    pub fn is_empty(&self) -> bool {
        self.entry_count == 0
    }

    pub fn base_version(&self) -> i64 {
        self.base_version
    }

    pub fn base_expire(&self) -> i64 {
        self.base_expire
    }

    /// Look up `key`, returning its value bytes
    ///
    /// Inconsistent restart metadata falls back to a linear scan; a block that
    /// cannot be scanned at all reports the key as absent.
    pub fn search(&self, key: &[u8]) -> Option<Bytes> {
        match self.search_restarts(key) {
            Ok(found) => found,
            Err(e) => {
                warn!(error = %e, "restart search failed, scanning block linearly");
                match self.scan_from(0, Vec::new(), key) {
                    Ok(found) => found,
                    Err(e) => {
                        warn!(error = %e, "block scan failed, treating key as absent");
                        None
                    }
                }
            }
        }
    }

    /// All entries in key order
    pub fn entries(&self) -> Result<Vec<(Vec<u8>, Bytes)>> {
        let mut out = Vec::with_capacity(self.entry_count);
        let mut last_key = Vec::new();
        let mut pos = 0;
        let mut next_restart = 0;
        while pos < self.data.len() {
            let at_restart = self.restarts.get(next_restart) == Some(&(pos as u32));
            let (next, shared, value) = self.read_entry(pos, &mut last_key)?;
            if at_restart {
                if shared != 0 {
                    return Err(RidgeError::CorruptBlock(format!(
                        "restart at {} has shared prefix {}",
                        pos, shared
                    )));
                }
                next_restart += 1;
            }
            out.push((last_key.clone(), self.data.slice(value)));
            pos = next;
        }
        if out.len() != self.entry_count || next_restart != self.restarts.len() {
            return Err(RidgeError::CorruptBlock(format!(
                "decoded {} entries and {} restarts, trailer says {} and {}",
                out.len(),
                next_restart,
                self.entry_count,
                self.restarts.len()
            )));
        }
        Ok(out)
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn search_restarts(&self, key: &[u8]) -> Result<Option<Bytes>> {
        if self.restarts.is_empty() {
            return Ok(None);
        }

        // Greatest restart whose full key is <= key
        let mut lo = 0usize;
        let mut hi = self.restarts.len();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let restart_key = self.restart_key(mid)?;
            if restart_key.as_slice() <= key {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        if lo == 0 {
            return Ok(None);
        }

        self.scan_from(self.restarts[lo - 1] as usize, Vec::new(), key)
    }

    fn restart_key(&self, index: usize) -> Result<Vec<u8>> {
        let mut key = Vec::new();
        let (_, shared, _) = self.read_entry(self.restarts[index] as usize, &mut key)?;
        if shared != 0 {
            return Err(RidgeError::CorruptBlock(format!(
                "restart {} has shared prefix {}",
                index, shared
            )));
        }
        Ok(key)
    }

    fn scan_from(
        &self,
        mut pos: usize,
        mut last_key: Vec<u8>,
        key: &[u8],
    ) -> Result<Option<Bytes>> {
        while pos < self.data.len() {
            let (next, _, value) = self.read_entry(pos, &mut last_key)?;
            match last_key.as_slice().cmp(key) {
                std::cmp::Ordering::Equal => return Ok(Some(self.data.slice(value))),
                std::cmp::Ordering::Greater => return Ok(None),
                std::cmp::Ordering::Less => pos = next,
            }
        }
        Ok(None)
    }

    /// Decode the entry at `pos`, rebuilding its key in `last_key`.
    /// Returns the next position, the shared length, and the value range.
    fn read_entry(
        &self,
        pos: usize,
        last_key: &mut Vec<u8>,
    ) -> Result<(usize, usize, Range<usize>)> {
        let (next, shared, key_range, value) = parse_entry(&self.data, pos)?;
        if shared > last_key.len() {
            return Err(RidgeError::CorruptBlock(format!(
                "entry at {} shares {} bytes of a {}-byte key",
                pos,
                shared,
                last_key.len()
            )));
        }
        last_key.truncate(shared);
        last_key.extend_from_slice(&self.data[key_range]);
        Ok((next, shared, value))
    }
}

/// Parse entry framing at `pos` within `data`.
/// Returns (next_pos, shared, unshared key range, value range).
fn parse_entry(data: &[u8], pos: usize) -> Result<(usize, usize, Range<usize>, Range<usize>)> {
    let mut cursor = data.get(pos..).ok_or_else(|| {
        RidgeError::CorruptBlock(format!("entry offset {} is past the data", pos))
    })?;
    let available = cursor.len();
    let shared = get_varint32(&mut cursor).map_err(corrupt)? as usize;
    let unshared = get_varint32(&mut cursor).map_err(corrupt)? as usize;
    let value_len = get_varint32(&mut cursor).map_err(corrupt)? as usize;
    let key_start = pos + (available - cursor.len());
    let value_start = key_start + unshared;
    let end = value_start + value_len;
    if end > data.len() {
        return Err(RidgeError::CorruptBlock(format!(
            "entry at {} runs past the data ({} > {})",
            pos,
            end,
            data.len()
        )));
    }
    Ok((end, shared, key_start..value_start, value_start..end))
}

/// Walk entries from the last restart until the position lands where the
/// entry-count varint may begin.
fn find_data_end(body: &[u8], from: usize, s_min: usize, q: usize) -> Result<usize> {
    let mut pos = from;
    loop {
        if pos >= s_min && pos <= q {
            return Ok(pos);
        }
        if pos > q {
            return Err(RidgeError::CorruptBlock(
                "entries overrun the block trailer".into(),
            ));
        }
        let (next, _, _, _) = parse_entry(&body[..q], pos)?;
        pos = next;
    }
}

fn before(p: usize) -> Result<usize> {
    p.checked_sub(1)
        .ok_or_else(|| RidgeError::CorruptBlock("trailer is truncated".into()))
}

fn corrupt(e: RidgeError) -> RidgeError {
    match e {
        RidgeError::CorruptBlock(_) => e,
        other => RidgeError::CorruptBlock(other.to_string()),
    }
}
