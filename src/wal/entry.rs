//! WAL record definitions
//!
//! Defines the structure and byte layout of individual WAL records.

use bytes::{Buf, BufMut};

use crate::error::{Result, RidgeError};
use crate::types::Entry;

/// Fixed bytes of a record besides key and value:
/// seq (8) + key_len (4) + value_len (4) + tombstone (1) + op (1) + timestamp (8)
pub const RECORD_OVERHEAD: usize = 26;

/// Operations that can be logged
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpType {
    Put,
    Delete,
    /// A put carrying an absolute expiry
    PutExpiring,
}

impl OpType {
    /// The op that preserves everything `entry` carries
    pub fn for_entry(entry: &Entry) -> Self {
        if entry.tombstone {
            OpType::Delete
        } else if entry.expire_at.is_some() {
            OpType::PutExpiring
        } else {
            OpType::Put
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            OpType::Put => 0,
            OpType::Delete => 1,
            OpType::PutExpiring => 2,
        }
    }

    pub fn from_u8(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(OpType::Put),
            1 => Ok(OpType::Delete),
            2 => Ok(OpType::PutExpiring),
            other => Err(RidgeError::DecodeFieldMismatch(format!(
                "unknown WAL op type {}",
                other
            ))),
        }
    }
}

/// A single record in the WAL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalRecord {
    /// Monotonically increasing per log; doubles as the write's version
    pub sequence_id: u64,
    pub key: Vec<u8>,
    pub value: Option<Vec<u8>>,
    pub tombstone: bool,
    pub op_type: OpType,
    /// Unix seconds when the record was written
    pub timestamp_sec: i64,
    /// Only carried by `PutExpiring`
    pub expire_at: Option<i64>,
}

impl WalRecord {
    pub fn new(sequence_id: u64, entry: &Entry, op_type: OpType, timestamp_sec: i64) -> Self {
        Self {
            sequence_id,
            key: entry.key.clone(),
            value: if entry.tombstone {
                None
            } else {
                entry.value.clone()
            },
            tombstone: entry.tombstone,
            op_type,
            timestamp_sec,
            expire_at: match op_type {
                OpType::PutExpiring => entry.expire_at,
                _ => None,
            },
        }
    }

    /// The entry this record replays into
    pub fn to_entry(&self) -> Entry {
        Entry {
            key: self.key.clone(),
            value: if self.tombstone {
                None
            } else {
                Some(self.value.clone().unwrap_or_default())
            },
            tombstone: self.tombstone,
            version: self.sequence_id,
            expire_at: self.expire_at,
        }
    }

    pub fn encoded_len(&self) -> usize {
        let expiry = if self.op_type == OpType::PutExpiring { 8 } else { 0 };
        RECORD_OVERHEAD + self.key.len() + self.value.as_ref().map_or(0, Vec::len) + expiry
    }

    /// Serialize (all integers big-endian)
    pub fn encode<B: BufMut>(&self, dst: &mut B) {
        let value: &[u8] = self.value.as_deref().unwrap_or(&[]);
        dst.put_i64(self.sequence_id as i64);
        dst.put_i32(self.key.len() as i32);
        dst.put_slice(&self.key);
        dst.put_i32(value.len() as i32);
        dst.put_slice(value);
        dst.put_u8(u8::from(self.tombstone));
        dst.put_u8(self.op_type.as_u8());
        dst.put_i64(self.timestamp_sec);
        if self.op_type == OpType::PutExpiring {
            dst.put_i64(self.expire_at.unwrap_or(0));
        }
    }

    /// Deserialize one record, advancing `src` past it
    ///
    /// Running out of bytes yields `Truncated`; inconsistent fields yield
    /// `DecodeFieldMismatch` or `WalCorruption`.
    pub fn decode<B: Buf>(src: &mut B) -> Result<Self> {
        need(src, 8 + 4)?;
        let sequence_id = src.get_i64() as u64;
        let key = read_bytes(src, "key")?;
        need(src, 4)?;
        let value = read_bytes(src, "value")?;

        need(src, 1 + 1 + 8)?;
        let tombstone = match src.get_u8() {
            0 => false,
            1 => true,
            other => {
                return Err(RidgeError::DecodeFieldMismatch(format!(
                    "tombstone byte {} is not 0 or 1",
                    other
                )))
            }
        };
        let op_type = OpType::from_u8(src.get_u8())?;
        if tombstone != (op_type == OpType::Delete) {
            return Err(RidgeError::DecodeFieldMismatch(format!(
                "op {:?} with tombstone = {}",
                op_type, tombstone
            )));
        }
        let timestamp_sec = src.get_i64();
        let expire_at = if op_type == OpType::PutExpiring {
            need(src, 8)?;
            Some(src.get_i64())
        } else {
            None
        };

        Ok(Self {
            sequence_id,
            key,
            value: if tombstone { None } else { Some(value) },
            tombstone,
            op_type,
            timestamp_sec,
            expire_at,
        })
    }
}

fn need<B: Buf>(src: &B, n: usize) -> Result<()> {
    if src.remaining() < n {
        return Err(RidgeError::truncated(n, src.remaining()));
    }
    Ok(())
}

fn read_bytes<B: Buf>(src: &mut B, what: &str) -> Result<Vec<u8>> {
    let len = src.get_i32();
    if len < 0 {
        return Err(RidgeError::WalCorruption(format!(
            "negative {} length {}",
            what, len
        )));
    }
    let len = len as usize;
    need(src, len)?;
    let mut buf = vec![0u8; len];
    src.copy_to_slice(&mut buf);
    Ok(buf)
}
