//! Block Builder
//!
//! Accumulates sorted entries and serializes them into one block.

use bytes::{BufMut, Bytes, BytesMut};

use super::CRC32C;
use crate::codec::{put_varint32, put_varint64, varint_len};

/// Builder for a single prefix-compressed block
///
/// Entries MUST be added in ascending key order.
pub struct BlockBuilder {
    buf: BytesMut,
    restarts: Vec<u32>,
    restart_interval: usize,
    count: usize,
    last_key: Vec<u8>,
    base_version: i64,
    base_expire: i64,
}

impl BlockBuilder {
    pub fn new(restart_interval: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            restarts: Vec::new(),
            restart_interval: restart_interval.max(1),
            count: 0,
            last_key: Vec::new(),
            base_version: 0,
            base_expire: 0,
        }
    }

    /// Base values that value records in this block are encoded against
    pub fn set_base(&mut self, base_version: i64, base_expire: i64) {
        self.base_version = base_version;
        self.base_expire = base_expire;
    }

    pub fn base_version(&self) -> i64 {
        self.base_version
    }

    pub fn base_expire(&self) -> i64 {
        self.base_expire
    }

    /// Append an entry; `value` is stored opaquely
    pub fn add(&mut self, key: &[u8], value: &[u8]) {
        debug_assert!(
            self.count == 0 || key > self.last_key.as_slice(),
            "block keys must be strictly ascending"
        );

        let shared = if self.count % self.restart_interval == 0 {
            self.restarts.push(self.buf.len() as u32);
            0
        } else {
            shared_prefix_len(&self.last_key, key)
        };
        let unshared = &key[shared..];

        put_varint32(shared as u32, &mut self.buf);
        put_varint32(unshared.len() as u32, &mut self.buf);
        put_varint32(value.len() as u32, &mut self.buf);
        self.buf.put_slice(unshared);
        self.buf.put_slice(value);

        self.last_key.truncate(shared);
        self.last_key.extend_from_slice(unshared);
        self.count += 1;
    }

    /// Append the trailer and checksum, producing the block bytes
    pub fn finish(mut self) -> Bytes {
        put_varint64(self.count as u64, &mut self.buf);
        put_varint64(self.restarts.len() as u64, &mut self.buf);
        for offset in &self.restarts {
            put_varint32(*offset, &mut self.buf);
        }
        put_varint64(self.base_version as u64, &mut self.buf);
        put_varint64(self.base_expire as u64, &mut self.buf);

        let checksum = CRC32C.checksum(&self.buf);
        self.buf.put_u32_le(checksum);
        self.buf.freeze()
    }

    /// Size the block would have if finished now
    pub fn estimated_size(&self) -> usize {
        let restarts: usize = self
            .restarts
            .iter()
            .map(|o| varint_len(u64::from(*o)))
            .sum();
        self.buf.len()
            + varint_len(self.count as u64)
            + varint_len(self.restarts.len() as u64)
            + restarts
            + varint_len(self.base_version as u64)
            + varint_len(self.base_expire as u64)
            + super::CHECKSUM_SIZE
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn len(&self) -> usize {
        self.count
    }

    /// Last key added
    pub fn last_key(&self) -> &[u8] {
        &self.last_key
    }
}

fn shared_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}
