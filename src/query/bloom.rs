//! A fixed-size Bloom filter used to pre-filter bucket probes during hash
//! joins. Two independent 64-bit hash functions set two bits per key.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::common::{varint, Key, INT_SIZE};

/// Default number of bits in a probe filter.
pub const DEFAULT_FILTER_SIZE: u64 = 1024;

pub struct BloomFilter {
    size: u64,
    bits: Vec<u64>,
}

impl BloomFilter {
    /// Initialize a filter with the given number of bits.
    pub fn new(size: u64) -> Self {
        let words = ((size + 63) / 64) as usize;
        Self {
            size,
            bits: vec![0; words],
        }
    }

    fn positions(&self, key: Key) -> (u64, u64) {
        let mut buf = [0u8; INT_SIZE];
        varint::put_varint(&mut buf, key);
        let h1 = twox_hash::xxh3::hash64(&buf) % self.size;
        let mut hasher = DefaultHasher::new();
        buf.hash(&mut hasher);
        let h2 = hasher.finish() % self.size;
        (h1, h2)
    }

    /// Add a key to the filter.
    pub fn insert(&mut self, key: Key) {
        let (h1, h2) = self.positions(key);
        self.bits[(h1 / 64) as usize] |= 1 << (h1 % 64);
        self.bits[(h2 / 64) as usize] |= 1 << (h2 % 64);
    }

    /// Whether the key might be in the filter. False means definitely
    /// absent.
    pub fn contains(&self, key: Key) -> bool {
        let (h1, h2) = self.positions(key);
        self.bits[(h1 / 64) as usize] & (1 << (h1 % 64)) != 0
            && self.bits[(h2 / 64) as usize] & (1 << (h2 % 64)) != 0
    }
}
