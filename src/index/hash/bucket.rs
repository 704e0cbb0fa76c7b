//! Hash bucket pages: a local depth, a key count, and packed entry cells.

use std::io::{self, Write};

use crate::common::{varint, Entry, Key, Value, ENTRY_SIZE, INT_SIZE, PAGE_SIZE};
use crate::storage::PageGuard;

const DEPTH_OFFSET: usize = 0;
const DEPTH_SIZE: usize = INT_SIZE;
const NUM_KEYS_OFFSET: usize = DEPTH_OFFSET + DEPTH_SIZE;
const NUM_KEYS_SIZE: usize = INT_SIZE;
const BUCKET_HEADER_SIZE: usize = DEPTH_SIZE + NUM_KEYS_SIZE;

/// Number of entries a bucket holds before it must split.
pub const BUCKET_SIZE: i64 = ((PAGE_SIZE - BUCKET_HEADER_SIZE) / ENTRY_SIZE) as i64;

/// A bucket view over a pinned page.
pub struct HashBucket<'a, 'p> {
    page: &'a PageGuard<'p>,
    depth: i64,
    num_keys: i64,
}

impl<'a, 'p> HashBucket<'a, 'p> {
    pub fn load(page: &'a PageGuard<'p>) -> Self {
        let (depth, num_keys) = page.with_data(|data| {
            (
                varint::varint(&data[DEPTH_OFFSET..DEPTH_OFFSET + DEPTH_SIZE]),
                varint::varint(&data[NUM_KEYS_OFFSET..NUM_KEYS_OFFSET + NUM_KEYS_SIZE]),
            )
        });
        Self {
            page,
            depth,
            num_keys,
        }
    }

    pub fn depth(&self) -> i64 {
        self.depth
    }

    pub fn num_keys(&self) -> i64 {
        self.num_keys
    }

    fn cell_pos(index: i64) -> usize {
        BUCKET_HEADER_SIZE + index as usize * ENTRY_SIZE
    }

    pub fn cell(&self, index: i64) -> Entry {
        let pos = Self::cell_pos(index);
        self.page
            .with_data(|data| Entry::unmarshal(&data[pos..pos + ENTRY_SIZE]))
    }

    pub fn modify_cell(&mut self, index: i64, entry: Entry) {
        let bytes = entry.marshal();
        self.page.update(&bytes, Self::cell_pos(index), ENTRY_SIZE);
    }

    pub fn update_depth(&mut self, depth: i64) {
        self.depth = depth;
        let mut buf = [0u8; INT_SIZE];
        varint::put_varint(&mut buf, depth);
        self.page.update(&buf, DEPTH_OFFSET, DEPTH_SIZE);
    }

    pub fn update_num_keys(&mut self, num_keys: i64) {
        self.num_keys = num_keys;
        let mut buf = [0u8; INT_SIZE];
        varint::put_varint(&mut buf, num_keys);
        self.page.update(&buf, NUM_KEYS_OFFSET, NUM_KEYS_SIZE);
    }

    /// Find the entry with the given key.
    pub fn find(&self, key: Key) -> Option<Entry> {
        (0..self.num_keys)
            .map(|i| self.cell(i))
            .find(|entry| entry.key == key)
    }

    /// Append the given pair. Returns true if the bucket now needs to be
    /// split.
    pub fn insert(&mut self, key: Key, value: Value) -> bool {
        let index = self.num_keys;
        self.modify_cell(index, Entry::new(key, value));
        self.update_num_keys(index + 1);
        self.num_keys >= BUCKET_SIZE
    }

    /// Overwrite the value for an existing key. Returns false if the key
    /// is absent.
    pub fn update(&mut self, key: Key, value: Value) -> bool {
        for i in 0..self.num_keys {
            if self.cell(i).key == key {
                let mut entry = self.cell(i);
                entry.value = value;
                self.modify_cell(i, entry);
                return true;
            }
        }
        false
    }

    /// Remove the entry with the given key. Returns false if the key is
    /// absent.
    pub fn delete(&mut self, key: Key) -> bool {
        let mut index = None;
        for i in 0..self.num_keys {
            if self.cell(i).key == key {
                index = Some(i);
                break;
            }
        }
        let Some(index) = index else {
            return false;
        };
        for i in index..self.num_keys - 1 {
            let moved = self.cell(i + 1);
            self.modify_cell(i, moved);
        }
        let new_count = self.num_keys - 1;
        self.update_num_keys(new_count);
        true
    }

    /// All entries in this bucket.
    pub fn select(&self) -> Vec<Entry> {
        (0..self.num_keys).map(|i| self.cell(i)).collect()
    }

    /// Pretty-print this bucket.
    pub fn print(&self, w: &mut dyn Write) -> io::Result<()> {
        writeln!(w, "bucket depth: {}", self.depth)?;
        write!(w, "entries:")?;
        for i in 0..self.num_keys {
            let entry = self.cell(i);
            write!(w, " ({}, {})", entry.key, entry.value)?;
        }
        writeln!(w)
    }
}
