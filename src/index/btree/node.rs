//! On-disk layout of B+ tree nodes.
//!
//! Every node starts with a type byte and a key count. Leaves add a right
//! sibling page number and a packed run of entry cells; internal nodes keep
//! their separator keys and child page numbers in two contiguous regions so
//! either can be addressed by index.

use crate::common::{varint, Entry, Key, PageNumber, Value, ENTRY_SIZE, INT_SIZE, PAGE_SIZE};
use crate::index::{IndexError, Result};
use crate::storage::PageGuard;

// Node header constants.
const NODETYPE_OFFSET: usize = 0;
const NODETYPE_SIZE: usize = 1;
const NUM_KEYS_OFFSET: usize = NODETYPE_OFFSET + NODETYPE_SIZE;
const NUM_KEYS_SIZE: usize = INT_SIZE;
const NODE_HEADER_SIZE: usize = NODETYPE_SIZE + NUM_KEYS_SIZE;

// Leaf node header constants.
const RIGHT_SIBLING_PN_OFFSET: usize = NODE_HEADER_SIZE;
const RIGHT_SIBLING_PN_SIZE: usize = INT_SIZE;
const LEAF_NODE_HEADER_SIZE: usize = NODE_HEADER_SIZE + RIGHT_SIBLING_PN_SIZE;

/// Maximum number of entries a leaf holds before it must split.
pub const ENTRIES_PER_LEAF_NODE: i64 =
    ((PAGE_SIZE - LEAF_NODE_HEADER_SIZE) / ENTRY_SIZE - 1) as i64;

// Internal node header constants.
const KEY_SIZE: usize = INT_SIZE;
const PN_SIZE: usize = INT_SIZE;
const INTERNAL_NODE_HEADER_SIZE: usize = NODE_HEADER_SIZE;
const PTR_SPACE: usize = PAGE_SIZE - INTERNAL_NODE_HEADER_SIZE - KEY_SIZE;

/// Maximum number of separator keys an internal node holds before it must
/// split.
pub const KEYS_PER_INTERNAL_NODE: i64 = (PTR_SPACE / (KEY_SIZE + PN_SIZE) - 1) as i64;

const KEYS_OFFSET: usize = INTERNAL_NODE_HEADER_SIZE;
const KEYS_SIZE: usize = KEY_SIZE * (KEYS_PER_INTERNAL_NODE as usize + 1);
const PNS_OFFSET: usize = KEYS_OFFSET + KEYS_SIZE;

/// Identifies whether a node is a leaf node or an internal node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Internal,
    Leaf,
}

/// A split propagating up the tree: the promoted key and the two page
/// numbers it now separates.
#[derive(Debug, Clone, Copy)]
pub struct SplitResult {
    pub key: Key,
    pub left_pn: PageNumber,
    pub right_pn: PageNumber,
}

/// Read a node's kind and key count from its page.
pub fn read_header(page: &PageGuard<'_>) -> Result<(NodeKind, i64)> {
    page.with_data(|data| {
        let kind = match data[NODETYPE_OFFSET] {
            0 => NodeKind::Internal,
            1 => NodeKind::Leaf,
            other => {
                return Err(IndexError::Corrupt(format!(
                    "unknown node type byte {} on page {}",
                    other,
                    page.pagenum()
                )))
            }
        };
        let num_keys = varint::varint(&data[NUM_KEYS_OFFSET..NUM_KEYS_OFFSET + NUM_KEYS_SIZE]);
        Ok((kind, num_keys))
    })
}

/// Reset a page and stamp its node type.
pub fn init_node_page(page: &PageGuard<'_>, kind: NodeKind) {
    let zeros = [0u8; PAGE_SIZE];
    page.update(&zeros, 0, PAGE_SIZE);
    if kind == NodeKind::Leaf {
        page.update(&[1u8], NODETYPE_OFFSET, NODETYPE_SIZE);
    }
}

fn write_int(page: &PageGuard<'_>, offset: usize, value: i64) {
    let mut buf = [0u8; INT_SIZE];
    varint::put_varint(&mut buf, value);
    page.update(&buf, offset, INT_SIZE);
}

fn read_int(page: &PageGuard<'_>, offset: usize) -> i64 {
    page.with_data(|data| varint::varint(&data[offset..offset + INT_SIZE]))
}

/// A leaf node view over a pinned page.
pub struct LeafNode<'a, 'p> {
    page: &'a PageGuard<'p>,
    num_keys: i64,
    right_sibling: PageNumber,
}

impl<'a, 'p> LeafNode<'a, 'p> {
    pub fn load(page: &'a PageGuard<'p>) -> Self {
        let num_keys = read_int(page, NUM_KEYS_OFFSET);
        let right_sibling = read_int(page, RIGHT_SIBLING_PN_OFFSET);
        Self {
            page,
            num_keys,
            right_sibling,
        }
    }

    pub fn num_keys(&self) -> i64 {
        self.num_keys
    }

    pub fn right_sibling(&self) -> PageNumber {
        self.right_sibling
    }

    /// Point this leaf at a new right sibling, returning the old one.
    pub fn set_right_sibling(&mut self, pagenum: PageNumber) -> PageNumber {
        let old = self.right_sibling;
        self.right_sibling = pagenum;
        write_int(self.page, RIGHT_SIBLING_PN_OFFSET, pagenum);
        old
    }

    fn cell_pos(index: i64) -> usize {
        LEAF_NODE_HEADER_SIZE + index as usize * ENTRY_SIZE
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

    pub fn key_at(&self, index: i64) -> Key {
        self.cell(index).key
    }

    pub fn update_value_at(&mut self, index: i64, value: Value) {
        let mut entry = self.cell(index);
        entry.value = value;
        self.modify_cell(index, entry);
    }

    pub fn update_num_keys(&mut self, num_keys: i64) {
        self.num_keys = num_keys;
        write_int(self.page, NUM_KEYS_OFFSET, num_keys);
    }

    /// The first index whose key is greater than or equal to the given key.
    pub fn search(&self, key: Key) -> i64 {
        let (mut lo, mut hi) = (0, self.num_keys);
        while lo < hi {
            let mid = (lo + hi) / 2;
            if self.key_at(mid) >= key {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }
        lo
    }

    /// Place an entry at its sorted position, shifting later cells right.
    pub fn insert_at(&mut self, index: i64, entry: Entry) {
        for i in (index..self.num_keys).rev() {
            let moved = self.cell(i);
            self.modify_cell(i + 1, moved);
        }
        let new_count = self.num_keys + 1;
        self.update_num_keys(new_count);
        self.modify_cell(index, entry);
    }

    /// Remove the entry at the given index, shifting later cells left.
    pub fn delete_at(&mut self, index: i64) {
        for i in index..self.num_keys - 1 {
            let moved = self.cell(i + 1);
            self.modify_cell(i, moved);
        }
        let new_count = self.num_keys - 1;
        self.update_num_keys(new_count);
    }

    /// Split this leaf, moving the upper half of its entries into a fresh
    /// leaf spliced in as its new right sibling.
    pub fn split(&mut self) -> Result<SplitResult> {
        let pager = self.page.pager();
        let new_page = pager.get_page(pager.get_free_pn())?;
        init_node_page(&new_page, NodeKind::Leaf);
        let mut new_leaf = LeafNode::load(&new_page);
        let prev_sibling = self.set_right_sibling(new_page.pagenum());
        new_leaf.set_right_sibling(prev_sibling);
        let midpoint = self.num_keys / 2;
        for i in midpoint..self.num_keys {
            let entry = self.cell(i);
            let target = new_leaf.num_keys();
            new_leaf.modify_cell(target, entry);
            new_leaf.update_num_keys(target + 1);
        }
        self.update_num_keys(midpoint);
        Ok(SplitResult {
            key: new_leaf.key_at(0),
            left_pn: self.page.pagenum(),
            right_pn: new_page.pagenum(),
        })
    }
}

/// An internal node view over a pinned page.
pub struct InternalNode<'a, 'p> {
    page: &'a PageGuard<'p>,
    num_keys: i64,
}

impl<'a, 'p> InternalNode<'a, 'p> {
    pub fn load(page: &'a PageGuard<'p>) -> Self {
        let num_keys = read_int(page, NUM_KEYS_OFFSET);
        Self { page, num_keys }
    }

    pub fn num_keys(&self) -> i64 {
        self.num_keys
    }

    fn key_pos(index: i64) -> usize {
        KEYS_OFFSET + index as usize * KEY_SIZE
    }

    fn pn_pos(index: i64) -> usize {
        PNS_OFFSET + index as usize * PN_SIZE
    }

    pub fn key_at(&self, index: i64) -> Key {
        read_int(self.page, Self::key_pos(index))
    }

    pub fn update_key_at(&mut self, index: i64, key: Key) {
        write_int(self.page, Self::key_pos(index), key);
    }

    pub fn pn_at(&self, index: i64) -> PageNumber {
        read_int(self.page, Self::pn_pos(index))
    }

    pub fn update_pn_at(&mut self, index: i64, pagenum: PageNumber) {
        write_int(self.page, Self::pn_pos(index), pagenum);
    }

    pub fn update_num_keys(&mut self, num_keys: i64) {
        self.num_keys = num_keys;
        write_int(self.page, NUM_KEYS_OFFSET, num_keys);
    }

    /// The first index whose key is strictly greater than the given key.
    pub fn search(&self, key: Key) -> i64 {
        let (mut lo, mut hi) = (0, self.num_keys);
        while lo < hi {
            let mid = (lo + hi) / 2;
            if self.key_at(mid) > key {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }
        lo
    }

    /// The page number of the child that should contain the given key.
    pub fn child_for(&self, key: Key) -> PageNumber {
        self.pn_at(self.search(key))
    }

    /// Absorb a split from a child, cascading a further split upward when
    /// this node overflows.
    pub fn insert_split(&mut self, split: &SplitResult) -> Result<Option<SplitResult>> {
        let pos = self.search(split.key);
        for i in (pos..self.num_keys).rev() {
            let moved = self.key_at(i);
            self.update_key_at(i + 1, moved);
        }
        for i in ((pos + 1)..=self.num_keys).rev() {
            let moved = self.pn_at(i);
            self.update_pn_at(i + 1, moved);
        }
        self.update_key_at(pos, split.key);
        self.update_pn_at(pos + 1, split.right_pn);
        let new_count = self.num_keys + 1;
        self.update_num_keys(new_count);
        if self.num_keys > KEYS_PER_INTERNAL_NODE {
            return Ok(Some(self.split()?));
        }
        Ok(None)
    }

    /// Split this internal node, promoting its middle key.
    pub fn split(&mut self) -> Result<SplitResult> {
        let pager = self.page.pager();
        let new_page = pager.get_page(pager.get_free_pn())?;
        init_node_page(&new_page, NodeKind::Internal);
        let mut new_node = InternalNode::load(&new_page);
        let midpoint = (self.num_keys - 1) / 2;
        for i in midpoint..=self.num_keys {
            let target = new_node.num_keys();
            let moved_pn = self.pn_at(i);
            new_node.update_pn_at(target, moved_pn);
            if i < self.num_keys {
                let moved_key = self.key_at(i);
                new_node.update_key_at(target, moved_key);
                new_node.update_num_keys(target + 1);
            }
        }
        let middle_key = self.key_at(midpoint - 1);
        self.update_num_keys(midpoint - 1);
        Ok(SplitResult {
            key: middle_key,
            left_pn: self.page.pagenum(),
            right_pn: new_page.pagenum(),
        })
    }
}
