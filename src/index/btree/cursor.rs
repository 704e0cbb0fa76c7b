//! Cursors represent locations in a table and step through entries in key
//! order by following the right-sibling chain between leaves.

use crate::common::{Entry, Key};
use crate::index::btree::node::{read_header, InternalNode, LeafNode, NodeKind};
use crate::index::btree::{BTreeIndex, ROOT_PN};
use crate::index::{IndexError, Result};
use crate::storage::PageGuard;

/// A position within a B+ tree: the current leaf, a cell index inside it,
/// and whether the cursor points one past the leaf's last entry.
pub struct BTreeCursor<'t> {
    table: &'t BTreeIndex,
    leaf: PageGuard<'t>,
    cellnum: i64,
    is_end: bool,
}

impl BTreeIndex {
    /// A cursor pointing to the first entry of the table.
    pub fn table_start(&self) -> Result<BTreeCursor<'_>> {
        let mut page = self.pager().get_page(ROOT_PN)?;
        // Traverse the leftmost children until we reach a leaf.
        loop {
            let (kind, _) = read_header(&page)?;
            if kind == NodeKind::Leaf {
                break;
            }
            let leftmost = InternalNode::load(&page).pn_at(0);
            page = self.pager().get_page(leftmost)?;
        }
        let num_keys = LeafNode::load(&page).num_keys();
        Ok(BTreeCursor {
            table: self,
            leaf: page,
            cellnum: 0,
            is_end: num_keys == 0,
        })
    }

    /// A cursor pointing to the given key, or to its insertion position if
    /// the key is absent.
    pub fn table_find(&self, key: Key) -> Result<BTreeCursor<'_>> {
        let mut page = self.pager().get_page(ROOT_PN)?;
        loop {
            let (kind, _) = read_header(&page)?;
            if kind == NodeKind::Leaf {
                break;
            }
            let child = InternalNode::load(&page).child_for(key);
            page = self.pager().get_page(child)?;
        }
        let leaf = LeafNode::load(&page);
        let cellnum = leaf.search(key);
        let is_end = cellnum == leaf.num_keys();
        Ok(BTreeCursor {
            table: self,
            leaf: page,
            cellnum,
            is_end,
        })
    }
}

impl BTreeCursor<'_> {
    /// True if the cursor points past the last entry of its leaf.
    pub fn is_end(&self) -> bool {
        self.is_end
    }

    /// Advance by one entry, following the sibling chain between leaves.
    /// Returns false when no further leaf exists.
    pub fn step_forward(&mut self) -> Result<bool> {
        if self.is_end {
            let next_pn = LeafNode::load(&self.leaf).right_sibling();
            if next_pn < 0 {
                return Ok(false);
            }
            let next = self.table.pager().get_page(next_pn)?;
            self.leaf = next;
            self.cellnum = 0;
            self.is_end = LeafNode::load(&self.leaf).num_keys() == 0;
            if self.is_end {
                // Skip empty leaves.
                return self.step_forward();
            }
            return Ok(true);
        }
        self.cellnum += 1;
        if self.cellnum >= LeafNode::load(&self.leaf).num_keys() {
            self.is_end = true;
        }
        Ok(true)
    }

    /// The entry currently pointed to by the cursor.
    pub fn entry(&self) -> Result<Entry> {
        if self.is_end {
            return Err(IndexError::NotFound);
        }
        Ok(LeafNode::load(&self.leaf).cell(self.cellnum))
    }
}
