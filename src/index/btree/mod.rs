//! Clustered B+ tree index over int64 keys.
//!
//! The root always occupies page 0, so reopening a table never has to hunt
//! for it. Writers descend with latch coupling: a synthetic super-root
//! latch linearizes root acquisition, ancestors stay write-latched until a
//! descendant that cannot split is reached, and the retained latch stack is
//! exactly the path a split can propagate along.

pub mod cursor;
pub mod node;

use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::common::{Entry, Key, PageNumber, Value, PAGE_SIZE};
use crate::index::{Index, IndexError, IndexType, Result};
use crate::storage::page::{PageReadLatch, PageWriteLatch};
use crate::storage::{PageGuard, Pager};

pub use cursor::BTreeCursor;
use node::{
    init_node_page, read_header, InternalNode, LeafNode, NodeKind, SplitResult,
    ENTRIES_PER_LEAF_NODE, KEYS_PER_INTERNAL_NODE,
};

/// The root node's page number never changes.
pub const ROOT_PN: PageNumber = 0;

/// A synthetic node above the root whose only asset is its latch. Taking
/// it before the root serializes root replacement against concurrent
/// descents.
static SUPER_ROOT: Lazy<Arc<RwLock<()>>> = Lazy::new(|| Arc::new(RwLock::new(())));

fn super_root_wlatch() -> PageWriteLatch {
    SUPER_ROOT.write_arc()
}

fn super_root_rlatch() -> PageReadLatch {
    SUPER_ROOT.read_arc()
}

/// A pinned, write-latched page on the descent path.
struct LatchedPage<'p> {
    guard: PageGuard<'p>,
    _latch: PageWriteLatch,
}

/// The latch-release stack carried through a write descent. Dropping it
/// releases every retained latch and pin.
struct WriteDescent<'p> {
    super_root: Option<PageWriteLatch>,
    nodes: Vec<LatchedPage<'p>>,
}

impl<'p> WriteDescent<'p> {
    fn begin() -> Self {
        Self {
            super_root: Some(super_root_wlatch()),
            nodes: Vec::new(),
        }
    }

    fn push(&mut self, guard: PageGuard<'p>) {
        let latch = guard.wlatch();
        self.nodes.push(LatchedPage {
            guard,
            _latch: latch,
        });
    }

    /// Release every latch above the current node. Called once the current
    /// node is known safe for this operation.
    fn release_ancestors(&mut self) {
        self.super_root = None;
        if self.nodes.len() > 1 {
            self.nodes.drain(..self.nodes.len() - 1);
        }
    }
}

/// A table backed by a B+ tree.
pub struct BTreeIndex {
    pager: Arc<Pager>,
}

impl BTreeIndex {
    /// Open the table stored at the given path, initializing an empty root
    /// leaf if the file is new.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let pager = Arc::new(Pager::open(path)?);
        if pager.num_pages() == 0 {
            let root = pager.get_page(ROOT_PN)?;
            init_node_page(&root, NodeKind::Leaf);
            let mut leaf = LeafNode::load(&root);
            leaf.set_right_sibling(-1);
        }
        Ok(Self { pager })
    }

    pub fn pager(&self) -> &Arc<Pager> {
        &self.pager
    }

    /// Find the entry with the given key, using read-latch coupling: the
    /// parent's latch is always released once the child's is held.
    pub fn find_entry(&self, key: Key) -> Result<Entry> {
        let super_root = super_root_rlatch();
        let mut page = self.pager.get_page(ROOT_PN)?;
        let mut _latch = page.rlatch();
        drop(super_root);
        loop {
            let (kind, _) = read_header(&page)?;
            match kind {
                NodeKind::Leaf => {
                    let leaf = LeafNode::load(&page);
                    let index = leaf.search(key);
                    if index >= leaf.num_keys() || leaf.key_at(index) != key {
                        return Err(IndexError::NotFound);
                    }
                    return Ok(leaf.cell(index));
                }
                NodeKind::Internal => {
                    let child_pn = InternalNode::load(&page).child_for(key);
                    let child = self.pager.get_page(child_pn)?;
                    let child_latch = child.rlatch();
                    _latch = child_latch;
                    page = child;
                }
            }
        }
    }

    /// Insert a new entry. Duplicate keys are rejected.
    pub fn insert_entry(&self, key: Key, value: Value) -> Result<()> {
        self.write_entry(key, value, false)
    }

    /// Overwrite the value of an existing entry.
    pub fn update_entry(&self, key: Key, value: Value) -> Result<()> {
        self.write_entry(key, value, true)
    }

    fn write_entry(&self, key: Key, value: Value, update: bool) -> Result<()> {
        let mut descent = WriteDescent::begin();
        descent.push(self.pager.get_page(ROOT_PN)?);
        // Descend to the leaf, releasing ancestors at every safe node.
        loop {
            let (kind, num_keys) = {
                let top = descent.nodes.last().expect("descent holds the root");
                read_header(&top.guard)?
            };
            match kind {
                NodeKind::Leaf => {
                    if num_keys < ENTRIES_PER_LEAF_NODE {
                        descent.release_ancestors();
                    }
                    break;
                }
                NodeKind::Internal => {
                    if num_keys < KEYS_PER_INTERNAL_NODE {
                        descent.release_ancestors();
                    }
                    let child_pn = {
                        let top = descent.nodes.last().expect("descent holds a node");
                        InternalNode::load(&top.guard).child_for(key)
                    };
                    descent.push(self.pager.get_page(child_pn)?);
                }
            }
        }
        // Mutate the leaf.
        let mut pending = {
            let top = descent.nodes.last().expect("descent holds the leaf");
            let mut leaf = LeafNode::load(&top.guard);
            let pos = leaf.search(key);
            let exists = pos < leaf.num_keys() && leaf.key_at(pos) == key;
            if exists {
                if !update {
                    return Err(IndexError::DuplicateKey);
                }
                leaf.update_value_at(pos, value);
                return Ok(());
            }
            if update {
                return Err(IndexError::NotFound);
            }
            leaf.insert_at(pos, Entry::new(key, value));
            if leaf.num_keys() > ENTRIES_PER_LEAF_NODE {
                Some(leaf.split()?)
            } else {
                None
            }
        };
        // Propagate splits along the retained latch stack.
        while let Some(split) = pending.take() {
            let origin = descent
                .nodes
                .pop()
                .expect("a split's origin is always latched");
            if origin.guard.pagenum() == ROOT_PN {
                self.split_root(&origin.guard, &split)?;
                break;
            }
            drop(origin);
            let parent = descent
                .nodes
                .last()
                .expect("an unsafe child keeps its parent latched");
            let mut parent_node = InternalNode::load(&parent.guard);
            pending = parent_node.insert_split(&split)?;
        }
        Ok(())
    }

    /// Replace a split root in place, preserving the invariant that the
    /// root lives at page 0: the old root's contents move to a fresh page
    /// and page 0 becomes an internal node over the two halves.
    fn split_root(&self, root: &PageGuard<'_>, split: &SplitResult) -> Result<()> {
        if split.left_pn != ROOT_PN {
            return Err(IndexError::Corrupt(
                "root split did not originate at page 0".to_string(),
            ));
        }
        let (kind, _) = read_header(root)?;
        let new_page = self.pager.get_page(self.pager.get_free_pn())?;
        init_node_page(&new_page, kind);
        let contents = root.with_data(|data| data.to_vec());
        new_page.update(&contents, 0, PAGE_SIZE);
        init_node_page(root, NodeKind::Internal);
        let mut new_root = InternalNode::load(root);
        new_root.update_key_at(0, split.key);
        new_root.update_pn_at(0, new_page.pagenum());
        new_root.update_pn_at(1, split.right_pn);
        new_root.update_num_keys(1);
        Ok(())
    }

    /// Remove an entry. A delete never merges nodes, so every node on the
    /// descent is safe and only a parent/child pair is latched at a time.
    pub fn delete_entry(&self, key: Key) -> Result<()> {
        let mut descent = WriteDescent::begin();
        descent.push(self.pager.get_page(ROOT_PN)?);
        loop {
            descent.release_ancestors();
            let (kind, _) = {
                let top = descent.nodes.last().expect("descent holds a node");
                read_header(&top.guard)?
            };
            match kind {
                NodeKind::Leaf => {
                    let top = descent.nodes.last().expect("descent holds the leaf");
                    let mut leaf = LeafNode::load(&top.guard);
                    let pos = leaf.search(key);
                    if pos < leaf.num_keys() && leaf.key_at(pos) == key {
                        leaf.delete_at(pos);
                    }
                    return Ok(());
                }
                NodeKind::Internal => {
                    let child_pn = {
                        let top = descent.nodes.last().expect("descent holds a node");
                        InternalNode::load(&top.guard).child_for(key)
                    };
                    descent.push(self.pager.get_page(child_pn)?);
                }
            }
        }
    }

    /// All entries, in key order.
    pub fn select_entries(&self) -> Result<Vec<Entry>> {
        let mut entries = Vec::new();
        let mut cursor = self.table_start()?;
        loop {
            if !cursor.is_end() {
                entries.push(cursor.entry()?);
            }
            if !cursor.step_forward()? {
                break;
            }
        }
        Ok(entries)
    }

    /// Entries with `start <= key < end`, in key order.
    pub fn find_range(&self, start: Key, end: Key) -> Result<Vec<Entry>> {
        let mut entries = Vec::new();
        let mut cursor = self.table_find(start)?;
        loop {
            if cursor.is_end() {
                if !cursor.step_forward()? {
                    break;
                }
                continue;
            }
            let entry = cursor.entry()?;
            if entry.key >= end {
                break;
            }
            entries.push(entry);
            cursor.step_forward()?;
        }
        Ok(entries)
    }

    fn print_node(&self, pagenum: PageNumber, w: &mut dyn Write, prefix: &str) -> io::Result<()> {
        let page = match self.pager.get_page(pagenum) {
            Ok(page) => page,
            Err(_) => return Ok(()),
        };
        let Ok((kind, num_keys)) = read_header(&page) else {
            return Ok(());
        };
        let root_marker = if pagenum == ROOT_PN { " (root)" } else { "" };
        match kind {
            NodeKind::Leaf => {
                let leaf = LeafNode::load(&page);
                writeln!(
                    w,
                    "{}[{}] Leaf{} size: {}",
                    prefix, pagenum, root_marker, num_keys
                )?;
                for i in 0..num_keys {
                    let entry = leaf.cell(i);
                    writeln!(w, "{} |--> ({}, {})", prefix, entry.key, entry.value)?;
                }
                if leaf.right_sibling() > 0 {
                    writeln!(w, "{} |    right sibling @ [{}]", prefix, leaf.right_sibling())?;
                }
            }
            NodeKind::Internal => {
                let node = InternalNode::load(&page);
                writeln!(
                    w,
                    "{}[{}] Internal{} size: {}",
                    prefix,
                    pagenum,
                    root_marker,
                    num_keys + 1
                )?;
                let child_prefix = format!("{} |    ", prefix);
                for i in 0..=num_keys {
                    let child = node.pn_at(i);
                    self.print_node(child, w, &child_prefix)?;
                    if i != num_keys {
                        writeln!(w, "{}[KEY] {}", child_prefix, node.key_at(i))?;
                    }
                }
            }
        }
        Ok(())
    }
}

impl Index for BTreeIndex {
    fn name(&self) -> String {
        self.pager.file_name()
    }

    fn index_type(&self) -> IndexType {
        IndexType::BTree
    }

    fn pager(&self) -> &Pager {
        &self.pager
    }

    fn find(&self, key: Key) -> Result<Entry> {
        self.find_entry(key)
    }

    fn insert(&self, key: Key, value: Value) -> Result<()> {
        self.insert_entry(key, value)
    }

    fn update(&self, key: Key, value: Value) -> Result<()> {
        self.update_entry(key, value)
    }

    fn delete(&self, key: Key) -> Result<()> {
        self.delete_entry(key)
    }

    fn select(&self) -> Result<Vec<Entry>> {
        self.select_entries()
    }

    fn print(&self, w: &mut dyn Write) -> io::Result<()> {
        self.print_node(ROOT_PN, w, "")
    }

    fn print_pn(&self, pagenum: PageNumber, w: &mut dyn Write) -> io::Result<()> {
        self.print_node(pagenum, w, "")
    }

    fn close(&self) -> Result<()> {
        self.pager.close()?;
        Ok(())
    }
}
