//! Grace hash join.
//!
//! Both inputs are partitioned into temporary extendible hash tables keyed
//! by the join column. After the directories are grown to the same depth,
//! matching bucket pairs are probed by a bounded worker pool; each probe
//! builds a Bloom filter over the left bucket so right entries without a
//! possible match are skipped cheaply. Workers poll a shared cancellation
//! flag so one failure stops the rest.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::common::{Entry, PageNumber};
use crate::index::hash::{HashBucket, HashIndex, HashTable};
use crate::index::Index;
use crate::query::bloom::{BloomFilter, DEFAULT_FILTER_SIZE};
use crate::query::{QueryError, Result};

/// Number of probe workers.
const WORKERS: usize = 4;

/// A pair of matching entries, one from each side of the join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryPair {
    pub left: Entry,
    pub right: Entry,
}

/// Build a temporary hash table over all entries of the source table,
/// keyed by either the key or the value column.
fn build_hash_index(
    source: &dyn Index,
    use_key: bool,
    path: std::path::PathBuf,
) -> Result<HashIndex> {
    let partition = HashIndex::open(path)?;
    for entry in source.select()? {
        if use_key {
            partition.table().insert_unchecked(entry.key, entry.value)?;
        } else {
            partition.table().insert_unchecked(entry.value, entry.key)?;
        }
    }
    Ok(partition)
}

/// Reorient a partition entry back to the source table's (key, value)
/// order.
fn orient(entry: Entry, joined_on_key: bool) -> Entry {
    if joined_on_key {
        entry
    } else {
        Entry::new(entry.value, entry.key)
    }
}

/// See which entries in the right bucket have a match in the left bucket.
fn probe_buckets(
    left_table: &HashTable,
    right_table: &HashTable,
    left_pn: PageNumber,
    right_pn: PageNumber,
    join_on_left_key: bool,
    join_on_right_key: bool,
    cancelled: &AtomicBool,
    results: &Mutex<Vec<EntryPair>>,
) -> Result<()> {
    let left_page = left_table.pager().get_page(left_pn)?;
    let left_entries = HashBucket::load(&left_page).select();
    let right_page = right_table.pager().get_page(right_pn)?;
    let right_entries = HashBucket::load(&right_page).select();
    let mut filter = BloomFilter::new(DEFAULT_FILTER_SIZE);
    for entry in &left_entries {
        filter.insert(entry.key);
    }
    for right_entry in &right_entries {
        if cancelled.load(Ordering::SeqCst) {
            return Err(QueryError::Cancelled);
        }
        if !filter.contains(right_entry.key) {
            continue;
        }
        for left_entry in &left_entries {
            if left_entry.key == right_entry.key {
                results.lock().push(EntryPair {
                    left: orient(*left_entry, join_on_left_key),
                    right: orient(*right_entry, join_on_right_key),
                });
            }
        }
    }
    Ok(())
}

/// Join `left` on `right` using grace hash join. Each side joins on its
/// key column or its value column.
pub fn join(
    left: &dyn Index,
    right: &dyn Index,
    join_on_left_key: bool,
    join_on_right_key: bool,
) -> Result<Vec<EntryPair>> {
    // Partition both inputs into scratch tables that vanish with the join.
    let scratch = tempfile::tempdir()?;
    let left_index = build_hash_index(left, join_on_left_key, scratch.path().join("left"))?;
    let right_index = build_hash_index(right, join_on_right_key, scratch.path().join("right"))?;
    // Make both directories the same global size so slots pair up.
    let left_table = left_index.table();
    let right_table = right_index.table();
    while left_table.global_depth() != right_table.global_depth() {
        if left_table.global_depth() < right_table.global_depth() {
            left_table.extend_table();
        } else {
            right_table.extend_table();
        }
    }
    // Probe phase: work through bucket pairs, skipping ones already seen
    // through directory aliasing.
    let left_buckets = left_table.buckets();
    let right_buckets = right_table.buckets();
    let mut seen: HashSet<(PageNumber, PageNumber)> = HashSet::new();
    let mut work: VecDeque<(PageNumber, PageNumber)> = VecDeque::new();
    for (slot, &left_pn) in left_buckets.iter().enumerate() {
        let pair = (left_pn, right_buckets[slot]);
        if seen.insert(pair) {
            work.push_back(pair);
        }
    }
    let queue = Mutex::new(work);
    let results = Mutex::new(Vec::new());
    let cancelled = AtomicBool::new(false);
    let first_error: Mutex<Option<QueryError>> = Mutex::new(None);
    std::thread::scope(|scope| {
        for _ in 0..WORKERS.min(queue.lock().len().max(1)) {
            scope.spawn(|| loop {
                if cancelled.load(Ordering::SeqCst) {
                    break;
                }
                let Some((left_pn, right_pn)) = queue.lock().pop_front() else {
                    break;
                };
                if let Err(e) = probe_buckets(
                    left_table,
                    right_table,
                    left_pn,
                    right_pn,
                    join_on_left_key,
                    join_on_right_key,
                    &cancelled,
                    &results,
                ) {
                    cancelled.store(true, Ordering::SeqCst);
                    let mut slot = first_error.lock();
                    if slot.is_none() {
                        *slot = Some(e);
                    }
                }
            });
        }
    });
    if let Some(e) = first_error.into_inner() {
        return Err(e);
    }
    Ok(results.into_inner())
}
