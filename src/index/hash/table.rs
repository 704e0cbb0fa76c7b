//! Extendible hash table: a directory of bucket page numbers addressed by
//! the low bits of a 64-bit hash. Buckets split independently; the
//! directory doubles when a splitting bucket is already at global depth.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::common::{varint, Entry, Key, PageNumber, Value, INT_SIZE, PAGE_SIZE};
use crate::index::hash::bucket::{HashBucket, BUCKET_SIZE};
use crate::index::{IndexError, Result};
use crate::storage::{PageGuard, Pager};

/// Hash of a key bounded by `2^depth`, used to address the directory.
pub fn hasher(key: Key, depth: i64) -> i64 {
    let mut buf = [0u8; INT_SIZE];
    varint::put_varint(&mut buf, key);
    let hash = twox_hash::xxh3::hash64(&buf);
    (hash & ((1u64 << depth) - 1)) as i64
}

/// The in-memory directory: a global depth and one bucket page number per
/// slot. Multiple slots may share a bucket while its local depth is below
/// the global depth.
struct Directory {
    depth: i64,
    buckets: Vec<PageNumber>,
}

impl Directory {
    /// Double the directory, increasing the global depth by 1.
    fn extend(&mut self) {
        self.depth += 1;
        let doubled = self.buckets.clone();
        self.buckets.extend(doubled);
    }
}

/// A hash table over a paged file. The directory is guarded by a
/// reader/writer latch; bucket pages are latched individually for the
/// duration of each operation.
pub struct HashTable {
    pager: Arc<Pager>,
    directory: RwLock<Directory>,
}

impl HashTable {
    /// Build a fresh table with four buckets at depth 2.
    pub fn new(pager: Arc<Pager>) -> Result<Self> {
        let depth = 2i64;
        let mut buckets = Vec::with_capacity(1 << depth);
        for _ in 0..(1 << depth) {
            let page = pager.get_page(pager.get_free_pn())?;
            let mut bucket = HashBucket::load(&page);
            bucket.update_depth(depth);
            buckets.push(page.pagenum());
        }
        Ok(Self {
            pager,
            directory: RwLock::new(Directory { depth, buckets }),
        })
    }

    pub fn pager(&self) -> &Arc<Pager> {
        &self.pager
    }

    /// The global depth of the directory.
    pub fn global_depth(&self) -> i64 {
        self.directory.read().depth
    }

    /// A snapshot of the directory's bucket page numbers.
    pub fn buckets(&self) -> Vec<PageNumber> {
        self.directory.read().buckets.clone()
    }

    /// Double the directory without splitting any bucket. Exposed for the
    /// join operator, which equalizes the depths of its partition tables.
    pub fn extend_table(&self) {
        self.directory.write().extend();
    }

    /// Find the entry with the given key.
    pub fn find(&self, key: Key) -> Result<Entry> {
        let directory = self.directory.read();
        let hash = hasher(key, directory.depth);
        let page = self.pager.get_page(directory.buckets[hash as usize])?;
        let _latch = page.rlatch();
        let bucket = HashBucket::load(&page);
        bucket.find(key).ok_or(IndexError::NotFound)
    }

    /// Insert the given pair, splitting the target bucket if it overflows.
    pub fn insert(&self, key: Key, value: Value) -> Result<()> {
        self.insert_inner(key, value, true)
    }

    /// Insert without the duplicate-key check. The join operator keys its
    /// partition tables by the join column, which need not be unique.
    pub fn insert_unchecked(&self, key: Key, value: Value) -> Result<()> {
        self.insert_inner(key, value, false)
    }

    fn insert_inner(&self, key: Key, value: Value, check_duplicate: bool) -> Result<()> {
        let mut directory = self.directory.write();
        let hash = hasher(key, directory.depth);
        let page = self.pager.get_page(directory.buckets[hash as usize])?;
        let _latch = page.wlatch();
        let mut bucket = HashBucket::load(&page);
        if check_duplicate && bucket.find(key).is_some() {
            return Err(IndexError::DuplicateKey);
        }
        if bucket.insert(key, value) {
            self.split(&mut directory, &page, hash)?;
        }
        Ok(())
    }

    /// Overwrite the value for an existing key.
    pub fn update(&self, key: Key, value: Value) -> Result<()> {
        let directory = self.directory.write();
        let hash = hasher(key, directory.depth);
        let page = self.pager.get_page(directory.buckets[hash as usize])?;
        let _latch = page.wlatch();
        let mut bucket = HashBucket::load(&page);
        if bucket.update(key, value) {
            Ok(())
        } else {
            Err(IndexError::NotFound)
        }
    }

    /// Remove the entry with the given key. Missing keys are a no-op; no
    /// coalescing is performed.
    pub fn delete(&self, key: Key) -> Result<()> {
        let directory = self.directory.write();
        let hash = hasher(key, directory.depth);
        let page = self.pager.get_page(directory.buckets[hash as usize])?;
        let _latch = page.wlatch();
        let mut bucket = HashBucket::load(&page);
        bucket.delete(key);
        Ok(())
    }

    /// All entries in the table, in bucket-page order.
    pub fn select(&self) -> Result<Vec<Entry>> {
        let _directory = self.directory.read();
        let mut entries = Vec::new();
        for pagenum in 0..self.pager.num_pages() {
            let page = self.pager.get_page(pagenum)?;
            let _latch = page.rlatch();
            let bucket = HashBucket::load(&page);
            entries.extend(bucket.select());
        }
        Ok(entries)
    }

    /// Split the given overflowing bucket, extending the directory first
    /// when the bucket is already at global depth, then redistributing its
    /// entries and rewiring every slot that now addresses the new bucket.
    /// Recurses while either half is still full.
    fn split(&self, directory: &mut Directory, page: &PageGuard<'_>, hash: i64) -> Result<()> {
        let mut bucket = HashBucket::load(page);
        let old_hash = hash % (1 << bucket.depth());
        let new_hash = old_hash + (1 << bucket.depth());
        if bucket.depth() == directory.depth {
            directory.extend();
        }
        bucket.update_depth(bucket.depth() + 1);
        let new_page = self.pager.get_page(self.pager.get_free_pn())?;
        let mut new_bucket = HashBucket::load(&new_page);
        new_bucket.update_depth(bucket.depth());
        // Move entries whose hash picked up the new high bit.
        let moved: Vec<Entry> = (0..bucket.num_keys()).map(|i| bucket.cell(i)).collect();
        let mut old_count = 0;
        let mut new_count = 0;
        for entry in moved {
            if hasher(entry.key, bucket.depth()) == new_hash {
                new_bucket.modify_cell(new_count, entry);
                new_count += 1;
            } else {
                bucket.modify_cell(old_count, entry);
                old_count += 1;
            }
        }
        bucket.update_num_keys(old_count);
        new_bucket.update_num_keys(new_count);
        // Point the affected directory slots at the new bucket.
        let stride = 1 << bucket.depth();
        let mut slot = new_hash;
        while slot < (1 << directory.depth) {
            directory.buckets[slot as usize] = new_page.pagenum();
            slot += stride;
        }
        // A lopsided redistribution may leave either half still full.
        if old_count >= BUCKET_SIZE {
            return self.split(directory, page, old_hash);
        }
        if new_count >= BUCKET_SIZE {
            return self.split(directory, &new_page, new_hash);
        }
        Ok(())
    }

    /// Print out each bucket through the directory.
    pub fn print(&self, w: &mut dyn Write) -> io::Result<()> {
        let directory = self.directory.read();
        writeln!(w, "====")?;
        writeln!(w, "global depth: {}", directory.depth)?;
        for (slot, &pagenum) in directory.buckets.iter().enumerate() {
            writeln!(w, "====")?;
            writeln!(w, "bucket {}", slot)?;
            let Ok(page) = self.pager.get_page(pagenum) else {
                continue;
            };
            let _latch = page.rlatch();
            HashBucket::load(&page).print(w)?;
        }
        writeln!(w, "====")
    }

    /// Print out the bucket at a specific page number.
    pub fn print_pn(&self, pagenum: PageNumber, w: &mut dyn Write) -> io::Result<()> {
        let _directory = self.directory.read();
        if pagenum >= self.pager.num_pages() {
            writeln!(w, "out of bounds")?;
            return Ok(());
        }
        let Ok(page) = self.pager.get_page(pagenum) else {
            return Ok(());
        };
        let _latch = page.rlatch();
        HashBucket::load(&page).print(w)
    }

    /// Serialize the directory to the meta file: the global depth followed
    /// by one page number per slot, paginated at the page size. The file
    /// is rewritten from scratch so read-back sees exactly this directory.
    pub fn write_directory(&self, meta_path: &Path) -> Result<()> {
        let directory = self.directory.read();
        if meta_path.exists() {
            std::fs::remove_file(meta_path).map_err(crate::storage::PagerError::Io)?;
        }
        let meta_pager = Pager::open(meta_path)?;
        let mut page = meta_pager.get_page(meta_pager.get_free_pn())?;
        let mut buf = [0u8; INT_SIZE];
        varint::put_varint(&mut buf, directory.depth);
        page.update(&buf, 0, INT_SIZE);
        let mut offset = INT_SIZE;
        for &pagenum in &directory.buckets {
            if offset + INT_SIZE > PAGE_SIZE {
                page = meta_pager.get_page(meta_pager.get_free_pn())?;
                offset = 0;
            }
            varint::put_varint(&mut buf, pagenum);
            page.update(&buf, offset, INT_SIZE);
            offset += INT_SIZE;
        }
        drop(page);
        meta_pager.close()?;
        Ok(())
    }

    /// Rehydrate a table's directory from its meta file.
    pub fn read_directory(pager: Arc<Pager>, meta_path: &Path) -> Result<Self> {
        let meta_pager = Pager::open(meta_path)?;
        let mut page = meta_pager.get_page(0)?;
        let depth = page.with_data(|data| varint::varint(&data[..INT_SIZE]));
        let mut offset = INT_SIZE;
        let slots = 1i64 << depth;
        let mut buckets = Vec::with_capacity(slots as usize);
        for _ in 0..slots {
            if offset + INT_SIZE > PAGE_SIZE {
                let next = page.pagenum() + 1;
                page = meta_pager.get_page(next)?;
                offset = 0;
            }
            let pagenum =
                page.with_data(|data| varint::varint(&data[offset..offset + INT_SIZE]));
            buckets.push(pagenum);
            offset += INT_SIZE;
        }
        drop(page);
        meta_pager.close()?;
        Ok(Self {
            pager,
            directory: RwLock::new(Directory { depth, buckets }),
        })
    }
}

/// Path of the sibling meta file for a table file.
pub fn meta_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".meta");
    PathBuf::from(name)
}
