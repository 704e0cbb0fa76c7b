//! Extendible hash index.

pub mod bucket;
pub mod table;

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::common::{Entry, Key, PageNumber, Value};
use crate::index::{Index, IndexType, Result};
use crate::storage::Pager;

pub use bucket::{HashBucket, BUCKET_SIZE};
pub use table::{hasher, meta_path, HashTable};

/// A table backed by an extendible hash table.
pub struct HashIndex {
    table: HashTable,
    path: PathBuf,
}

impl HashIndex {
    /// Open the table stored at the given path. A new table starts with
    /// four empty buckets; an existing one rehydrates its directory from
    /// the sibling meta file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let pager = Arc::new(Pager::open(&path)?);
        let table = if pager.num_pages() == 0 {
            HashTable::new(pager)?
        } else {
            HashTable::read_directory(pager, &meta_path(&path))?
        };
        Ok(Self { table, path })
    }

    pub fn table(&self) -> &HashTable {
        &self.table
    }
}

impl Index for HashIndex {
    fn name(&self) -> String {
        self.table.pager().file_name()
    }

    fn index_type(&self) -> IndexType {
        IndexType::Hash
    }

    fn pager(&self) -> &Pager {
        self.table.pager()
    }

    fn find(&self, key: Key) -> Result<Entry> {
        self.table.find(key)
    }

    fn insert(&self, key: Key, value: Value) -> Result<()> {
        self.table.insert(key, value)
    }

    fn update(&self, key: Key, value: Value) -> Result<()> {
        self.table.update(key, value)
    }

    fn delete(&self, key: Key) -> Result<()> {
        self.table.delete(key)
    }

    fn select(&self) -> Result<Vec<Entry>> {
        self.table.select()
    }

    fn print(&self, w: &mut dyn Write) -> io::Result<()> {
        self.table.print(w)
    }

    fn print_pn(&self, pagenum: PageNumber, w: &mut dyn Write) -> io::Result<()> {
        self.table.print_pn(pagenum, w)
    }

    fn write_meta(&self) -> Result<()> {
        self.table.write_directory(&meta_path(&self.path))
    }

    /// Persist the directory to the meta file, then flush the bucket
    /// pages.
    fn close(&self) -> Result<()> {
        self.write_meta()?;
        self.table.pager().close()?;
        Ok(())
    }
}
