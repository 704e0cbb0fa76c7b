//! The database: a directory of named tables, each backed by a B+ tree or
//! an extendible hash index.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

use crate::index::btree::BTreeIndex;
use crate::index::hash::{meta_path, HashIndex};
use crate::index::{Index, IndexError, IndexType};

/// Error type for database operations.
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("table name must be alphanumeric")]
    InvalidName,

    #[error("table already exists")]
    TableExists,

    #[error("table not found")]
    TableNotFound,

    #[error("index error: {0}")]
    Index(#[from] IndexError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Result type for database operations.
pub type Result<T> = std::result::Result<T, DatabaseError>;

/// One database per process, owning a map of open tables.
pub struct Database {
    basepath: PathBuf,
    tables: RwLock<HashMap<String, Arc<dyn Index>>>,
}

impl Database {
    /// Open a database rooted at the given data folder, creating the
    /// folder if needed.
    pub fn open(folder: impl AsRef<Path>) -> Result<Self> {
        let basepath = folder.as_ref().to_path_buf();
        std::fs::create_dir_all(&basepath)?;
        Ok(Self {
            basepath,
            tables: RwLock::new(HashMap::new()),
        })
    }

    /// The data folder backing this database.
    pub fn base_path(&self) -> &Path {
        &self.basepath
    }

    /// Create a table with the given type. The table's backing file is
    /// named after it inside the data folder.
    pub fn create_table(&self, name: &str, index_type: IndexType) -> Result<Arc<dyn Index>> {
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(DatabaseError::InvalidName);
        }
        let path = self.basepath.join(name);
        if path.exists() {
            return Err(DatabaseError::TableExists);
        }
        let index: Arc<dyn Index> = match index_type {
            IndexType::BTree => Arc::new(BTreeIndex::open(&path)?),
            IndexType::Hash => Arc::new(HashIndex::open(&path)?),
        };
        self.tables
            .write()
            .insert(name.to_string(), Arc::clone(&index));
        Ok(index)
    }

    /// Get a table by name, opening it from disk if it is not already
    /// resident. A table with a sibling meta file is a hash index;
    /// anything else is a B+ tree.
    pub fn get_table(&self, name: &str) -> Result<Arc<dyn Index>> {
        if let Some(index) = self.tables.read().get(name) {
            return Ok(Arc::clone(index));
        }
        let path = self.basepath.join(name);
        if !path.exists() {
            return Err(DatabaseError::TableNotFound);
        }
        let index: Arc<dyn Index> = if meta_path(&path).exists() {
            Arc::new(HashIndex::open(&path)?)
        } else {
            Arc::new(BTreeIndex::open(&path)?)
        };
        self.tables
            .write()
            .insert(name.to_string(), Arc::clone(&index));
        Ok(index)
    }

    /// A snapshot of every open table.
    pub fn tables(&self) -> Vec<Arc<dyn Index>> {
        self.tables.read().values().cloned().collect()
    }

    /// Close each table in the database, reporting the first error after
    /// attempting them all.
    pub fn close(&self) -> Result<()> {
        let mut first_err = None;
        for table in self.tables.read().values() {
            if let Err(e) = table.close() {
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
        match first_err {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }
}
