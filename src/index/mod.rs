pub mod btree;
pub mod hash;

use std::io::{self, Write};

use thiserror::Error;

use crate::common::{Entry, Key, PageNumber, Value};
use crate::storage::{Pager, PagerError};

/// Error type for index operations.
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("entry could not be found")]
    NotFound,

    #[error("cannot insert duplicate key")]
    DuplicateKey,

    #[error("pager error: {0}")]
    Pager(#[from] PagerError),

    #[error("corrupt index: {0}")]
    Corrupt(String),
}

/// Result type for index operations.
pub type Result<T> = std::result::Result<T, IndexError>;

/// The kind of structure backing a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexType {
    BTree,
    Hash,
}

impl IndexType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexType::BTree => "btree",
            IndexType::Hash => "hash",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "btree" => Some(IndexType::BTree),
            "hash" => Some(IndexType::Hash),
            _ => None,
        }
    }
}

/// A table abstraction over the entries stored in the database. A table is
/// either a clustered B+ tree or an extendible hash index.
pub trait Index: Send + Sync {
    /// This table's name, which is the base name of its backing file.
    fn name(&self) -> String;

    /// The kind of index backing this table.
    fn index_type(&self) -> IndexType;

    /// The pager backing this table.
    fn pager(&self) -> &Pager;

    /// Find the entry with the given key.
    fn find(&self, key: Key) -> Result<Entry>;

    /// Insert a new entry; duplicate keys are rejected.
    fn insert(&self, key: Key, value: Value) -> Result<()>;

    /// Overwrite the value of an existing entry.
    fn update(&self, key: Key, value: Value) -> Result<()>;

    /// Remove an entry. Deleting a missing key is a no-op.
    fn delete(&self, key: Key) -> Result<()>;

    /// All entries in the table.
    fn select(&self) -> Result<Vec<Entry>>;

    /// Pretty-print the whole table.
    fn print(&self, w: &mut dyn Write) -> io::Result<()>;

    /// Pretty-print the node or bucket at the given page number.
    fn print_pn(&self, pagenum: PageNumber, w: &mut dyn Write) -> io::Result<()>;

    /// Persist any index metadata that lives outside the table file, such
    /// as a hash directory. Called when a checkpoint snapshots the data
    /// directory.
    fn write_meta(&self) -> Result<()> {
        Ok(())
    }

    /// Flush all changes to disk.
    fn close(&self) -> Result<()>;
}
