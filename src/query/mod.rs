pub mod bloom;
pub mod hash_join;

use thiserror::Error;

use crate::index::IndexError;
use crate::storage::pager::PagerError;

/// Error type for query operators.
#[derive(Error, Debug)]
pub enum QueryError {
    #[error("index error: {0}")]
    Index(#[from] IndexError),

    #[error("pager error: {0}")]
    Pager(#[from] PagerError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("join was cancelled")]
    Cancelled,
}

/// Result type for query operators.
pub type Result<T> = std::result::Result<T, QueryError>;

pub use bloom::BloomFilter;
pub use hash_join::{join, EntryPair};
