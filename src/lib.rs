// Export public modules
pub mod common;
pub mod database;
pub mod index;
pub mod query;
pub mod recovery;
pub mod repl;
pub mod storage;
pub mod transaction;

// Re-export key items for convenient access
pub use common::{Entry, Key, PageNumber, Value};
pub use database::{Database, DatabaseError};
pub use index::btree::BTreeIndex;
pub use index::hash::HashIndex;
pub use index::{Index, IndexError, IndexType};
pub use recovery::{RecoveryError, RecoveryManager};
pub use storage::{Pager, PagerError};
pub use transaction::{LockManager, LockMode, TransactionError, TransactionManager};
