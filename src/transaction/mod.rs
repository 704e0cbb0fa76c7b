pub mod deadlock;
pub mod lock_manager;
pub mod manager;

use thiserror::Error;

/// Errors that can occur during transaction processing.
#[derive(Error, Debug)]
pub enum TransactionError {
    #[error("transaction already began")]
    AlreadyBegun,

    #[error("no transactions running")]
    NoTransaction,

    #[error("cannot upgrade read lock to write lock")]
    CannotUpgrade,

    #[error("deadlock detected")]
    Deadlock,

    #[error("tried to unlock nonexistent resource")]
    NonexistentResource,

    #[error("transaction does not hold this lock with the given mode")]
    LockMismatch,
}

/// Result type for transaction operations.
pub type Result<T> = std::result::Result<T, TransactionError>;

pub use deadlock::WaitsForGraph;
pub use lock_manager::{LockManager, LockMode, Resource};
pub use manager::{Transaction, TransactionManager};
