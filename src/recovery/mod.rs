pub mod handlers;
pub mod log_record;
pub mod manager;

use std::io;

use thiserror::Error;

use crate::database::DatabaseError;
use crate::index::IndexError;
use crate::storage::PagerError;
use crate::transaction::TransactionError;

/// Error type for logging and recovery operations.
#[derive(Error, Debug)]
pub enum RecoveryError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("{0}")]
    ParseError(String),

    #[error("invalid log: {0}")]
    InvalidLog(String),

    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("index error: {0}")]
    Index(#[from] IndexError),

    #[error("pager error: {0}")]
    Pager(#[from] PagerError),

    #[error("transaction error: {0}")]
    Transaction(#[from] TransactionError),
}

/// Result type for logging and recovery operations.
pub type Result<T> = std::result::Result<T, RecoveryError>;

pub use log_record::{Action, LogRecord};
pub use manager::{prime, recovery_dir, RecoveryManager};
