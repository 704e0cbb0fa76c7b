use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tempfile::TempDir;

use burrowdb::database::Database;
use burrowdb::index::btree::BTreeIndex;
use burrowdb::index::hash::HashIndex;
use burrowdb::recovery::{self, RecoveryManager};
use burrowdb::transaction::{LockManager, TransactionManager};

/// A scratch B+ tree table backed by a temp directory.
#[allow(dead_code)]
pub fn create_test_btree() -> Result<(BTreeIndex, TempDir)> {
    let dir = TempDir::new()?;
    let table = BTreeIndex::open(dir.path().join("table"))?;
    Ok((table, dir))
}

/// A scratch hash table backed by a temp directory.
#[allow(dead_code)]
pub fn create_test_hash() -> Result<(HashIndex, TempDir)> {
    let dir = TempDir::new()?;
    let table = HashIndex::open(dir.path().join("table"))?;
    Ok((table, dir))
}

/// A full recoverable stack: database, transaction manager and recovery
/// manager over one data directory and log file.
#[allow(dead_code)]
pub struct RecoveryEnv {
    pub db: Arc<Database>,
    pub tm: Arc<TransactionManager>,
    pub rm: Arc<RecoveryManager>,
    pub data_dir: PathBuf,
    pub log_path: PathBuf,
}

/// Open (or reopen) the stack rooted at `root`, priming the data
/// directory from its checkpoint snapshot and replaying the log.
#[allow(dead_code)]
pub fn open_recovery_env(root: &std::path::Path) -> Result<RecoveryEnv> {
    let data_dir = root.join("data");
    let log_path = root.join("db.log");
    let db = Arc::new(recovery::prime(&data_dir)?);
    let tm = Arc::new(TransactionManager::new(Arc::new(LockManager::new())));
    let rm = Arc::new(RecoveryManager::new(
        Arc::clone(&db),
        Arc::clone(&tm),
        &log_path,
    )?);
    rm.recover()?;
    Ok(RecoveryEnv {
        db,
        tm,
        rm,
        data_dir,
        log_path,
    })
}
