//! Transactional command handlers: each data-changing operation locks its
//! resource, writes its log record before applying the change, and rolls
//! the transaction back when the apply fails after logging.

use std::io::Write;

use uuid::Uuid;

use crate::database::Database;
use crate::index::{IndexError, IndexType};
use crate::recovery::log_record::Action;
use crate::recovery::manager::RecoveryManager;
use crate::recovery::{Result, RecoveryError};
use crate::transaction::{LockMode, TransactionError, TransactionManager};

/// Create a table, logging the DDL first.
pub fn create_table(
    db: &Database,
    rm: &RecoveryManager,
    index_type: IndexType,
    name: &str,
) -> Result<()> {
    rm.table(index_type, name)?;
    db.create_table(name, index_type)?;
    Ok(())
}

/// Read one entry under a read lock and print it. A refused lock aborts
/// the whole transaction; no record is written since nothing changed.
pub fn find(
    db: &Database,
    tm: &TransactionManager,
    rm: &RecoveryManager,
    table_name: &str,
    key: i64,
    client_id: Uuid,
    w: &mut dyn Write,
) -> Result<()> {
    let table = db.get_table(table_name)?;
    if let Err(e) = tm.lock(client_id, table_name, key, LockMode::Read) {
        rm.rollback(client_id)?;
        return Err(e.into());
    }
    let entry = table.find(key)?;
    writeln!(w, "({}, {})", entry.key, entry.value)?;
    Ok(())
}

/// Insert an entry. When the apply fails after its record was logged, a
/// compensating no-op record is written, both records are dropped from the
/// transaction's stack, and the transaction is rolled back.
pub fn insert(
    db: &Database,
    tm: &TransactionManager,
    rm: &RecoveryManager,
    table_name: &str,
    key: i64,
    value: i64,
    client_id: Uuid,
) -> Result<()> {
    let table = db.get_table(table_name)?;
    if table.find(key).is_ok() {
        return Err(RecoveryError::Index(IndexError::DuplicateKey));
    }
    rm.edit(client_id, table_name, Action::Insert, key, 0, value)?;
    let applied = lock_then(tm, client_id, table_name, key, || table.insert(key, value));
    if let Err(e) = applied {
        rm.edit(client_id, table_name, Action::Delete, key, value, 0)?;
        rm.pop_edits(client_id, 2);
        rm.rollback(client_id)?;
        return Err(e);
    }
    Ok(())
}

/// Update an entry, with the same logging and failure discipline as
/// [`insert`].
pub fn update(
    db: &Database,
    tm: &TransactionManager,
    rm: &RecoveryManager,
    table_name: &str,
    key: i64,
    value: i64,
    client_id: Uuid,
) -> Result<()> {
    let table = db.get_table(table_name)?;
    let old = table
        .find(key)
        .map_err(|_| RecoveryError::Index(IndexError::NotFound))?;
    rm.edit(client_id, table_name, Action::Update, key, old.value, value)?;
    let applied = lock_then(tm, client_id, table_name, key, || table.update(key, value));
    if let Err(e) = applied {
        rm.edit(client_id, table_name, Action::Update, key, value, old.value)?;
        rm.pop_edits(client_id, 2);
        rm.rollback(client_id)?;
        return Err(e);
    }
    Ok(())
}

/// Delete an entry, with the same logging and failure discipline as
/// [`insert`].
pub fn delete(
    db: &Database,
    tm: &TransactionManager,
    rm: &RecoveryManager,
    table_name: &str,
    key: i64,
    client_id: Uuid,
) -> Result<()> {
    let table = db.get_table(table_name)?;
    let old = table
        .find(key)
        .map_err(|_| RecoveryError::Index(IndexError::NotFound))?;
    rm.edit(client_id, table_name, Action::Delete, key, old.value, 0)?;
    let applied = lock_then(tm, client_id, table_name, key, || table.delete(key));
    if let Err(e) = applied {
        rm.edit(client_id, table_name, Action::Insert, key, 0, old.value)?;
        rm.pop_edits(client_id, 2);
        rm.rollback(client_id)?;
        return Err(e);
    }
    Ok(())
}

fn lock_then(
    tm: &TransactionManager,
    client_id: Uuid,
    table_name: &str,
    key: i64,
    apply: impl FnOnce() -> crate::index::Result<()>,
) -> Result<()> {
    tm.lock(client_id, table_name, key, LockMode::Write)?;
    apply()?;
    Ok(())
}

/// Print every entry of a table. Select takes no locks and may observe an
/// inconsistent view.
pub fn select(db: &Database, table_name: &str, w: &mut dyn Write) -> Result<()> {
    let table = db.get_table(table_name)?;
    for entry in table.select()? {
        writeln!(w, "({}, {})", entry.key, entry.value)?;
    }
    Ok(())
}

/// Grab a write lock on a resource without touching it. A refused lock
/// aborts the whole transaction; no record is written since nothing
/// changed.
pub fn lock(
    db: &Database,
    tm: &TransactionManager,
    rm: &RecoveryManager,
    table_name: &str,
    key: i64,
    client_id: Uuid,
) -> Result<()> {
    db.get_table(table_name)?;
    if let Err(e) = tm.lock(client_id, table_name, key, LockMode::Write) {
        rm.rollback(client_id)?;
        return Err(e.into());
    }
    Ok(())
}

/// Begin a transaction, logging the start record first.
pub fn begin(tm: &TransactionManager, rm: &RecoveryManager, client_id: Uuid) -> Result<()> {
    rm.start(client_id)?;
    if let Err(e) = tm.begin(client_id) {
        rm.rollback(client_id)?;
        return Err(e.into());
    }
    Ok(())
}

/// Commit a transaction, logging the commit record first.
pub fn commit(tm: &TransactionManager, rm: &RecoveryManager, client_id: Uuid) -> Result<()> {
    rm.commit(client_id)?;
    if let Err(e) = tm.commit(client_id) {
        rm.rollback(client_id)?;
        return Err(e.into());
    }
    Ok(())
}

/// Abort the client's running transaction by rolling it back.
pub fn abort(tm: &TransactionManager, rm: &RecoveryManager, client_id: Uuid) -> Result<()> {
    if tm.get_transaction(client_id).is_none() {
        return Err(RecoveryError::Transaction(TransactionError::NoTransaction));
    }
    rm.rollback(client_id)
}
