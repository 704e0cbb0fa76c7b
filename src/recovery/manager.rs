//! The recovery manager: write-ahead logging, checkpointing with a
//! copy-on-checkpoint snapshot, crash recovery, and single-transaction
//! rollback.

use std::collections::{HashMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use uuid::Uuid;

use crate::common::{Key, Value};
use crate::database::{Database, DatabaseError};
use crate::index::{IndexError, IndexType};
use crate::recovery::handlers;
use crate::recovery::log_record::{Action, LogRecord};
use crate::recovery::{Result, RecoveryError};
use crate::transaction::TransactionManager;

struct RecoveryInner {
    log_file: File,
    /// The records written by each live transaction, in order, so a
    /// rollback can walk them in reverse without touching the log file.
    tx_stack: HashMap<Uuid, Vec<LogRecord>>,
}

/// Coordinates the write-ahead log with the transaction manager and the
/// database's pagers.
pub struct RecoveryManager {
    db: Arc<Database>,
    tm: Arc<TransactionManager>,
    log_path: PathBuf,
    inner: Mutex<RecoveryInner>,
}

impl RecoveryManager {
    /// Open or create the log file at `log_path`.
    pub fn new(
        db: Arc<Database>,
        tm: Arc<TransactionManager>,
        log_path: impl AsRef<Path>,
    ) -> Result<Self> {
        let log_path = log_path.as_ref().to_path_buf();
        let log_file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&log_path)?;
        Ok(Self {
            db,
            tm,
            log_path,
            inner: Mutex::new(RecoveryInner {
                log_file,
                tx_stack: HashMap::new(),
            }),
        })
    }

    /// Append one line to the log and fsync it. Expects `inner` locked.
    fn write_record(inner: &mut RecoveryInner, record: &LogRecord) -> Result<()> {
        writeln!(inner.log_file, "{}", record)?;
        inner.log_file.sync_data()?;
        Ok(())
    }

    /// Log a table creation.
    pub fn table(&self, index_type: IndexType, name: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        let record = LogRecord::Table {
            index_type,
            name: name.to_string(),
        };
        Self::write_record(&mut inner, &record)
    }

    /// Log a data change. Must be called before the change is applied.
    pub fn edit(
        &self,
        client_id: Uuid,
        table: &str,
        action: Action,
        key: Key,
        old_value: Value,
        new_value: Value,
    ) -> Result<()> {
        let mut inner = self.inner.lock();
        let record = LogRecord::Edit {
            client_id,
            table: table.to_string(),
            action,
            key,
            old_value,
            new_value,
        };
        inner
            .tx_stack
            .entry(client_id)
            .or_default()
            .push(record.clone());
        Self::write_record(&mut inner, &record)
    }

    /// Log a transaction start.
    pub fn start(&self, client_id: Uuid) -> Result<()> {
        let mut inner = self.inner.lock();
        let record = LogRecord::Start { client_id };
        inner
            .tx_stack
            .entry(client_id)
            .or_default()
            .push(record.clone());
        Self::write_record(&mut inner, &record)
    }

    /// Log a transaction commit and forget its record stack.
    pub fn commit(&self, client_id: Uuid) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.tx_stack.remove(&client_id);
        let record = LogRecord::Commit { client_id };
        Self::write_record(&mut inner, &record)
    }

    /// Drop the last `count` records a transaction logged. Used to cancel
    /// a logged-but-failed operation together with its compensating
    /// record.
    pub(crate) fn pop_edits(&self, client_id: Uuid, count: usize) {
        let mut inner = self.inner.lock();
        if let Some(stack) = inner.tx_stack.get_mut(&client_id) {
            let keep = stack.len().saturating_sub(count);
            stack.truncate(keep);
        }
    }

    /// Quiesce every table's pager, flush everything, write a checkpoint
    /// record listing the live transactions, and snapshot the data
    /// directory. The pagers stay frozen until the snapshot is complete.
    pub fn checkpoint(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        let tables = self.db.tables();
        let quiesces: Vec<_> = tables.iter().map(|t| t.pager().lock_all_updates()).collect();
        for quiesce in &quiesces {
            quiesce.flush_all()?;
        }
        // Hash directories live outside the table files; write them so the
        // snapshot reopens with the right index types.
        for table in &tables {
            table.write_meta()?;
        }
        let active: Vec<Uuid> = inner.tx_stack.keys().copied().collect();
        Self::write_record(&mut inner, &LogRecord::Checkpoint { active })?;
        self.delta()?;
        drop(quiesces);
        Ok(())
    }

    /// Refresh the recovery snapshot from the live data directory.
    fn delta(&self) -> Result<()> {
        let data_dir = self.db.base_path();
        let snapshot_dir = recovery_dir(data_dir);
        if snapshot_dir.exists() {
            std::fs::remove_dir_all(&snapshot_dir)?;
        }
        copy_dir_all(data_dir, &snapshot_dir)?;
        Ok(())
    }

    /// Re-apply a logged change. Insert tolerates an existing key by
    /// updating it, update tolerates a missing key by inserting it, and
    /// delete tolerates a missing key as a no-op, so replaying over a
    /// checkpoint snapshot converges no matter what was already flushed.
    pub fn redo(&self, record: &LogRecord) -> Result<()> {
        match record {
            LogRecord::Table { index_type, name } => {
                match self.db.create_table(name, *index_type) {
                    // Replaying over a base that already has the table is
                    // fine; later edits converge on it.
                    Err(DatabaseError::TableExists) => {}
                    other => {
                        other?;
                    }
                }
            }
            LogRecord::Edit {
                table,
                action,
                key,
                new_value,
                ..
            } => {
                let table = self.db.get_table(table)?;
                match action {
                    Action::Insert => match table.insert(*key, *new_value) {
                        Err(IndexError::DuplicateKey) => table.update(*key, *new_value)?,
                        other => other?,
                    },
                    Action::Update => match table.update(*key, *new_value) {
                        Err(IndexError::NotFound) => table.insert(*key, *new_value)?,
                        other => other?,
                    },
                    Action::Delete => match table.delete(*key) {
                        Err(IndexError::NotFound) => {}
                        other => other?,
                    },
                }
            }
            _ => {
                return Err(RecoveryError::InvalidLog(
                    "can only redo table and edit logs".to_string(),
                ))
            }
        }
        Ok(())
    }

    /// Apply the logical inverse of a logged change through the
    /// transactional handlers, so the undo is itself locked and logged.
    pub fn undo(&self, record: &LogRecord) -> Result<()> {
        let LogRecord::Edit {
            client_id,
            table,
            action,
            key,
            old_value,
            ..
        } = record
        else {
            return Err(RecoveryError::InvalidLog(
                "can only undo edit logs".to_string(),
            ));
        };
        match action {
            Action::Insert => handlers::delete(&self.db, &self.tm, self, table, *key, *client_id)?,
            Action::Update => {
                handlers::update(&self.db, &self.tm, self, table, *key, *old_value, *client_id)?
            }
            Action::Delete => {
                handlers::insert(&self.db, &self.tm, self, table, *key, *old_value, *client_id)?
            }
        }
        Ok(())
    }

    /// Read the log, dropping and truncating a torn final line. Returns
    /// the records and the index of the most recent checkpoint (0 when
    /// none exists).
    fn read_logs(&self) -> Result<(Vec<LogRecord>, usize)> {
        let inner = self.inner.lock();
        let content = std::fs::read_to_string(&self.log_path)?;
        let lines: Vec<&str> = content.lines().collect();
        let mut records = Vec::with_capacity(lines.len());
        for (i, line) in lines.iter().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match line.parse::<LogRecord>() {
                Ok(record) => records.push(record),
                Err(e) => {
                    if i == lines.len() - 1 {
                        // Torn tail: drop the partial line from the file.
                        log::info!("truncating torn log tail: {:?}", line);
                        let keep = content.len() - line.len();
                        inner.log_file.set_len(keep as u64)?;
                        break;
                    }
                    return Err(e);
                }
            }
        }
        let checkpoint_pos = records
            .iter()
            .rposition(|r| matches!(r, LogRecord::Checkpoint { .. }))
            .unwrap_or(0);
        Ok((records, checkpoint_pos))
    }

    /// Full recovery on startup: redo every record from the most recent
    /// checkpoint forward, then walk backward undoing every transaction
    /// that never committed.
    pub fn recover(&self) -> Result<()> {
        let (records, checkpoint_pos) = self.read_logs()?;
        let mut undo_set: HashSet<Uuid> = HashSet::new();
        for record in &records[checkpoint_pos..] {
            match record {
                LogRecord::Checkpoint { active } => {
                    for &id in active {
                        undo_set.insert(id);
                        let _ = self.tm.begin(id);
                    }
                }
                LogRecord::Table { .. } | LogRecord::Edit { .. } => self.redo(record)?,
                LogRecord::Start { client_id } => {
                    undo_set.insert(*client_id);
                    let _ = self.tm.begin(*client_id);
                }
                LogRecord::Commit { client_id } => {
                    undo_set.remove(client_id);
                    let _ = self.tm.commit(*client_id);
                }
            }
        }
        log::debug!("recovery forward pass done, {} to undo", undo_set.len());
        let mut i = records.len();
        while !undo_set.is_empty() && i > 0 {
            i -= 1;
            match &records[i] {
                LogRecord::Edit { client_id, .. } if undo_set.contains(client_id) => {
                    self.undo(&records[i])?;
                }
                LogRecord::Start { client_id } if undo_set.contains(client_id) => {
                    self.tm.commit(*client_id)?;
                    self.commit(*client_id)?;
                    undo_set.remove(client_id);
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Roll back a particular transaction: undo its edits newest-first,
    /// then commit it so recovery sees it as finished.
    pub fn rollback(&self, client_id: Uuid) -> Result<()> {
        let records = {
            let inner = self.inner.lock();
            inner.tx_stack.get(&client_id).cloned().unwrap_or_default()
        };
        if records.is_empty() {
            return Ok(());
        }
        if !matches!(records.first(), Some(LogRecord::Start { .. })) {
            return Err(RecoveryError::InvalidLog(
                "rollback of a transaction with no start log".to_string(),
            ));
        }
        for record in records.iter().rev() {
            if matches!(record, LogRecord::Edit { .. }) {
                self.undo(record)?;
            }
        }
        self.tm.commit(client_id)?;
        self.commit(client_id)?;
        Ok(())
    }
}

/// The snapshot directory that sits alongside a data directory.
pub fn recovery_dir(data_dir: &Path) -> PathBuf {
    // Normalize away any trailing separator before appending the suffix.
    let trimmed: PathBuf = data_dir.components().collect();
    let mut name = trimmed.into_os_string();
    name.push("-recovery");
    PathBuf::from(name)
}

/// Prime the database for recovery: when a checkpoint snapshot exists,
/// replace the data directory with it so the log replays over the state
/// as of the last checkpoint.
pub fn prime(folder: impl AsRef<Path>) -> Result<Database> {
    let data_dir = folder.as_ref();
    let snapshot_dir = recovery_dir(data_dir);
    if !data_dir.exists() {
        std::fs::create_dir_all(&snapshot_dir)?;
        return Ok(Database::open(data_dir)?);
    }
    if !snapshot_dir.exists() {
        return Ok(Database::open(data_dir)?);
    }
    std::fs::remove_dir_all(data_dir)?;
    copy_dir_all(&snapshot_dir, data_dir)?;
    Ok(Database::open(data_dir)?)
}

fn copy_dir_all(src: &Path, dst: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_all(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
