//! Transaction-level locks over database resources.
//!
//! A resource is a `(table, key)` pair. Locks here are held across
//! statements until commit, so they are explicit lock/unlock pairs rather
//! than RAII guards; a condvar-backed reader/writer lock supports
//! releasing from a different call than the one that acquired.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::common::Key;
use crate::transaction::{Result, TransactionError};

/// Indicates whether a lock is a reader or a writer lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Read,
    Write,
}

/// The unit of logical locking: a table name and a key within it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Resource {
    pub table_name: String,
    pub key: Key,
}

impl Resource {
    pub fn new(table_name: impl Into<String>, key: Key) -> Self {
        Self {
            table_name: table_name.into(),
            key,
        }
    }
}

#[derive(Default)]
struct LockState {
    readers: u64,
    writer: bool,
}

/// A reader/writer lock with explicit acquire and release. No fairness is
/// guaranteed; writers simply wait until no reader or writer is active.
struct ResourceLock {
    state: Mutex<LockState>,
    cond: Condvar,
}

impl ResourceLock {
    fn new() -> Self {
        Self {
            state: Mutex::new(LockState::default()),
            cond: Condvar::new(),
        }
    }

    fn lock(&self, mode: LockMode) {
        let mut state = self.state.lock();
        match mode {
            LockMode::Read => {
                while state.writer {
                    self.cond.wait(&mut state);
                }
                state.readers += 1;
            }
            LockMode::Write => {
                while state.writer || state.readers > 0 {
                    self.cond.wait(&mut state);
                }
                state.writer = true;
            }
        }
    }

    fn unlock(&self, mode: LockMode) {
        let mut state = self.state.lock();
        match mode {
            LockMode::Read => {
                if state.readers == 0 {
                    log::error!("read-unlock of a resource with no readers");
                } else {
                    state.readers -= 1;
                }
            }
            LockMode::Write => {
                if !state.writer {
                    log::error!("write-unlock of a resource with no writer");
                }
                state.writer = false;
            }
        }
        self.cond.notify_all();
    }
}

/// Lock manager handling transaction-level locks over database resources.
/// The manager mutex guards only the registry map, never the taken locks.
pub struct LockManager {
    locks: Mutex<HashMap<Resource, Arc<ResourceLock>>>,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LockManager {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Lock a resource, lazily allocating its lock on first touch. Blocks
    /// until the requested mode is available.
    pub fn lock(&self, resource: &Resource, mode: LockMode) {
        let lock = {
            let mut locks = self.locks.lock();
            Arc::clone(
                locks
                    .entry(resource.clone())
                    .or_insert_with(|| Arc::new(ResourceLock::new())),
            )
        };
        lock.lock(mode);
    }

    /// Unlock a resource. Fails if the resource was never locked.
    pub fn unlock(&self, resource: &Resource, mode: LockMode) -> Result<()> {
        let lock = {
            let locks = self.locks.lock();
            match locks.get(resource) {
                Some(lock) => Arc::clone(lock),
                None => return Err(TransactionError::NonexistentResource),
            }
        };
        lock.unlock(mode);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_unlock_unknown_resource() {
        let lm = LockManager::new();
        let r = Resource::new("t", 1);
        match lm.unlock(&r, LockMode::Write) {
            Err(TransactionError::NonexistentResource) => {}
            other => panic!("expected nonexistent resource, got {:?}", other),
        }
    }

    #[test]
    fn test_readers_share_writers_exclude() {
        let lm = Arc::new(LockManager::new());
        let r = Resource::new("t", 7);
        lm.lock(&r, LockMode::Read);
        lm.lock(&r, LockMode::Read);
        lm.unlock(&r, LockMode::Read).unwrap();
        lm.unlock(&r, LockMode::Read).unwrap();

        lm.lock(&r, LockMode::Write);
        let acquired = Arc::new(AtomicUsize::new(0));
        let handle = {
            let lm = Arc::clone(&lm);
            let r = r.clone();
            let acquired = Arc::clone(&acquired);
            std::thread::spawn(move || {
                lm.lock(&r, LockMode::Write);
                acquired.store(1, Ordering::SeqCst);
                lm.unlock(&r, LockMode::Write).unwrap();
            })
        };
        std::thread::sleep(std::time::Duration::from_millis(50));
        assert_eq!(acquired.load(Ordering::SeqCst), 0);
        lm.unlock(&r, LockMode::Write).unwrap();
        handle.join().unwrap();
        assert_eq!(acquired.load(Ordering::SeqCst), 1);
    }
}
