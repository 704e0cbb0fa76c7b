//! Strict two-phase locking with deadlock abort.
//!
//! Each client runs at most one transaction. A transaction acquires locks
//! statement by statement and releases nothing until commit. Before
//! blocking on a contended resource, the manager publishes waits-for edges
//! toward every conflicting holder and aborts the request if they close a
//! cycle; the edges stay visible while the request blocks so a later
//! requester can observe the wait.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

use crate::common::Key;
use crate::transaction::deadlock::WaitsForGraph;
use crate::transaction::lock_manager::{LockManager, LockMode, Resource};
use crate::transaction::{Result, TransactionError};

/// An active transaction: a client id and the resources it holds.
pub struct Transaction {
    client_id: Uuid,
    resources: RwLock<HashMap<Resource, LockMode>>,
}

impl Transaction {
    fn new(client_id: Uuid) -> Self {
        Self {
            client_id,
            resources: RwLock::new(HashMap::new()),
        }
    }

    pub fn client_id(&self) -> Uuid {
        self.client_id
    }

    /// The resources this transaction holds, with their modes.
    pub fn resources(&self) -> HashMap<Resource, LockMode> {
        self.resources.read().clone()
    }
}

/// Manages all of the transactions on a server.
pub struct TransactionManager {
    lock_manager: Arc<LockManager>,
    graph: WaitsForGraph,
    /// Serializes the publish-edges / check-cycle / decide sequence so a
    /// symmetric race resolves to exactly one loser.
    protocol: Mutex<()>,
    transactions: RwLock<HashMap<Uuid, Arc<Transaction>>>,
}

impl TransactionManager {
    pub fn new(lock_manager: Arc<LockManager>) -> Self {
        Self {
            lock_manager,
            graph: WaitsForGraph::new(),
            protocol: Mutex::new(()),
            transactions: RwLock::new(HashMap::new()),
        }
    }

    pub fn lock_manager(&self) -> &Arc<LockManager> {
        &self.lock_manager
    }

    /// Get a particular client's transaction, if one is running.
    pub fn get_transaction(&self, client_id: Uuid) -> Option<Arc<Transaction>> {
        self.transactions.read().get(&client_id).cloned()
    }

    /// Begin a transaction for the given client; errors if one already
    /// began.
    pub fn begin(&self, client_id: Uuid) -> Result<()> {
        let mut transactions = self.transactions.write();
        if transactions.contains_key(&client_id) {
            return Err(TransactionError::AlreadyBegun);
        }
        transactions.insert(client_id, Arc::new(Transaction::new(client_id)));
        Ok(())
    }

    /// Lock the given resource on behalf of a client. Reentrant for a mode
    /// already held (a write lock also satisfies a read request); upgrades
    /// are refused; a request that would close a waits-for cycle fails
    /// with Deadlock.
    pub fn lock(&self, client_id: Uuid, table_name: &str, key: Key, mode: LockMode) -> Result<()> {
        let Some(transaction) = self.get_transaction(client_id) else {
            // No transaction running for this client; nothing to track.
            return Ok(());
        };
        let resource = Resource::new(table_name, key);
        if let Some(held) = transaction.resources.read().get(&resource).copied() {
            if held == mode || (held == LockMode::Write && mode == LockMode::Read) {
                return Ok(());
            }
            return Err(TransactionError::CannotUpgrade);
        }
        // Publish the wait, refuse it if it closes a cycle.
        let conflicts = {
            let _protocol = self.protocol.lock();
            let conflicts = self.conflicting_transactions(&resource, mode, client_id);
            for &other in &conflicts {
                self.graph.add_edge(client_id, other);
            }
            if self.graph.detect_cycle() {
                for &other in &conflicts {
                    self.graph.remove_edge(client_id, other);
                }
                return Err(TransactionError::Deadlock);
            }
            conflicts
        };
        // The real wait happens inside the lock manager; the edges stay up
        // until the acquire returns.
        self.lock_manager.lock(&resource, mode);
        for other in conflicts {
            self.graph.remove_edge(client_id, other);
        }
        transaction.resources.write().insert(resource, mode);
        Ok(())
    }

    /// Unlock the given resource. The transaction must hold it with
    /// exactly the given mode.
    pub fn unlock(
        &self,
        client_id: Uuid,
        table_name: &str,
        key: Key,
        mode: LockMode,
    ) -> Result<()> {
        let Some(transaction) = self.get_transaction(client_id) else {
            return Ok(());
        };
        let resource = Resource::new(table_name, key);
        {
            let mut resources = transaction.resources.write();
            match resources.get(&resource) {
                Some(&held) if held == mode => {
                    resources.remove(&resource);
                }
                _ => return Err(TransactionError::LockMismatch),
            }
        }
        self.lock_manager.unlock(&resource, mode)
    }

    /// Commit the given transaction: release every held resource with its
    /// recorded mode, then forget the transaction.
    pub fn commit(&self, client_id: Uuid) -> Result<()> {
        let mut transactions = self.transactions.write();
        let Some(transaction) = transactions.get(&client_id).cloned() else {
            return Err(TransactionError::NoTransaction);
        };
        for (resource, mode) in transaction.resources.read().iter() {
            self.lock_manager.unlock(resource, *mode)?;
        }
        transactions.remove(&client_id);
        Ok(())
    }

    /// Every other active transaction holding `resource` where at least
    /// one side wants a write.
    fn conflicting_transactions(
        &self,
        resource: &Resource,
        mode: LockMode,
        client_id: Uuid,
    ) -> Vec<Uuid> {
        let transactions = self.transactions.read();
        let mut conflicts = Vec::new();
        for (&id, transaction) in transactions.iter() {
            if id == client_id {
                continue;
            }
            let resources = transaction.resources.read();
            if let Some(&held) = resources.get(resource) {
                if held == LockMode::Write || mode == LockMode::Write {
                    conflicts.push(id);
                }
            }
        }
        conflicts
    }
}
