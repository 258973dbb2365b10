//! Transaction context: binding of transactions to threads
//!
//! A [`TransactionAdapter`] maps the calling unit of execution to the
//! [`TransactionHandle`] it is working in. The only variant provided is
//! [`LocalTransactionAdapter`], which keeps the binding in a thread-local
//! slot per adapter instance, so several containers can be used from the
//! same thread without seeing each other's transactions.
//!
//! Invariant: a thread has at most one active handle per adapter.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;
use txstore_core::{Result, StoreError, TransactionHandle};

/// Begin/join/current/destroy semantics for one kind of transaction boundary
pub trait TransactionAdapter: Send + Sync {
    /// Start a transaction and bind it to the calling thread
    ///
    /// # Errors
    ///
    /// [`StoreError::TransactionAlreadyActive`] if the thread already has one.
    fn begin(&self, description: &str) -> Result<TransactionHandle>;

    /// Bind the calling thread to an existing transaction
    ///
    /// # Errors
    ///
    /// [`StoreError::InvalidExternalTransaction`] if the handle's external
    /// object does not belong to this adapter, and
    /// [`StoreError::TransactionAlreadyActive`] if the thread is bound to a
    /// different transaction.
    fn join(&self, handle: &TransactionHandle) -> Result<()>;

    /// The transaction bound to the calling thread
    ///
    /// # Errors
    ///
    /// [`StoreError::NoActiveTransaction`] if `enforce` is set and none is bound.
    fn current(&self, enforce: bool) -> Result<Option<TransactionHandle>>;

    /// Detach the calling thread from its transaction; idempotent
    fn destroy(&self);
}

thread_local! {
    /// Transactions bound to this thread, keyed by adapter id
    static BOUND: RefCell<HashMap<u64, TransactionHandle>> = RefCell::new(HashMap::new());
}

static NEXT_ADAPTER_ID: AtomicU64 = AtomicU64::new(1);

/// External transaction object of local transactions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalTransactionRef {
    /// Adapter that started the transaction
    pub adapter_id: u64,
}

/// Transaction adapter for local, thread-bound transactions
///
/// Transaction names are `TX-<n>` with `n` drawn from a per-adapter atomic
/// counter, so names are unique and increasing per container.
#[derive(Debug)]
pub struct LocalTransactionAdapter {
    id: u64,
    tx_seq: AtomicU64,
}

impl LocalTransactionAdapter {
    /// Create an adapter with a fresh thread-local slot
    pub fn new() -> Self {
        LocalTransactionAdapter {
            id: NEXT_ADAPTER_ID.fetch_add(1, Ordering::Relaxed),
            tx_seq: AtomicU64::new(0),
        }
    }

    /// Id of this adapter's thread-local slot
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Number of transactions started so far
    pub fn started(&self) -> u64 {
        self.tx_seq.load(Ordering::SeqCst)
    }

    fn bound(&self) -> Option<TransactionHandle> {
        BOUND.with(|slot| slot.borrow().get(&self.id).cloned())
    }
}

impl Default for LocalTransactionAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionAdapter for LocalTransactionAdapter {
    fn begin(&self, description: &str) -> Result<TransactionHandle> {
        if let Some(current) = self.bound() {
            return Err(StoreError::TransactionAlreadyActive {
                current: current.to_string(),
            });
        }
        let seq = self.tx_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let external: Arc<dyn Any + Send + Sync> = Arc::new(LocalTransactionRef {
            adapter_id: self.id,
        });
        let handle = TransactionHandle::new(seq, format!("TX-{}", seq), description, Some(external));
        BOUND.with(|slot| slot.borrow_mut().insert(self.id, handle.clone()));
        debug!(target: "txstore::txn", tx = %handle, "Transaction started");
        Ok(handle)
    }

    fn join(&self, handle: &TransactionHandle) -> Result<()> {
        match handle.external_as::<LocalTransactionRef>() {
            Some(local) if local.adapter_id == self.id => {}
            Some(local) => {
                return Err(StoreError::InvalidExternalTransaction(format!(
                    "{} was started by another container (adapter {})",
                    handle, local.adapter_id
                )))
            }
            None => {
                return Err(StoreError::InvalidExternalTransaction(format!(
                    "{} has no local transaction object",
                    handle
                )))
            }
        }
        if let Some(current) = self.bound() {
            if &current == handle {
                return Ok(());
            }
            return Err(StoreError::TransactionAlreadyActive {
                current: current.to_string(),
            });
        }
        BOUND.with(|slot| slot.borrow_mut().insert(self.id, handle.clone()));
        debug!(target: "txstore::txn", tx = %handle, "Joined transaction");
        Ok(())
    }

    fn current(&self, enforce: bool) -> Result<Option<TransactionHandle>> {
        match self.bound() {
            None if enforce => Err(StoreError::NoActiveTransaction),
            bound => Ok(bound),
        }
    }

    fn destroy(&self) {
        let removed = BOUND.with(|slot| slot.borrow_mut().remove(&self.id));
        if let Some(tx) = removed {
            debug!(target: "txstore::txn", tx = %tx, "Transaction detached from thread");
        }
    }
}

impl Drop for LocalTransactionAdapter {
    fn drop(&mut self) {
        // Other threads' slots are released when those threads exit.
        let _ = BOUND.try_with(|slot| slot.borrow_mut().remove(&self.id));
    }
}
