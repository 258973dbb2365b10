//! Container managing transaction lifecycle across stores
//!
//! A [`Container`] owns the transaction adapter, the status of every live
//! transaction and the stores created through it. Commit and rollback are
//! orchestrated here:
//!
//! ```text
//! commit:   before_commit → ACTIVE→COMMITTING → prepare(all stores)
//!           → commit(all stores) → COMMITTED → after_commit
//! rollback: ACTIVE→ROLLING_BACK → before_rollback → rollback(all stores)
//!           → ROLLED_BACK → after_rollback
//! ```
//!
//! Commits of one container are serialized by a commit section, so the
//! optional stale-entry check of every store sees a stable committed state
//! between prepare and merge.
//!
//! # Memory Ordering
//!
//! The metric counters use Relaxed ordering. They are observational only
//! and do not synchronize any other memory operations.

use crate::config::{ContainerConfig, StoreConfig};
use crate::store::Store;
use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use tracing::{debug, info, warn};
use txstore_concurrency::{
    CloningObjectAdapter, LocalTransactionAdapter, ObjectAdapter, TransactionAdapter,
    TransactionStatus,
};
use txstore_core::{
    ErrorCollector, Result, StoreError, TransactionHandle, TransactionListener, TxKey, TxValue,
};

/// A store taking part in the commit protocol, with its types erased
pub(crate) trait TransactionParticipant: Send + Sync {
    /// Store name
    fn name(&self) -> &str;

    /// Validate the transaction's changes; nothing is merged yet
    fn prepare(&self, tx: &TransactionHandle) -> Result<()>;

    /// Merge the transaction's changes, returning the number of merged entries
    fn commit(&self, tx: &TransactionHandle) -> Result<usize>;

    /// Discard the transaction's changes
    fn rollback(&self, tx: &TransactionHandle);

    /// Fail if the calling thread holds this store's serialization point
    fn check_not_committing(&self) -> Result<()>;
}

/// Binding of threads to transactions plus the status of live transactions
///
/// Shared between the container and its stores.
pub(crate) struct TransactionTable {
    adapter: Arc<dyn TransactionAdapter>,
    statuses: DashMap<u64, TransactionStatus>,
}

impl TransactionTable {
    fn new(adapter: Arc<dyn TransactionAdapter>) -> Self {
        TransactionTable {
            adapter,
            statuses: DashMap::new(),
        }
    }

    fn begin(&self, description: &str) -> Result<TransactionHandle> {
        self.drop_stale_binding();
        let tx = self.adapter.begin(description)?;
        self.statuses.insert(tx.seq(), TransactionStatus::Active);
        Ok(tx)
    }

    /// The transaction bound to the calling thread, if it is still live
    ///
    /// A binding to a transaction that was finished on another thread is
    /// released here.
    fn bound(&self) -> Option<TransactionHandle> {
        self.drop_stale_binding();
        self.adapter.current(false).ok().flatten()
    }

    fn drop_stale_binding(&self) {
        if let Ok(Some(tx)) = self.adapter.current(false) {
            if !self.statuses.contains_key(&tx.seq()) {
                debug!(target: "txstore::txn", tx = %tx, "Released binding of finished transaction");
                self.adapter.destroy();
            }
        }
    }

    /// The active transaction of the calling thread
    ///
    /// # Errors
    ///
    /// - [`StoreError::NoActiveTransaction`] if `enforce` is set and none is bound
    /// - [`StoreError::RecursiveCommit`] if the transaction is committing, which
    ///   means the caller runs inside a listener of that commit
    /// - [`StoreError::InvalidState`] if the transaction is rolling back
    pub(crate) fn current(
        &self,
        enforce: bool,
        scope: impl FnOnce() -> String,
    ) -> Result<Option<TransactionHandle>> {
        let Some(tx) = self.bound() else {
            return if enforce {
                Err(StoreError::NoActiveTransaction)
            } else {
                Ok(None)
            };
        };
        match self.status(&tx) {
            Some(TransactionStatus::Active) => Ok(Some(tx)),
            Some(TransactionStatus::Committing) => Err(StoreError::RecursiveCommit {
                scope: scope(),
                tx: tx.to_string(),
            }),
            Some(other) => Err(StoreError::InvalidState(format!(
                "{} cannot be used in state {}",
                tx, other
            ))),
            None => Err(StoreError::InvalidState(format!(
                "{} is not known to this container",
                tx
            ))),
        }
    }

    pub(crate) fn status(&self, tx: &TransactionHandle) -> Option<TransactionStatus> {
        self.statuses.get(&tx.seq()).map(|s| *s)
    }

    fn transition<F>(&self, tx: &TransactionHandle, f: F) -> Result<()>
    where
        F: FnOnce(&mut TransactionStatus, &TransactionHandle) -> Result<()>,
    {
        let mut status = self.statuses.get_mut(&tx.seq()).ok_or_else(|| {
            StoreError::InvalidState(format!("{} is not known to this container", tx))
        })?;
        f(&mut status, tx)
    }

    /// Forget a finished transaction and detach it from the calling thread
    fn finish(&self, tx: &TransactionHandle) {
        self.statuses.remove(&tx.seq());
        if let Ok(Some(current)) = self.adapter.current(false) {
            if &current == tx {
                self.adapter.destroy();
            }
        }
    }
}

/// Transaction metrics
///
/// Provides statistics about transaction lifecycle.
#[derive(Debug, Clone)]
pub struct TransactionMetrics {
    /// Number of currently active transactions
    pub active_count: u64,
    /// Total number of transactions started
    pub total_started: u64,
    /// Total number of transactions committed
    pub total_committed: u64,
    /// Total number of transactions rolled back
    pub total_rolled_back: u64,
    /// Commit success rate (committed / started)
    pub commit_rate: f64,
}

impl TransactionMetrics {
    /// Total transactions that completed (committed + rolled back)
    pub fn total_completed(&self) -> u64 {
        self.total_committed + self.total_rolled_back
    }

    /// Rollback rate (rolled back / started)
    pub fn rollback_rate(&self) -> f64 {
        if self.total_started > 0 {
            self.total_rolled_back as f64 / self.total_started as f64
        } else {
            0.0
        }
    }
}

#[derive(Debug, Default)]
struct MetricCounters {
    active_count: AtomicU64,
    total_started: AtomicU64,
    total_committed: AtomicU64,
    total_rolled_back: AtomicU64,
}

impl MetricCounters {
    fn record_start(&self) {
        self.active_count.fetch_add(1, Ordering::Relaxed);
        self.total_started.fetch_add(1, Ordering::Relaxed);
    }

    fn record_end(&self, counter: &AtomicU64) {
        let _ = self
            .active_count
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |x| {
                Some(x.saturating_sub(1))
            });
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn record_commit(&self) {
        self.record_end(&self.total_committed);
    }

    fn record_rollback(&self) {
        self.record_end(&self.total_rolled_back);
    }

    fn snapshot(&self) -> TransactionMetrics {
        let started = self.total_started.load(Ordering::Relaxed);
        let committed = self.total_committed.load(Ordering::Relaxed);
        TransactionMetrics {
            active_count: self.active_count.load(Ordering::Relaxed),
            total_started: started,
            total_committed: committed,
            total_rolled_back: self.total_rolled_back.load(Ordering::Relaxed),
            commit_rate: if started > 0 {
                committed as f64 / started as f64
            } else {
                0.0
            },
        }
    }
}

struct ContainerCore {
    config: ContainerConfig,
    txns: Arc<TransactionTable>,
    participants: RwLock<Vec<Arc<dyn TransactionParticipant>>>,
    tx_listeners: RwLock<Vec<Arc<dyn TransactionListener>>>,
    commit_lock: Mutex<()>,
    committer: Mutex<Option<(ThreadId, String)>>,
    metrics: MetricCounters,
}

/// Exclusive commit section of a container; clears the committer on drop
struct CommitSection<'a> {
    committer: &'a Mutex<Option<(ThreadId, String)>>,
    _lock: MutexGuard<'a, ()>,
}

impl Drop for CommitSection<'_> {
    fn drop(&mut self) {
        *self.committer.lock() = None;
    }
}

impl ContainerCore {
    /// Fail if the calling thread is already inside a commit of this container
    fn check_committer(&self) -> Result<()> {
        if let Some((owner, tx)) = self.committer.lock().as_ref() {
            if *owner == thread::current().id() {
                return Err(StoreError::RecursiveCommit {
                    scope: "container".to_string(),
                    tx: tx.clone(),
                });
            }
        }
        Ok(())
    }

    fn enter_commit(&self, tx: &TransactionHandle) -> CommitSection<'_> {
        let lock = self.commit_lock.lock();
        *self.committer.lock() = Some((thread::current().id(), tx.to_string()));
        CommitSection {
            committer: &self.committer,
            _lock: lock,
        }
    }

    fn listeners(&self) -> Vec<Arc<dyn TransactionListener>> {
        self.tx_listeners.read().clone()
    }
}

/// Entry point: creates stores and runs transactions over them
///
/// Cloning a container is cheap and yields a handle to the same container.
#[derive(Clone)]
pub struct Container {
    core: Arc<ContainerCore>,
}

impl Container {
    /// Create a container with the default configuration
    pub fn new() -> Self {
        Self::build(ContainerConfig::default())
    }

    /// Create a container with the given configuration
    ///
    /// # Errors
    ///
    /// Returns the validation error of the first invalid store configuration.
    pub fn with_config(config: ContainerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: ContainerConfig) -> Self {
        let adapter: Arc<dyn TransactionAdapter> = Arc::new(LocalTransactionAdapter::new());
        Container {
            core: Arc::new(ContainerCore {
                config,
                txns: Arc::new(TransactionTable::new(adapter)),
                participants: RwLock::new(Vec::new()),
                tx_listeners: RwLock::new(Vec::new()),
                commit_lock: Mutex::new(()),
                committer: Mutex::new(None),
                metrics: MetricCounters::default(),
            }),
        }
    }

    /// Container configuration
    pub fn config(&self) -> &ContainerConfig {
        &self.core.config
    }

    /// Create a store configured by the container configuration
    pub fn create_store<K: TxKey, V: TxValue>(&self, name: &str) -> Result<Store<K, V>> {
        self.create_store_with(name, self.core.config.store_config(name))
    }

    /// Create a store with an explicit configuration
    ///
    /// # Errors
    ///
    /// - [`StoreError::TrackingDisabled`] for object-based dirty checking
    ///   without original-value tracking
    /// - [`StoreError::IsolationUnsupported`] for strict read-only checking
    ///   of a value type without read-only mode
    /// - [`StoreError::Config`] if a store with this name exists
    pub fn create_store_with<K: TxKey, V: TxValue>(
        &self,
        name: &str,
        config: StoreConfig,
    ) -> Result<Store<K, V>> {
        config.validate(name)?;
        let adapter: Arc<dyn ObjectAdapter<V>> = if config.strict_read_only {
            Arc::new(CloningObjectAdapter::<V>::strict()?)
        } else {
            Arc::new(CloningObjectAdapter::<V>::new())
        };

        let mut participants = self.core.participants.write();
        if participants.iter().any(|p| p.name() == name) {
            return Err(StoreError::Config(format!("store '{}' already exists", name)));
        }
        let store = Store::new(name, config, adapter, Arc::clone(&self.core.txns));
        participants.push(store.participant());
        info!(target: "txstore::txn", store = name, ?config, "Store created");
        Ok(store)
    }

    /// Names of all stores, in creation order
    pub fn store_names(&self) -> Vec<String> {
        self.core
            .participants
            .read()
            .iter()
            .map(|p| p.name().to_string())
            .collect()
    }

    /// Register a container-level transaction listener
    pub fn register_transaction_listener<L>(&self, listener: L)
    where
        L: TransactionListener + 'static,
    {
        self.core.tx_listeners.write().push(Arc::new(listener));
    }

    /// Start a local transaction bound to the calling thread
    ///
    /// # Errors
    ///
    /// [`StoreError::TransactionAlreadyActive`] if the thread already has one.
    pub fn begin_local_transaction(&self, description: &str) -> Result<LocalTransaction> {
        let handle = self.core.txns.begin(description)?;
        self.core.metrics.record_start();
        Ok(LocalTransaction {
            container: self.clone(),
            handle,
            finished: false,
        })
    }

    /// Run `f` in a new transaction
    ///
    /// Commits if `f` returns `Ok`, rolls back if it returns `Err`.
    pub fn with_local_tx<R, F>(&self, description: &str, f: F) -> Result<R>
    where
        F: FnOnce() -> Result<R>,
    {
        let tx = self.begin_local_transaction(description)?;
        match f() {
            Ok(result) => {
                tx.commit()?;
                Ok(result)
            }
            Err(e) => match tx.rollback() {
                Ok(()) => Err(e),
                Err(rollback) => Err(StoreError::Aggregate {
                    primary: Box::new(e),
                    suppressed: vec![rollback],
                }),
            },
        }
    }

    /// The transaction bound to the calling thread
    pub fn current_transaction(&self) -> Option<TransactionHandle> {
        self.core.txns.bound()
    }

    /// Check if the calling thread has a transaction
    pub fn is_in_transaction(&self) -> bool {
        self.current_transaction().is_some()
    }

    /// Commit the transaction bound to the calling thread
    pub fn commit_current(&self) -> Result<()> {
        let tx = self.require_bound()?;
        self.commit(&tx)
    }

    /// Roll back the transaction bound to the calling thread
    pub fn rollback_current(&self) -> Result<()> {
        let tx = self.require_bound()?;
        self.rollback(&tx)
    }

    fn require_bound(&self) -> Result<TransactionHandle> {
        self.core
            .txns
            .bound()
            .ok_or(StoreError::NoActiveTransaction)
    }

    /// Detach the calling thread from its transaction
    ///
    /// The transaction stays active and can be resumed, on this or another
    /// thread, with [`resume`](Self::resume).
    pub fn suspend(&self) -> Result<TransactionHandle> {
        let tx = self.require_bound()?;
        self.core.txns.adapter.destroy();
        debug!(target: "txstore::txn", tx = %tx, "Transaction suspended");
        Ok(tx)
    }

    /// Attach the calling thread to a suspended transaction
    ///
    /// # Errors
    ///
    /// - [`StoreError::InvalidState`] if the transaction is no longer active
    /// - [`StoreError::InvalidExternalTransaction`] if it belongs to another container
    /// - [`StoreError::TransactionAlreadyActive`] if the thread has another one
    pub fn resume(&self, tx: &TransactionHandle) -> Result<()> {
        self.core.txns.drop_stale_binding();
        self.core.txns.adapter.join(tx)?;
        match self.core.txns.status(tx) {
            Some(TransactionStatus::Active) => Ok(()),
            status => {
                self.core.txns.adapter.destroy();
                Err(StoreError::InvalidState(match status {
                    Some(s) => format!("cannot resume {} in state {}", tx, s),
                    None => format!("cannot resume finished transaction {}", tx),
                }))
            }
        }
    }

    /// Get transaction metrics
    pub fn metrics(&self) -> TransactionMetrics {
        self.core.metrics.snapshot()
    }

    /// Commit a transaction
    ///
    /// Modification listener and tracked view failures do not undo the
    /// merge; they are collected, `after_commit` still runs, and the
    /// aggregate is returned. A failing `before_commit` listener or a failed
    /// prepare rolls the transaction back instead.
    ///
    /// Called from inside a commit or an atomic section of one of the
    /// container's stores, it fails with [`StoreError::RecursiveCommit`]
    /// and leaves the transaction active.
    pub fn commit(&self, tx: &TransactionHandle) -> Result<()> {
        let core = &self.core;
        core.check_committer()?;
        self.check_participants()?;
        if core.txns.status(tx) == Some(TransactionStatus::Active) {
            for listener in core.listeners() {
                if let Err(e) = listener.before_commit(tx) {
                    return self.abort(tx, e);
                }
            }
        }
        core.txns.transition(tx, TransactionStatus::begin_commit)?;

        let mut errors = ErrorCollector::new();
        let mut merged = 0;
        {
            let section = core.enter_commit(tx);
            let participants = core.participants.read().clone();
            for p in &participants {
                if let Err(e) = p.prepare(tx) {
                    drop(section);
                    return self.abort(tx, e);
                }
            }
            for p in &participants {
                match p.commit(tx) {
                    Ok(n) => merged += n,
                    Err(e) => errors.push(e),
                }
            }
        }
        core.txns.transition(tx, TransactionStatus::finish_commit)?;
        core.txns.finish(tx);
        core.metrics.record_commit();

        for listener in core.listeners() {
            errors.record(listener.after_commit(tx));
        }
        if errors.is_empty() {
            info!(target: "txstore::commit", tx = %tx, merged, "Transaction committed");
        } else {
            warn!(target: "txstore::commit", tx = %tx, merged, failures = errors.len(), "Transaction committed with failures");
        }
        errors.into_result()
    }

    /// Roll back a transaction
    pub fn rollback(&self, tx: &TransactionHandle) -> Result<()> {
        self.core.check_committer()?;
        self.check_participants()?;
        self.core.txns.transition(tx, TransactionStatus::begin_rollback)?;
        let errors = self.discard(tx);
        errors.into_result()
    }

    /// Commit and rollback need every store's serialization point; fail
    /// before any state change if this thread already holds one
    fn check_participants(&self) -> Result<()> {
        for p in self.core.participants.read().iter() {
            p.check_not_committing()?;
        }
        Ok(())
    }

    /// Roll back after a failed commit attempt; `cause` stays the primary error
    fn abort(&self, tx: &TransactionHandle, cause: StoreError) -> Result<()> {
        warn!(target: "txstore::commit", tx = %tx, error = %cause, "Commit failed, rolling back");
        let mut errors = ErrorCollector::new();
        errors.push(cause);
        errors.record(self.core.txns.transition(tx, TransactionStatus::begin_rollback));
        errors.extend(self.discard(tx).into_result().err());
        errors.into_result()
    }

    fn discard(&self, tx: &TransactionHandle) -> ErrorCollector {
        let core = &self.core;
        let mut errors = ErrorCollector::new();
        let listeners = core.listeners();
        for listener in &listeners {
            errors.record(listener.before_rollback(tx));
        }
        for p in core.participants.read().iter() {
            p.rollback(tx);
        }
        errors.record(core.txns.transition(tx, TransactionStatus::finish_rollback));
        core.txns.finish(tx);
        core.metrics.record_rollback();
        for listener in &listeners {
            errors.record(listener.after_rollback(tx));
        }
        info!(target: "txstore::commit", tx = %tx, "Transaction rolled back");
        errors
    }
}

impl Default for Container {
    fn default() -> Self {
        Self::new()
    }
}

/// Guard for a transaction started with [`Container::begin_local_transaction`]
///
/// Dropping an unfinished guard rolls the transaction back.
pub struct LocalTransaction {
    container: Container,
    handle: TransactionHandle,
    finished: bool,
}

impl LocalTransaction {
    /// Handle of the transaction
    pub fn handle(&self) -> &TransactionHandle {
        &self.handle
    }

    /// Commit the transaction
    pub fn commit(mut self) -> Result<()> {
        self.finished = true;
        self.container.commit(&self.handle)
    }

    /// Roll the transaction back
    pub fn rollback(mut self) -> Result<()> {
        self.finished = true;
        self.container.rollback(&self.handle)
    }
}

impl Drop for LocalTransaction {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        // Already finished through commit_current/rollback_current.
        if self.container.core.txns.status(&self.handle) != Some(TransactionStatus::Active) {
            return;
        }
        if let Err(e) = self.container.rollback(&self.handle) {
            warn!(target: "txstore::txn", tx = %self.handle, error = %e, "Rollback on drop failed");
        }
    }
}
