//! Transactional store: committed map plus per-transaction views
//!
//! A [`Store`] holds the committed state of one key/value map. Application
//! code reads and writes through the per-transaction view of the calling
//! thread's transaction; the committed map is only mutated by the commit
//! merge, which the container drives through [`TransactionParticipant`].
//!
//! # Serialization point
//!
//! The committed map sits behind one `RwLock`. Commit merges, view
//! registration and atomic sections take it exclusively; every other read
//! of the committed map takes it shared, so it never observes a partially
//! applied commit.
//!
//! The thread holding the exclusive side is recorded as the committer.
//! Re-entering the store from that thread (typically from a modification
//! listener) fails with [`StoreError::RecursiveCommit`] instead of
//! deadlocking.
//!
//! # Conflict policy
//!
//! Merges are last-writer-wins: a transaction overwrites whatever was
//! committed for a key since it first touched it. Stores configured with
//! `stale_check` reject such commits at prepare time instead.

use crate::config::StoreConfig;
use crate::container::{TransactionParticipant, TransactionTable};
use crate::tracked::{TrackedViewRegistry, ViewSet};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use rustc_hash::FxHashMap;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use tracing::{debug, info, warn};
use txstore_concurrency::{validate_entries, Loaded, ObjectAdapter, StoreTxView};
use txstore_core::{
    ErrorCollector, ModificationListener, Result, StoreError, TransactionHandle, TxKey, TxValue,
};

/// Committed value of one key
pub(crate) struct StoreEntry<V> {
    pub(crate) value: V,
    pub(crate) version: u64,
}

/// The committed map of a store
pub(crate) struct Committed<K, V> {
    pub(crate) entries: FxHashMap<K, StoreEntry<V>>,
    /// Version of the last commit that changed the map
    pub(crate) version: u64,
}

impl<K: TxKey, V> Committed<K, V> {
    fn version_of(&self, key: &K) -> u64 {
        self.entries.get(key).map_or(0, |e| e.version)
    }

    pub(crate) fn values(&self) -> impl Iterator<Item = &V> {
        self.entries.values().map(|e| &e.value)
    }
}

/// Exclusive access to the committed map; clears the committer on drop
pub(crate) struct CommitSection<'a, K, V> {
    committer: &'a Mutex<Option<(ThreadId, String)>>,
    committed: RwLockWriteGuard<'a, Committed<K, V>>,
}

impl<K, V> Deref for CommitSection<'_, K, V> {
    type Target = Committed<K, V>;

    fn deref(&self) -> &Self::Target {
        &self.committed
    }
}

impl<K, V> DerefMut for CommitSection<'_, K, V> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.committed
    }
}

impl<K, V> Drop for CommitSection<'_, K, V> {
    fn drop(&mut self) {
        *self.committer.lock() = None;
    }
}

pub(crate) struct StoreInner<K, V> {
    pub(crate) name: String,
    pub(crate) config: StoreConfig,
    adapter: Arc<dyn ObjectAdapter<V>>,
    txns: Arc<TransactionTable>,
    committed: RwLock<Committed<K, V>>,
    committer: Mutex<Option<(ThreadId, String)>>,
    listeners: RwLock<Vec<Arc<dyn ModificationListener<K, V>>>>,
    pub(crate) views: Mutex<ViewSet<V>>,
    pub(crate) tx_views: DashMap<u64, StoreTxView<K, V>>,
}

impl<K: TxKey, V: TxValue> StoreInner<K, V> {
    pub(crate) fn scope(&self) -> String {
        format!("store '{}'", self.name)
    }

    pub(crate) fn check_reentry(&self) -> Result<()> {
        if let Some((owner, tx)) = self.committer.lock().as_ref() {
            if *owner == thread::current().id() {
                return Err(StoreError::RecursiveCommit {
                    scope: self.scope(),
                    tx: tx.clone(),
                });
            }
        }
        Ok(())
    }

    /// Shared access to the committed map
    pub(crate) fn read_committed(&self) -> Result<RwLockReadGuard<'_, Committed<K, V>>> {
        self.check_reentry()?;
        Ok(self.committed.read())
    }

    /// Exclusive access to the committed map, on behalf of `owner`
    pub(crate) fn write_committed(&self, owner: &str) -> Result<CommitSection<'_, K, V>> {
        self.check_reentry()?;
        let committed = self.committed.write();
        *self.committer.lock() = Some((thread::current().id(), owner.to_string()));
        Ok(CommitSection {
            committer: &self.committer,
            committed,
        })
    }

    /// Active transaction of the calling thread, if any
    pub(crate) fn current_tx(&self, enforce: bool) -> Result<Option<TransactionHandle>> {
        self.check_reentry()?;
        self.txns.current(enforce, || self.scope())
    }

    fn require_tx(&self) -> Result<TransactionHandle> {
        self.current_tx(true)?.ok_or(StoreError::NoActiveTransaction)
    }

    /// Run `f` on the transaction's view of this store, creating it on first use
    pub(crate) fn with_tx_view<R, F>(&self, tx: &TransactionHandle, f: F) -> Result<R>
    where
        F: FnOnce(&mut StoreTxView<K, V>) -> Result<R>,
    {
        let mut view = self.tx_views.entry(tx.seq()).or_insert_with(|| {
            StoreTxView::new(
                tx.clone(),
                Arc::clone(&self.adapter),
                self.config.track_original_value,
            )
        });
        f(&mut view)
    }

    /// Writable copy of the committed state of a key
    pub(crate) fn load(&self, key: &K) -> Result<Loaded<V>> {
        let committed = self.read_committed()?;
        Ok(match committed.entries.get(key) {
            Some(entry) => Loaded {
                value: Some(self.adapter.clone_committed(&entry.value)),
                version: entry.version,
            },
            None => Loaded::absent(),
        })
    }

    fn load_read_only(&self, key: &K) -> Result<Option<V>> {
        let committed = self.read_committed()?;
        Ok(committed
            .entries
            .get(key)
            .map(|e| self.adapter.clone_for_read_only(&e.value)))
    }
}

impl<K: TxKey, V: TxValue> TransactionParticipant for StoreInner<K, V> {
    fn name(&self) -> &str {
        &self.name
    }

    fn prepare(&self, tx: &TransactionHandle) -> Result<()> {
        if !self.config.stale_check {
            return Ok(());
        }
        let Some(view) = self.tx_views.get(&tx.seq()) else {
            return Ok(());
        };
        let committed = self.read_committed()?;
        validate_entries(&*view, self.config.dirty_check, |k| committed.version_of(k))
            .into_result(&self.name)
    }

    fn commit(&self, tx: &TransactionHandle) -> Result<usize> {
        let Some((_, view)) = self.tx_views.remove(&tx.seq()) else {
            return Ok(0);
        };
        let mut section = self.write_committed(tx.name())?;
        let listeners = self.listeners.read().clone();
        let mut views = self.views.lock();
        let mut errors = ErrorCollector::new();
        let version = section.version + 1;
        let mut merged = 0;

        for entry in view.dirty_entries(self.config.dirty_check) {
            let key = entry.key();
            let new = entry.value();
            let old = match new {
                Some(value) => section.entries.insert(
                    key.clone(),
                    StoreEntry {
                        value: self.adapter.clone_to_committed(value),
                        version,
                    },
                ),
                None => section.entries.remove(key),
            }
            .map(|e| e.value);
            if old.is_none() && new.is_none() {
                continue;
            }
            merged += 1;
            if !self.config.track_original_value {
                continue;
            }
            views.track(&self.name, key, old.as_ref(), new, tx, &mut errors);
            for listener in &listeners {
                if let Err(e) = listener.on_modification(key, old.as_ref(), new, tx) {
                    errors.push(StoreError::ListenerFailed {
                        store: self.name.clone(),
                        tx: tx.to_string(),
                        reason: format!("key {:?}: {}", key, e),
                    });
                }
            }
        }
        if merged > 0 {
            section.version = version;
        }
        if self.config.check_views_after_commit {
            let values: Vec<V> = section.values().cloned().collect();
            views.check(&self.name, &values, &mut errors);
        }
        drop(views);
        drop(section);

        if errors.is_empty() {
            info!(target: "txstore::commit", store = %self.name, tx = %tx, merged, "Store committed");
        } else {
            warn!(target: "txstore::commit", store = %self.name, tx = %tx, merged, failures = errors.len(), "Store committed with failures");
        }
        errors.into_result().map(|()| merged)
    }

    fn rollback(&self, tx: &TransactionHandle) {
        if let Some((_, view)) = self.tx_views.remove(&tx.seq()) {
            debug!(target: "txstore::txn", store = %self.name, tx = %tx, touched = view.len(), "Transaction view discarded");
        }
    }

    fn check_not_committing(&self) -> Result<()> {
        self.check_reentry()
    }
}

/// Read access to the committed map inside [`Store::execute_atomic`]
pub struct CommittedEntries<'a, K, V> {
    committed: &'a Committed<K, V>,
}

impl<'a, K: TxKey, V> CommittedEntries<'a, K, V> {
    /// Committed value of a key
    pub fn get(&self, key: &K) -> Option<&'a V> {
        self.committed.entries.get(key).map(|e| &e.value)
    }

    /// Number of committed entries
    pub fn len(&self) -> usize {
        self.committed.entries.len()
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.committed.entries.is_empty()
    }

    /// All committed entries, in unspecified order
    pub fn iter(&self) -> impl Iterator<Item = (&'a K, &'a V)> {
        self.committed.entries.iter().map(|(k, e)| (k, &e.value))
    }
}

/// Diagnostic snapshot of one key, values rendered through `Debug`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    /// Store name
    pub store: String,
    /// Rendered key
    pub key: String,
    /// Committed value
    pub committed: Option<String>,
    /// Committed version, 0 if the key is unbound
    pub committed_version: u64,
    /// Transaction of the calling thread, if it touched the key
    pub tx: Option<String>,
    /// Original value captured by the transaction
    pub orig_value: Option<String>,
    /// Working copy of the transaction
    pub tx_value: Option<String>,
    /// Whether the transaction called `update` or `remove` for the key
    pub updated: bool,
}

impl fmt::Display for ObjectInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}[{}] committed={} (v{})",
            self.store,
            self.key,
            self.committed.as_deref().unwrap_or("-"),
            self.committed_version
        )?;
        if let Some(tx) = &self.tx {
            write!(
                f,
                " {}: orig={} value={} updated={}",
                tx,
                self.orig_value.as_deref().unwrap_or("-"),
                self.tx_value.as_deref().unwrap_or("-"),
                self.updated
            )?;
        }
        Ok(())
    }
}

/// A transactional key/value store
///
/// Reads and writes require a transaction bound to the calling thread,
/// except for the read-only queries, which fall back to the committed map.
/// Cloning a store is cheap and yields a handle to the same store.
pub struct Store<K, V> {
    inner: Arc<StoreInner<K, V>>,
}

impl<K, V> Clone for Store<K, V> {
    fn clone(&self) -> Self {
        Store {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K: TxKey, V: TxValue> Store<K, V> {
    pub(crate) fn new(
        name: &str,
        config: StoreConfig,
        adapter: Arc<dyn ObjectAdapter<V>>,
        txns: Arc<TransactionTable>,
    ) -> Self {
        Store {
            inner: Arc::new(StoreInner {
                name: name.to_string(),
                config,
                adapter,
                txns,
                committed: RwLock::new(Committed {
                    entries: FxHashMap::default(),
                    version: 0,
                }),
                committer: Mutex::new(None),
                listeners: RwLock::new(Vec::new()),
                views: Mutex::new(ViewSet::new()),
                tx_views: DashMap::new(),
            }),
        }
    }

    pub(crate) fn participant(&self) -> Arc<dyn TransactionParticipant> {
        Arc::clone(&self.inner) as Arc<dyn TransactionParticipant>
    }

    /// Store name
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Store configuration
    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// Version of the last commit that changed the store
    pub fn version(&self) -> Result<u64> {
        Ok(self.inner.read_committed()?.version)
    }

    /// Registry of the tracked views of this store
    pub fn tracked_view_registry(&self) -> TrackedViewRegistry<K, V> {
        TrackedViewRegistry::new(Arc::clone(&self.inner))
    }

    /// Writable copy of the value of a key
    ///
    /// The first access binds the key to the transaction. Later reads see
    /// the transaction's own writes. Mutating the returned copy has no
    /// effect until it is passed to [`update`](Self::update).
    ///
    /// # Errors
    ///
    /// [`StoreError::NoActiveTransaction`] outside a transaction.
    pub fn get(&self, key: &K) -> Result<Option<V>> {
        let tx = self.inner.require_tx()?;
        self.inner.with_tx_view(&tx, |view| {
            Ok(view.read(key, |k| self.inner.load(k))?.cloned())
        })
    }

    /// Read-only snapshot of the value of a key
    ///
    /// Does not bind the key to the transaction. Inside a transaction the
    /// snapshot reflects its own writes; outside it is taken from the
    /// committed map. Values with read-only support reject mutation.
    pub fn get_read_only(&self, key: &K) -> Result<Option<V>> {
        if let Some(tx) = self.inner.current_tx(false)? {
            if let Some(view) = self.inner.tx_views.get(&tx.seq()) {
                return view.read_only(key, |k| self.inner.load_read_only(k));
            }
        }
        self.inner.load_read_only(key)
    }

    /// Bind a new value to a key and mark it for merge
    pub fn update(&self, key: K, value: V) -> Result<()> {
        let tx = self.inner.require_tx()?;
        self.inner
            .with_tx_view(&tx, |view| view.update(&key, value, |k| self.inner.load(k)))
    }

    /// Remove a key when the transaction commits
    pub fn remove(&self, key: &K) -> Result<()> {
        let tx = self.inner.require_tx()?;
        self.inner
            .with_tx_view(&tx, |view| view.remove(key, |k| self.inner.load(k)))
    }

    /// Mutate the working copy of a key in place
    ///
    /// Returns `None` if the key is unbound. The change is merged at commit
    /// under object-based dirty checking; under explicit dirty checking it
    /// also needs [`update`](Self::update). `f` runs on a copy that is
    /// written back afterwards, so it may use the store itself.
    pub fn modify<R, F>(&self, key: &K, f: F) -> Result<Option<R>>
    where
        F: FnOnce(&mut V) -> R,
    {
        let tx = self.inner.require_tx()?;
        let load = |k: &K| self.inner.load(k);
        let Some(mut value) = self
            .inner
            .with_tx_view(&tx, |view| Ok(view.read(key, load)?.cloned()))?
        else {
            return Ok(None);
        };
        let result = f(&mut value);
        self.inner.with_tx_view(&tx, |view| {
            if let Some(slot) = view.read_mut(key, load)? {
                *slot = value;
            }
            Ok(())
        })?;
        Ok(Some(result))
    }

    /// Check if a key is bound, as seen by the current transaction
    pub fn contains_key(&self, key: &K) -> Result<bool> {
        if let Some(tx) = self.inner.current_tx(false)? {
            if let Some(view) = self.inner.tx_views.get(&tx.seq()) {
                if let Some(entry) = view.entry(key) {
                    return Ok(entry.value().is_some());
                }
            }
        }
        Ok(self.inner.read_committed()?.entries.contains_key(key))
    }

    /// Number of committed entries
    pub fn size(&self) -> Result<usize> {
        Ok(self.inner.read_committed()?.entries.len())
    }

    /// All bound keys, as seen by the current transaction
    pub fn keys(&self) -> Result<Vec<K>> {
        let view = match self.inner.current_tx(false)? {
            Some(tx) => self.inner.tx_views.get(&tx.seq()),
            None => None,
        };
        let committed = self.inner.read_committed()?;
        let mut keys: Vec<K> = committed
            .entries
            .keys()
            .filter(|k| match view.as_ref().and_then(|v| v.entry(k)) {
                Some(entry) => entry.value().is_some(),
                None => true,
            })
            .cloned()
            .collect();
        if let Some(view) = &view {
            keys.extend(
                view.entries()
                    .filter(|e| e.value().is_some() && !committed.entries.contains_key(e.key()))
                    .map(|e| e.key().clone()),
            );
        }
        Ok(keys)
    }

    /// Writable copies of all values matching `filter`
    ///
    /// Binds every key of the store to the transaction.
    pub fn get_all<P>(&self, filter: P) -> Result<Vec<V>>
    where
        P: Fn(&V) -> bool,
    {
        let tx = self.inner.require_tx()?;
        let keys = self.keys()?;
        let bound = self.inner.with_tx_view(&tx, |view| {
            let mut values = Vec::with_capacity(keys.len());
            for key in &keys {
                if let Some(v) = view.read(key, |k| self.inner.load(k))? {
                    values.push(v.clone());
                }
            }
            Ok(values)
        })?;
        Ok(bound.into_iter().filter(|v| filter(v)).collect())
    }

    /// Read-only snapshots of all values matching `filter`
    ///
    /// Taken under the serialization point, so the result is a consistent
    /// snapshot. Inside a transaction it reflects the transaction's own
    /// writes without binding any key.
    pub fn get_all_read_only<P>(&self, filter: P) -> Result<Vec<V>>
    where
        P: Fn(&V) -> bool,
    {
        Ok(self
            .snapshot_read_only()?
            .into_iter()
            .filter(|v| filter(v))
            .collect())
    }

    /// Read-only copies of every value visible to the calling thread
    fn snapshot_read_only(&self) -> Result<Vec<V>> {
        let view = match self.inner.current_tx(false)? {
            Some(tx) => self.inner.tx_views.get(&tx.seq()),
            None => None,
        };
        let committed = self.inner.read_committed()?;
        let adapter = &self.inner.adapter;
        let mut values = Vec::with_capacity(committed.entries.len());
        for (key, entry) in committed.entries.iter() {
            let value = match view.as_ref().and_then(|v| v.entry(key)) {
                Some(tx_entry) => tx_entry.value(),
                None => Some(&entry.value),
            };
            if let Some(v) = value {
                values.push(adapter.clone_for_read_only(v));
            }
        }
        if let Some(view) = &view {
            let added = view
                .entries()
                .filter(|e| !committed.entries.contains_key(e.key()))
                .filter_map(|e| e.value());
            values.extend(added.map(|v| adapter.clone_for_read_only(v)));
        }
        Ok(values)
    }

    /// Fold over read-only snapshots of all values
    pub fn accumulate<A, F>(&self, init: A, mut f: F) -> Result<A>
    where
        F: FnMut(A, &V) -> A,
    {
        Ok(self
            .snapshot_read_only()?
            .iter()
            .fold(init, |acc, v| f(acc, v)))
    }

    /// Diagnostic snapshot of a key
    pub fn object_info(&self, key: &K) -> Result<ObjectInfo> {
        let view = match self.inner.current_tx(false)? {
            Some(tx) => self.inner.tx_views.get(&tx.seq()),
            None => None,
        };
        let committed = self.inner.read_committed()?;
        let committed_entry = committed.entries.get(key);
        let mut info = ObjectInfo {
            store: self.inner.name.clone(),
            key: format!("{:?}", key),
            committed: committed_entry.map(|e| format!("{:?}", e.value)),
            committed_version: committed_entry.map_or(0, |e| e.version),
            tx: None,
            orig_value: None,
            tx_value: None,
            updated: false,
        };
        if let Some(view) = &view {
            if let Some(entry) = view.entry(key) {
                info.tx = Some(view.tx().to_string());
                info.orig_value = entry.orig_value().map(|v| format!("{:?}", v));
                info.tx_value = entry.value().map(|v| format!("{:?}", v));
                info.updated = entry.is_updated();
            }
        }
        Ok(info)
    }

    /// Run `f` with exclusive access to the committed map
    ///
    /// No commit of this store interleaves with `f`. Accessing the store
    /// from inside `f` fails with [`StoreError::RecursiveCommit`].
    pub fn execute_atomic<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(CommittedEntries<'_, K, V>) -> R,
    {
        let section = self.inner.write_committed("atomic section")?;
        Ok(f(CommittedEntries {
            committed: &*section,
        }))
    }

    /// Register a listener called for every committed key change
    ///
    /// # Errors
    ///
    /// [`StoreError::TrackingDisabled`] if the store does not track
    /// original values.
    pub fn register_modification_listener<L>(&self, listener: L) -> Result<()>
    where
        L: ModificationListener<K, V> + 'static,
    {
        if !self.inner.config.track_original_value {
            return Err(StoreError::TrackingDisabled {
                store: self.inner.name.clone(),
                feature: "modification listeners",
            });
        }
        self.inner.listeners.write().push(Arc::new(listener));
        Ok(())
    }

    /// Remove every committed entry and clear all tracked views
    ///
    /// Runs outside the transaction protocol: no listener is called, and
    /// active transactions keep their views.
    pub fn clear(&self) -> Result<()> {
        let mut section = self.inner.write_committed("clear")?;
        section.entries.clear();
        section.version += 1;
        self.inner.views.lock().clear_all();
        info!(target: "txstore::commit", store = %self.inner.name, "Store cleared");
        Ok(())
    }
}

impl<K, V> fmt::Debug for Store<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("name", &self.inner.name)
            .field("config", &self.inner.config)
            .finish()
    }
}
