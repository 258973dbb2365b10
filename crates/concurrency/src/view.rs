//! Per-transaction view of a store
//!
//! A [`StoreTxView`] holds the working set of one transaction on one store:
//! for every key the transaction touched, an [`EntryTxView`] with the
//! original value captured on first access, the working copy and the dirty
//! flag. Entries are created lazily (copy-on-first-touch) and live exactly
//! as long as the view; a view is never shared between transactions.
//!
//! The view does not know the committed map. Operations that may need to
//! bind a fresh entry take a loader closure, which the store implements by
//! reading the committed map under its serialization point.
//!
//! # Read-Your-Writes
//!
//! Once a key has an entry, every read sees the working copy, including
//! tombstones left by `remove`.

use crate::adapter::ObjectAdapter;
use rustc_hash::FxHashMap;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use txstore_core::{DirtyCheck, Result, TrackedView, TransactionHandle, TxKey};

/// Committed state of one key, as loaded for a transaction
#[derive(Debug, Clone, PartialEq)]
pub struct Loaded<V> {
    /// Copy of the committed value, `None` if the key is unbound
    pub value: Option<V>,
    /// Committed version of the key, 0 if the key is unbound
    pub version: u64,
}

impl<V> Loaded<V> {
    /// State of an unbound key
    pub fn absent() -> Self {
        Loaded {
            value: None,
            version: 0,
        }
    }
}

/// Working state of one key within one transaction
#[derive(Debug, Clone)]
pub struct EntryTxView<K, V> {
    key: K,
    orig_value: Option<V>,
    orig_version: u64,
    value: Option<V>,
    updated: bool,
}

impl<K: TxKey, V: PartialEq> EntryTxView<K, V> {
    /// Key of the entry
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Committed value captured on first access
    ///
    /// `None` if the key was unbound at that time or the store does not
    /// track original values. Never changes for the lifetime of the entry.
    pub fn orig_value(&self) -> Option<&V> {
        self.orig_value.as_ref()
    }

    /// Committed version captured on first access
    pub fn orig_version(&self) -> u64 {
        self.orig_version
    }

    /// Working copy, `None` for an unbound key or a tombstone
    pub fn value(&self) -> Option<&V> {
        self.value.as_ref()
    }

    /// Mutable working copy
    pub fn value_mut(&mut self) -> Option<&mut V> {
        self.value.as_mut()
    }

    /// Whether `update` or `remove` was called for the key
    pub fn is_updated(&self) -> bool {
        self.updated
    }

    /// Whether the working copy is a tombstone left by `remove`
    pub fn is_removed(&self) -> bool {
        self.updated && self.value.is_none()
    }

    /// Bind a new working copy and mark the entry dirty
    pub fn update(&mut self, value: V) {
        self.value = Some(value);
        self.updated = true;
    }

    /// Replace the working copy by a tombstone and mark the entry dirty
    pub fn remove(&mut self) {
        self.value = None;
        self.updated = true;
    }

    /// Whether the entry has to be merged at commit under the given policy
    ///
    /// Object-based checking compares the working copy with the original,
    /// so it presumes the store tracks original values.
    pub fn needs_commit(&self, dirty_check: DirtyCheck) -> bool {
        match dirty_check {
            DirtyCheck::Explicit => self.updated,
            DirtyCheck::ObjectBased => self.updated || self.value != self.orig_value,
        }
    }
}

/// Working set of one transaction on one store
pub struct StoreTxView<K, V> {
    tx: TransactionHandle,
    adapter: Arc<dyn ObjectAdapter<V>>,
    track_original: bool,
    entries: Vec<EntryTxView<K, V>>,
    index: FxHashMap<K, usize>,
    tracked_views: HashMap<String, Box<dyn TrackedView<V>>>,
}

impl<K: TxKey, V: Clone + PartialEq + 'static> StoreTxView<K, V> {
    /// Create an empty view for a transaction
    pub fn new(
        tx: TransactionHandle,
        adapter: Arc<dyn ObjectAdapter<V>>,
        track_original: bool,
    ) -> Self {
        debug!(target: "txstore::txn", tx = %tx, "Transaction view created");
        StoreTxView {
            tx,
            adapter,
            track_original,
            entries: Vec::new(),
            index: FxHashMap::default(),
            tracked_views: HashMap::new(),
        }
    }

    /// Transaction owning this view
    pub fn tx(&self) -> &TransactionHandle {
        &self.tx
    }

    /// Number of touched keys
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if no key was touched
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry for a key, if the transaction touched it
    pub fn entry(&self, key: &K) -> Option<&EntryTxView<K, V>> {
        self.index.get(key).map(|&i| &self.entries[i])
    }

    /// Every touched entry, in first-access order
    pub fn entries(&self) -> impl Iterator<Item = &EntryTxView<K, V>> {
        self.entries.iter()
    }

    /// Entries that have to be merged at commit, in first-access order
    pub fn dirty_entries(
        &self,
        dirty_check: DirtyCheck,
    ) -> impl Iterator<Item = &EntryTxView<K, V>> {
        self.entries
            .iter()
            .filter(move |e| e.needs_commit(dirty_check))
    }

    /// Consume the view, yielding its entries in first-access order
    pub fn into_entries(self) -> Vec<EntryTxView<K, V>> {
        self.entries
    }

    fn entry_or_load<F>(&mut self, key: &K, load: F) -> Result<&mut EntryTxView<K, V>>
    where
        F: FnOnce(&K) -> Result<Loaded<V>>,
    {
        if let Some(&i) = self.index.get(key) {
            return Ok(&mut self.entries[i]);
        }
        let loaded = load(key)?;
        // The original needs its own copy: the working copy is mutated in place.
        let orig_value = if self.track_original {
            loaded.value.clone()
        } else {
            None
        };
        let i = self.entries.len();
        self.entries.push(EntryTxView {
            key: key.clone(),
            orig_value,
            orig_version: loaded.version,
            value: loaded.value,
            updated: false,
        });
        self.index.insert(key.clone(), i);
        Ok(&mut self.entries[i])
    }

    /// Working copy of a key, binding an entry on first access
    ///
    /// `load` must return a writable copy of the committed value.
    pub fn read<F>(&mut self, key: &K, load: F) -> Result<Option<&V>>
    where
        F: FnOnce(&K) -> Result<Loaded<V>>,
    {
        Ok(self.entry_or_load(key, load)?.value())
    }

    /// Mutable working copy of a key, binding an entry on first access
    pub fn read_mut<F>(&mut self, key: &K, load: F) -> Result<Option<&mut V>>
    where
        F: FnOnce(&K) -> Result<Loaded<V>>,
    {
        Ok(self.entry_or_load(key, load)?.value_mut())
    }

    /// Read-only snapshot of a key without binding an entry
    ///
    /// If the transaction touched the key, the snapshot is taken from the
    /// working copy. Otherwise `load_read_only` supplies it.
    pub fn read_only<F>(&self, key: &K, load_read_only: F) -> Result<Option<V>>
    where
        F: FnOnce(&K) -> Result<Option<V>>,
    {
        match self.entry(key) {
            Some(entry) => Ok(entry.value().map(|v| self.adapter.clone_for_read_only(v))),
            None => load_read_only(key),
        }
    }

    /// Bind a working copy and mark the key dirty
    pub fn update<F>(&mut self, key: &K, value: V, load: F) -> Result<()>
    where
        F: FnOnce(&K) -> Result<Loaded<V>>,
    {
        let mut value = value;
        self.adapter.switch_to_read_write(&mut value);
        self.entry_or_load(key, load)?.update(value);
        Ok(())
    }

    /// Leave a tombstone for a key until commit
    pub fn remove<F>(&mut self, key: &K, load: F) -> Result<()>
    where
        F: FnOnce(&K) -> Result<Loaded<V>>,
    {
        self.entry_or_load(key, load)?.remove();
        Ok(())
    }

    /// Transaction-scoped copy of a tracked view
    ///
    /// Created through `supplier` on first access and cached for the rest of
    /// the transaction, so repeated reads are stable while other
    /// transactions commit.
    pub fn tracked_view<F>(&mut self, name: &str, supplier: F) -> Result<&dyn TrackedView<V>>
    where
        F: FnOnce() -> Result<Box<dyn TrackedView<V>>>,
    {
        let view = match self.tracked_views.entry(name.to_string()) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => e.insert(supplier()?),
        };
        Ok(&**view)
    }
}
