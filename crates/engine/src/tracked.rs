//! Tracked views: aggregates maintained during the commit merge
//!
//! Every store owns a [`ViewSet`], updated with each merged key change
//! while the commit holds the store's serialization point. Readers get
//! clones, never the live views:
//!
//! - inside a transaction, the first read of a view clones it and caches
//!   the clone in the transaction view, so later reads are stable;
//! - outside a transaction, every read returns a fresh clone.
//!
//! Sub-views of clustered views are different: they replay the calling
//! transaction's own dirty entries on top of the committed state, so they
//! reflect uncommitted writes.

use crate::store::{Committed, StoreInner};
use std::any::type_name;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error};
use txstore_concurrency::StoreTxView;
use txstore_core::{
    DirtyCheck, ErrorCollector, Result, StoreError, TrackedView, TransactionHandle, TxKey,
    TxValue,
};

/// Default registration name of a view type
pub fn default_view_name<VT: 'static>() -> String {
    format!("VIEW:{}", type_name::<VT>())
}

/// The live tracked views of one store
pub(crate) struct ViewSet<V> {
    views: BTreeMap<String, Box<dyn TrackedView<V>>>,
}

impl<V: TxValue> ViewSet<V> {
    pub(crate) fn new() -> Self {
        ViewSet {
            views: BTreeMap::new(),
        }
    }

    pub(crate) fn names(&self) -> Vec<String> {
        self.views.keys().cloned().collect()
    }

    pub(crate) fn get(&self, name: &str) -> Result<&dyn TrackedView<V>> {
        match self.views.get(name) {
            Some(view) => Ok(view.as_ref()),
            None => Err(self.unknown(name)),
        }
    }

    fn unknown(&self, name: &str) -> StoreError {
        StoreError::UnknownView {
            name: name.to_string(),
            registered: self.names(),
        }
    }

    /// Replace or add a view, initialized from the committed values
    pub(crate) fn insert<'a, I>(
        &mut self,
        store: &str,
        name: &str,
        mut view: Box<dyn TrackedView<V>>,
        values: I,
    ) -> Result<()>
    where
        I: IntoIterator<Item = &'a V>,
    {
        initialize(store, name, view.as_mut(), values)?;
        self.views.insert(name.to_string(), view);
        Ok(())
    }

    /// Clear and rebuild one view from the committed values
    pub(crate) fn reinitialize<'a, I>(&mut self, store: &str, name: &str, values: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a V>,
    {
        match self.views.get_mut(name) {
            Some(view) => initialize(store, name, view.as_mut(), values),
            None => Err(self.unknown(name)),
        }
    }

    /// Apply one merged modification to every view
    pub(crate) fn track<K: TxKey>(
        &mut self,
        store: &str,
        key: &K,
        old: Option<&V>,
        new: Option<&V>,
        tx: &TransactionHandle,
        errors: &mut ErrorCollector,
    ) {
        for (name, view) in self.views.iter_mut() {
            if let Err(e) = view.track_modification(old, new) {
                errors.push(StoreError::TrackedViewModification {
                    store: store.to_string(),
                    view: name.clone(),
                    tx: tx.to_string(),
                    key: format!("{:?}", key),
                    old: format!("{:?}", old),
                    new: format!("{:?}", new),
                    reason: e.to_string(),
                });
            }
        }
    }

    /// Validate every view against the committed values
    pub(crate) fn check(&self, store: &str, values: &[V], errors: &mut ErrorCollector) {
        for (name, view) in &self.views {
            if let Err(e) = view.check_view(values) {
                error!(target: "txstore::views", store, view = %name, reason = %e, "Tracked view out of sync");
                errors.push(StoreError::ConsistencyCheck {
                    store: store.to_string(),
                    view: name.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }

    /// Reset every view to its empty state
    pub(crate) fn clear_all(&mut self) {
        for view in self.views.values_mut() {
            view.clear();
        }
    }
}

fn initialize<'a, V, I>(store: &str, name: &str, view: &mut dyn TrackedView<V>, values: I) -> Result<()>
where
    V: TxValue,
    I: IntoIterator<Item = &'a V>,
{
    view.clear();
    let mut count = 0usize;
    for value in values {
        view.track_modification(None, Some(value)).map_err(|e| {
            StoreError::TrackedViewModification {
                store: store.to_string(),
                view: name.to_string(),
                tx: "<initialization>".to_string(),
                key: "-".to_string(),
                old: "None".to_string(),
                new: format!("Some({:?})", value),
                reason: e.to_string(),
            }
        })?;
        count += 1;
    }
    debug!(target: "txstore::views", store, view = name, values = count, "Tracked view initialized");
    Ok(())
}

fn downcast<V: 'static, VT: 'static>(name: &str, view: &dyn TrackedView<V>) -> Result<VT>
where
    VT: Clone,
{
    view.as_any()
        .downcast_ref::<VT>()
        .cloned()
        .ok_or_else(|| StoreError::ViewTypeMismatch {
            name: name.to_string(),
            expected: type_name::<VT>(),
        })
}

/// Access to the tracked views of a store
///
/// Obtained through [`Store::tracked_view_registry`](crate::Store::tracked_view_registry).
pub struct TrackedViewRegistry<K, V> {
    store: Arc<StoreInner<K, V>>,
}

impl<K: TxKey, V: TxValue> TrackedViewRegistry<K, V> {
    pub(crate) fn new(store: Arc<StoreInner<K, V>>) -> Self {
        TrackedViewRegistry { store }
    }

    fn require_tracking(&self) -> Result<()> {
        if self.store.config.track_original_value {
            Ok(())
        } else {
            Err(StoreError::TrackingDisabled {
                store: self.store.name.clone(),
                feature: "tracked views",
            })
        }
    }

    /// Register a view under `name`, replacing any view of that name
    ///
    /// The view is cleared and initialized from the committed values while
    /// commits of the store are blocked.
    pub fn register<VT>(&self, name: &str, view: VT) -> Result<()>
    where
        VT: TrackedView<V> + 'static,
    {
        self.require_tracking()?;
        let section = self.store.write_committed("view registration")?;
        self.store
            .views
            .lock()
            .insert(&self.store.name, name, Box::new(view), section.values())
    }

    /// Register a view under its default name, which is returned
    pub fn register_default<VT>(&self, view: VT) -> Result<String>
    where
        VT: TrackedView<V> + 'static,
    {
        let name = default_view_name::<VT>();
        self.register(&name, view)?;
        Ok(name)
    }

    /// Clone of a view, stable for the rest of the calling transaction
    ///
    /// # Errors
    ///
    /// - [`StoreError::UnknownView`] if nothing is registered under `name`
    /// - [`StoreError::ViewTypeMismatch`] if the view is not a `VT`
    pub fn get_view<VT>(&self, name: &str) -> Result<VT>
    where
        VT: TrackedView<V> + Clone + 'static,
    {
        let live_clone = || -> Result<Box<dyn TrackedView<V>>> {
            let _committed = self.store.read_committed()?;
            let views = self.store.views.lock();
            Ok(views.get(name)?.clone_boxed())
        };
        match self.store.current_tx(false)? {
            Some(tx) => self.store.with_tx_view(&tx, |view| {
                downcast(name, view.tracked_view(name, live_clone)?)
            }),
            None => downcast(name, live_clone()?.as_ref()),
        }
    }

    /// Clone of the default-named view of type `VT`
    pub fn get_default_view<VT>(&self) -> Result<VT>
    where
        VT: TrackedView<V> + Clone + 'static,
    {
        self.get_view(&default_view_name::<VT>())
    }

    /// Clone of the clustered view `name` with the calling transaction's
    /// uncommitted changes applied
    fn overlaid(&self, name: &str) -> Result<Box<dyn TrackedView<V>>> {
        let view = match self.store.current_tx(false)? {
            Some(tx) => self.store.tx_views.get(&tx.seq()),
            None => None,
        };
        let committed = self.store.read_committed()?;
        let mut clustered = {
            let views = self.store.views.lock();
            let live = views.get(name)?;
            if live.as_clustered().is_none() {
                return Err(StoreError::NotClustered(name.to_string()));
            }
            live.clone_boxed()
        };
        if let Some(view) = view {
            replay(
                &self.store.name,
                name,
                clustered.as_mut(),
                &*committed,
                &*view,
                self.store.config.dirty_check,
            )?;
        }
        Ok(clustered)
    }

    /// Sub-view `sub_key` of a clustered view, reflecting the calling
    /// transaction's own changes
    ///
    /// # Errors
    ///
    /// - [`StoreError::NotClustered`] if the view has no sub-views
    /// - [`StoreError::UnknownSubView`] if no sub-view exists for `sub_key`
    pub fn get_sub_view<SV>(&self, name: &str, sub_key: &str) -> Result<SV>
    where
        SV: TrackedView<V> + Clone + 'static,
    {
        let overlaid = self.overlaid(name)?;
        let clustered = overlaid
            .as_clustered()
            .ok_or_else(|| StoreError::NotClustered(name.to_string()))?;
        let sub = clustered
            .sub_view(sub_key)
            .ok_or_else(|| StoreError::UnknownSubView {
                view: name.to_string(),
                key: sub_key.to_string(),
            })?;
        downcast(name, sub)
    }

    /// Keys of all sub-views of a clustered view, reflecting the calling
    /// transaction's own changes
    pub fn get_sub_view_keys(&self, name: &str) -> Result<Vec<String>> {
        let overlaid = self.overlaid(name)?;
        let clustered = overlaid
            .as_clustered()
            .ok_or_else(|| StoreError::NotClustered(name.to_string()))?;
        Ok(clustered.sub_view_keys())
    }

    /// Clear a view and rebuild it from the committed values
    pub fn reinitialize_view(&self, name: &str) -> Result<()> {
        let section = self.store.write_committed("view reinitialization")?;
        self.store
            .views
            .lock()
            .reinitialize(&self.store.name, name, section.values())
    }

    /// Run `f` against the state of the live view, with commits of the
    /// store blocked
    pub fn with_live_view<R, F>(&self, name: &str, f: F) -> Result<R>
    where
        F: FnOnce(&dyn TrackedView<V>) -> R,
    {
        let _committed = self.store.read_committed()?;
        let view = self.store.views.lock().get(name)?.clone_boxed();
        Ok(f(view.as_ref()))
    }

    /// Names of all registered views
    pub fn view_names(&self) -> Result<Vec<String>> {
        self.store.check_reentry()?;
        Ok(self.store.views.lock().names())
    }

    /// Check if a view is registered under `name`
    pub fn contains_view(&self, name: &str) -> Result<bool> {
        self.store.check_reentry()?;
        Ok(self.store.views.lock().get(name).is_ok())
    }

    /// Reset every view to its empty state
    pub fn clear_views(&self) -> Result<()> {
        let _section = self.store.write_committed("view reset")?;
        self.store.views.lock().clear_all();
        Ok(())
    }
}

/// Apply a transaction's dirty entries to a view clone
fn replay<K: TxKey, V: TxValue>(
    store: &str,
    name: &str,
    view: &mut dyn TrackedView<V>,
    committed: &Committed<K, V>,
    tx_view: &StoreTxView<K, V>,
    dirty_check: DirtyCheck,
) -> Result<()> {
    for entry in tx_view.dirty_entries(dirty_check) {
        let old = committed.entries.get(entry.key()).map(|e| &e.value);
        let new = entry.value();
        if old.is_none() && new.is_none() {
            continue;
        }
        view.track_modification(old, new)
            .map_err(|e| StoreError::TrackedViewModification {
                store: store.to_string(),
                view: name.to_string(),
                tx: tx_view.tx().to_string(),
                key: format!("{:?}", entry.key()),
                old: format!("{:?}", old),
                new: format!("{:?}", new),
                reason: e.to_string(),
            })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::container::Container;
    use crate::store::Store;
    use txstore_core::{ClusteredView, ListenerError, ViewError};

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Total {
        sum: i64,
        count: usize,
    }

    impl TrackedView<i64> for Total {
        fn clear(&mut self) {
            *self = Total::default();
        }

        fn track_modification(
            &mut self,
            old: Option<&i64>,
            new: Option<&i64>,
        ) -> std::result::Result<(), ViewError> {
            if let Some(o) = old {
                self.sum -= o;
                self.count -= 1;
            }
            if let Some(n) = new {
                if *n < 0 {
                    return Err(ViewError::new("negative values are not tracked"));
                }
                self.sum += n;
                self.count += 1;
            }
            Ok(())
        }

        fn check_view(&self, values: &[i64]) -> std::result::Result<(), ViewError> {
            let sum: i64 = values.iter().sum();
            if sum == self.sum {
                Ok(())
            } else {
                Err(ViewError::new(format!("sum {} != {}", self.sum, sum)))
            }
        }
    }

    #[derive(Debug, Clone, Default)]
    struct ByParity(BTreeMap<String, Total>);

    impl TrackedView<i64> for ByParity {
        fn clear(&mut self) {
            self.0.clear();
        }

        fn track_modification(
            &mut self,
            old: Option<&i64>,
            new: Option<&i64>,
        ) -> std::result::Result<(), ViewError> {
            let parity = |v: &i64| if v % 2 == 0 { "even" } else { "odd" }.to_string();
            if let Some(o) = old {
                self.0.entry(parity(o)).or_default().track_modification(Some(o), None)?;
            }
            if let Some(n) = new {
                self.0.entry(parity(n)).or_default().track_modification(None, Some(n))?;
            }
            Ok(())
        }

        fn as_clustered(&self) -> Option<&dyn ClusteredView<i64>> {
            Some(self)
        }
    }

    impl ClusteredView<i64> for ByParity {
        fn sub_view_keys(&self) -> Vec<String> {
            self.0.keys().cloned().collect()
        }

        fn sub_view(&self, key: &str) -> Option<&dyn TrackedView<i64>> {
            self.0.get(key).map(|v| v as &dyn TrackedView<i64>)
        }
    }

    fn setup() -> (Container, Store<String, i64>) {
        let container = Container::new();
        let store = container.create_store::<String, i64>("numbers").unwrap();
        (container, store)
    }

    fn seed(c: &Container, store: &Store<String, i64>, values: &[(&str, i64)]) {
        c.with_local_tx("seed", || {
            for (k, v) in values {
                store.update(k.to_string(), *v)?;
            }
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_register_initializes_from_committed() {
        let (c, store) = setup();
        seed(&c, &store, &[("a", 1), ("b", 2)]);
        let registry = store.tracked_view_registry();
        let name = registry.register_default(Total::default()).unwrap();

        assert_eq!(name, default_view_name::<Total>());
        assert!(registry.contains_view(&name).unwrap());
        let total: Total = registry.get_view(&name).unwrap();
        assert_eq!(total, Total { sum: 3, count: 2 });
    }

    #[test]
    fn test_view_follows_commits() {
        let (c, store) = setup();
        let registry = store.tracked_view_registry();
        registry.register("total", Total::default()).unwrap();
        seed(&c, &store, &[("a", 5)]);
        c.with_local_tx("change", || {
            store.update("a".to_string(), 7)?;
            store.update("b".to_string(), 1)
        })
        .unwrap();
        c.with_local_tx("drop", || store.remove(&"b".to_string())).unwrap();

        let total: Total = registry.get_view("total").unwrap();
        assert_eq!(total, Total { sum: 7, count: 1 });
    }

    #[test]
    fn test_view_is_stable_within_transaction() {
        let (c, store) = setup();
        let registry = store.tracked_view_registry();
        registry.register("total", Total::default()).unwrap();
        seed(&c, &store, &[("a", 1)]);

        let reader = c.begin_local_transaction("reader").unwrap();
        let before: Total = registry.get_view("total").unwrap();
        let h = c.suspend().unwrap();
        seed(&c, &store, &[("b", 10)]);
        c.resume(&h).unwrap();
        let after: Total = registry.get_view("total").unwrap();
        assert_eq!(before, after);
        reader.commit().unwrap();

        let fresh: Total = registry.get_view("total").unwrap();
        assert_eq!(fresh.sum, 11);
    }

    #[test]
    fn test_unknown_and_mismatched_views() {
        let (_c, store) = setup();
        let registry = store.tracked_view_registry();
        registry.register("total", Total::default()).unwrap();

        let err = registry.get_view::<Total>("missing").unwrap_err();
        assert!(matches!(err, StoreError::UnknownView { ref registered, .. } if registered == &["total".to_string()]));
        let err = registry.get_view::<ByParity>("total").unwrap_err();
        assert!(matches!(err, StoreError::ViewTypeMismatch { .. }));
        let err = registry.get_sub_view_keys("total").unwrap_err();
        assert_eq!(err, StoreError::NotClustered("total".to_string()));
    }

    #[test]
    fn test_view_failure_is_reported_after_merge() {
        let (c, store) = setup();
        store
            .tracked_view_registry()
            .register("total", Total::default())
            .unwrap();
        let err = c
            .with_local_tx("negative", || store.update("neg".to_string(), -1))
            .unwrap_err();
        assert!(matches!(err, StoreError::TrackedViewModification { ref view, .. } if view == "total"));
        assert_eq!(store.get_read_only(&"neg".to_string()).unwrap(), Some(-1));
    }

    #[test]
    fn test_sub_views_reflect_own_changes() {
        let (c, store) = setup();
        let registry = store.tracked_view_registry();
        registry.register("parity", ByParity::default()).unwrap();
        seed(&c, &store, &[("a", 1), ("b", 2)]);

        let tx = c.begin_local_transaction("overlay").unwrap();
        store.update("c".to_string(), 4).unwrap();
        store.remove(&"a".to_string()).unwrap();
        let even: Total = registry.get_sub_view("parity", "even").unwrap();
        assert_eq!(even, Total { sum: 6, count: 2 });
        let odd: Total = registry.get_sub_view("parity", "odd").unwrap();
        assert_eq!(odd.count, 0);
        tx.rollback().unwrap();

        // the live view never saw the rolled back changes
        let even: Total = registry.get_sub_view("parity", "even").unwrap();
        assert_eq!(even, Total { sum: 2, count: 1 });
        let err = registry.get_sub_view::<Total>("parity", "prime").unwrap_err();
        assert!(matches!(err, StoreError::UnknownSubView { .. }));
    }

    #[test]
    fn test_consistency_check_detects_drift() {
        let container = Container::new();
        let store = container
            .create_store_with::<String, i64>("checked", StoreConfig::default().with_view_checks(true))
            .unwrap();
        let registry = store.tracked_view_registry();
        registry.register("total", Total::default()).unwrap();
        seed(&container, &store, &[("a", 3)]);

        // corrupt the live view, then commit again
        registry.clear_views().unwrap();
        let err = container
            .with_local_tx("next", || store.update("b".to_string(), 1))
            .unwrap_err();
        assert!(matches!(err, StoreError::ConsistencyCheck { ref view, .. } if view == "total"));

        registry.reinitialize_view("total").unwrap();
        let sum = registry
            .with_live_view("total", |v| v.check_view(&[3, 1]).is_ok())
            .unwrap();
        assert!(sum);
    }

    #[test]
    fn test_listener_querying_registry_fails_fast() {
        let (c, store) = setup();
        let registry = store.tracked_view_registry();
        registry.register("total", Total::default()).unwrap();
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let inner = store.tracked_view_registry();
        store
            .register_modification_listener(
                move |_: &String, _: Option<&i64>, _: Option<&i64>, _: &TransactionHandle| {
                    let mut sink = sink.lock();
                    sink.push(inner.view_names().map(|_| ()));
                    sink.push(inner.contains_view("total").map(|_| ()));
                    Ok::<(), ListenerError>(())
                },
            )
            .unwrap();

        c.with_local_tx("write", || store.update("a".to_string(), 1)).unwrap();
        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert!(seen
            .iter()
            .all(|r| matches!(r, Err(StoreError::RecursiveCommit { scope, .. }) if scope == "store 'numbers'")));
        assert_eq!(registry.view_names().unwrap(), vec!["total".to_string()]);
    }

    #[test]
    fn test_live_view_callback_may_query_registry() {
        let (_c, store) = setup();
        let registry = store.tracked_view_registry();
        registry.register("total", Total::default()).unwrap();
        let names = registry
            .with_live_view("total", |_| registry.view_names())
            .unwrap()
            .unwrap();
        assert_eq!(names, vec!["total".to_string()]);
    }

    #[test]
    fn test_views_require_tracking() {
        let container = Container::new();
        let store = container
            .create_store_with::<String, i64>("plain", StoreConfig::default().with_tracking(false))
            .unwrap();
        let err = store
            .tracked_view_registry()
            .register("total", Total::default())
            .unwrap_err();
        assert!(matches!(err, StoreError::TrackingDisabled { feature: "tracked views", .. }));
    }
}
