//! Core trait definitions
//!
//! These are the extension points of the store:
//! - [`TxValue`] / [`TxKey`]: what can be stored
//! - [`TrackedView`] / [`ClusteredView`]: incrementally maintained aggregates
//! - [`ModificationListener`]: per-key callback during the commit merge
//! - [`TransactionListener`]: container-level commit/rollback hooks

use crate::error::{ListenerError, Result, ViewError};
use crate::types::TransactionHandle;
use std::any::Any;
use std::fmt::Debug;
use std::hash::Hash;

/// Key type of a store
pub trait TxKey: Clone + Eq + Hash + Debug + Send + Sync + 'static {}

impl<T: Clone + Eq + Hash + Debug + Send + Sync + 'static> TxKey for T {}

/// Value type of a store
///
/// Cloning must yield a value equal to, but independent of, the source.
/// Dirty detection under object-based checking relies on `PartialEq`.
///
/// Types able to reject mutation set `READ_ONLY_SUPPORTED` and implement
/// the two switch methods, usually by embedding a
/// [`ReadOnlyFlag`](crate::readonly::ReadOnlyFlag). The capability is a
/// property of the type and is resolved once, when a store is configured.
pub trait TxValue: Clone + PartialEq + Debug + Send + Sync + 'static {
    /// Whether values of this type can be switched to read-only mode
    const READ_ONLY_SUPPORTED: bool = false;

    /// Switch the value to read-only mode; later mutation attempts must fail
    fn switch_to_read_only(&mut self) {}

    /// Switch the value back to read-write mode
    fn switch_to_read_write(&mut self) {}
}

macro_rules! plain_tx_value {
    ($($t:ty),*) => {
        $(impl TxValue for $t {})*
    };
}

plain_tx_value!(bool, i8, i16, i32, i64, i128, u8, u16, u32, u64, u128, usize, isize, char, String);

impl<T: TxValue> TxValue for Vec<T> {}
impl<T: TxValue> TxValue for Option<T> {}

/// Object-safe plumbing for tracked views
///
/// Implemented automatically for every `Clone` view, so implementors only
/// write [`TrackedView`].
pub trait ViewObject<V>: Send + Sync {
    /// Clone into an independently mutable boxed view
    fn clone_boxed(&self) -> Box<dyn TrackedView<V>>;
    /// Access the concrete view type
    fn as_any(&self) -> &dyn Any;
    /// Concrete type name, used in diagnostics
    fn type_name(&self) -> &'static str;
}

impl<V: 'static, T> ViewObject<V> for T
where
    T: TrackedView<V> + Clone + 'static,
{
    fn clone_boxed(&self) -> Box<dyn TrackedView<V>> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

/// Aggregate over all committed values, maintained incrementally
///
/// `track_modification(None, Some(v))` is an insert, `(Some(v), None)` a
/// delete, and two values an update. A view must be cloneable deeply enough
/// that the clone can be mutated independently of the original.
pub trait TrackedView<V>: ViewObject<V> {
    /// Reset to the empty state
    fn clear(&mut self);

    /// Apply one committed modification
    fn track_modification(&mut self, old: Option<&V>, new: Option<&V>)
        -> std::result::Result<(), ViewError>;

    /// Validate against a full scan of the committed values
    fn check_view(&self, _values: &[V]) -> std::result::Result<(), ViewError> {
        Ok(())
    }

    /// Clustering capability, if the view is partitioned into sub-views
    fn as_clustered(&self) -> Option<&dyn ClusteredView<V>> {
        None
    }
}

/// A tracked view partitioned into independently queryable sub-views
pub trait ClusteredView<V>: TrackedView<V> {
    /// Keys of all existing sub-views
    fn sub_view_keys(&self) -> Vec<String>;

    /// Sub-view for a key
    fn sub_view(&self, key: &str) -> Option<&dyn TrackedView<V>>;
}

/// Callback invoked once per committed key change
///
/// Called while the commit holds the store's serialization point, so a
/// listener must not commit the same store.
pub trait ModificationListener<K, V>: Send + Sync {
    /// Called for each modified entry written back to the committed map
    fn on_modification(
        &self,
        key: &K,
        old: Option<&V>,
        new: Option<&V>,
        tx: &TransactionHandle,
    ) -> std::result::Result<(), ListenerError>;
}

impl<K, V, F> ModificationListener<K, V> for F
where
    F: Fn(&K, Option<&V>, Option<&V>, &TransactionHandle) -> std::result::Result<(), ListenerError>
        + Send
        + Sync,
{
    fn on_modification(
        &self,
        key: &K,
        old: Option<&V>,
        new: Option<&V>,
        tx: &TransactionHandle,
    ) -> std::result::Result<(), ListenerError> {
        self(key, old, new, tx)
    }
}

/// Container-level hooks around commit and rollback
pub trait TransactionListener: Send + Sync {
    /// Before any store of the transaction is prepared
    fn before_commit(&self, _tx: &TransactionHandle) -> Result<()> {
        Ok(())
    }

    /// After all stores merged, also when listeners failed during the merge
    fn after_commit(&self, _tx: &TransactionHandle) -> Result<()> {
        Ok(())
    }

    /// Before the transaction views are discarded
    fn before_rollback(&self, _tx: &TransactionHandle) -> Result<()> {
        Ok(())
    }

    /// After the transaction views were discarded
    fn after_rollback(&self, _tx: &TransactionHandle) -> Result<()> {
        Ok(())
    }
}

impl<T: TransactionListener + ?Sized> TransactionListener for std::sync::Arc<T> {
    fn before_commit(&self, tx: &TransactionHandle) -> Result<()> {
        (**self).before_commit(tx)
    }

    fn after_commit(&self, tx: &TransactionHandle) -> Result<()> {
        (**self).after_commit(tx)
    }

    fn before_rollback(&self, tx: &TransactionHandle) -> Result<()> {
        (**self).before_rollback(tx)
    }

    fn after_rollback(&self, tx: &TransactionHandle) -> Result<()> {
        (**self).after_rollback(tx)
    }
}
