//! Object adapter producing isolated copies of stored values
//!
//! The adapter sits on every path where a value crosses the boundary
//! between the committed map and a transaction:
//!
//! ```text
//! committed ──clone_committed──────▶ writable working copy
//! committed ──clone_for_read_only──▶ read-only snapshot
//! working   ──clone_to_committed───▶ committed
//! ```
//!
//! Copies compare equal to their source but share no state with it.

use std::marker::PhantomData;
use txstore_core::{Result, StoreError, TxValue};

/// Produces transaction-private copies of values
pub trait ObjectAdapter<V>: Send + Sync {
    /// Copy a committed value into a writable working copy
    fn clone_committed(&self, value: &V) -> V;

    /// Copy a value into a snapshot switched to read-only mode
    ///
    /// Values without read-only support are copied unchanged.
    fn clone_for_read_only(&self, value: &V) -> V;

    /// Copy a working copy back for the committed map
    fn clone_to_committed(&self, value: &V) -> V;

    /// Switch a copy back to read-write mode
    fn switch_to_read_write(&self, value: &mut V);

    /// Whether the value type can be switched to read-only mode
    fn is_read_only_supported(&self) -> bool;
}

/// Default adapter isolating values by cloning
///
/// Committed values are held in read-only mode when the type supports it,
/// so they are never mutated in place by accident.
#[derive(Debug)]
pub struct CloningObjectAdapter<V> {
    throw_if_missing_read_only_mode: bool,
    _marker: PhantomData<fn() -> V>,
}

impl<V: TxValue> CloningObjectAdapter<V> {
    /// Create an adapter that tolerates types without read-only support
    pub fn new() -> Self {
        CloningObjectAdapter {
            throw_if_missing_read_only_mode: false,
            _marker: PhantomData,
        }
    }

    /// Create an adapter requiring read-only support from the value type
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::IsolationUnsupported`] if `V` cannot be switched
    /// to read-only mode.
    pub fn strict() -> Result<Self> {
        let mut adapter = Self::new();
        adapter.set_throw_if_missing_read_only_mode(true)?;
        Ok(adapter)
    }

    /// Enable or disable strict read-only checking
    ///
    /// The check is resolved once per value type, here, and never deferred
    /// to the first read.
    pub fn set_throw_if_missing_read_only_mode(&mut self, enabled: bool) -> Result<()> {
        if enabled && !V::READ_ONLY_SUPPORTED {
            return Err(StoreError::IsolationUnsupported {
                type_name: std::any::type_name::<V>(),
            });
        }
        self.throw_if_missing_read_only_mode = enabled;
        Ok(())
    }

    /// Whether strict read-only checking is enabled
    pub fn throws_if_missing_read_only_mode(&self) -> bool {
        self.throw_if_missing_read_only_mode
    }
}

impl<V: TxValue> Default for CloningObjectAdapter<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: TxValue> ObjectAdapter<V> for CloningObjectAdapter<V> {
    fn clone_committed(&self, value: &V) -> V {
        let mut copy = value.clone();
        copy.switch_to_read_write();
        copy
    }

    fn clone_for_read_only(&self, value: &V) -> V {
        let mut copy = value.clone();
        if V::READ_ONLY_SUPPORTED {
            copy.switch_to_read_only();
        }
        copy
    }

    fn clone_to_committed(&self, value: &V) -> V {
        let mut copy = value.clone();
        if V::READ_ONLY_SUPPORTED {
            copy.switch_to_read_only();
        }
        copy
    }

    fn switch_to_read_write(&self, value: &mut V) {
        value.switch_to_read_write();
    }

    fn is_read_only_supported(&self) -> bool {
        V::READ_ONLY_SUPPORTED
    }
}
