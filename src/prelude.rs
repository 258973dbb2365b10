//! Commonly used types
//!
//! ```
//! use txstore::prelude::*;
//! ```

pub use txstore_core::{
    ClusteredView, DirtyCheck, ListenerError, ModificationListener, ReadOnlyFlag, Result,
    StoreError, TrackedView, TransactionHandle, TransactionListener, TxValue, ViewError,
};
pub use txstore_engine::{Container, ContainerConfig, LocalTransaction, Store, StoreConfig};
