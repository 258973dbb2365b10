//! txstore - embedded transactional object store
//!
//! txstore keeps typed key/value stores in memory and gives every
//! transaction its own isolated view of them. Writes become visible to
//! other transactions only when the commit merges them back, all stores of
//! a container at once.
//!
//! # Quick Start
//!
//! ```
//! use txstore::prelude::*;
//!
//! let container = Container::new();
//! let accounts: Store<String, i64> = container.create_store("accounts")?;
//!
//! container.with_local_tx("open", || accounts.update("alice".to_string(), 100))?;
//!
//! let balance = container.with_local_tx("read", || accounts.get(&"alice".to_string()))?;
//! assert_eq!(balance, Some(100));
//! # Ok::<(), txstore::StoreError>(())
//! ```
//!
//! # Architecture
//!
//! - [`txstore_core`]: errors, transaction handles and the extension traits
//! - [`txstore_concurrency`]: copy adapters, thread binding, transaction views
//! - [`txstore_engine`]: containers, stores, tracked views and configuration

pub mod prelude;

pub use txstore_concurrency::{
    CloningObjectAdapter, LocalTransactionAdapter, ObjectAdapter, TransactionAdapter,
    TransactionStatus,
};
pub use txstore_core::{
    ClusteredView, DirtyCheck, ErrorCollector, ListenerError, ModificationListener, ReadOnlyFlag,
    Result, StoreError, TrackedView, TransactionHandle, TransactionListener, TxKey, TxValue,
    ViewError,
};
pub use txstore_engine::{
    default_view_name, CommittedEntries, Container, ContainerConfig, LocalTransaction, ObjectInfo,
    Store, StoreConfig, TrackedViewRegistry, TransactionMetrics, CONFIG_FILE_NAME,
};
