//! Core types and traits for txstore
//!
//! This crate defines the foundational pieces used throughout the workspace:
//! - StoreError: Error taxonomy, plus ErrorCollector for aggregated failures
//! - TransactionHandle: Identity of one logical transaction
//! - DirtyCheck: Merge policy for touched entries
//! - Traits: TxValue, TrackedView, ClusteredView, ModificationListener,
//!   TransactionListener
//! - ReadOnlyFlag: Helper for values supporting read-only mode

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod readonly;
pub mod traits;
pub mod types;

pub use error::{ErrorCollector, ListenerError, Result, StoreError, ViewError};
pub use readonly::ReadOnlyFlag;
pub use traits::{
    ClusteredView, ModificationListener, TrackedView, TransactionListener, TxKey, TxValue,
    ViewObject,
};
pub use types::{DirtyCheck, TransactionHandle};
