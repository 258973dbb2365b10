//! Concurrency layer for the transactional store
//!
//! This crate implements transaction isolation with:
//! - ObjectAdapter: isolated copies of committed values, read-only snapshots
//! - TransactionAdapter: binding of transactions to threads
//! - StoreTxView: per-transaction working set with copy-on-first-touch
//! - TransactionStatus: commit/rollback state machine
//! - Optional stale-entry validation at prepare time
//!
//! It holds no committed state itself; stores in `txstore-engine` own the
//! committed map and drive these pieces from their commit protocol.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod adapter;
pub mod context;
pub mod transaction;
pub mod validation;
pub mod view;

pub use adapter::{CloningObjectAdapter, ObjectAdapter};
pub use context::{LocalTransactionAdapter, LocalTransactionRef, TransactionAdapter};
pub use transaction::TransactionStatus;
pub use validation::{validate_entries, StaleEntry, ValidationResult};
pub use view::{EntryTxView, Loaded, StoreTxView};
