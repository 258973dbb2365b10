//! Transactional store engine for txstore
//!
//! This crate ties the lower layers together:
//! - Container: transaction lifecycle, thread binding and the commit protocol
//! - Store: committed map, per-transaction views and the commit merge
//! - Tracked views: aggregates maintained during the merge
//! - Configuration: per-store settings, loadable from TOML
//!
//! Commit of a container runs in two phases across all of its stores:
//! every store validates first, then every store merges. Failures of
//! listeners and views during the merge do not undo it.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod container;
pub mod store;
pub mod tracked;

pub use config::{ContainerConfig, StoreConfig, CONFIG_FILE_NAME};
pub use container::{Container, LocalTransaction, TransactionMetrics};
pub use store::{CommittedEntries, ObjectInfo, Store};
pub use tracked::{default_view_name, TrackedViewRegistry};
