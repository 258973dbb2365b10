//! Stale-entry validation
//!
//! Commits are last-writer-wins by default. A store configured with the
//! stale-entry check validates, at prepare time, that every entry the
//! transaction is about to merge still has the committed version it had
//! when the transaction first touched it.
//!
//! Rules:
//! - Only entries that will be merged are validated. Keys that were only
//!   read never conflict.
//! - A key that was unbound on first touch has version 0; a concurrent
//!   insert of that key is a conflict.
//! - Validation is all-or-nothing: one stale entry rejects the whole commit
//!   before anything is merged.

use crate::view::StoreTxView;
use std::fmt::Debug;
use txstore_core::{DirtyCheck, ErrorCollector, Result, StoreError, TxKey};

/// A dirty entry whose committed version moved since first access
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaleEntry<K> {
    /// The key that was committed concurrently
    pub key: K,
    /// Version recorded on first access
    pub read_version: u64,
    /// Committed version at validation time
    pub current_version: u64,
}

/// Result of transaction validation
///
/// A transaction may commit only if [`is_valid`](Self::is_valid) holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult<K> {
    /// All stale entries detected
    pub conflicts: Vec<StaleEntry<K>>,
}

impl<K: Debug> ValidationResult<K> {
    /// Successful validation result
    pub fn ok() -> Self {
        ValidationResult {
            conflicts: Vec::new(),
        }
    }

    /// Check if validation passed
    pub fn is_valid(&self) -> bool {
        self.conflicts.is_empty()
    }

    /// Merge another validation result into this one
    pub fn merge(&mut self, other: ValidationResult<K>) {
        self.conflicts.extend(other.conflicts);
    }

    /// Number of stale entries
    pub fn conflict_count(&self) -> usize {
        self.conflicts.len()
    }

    /// Convert into a store result, aggregating all stale entries
    pub fn into_result(self, store: &str) -> Result<()> {
        let mut errors = ErrorCollector::new();
        for c in self.conflicts {
            errors.push(StoreError::StaleEntry {
                store: store.to_string(),
                key: format!("{:?}", c.key),
                read_version: c.read_version,
                current_version: c.current_version,
            });
        }
        errors.into_result()
    }
}

/// Validate the dirty entries of a transaction view
///
/// `current_version` reports the committed version of a key, 0 if unbound.
/// It must be evaluated under the store's commit serialization point.
pub fn validate_entries<K, V, F>(
    view: &StoreTxView<K, V>,
    dirty_check: DirtyCheck,
    current_version: F,
) -> ValidationResult<K>
where
    K: TxKey,
    V: Clone + PartialEq + 'static,
    F: Fn(&K) -> u64,
{
    let mut result = ValidationResult::ok();
    for entry in view.dirty_entries(dirty_check) {
        let current = current_version(entry.key());
        if current != entry.orig_version() {
            result.conflicts.push(StaleEntry {
                key: entry.key().clone(),
                read_version: entry.orig_version(),
                current_version: current,
            });
        }
    }
    result
}
