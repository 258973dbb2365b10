//! Read-only mode support for stored values
//!
//! A value type embeds a [`ReadOnlyFlag`] and guards each mutator with
//! [`ReadOnlyFlag::check_writable`]. The store switches the flag when it
//! hands out read-only snapshots, so a mutation attempt on such a snapshot
//! fails at the point of mutation with [`StoreError::ReadOnlyViolation`].

use crate::error::{Result, StoreError};
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};

/// Read-only switch embedded in a value
///
/// The flag never takes part in equality or hashing, so a read-only copy
/// compares equal to its writable source.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ReadOnlyFlag {
    #[serde(skip)]
    read_only: bool,
}

impl ReadOnlyFlag {
    /// A writable flag
    pub fn new() -> Self {
        Self::default()
    }

    /// Check the current mode
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Switch to read-only mode
    pub fn switch_to_read_only(&mut self) {
        self.read_only = true;
    }

    /// Switch to read-write mode
    pub fn switch_to_read_write(&mut self) {
        self.read_only = false;
    }

    /// Fail if the owning value is in read-only mode
    ///
    /// # Example
    ///
    /// ```
    /// use txstore_core::ReadOnlyFlag;
    ///
    /// let mut flag = ReadOnlyFlag::new();
    /// assert!(flag.check_writable("value").is_ok());
    /// flag.switch_to_read_only();
    /// assert!(flag.check_writable("value").is_err());
    /// ```
    pub fn check_writable(&self, field: &str) -> Result<()> {
        if self.read_only {
            Err(StoreError::ReadOnlyViolation(format!(
                "attempt to modify field '{}' of a read-only object",
                field
            )))
        } else {
            Ok(())
        }
    }
}

impl PartialEq for ReadOnlyFlag {
    fn eq(&self, _other: &Self) -> bool {
        true
    }
}

impl Eq for ReadOnlyFlag {}

impl Hash for ReadOnlyFlag {
    fn hash<H: Hasher>(&self, _state: &mut H) {}
}
