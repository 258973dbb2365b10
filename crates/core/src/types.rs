//! Core types shared across the workspace
//!
//! - [`TransactionHandle`]: identity of one logical transaction
//! - [`DirtyCheck`]: policy deciding which touched entries are merged at commit

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Identifies one logical transaction
///
/// A handle is immutable once created and cheap to clone. It carries the
/// generated name (`TX-<seq>`), a free-form description and an optional
/// opaque reference to the external transaction object the handle was
/// created for. Equality is by sequence number and name.
#[derive(Clone)]
pub struct TransactionHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    seq: u64,
    name: String,
    description: String,
    external: Option<Arc<dyn Any + Send + Sync>>,
    started: Instant,
}

impl TransactionHandle {
    /// Create a handle
    ///
    /// # Example
    ///
    /// ```
    /// use txstore_core::TransactionHandle;
    ///
    /// let tx = TransactionHandle::new(1, "TX-1", "import", None);
    /// assert_eq!(tx.name(), "TX-1");
    /// assert!(tx.external().is_none());
    /// ```
    pub fn new(
        seq: u64,
        name: impl Into<String>,
        description: impl Into<String>,
        external: Option<Arc<dyn Any + Send + Sync>>,
    ) -> Self {
        TransactionHandle {
            inner: Arc::new(HandleInner {
                seq,
                name: name.into(),
                description: description.into(),
                external,
                started: Instant::now(),
            }),
        }
    }

    /// Sequence number assigned by the transaction adapter
    pub fn seq(&self) -> u64 {
        self.inner.seq
    }

    /// Generated transaction name
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Description given when the transaction was started
    pub fn description(&self) -> &str {
        &self.inner.description
    }

    /// External transaction object, if any
    pub fn external(&self) -> Option<&Arc<dyn Any + Send + Sync>> {
        self.inner.external.as_ref()
    }

    /// Downcast the external transaction object
    pub fn external_as<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.inner
            .external
            .as_ref()
            .and_then(|ext| ext.downcast_ref::<T>())
    }

    /// Time since the handle was created
    pub fn elapsed(&self) -> Duration {
        self.inner.started.elapsed()
    }
}

impl PartialEq for TransactionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.inner.seq == other.inner.seq && self.inner.name == other.inner.name
    }
}

impl Eq for TransactionHandle {}

impl Hash for TransactionHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.seq.hash(state);
        self.inner.name.hash(state);
    }
}

impl fmt::Debug for TransactionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionHandle")
            .field("name", &self.inner.name)
            .field("description", &self.inner.description)
            .field("external", &self.inner.external.is_some())
            .finish()
    }
}

impl fmt::Display for TransactionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.inner.description.is_empty() {
            write!(f, "{}", self.inner.name)
        } else {
            write!(f, "{} ({})", self.inner.name, self.inner.description)
        }
    }
}

/// Policy deciding which touched entries are merged at commit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirtyCheck {
    /// Only entries passed to `update` or `remove` are merged
    #[default]
    Explicit,
    /// Every touched entry is compared to its original value at commit
    ObjectBased,
}
