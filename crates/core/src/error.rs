//! Error types for the transactional store
//!
//! Every fallible operation in the workspace returns [`Result`]. We use
//! `thiserror` for the `Display` and `Error` implementations.
//!
//! Usage errors (a transaction already active, no transaction, tracking
//! disabled, recursive commit) are raised synchronously by the call that
//! violates the precondition. Failures of independent observers during a
//! commit are gathered with [`ErrorCollector`] and surface as one
//! [`StoreError::Aggregate`].

use thiserror::Error;

/// Result type alias for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Error types for the transactional store
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The calling thread already has an active transaction
    #[error("Transaction already started: {current}")]
    TransactionAlreadyActive {
        /// Name of the transaction bound to the thread
        current: String,
    },

    /// An operation required a transaction but none is bound to the thread
    #[error("No active transaction")]
    NoActiveTransaction,

    /// The external transaction object of a handle is not of the expected kind
    #[error("Not a local transaction: {0}")]
    InvalidExternalTransaction(String),

    /// A commit was re-entered from inside itself (e.g. from a listener)
    #[error("Recursive commit of {tx} in {scope}")]
    RecursiveCommit {
        /// What was re-entered, e.g. `store 'orders'`
        scope: String,
        /// Transaction owning the running commit
        tx: String,
    },

    /// A feature needing original-value tracking was used on a store without it
    #[error("Store '{store}' does not track original values; {feature} is not available")]
    TrackingDisabled {
        /// Store name
        store: String,
        /// Feature that was requested
        feature: &'static str,
    },

    /// A value switched to read-only mode was modified
    #[error("Read-only violation: {0}")]
    ReadOnlyViolation(String),

    /// Strict read-only checking was requested for a type without read-only support
    #[error("Read-only mode not supported by value type {type_name}")]
    IsolationUnsupported {
        /// Rust type name of the value
        type_name: &'static str,
    },

    /// A tracked view failed to apply a committed modification
    #[error(
        "Tracked view '{view}' of store '{store}' failed to track modification of key {key} \
         in {tx} (old: {old}, new: {new}): {reason}"
    )]
    TrackedViewModification {
        /// Store name
        store: String,
        /// View name
        view: String,
        /// Committing transaction
        tx: String,
        /// Debug rendering of the key
        key: String,
        /// Debug rendering of the old value
        old: String,
        /// Debug rendering of the new value
        new: String,
        /// Message reported by the view
        reason: String,
    },

    /// A modification or transaction listener failed
    #[error("Listener failed in {tx} on store '{store}': {reason}")]
    ListenerFailed {
        /// Store name (empty for container-level listeners)
        store: String,
        /// Transaction the listener was called for
        tx: String,
        /// Message reported by the listener
        reason: String,
    },

    /// Post-commit validation found a view out of sync with the committed values
    #[error("Consistency check of view '{view}' on store '{store}' failed: {reason}")]
    ConsistencyCheck {
        /// Store name
        store: String,
        /// View name
        view: String,
        /// Message reported by the view
        reason: String,
    },

    /// The optional stale-entry check rejected the commit
    #[error("Stale entry {key} in store '{store}': read at version {read_version}, committed version is {current_version}")]
    StaleEntry {
        /// Store name
        store: String,
        /// Debug rendering of the key
        key: String,
        /// Committed version observed on first access
        read_version: u64,
        /// Committed version at prepare time
        current_version: u64,
    },

    /// No view is registered under the requested name
    #[error("No tracked view with name '{name}' registered (registered: {registered:?})")]
    UnknownView {
        /// Requested name
        name: String,
        /// Names that are registered
        registered: Vec<String>,
    },

    /// A clustered operation was used on a view that is not clustered
    #[error("Tracked view '{0}' is not a clustered view")]
    NotClustered(String),

    /// A clustered view has no sub-view for the key
    #[error("Tracked view '{view}' has no sub-view for key '{key}'")]
    UnknownSubView {
        /// View name
        view: String,
        /// Requested sub-view key
        key: String,
    },

    /// A view was requested as a type it does not have
    #[error("Tracked view '{name}' is not of type {expected}")]
    ViewTypeMismatch {
        /// View name
        name: String,
        /// Requested Rust type
        expected: &'static str,
    },

    /// Invalid transaction state transition
    #[error("Invalid transaction state: {0}")]
    InvalidState(String),

    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(String),

    /// Several independent failures of one operation
    #[error("{primary} ({} suppressed)", .suppressed.len())]
    Aggregate {
        /// First failure encountered
        primary: Box<StoreError>,
        /// Failures encountered after the primary one
        suppressed: Vec<StoreError>,
    },
}

impl StoreError {
    /// Iterate over every individual failure, flattening aggregates
    pub fn causes(&self) -> Vec<&StoreError> {
        match self {
            StoreError::Aggregate {
                primary,
                suppressed,
            } => {
                let mut out = primary.causes();
                for s in suppressed {
                    out.extend(s.causes());
                }
                out
            }
            other => vec![other],
        }
    }

    /// Check whether this error is (or aggregates) a read-only violation
    pub fn is_read_only_violation(&self) -> bool {
        self.causes()
            .iter()
            .any(|e| matches!(e, StoreError::ReadOnlyViolation(_)))
    }
}

/// Error reported by a [`TrackedView`](crate::traits::TrackedView) implementation
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct ViewError(pub String);

impl ViewError {
    /// Create a view error from a message
    pub fn new(msg: impl Into<String>) -> Self {
        ViewError(msg.into())
    }
}

/// Error reported by a listener implementation
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct ListenerError(pub String);

impl ListenerError {
    /// Create a listener error from a message
    pub fn new(msg: impl Into<String>) -> Self {
        ListenerError(msg.into())
    }
}

impl From<StoreError> for ListenerError {
    fn from(e: StoreError) -> Self {
        ListenerError(e.to_string())
    }
}

/// Accumulates independent failures of one operation
///
/// The first pushed error becomes the primary one, later errors are
/// suppressed onto it.
#[derive(Debug, Default)]
pub struct ErrorCollector {
    errors: Vec<StoreError>,
}

impl ErrorCollector {
    /// Create an empty collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure
    pub fn push(&mut self, err: StoreError) {
        self.errors.push(err);
    }

    /// Record the error of a result, if any
    pub fn record(&mut self, result: Result<()>) {
        if let Err(e) = result {
            self.push(e);
        }
    }

    /// Number of failures recorded
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Check if no failure was recorded
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Collapse into `Ok(())`, the single error, or an aggregate
    pub fn into_result(self) -> Result<()> {
        let mut errors = self.errors.into_iter();
        match errors.next() {
            None => Ok(()),
            Some(primary) => {
                let suppressed: Vec<StoreError> = errors.collect();
                if suppressed.is_empty() {
                    Err(primary)
                } else {
                    Err(StoreError::Aggregate {
                        primary: Box::new(primary),
                        suppressed,
                    })
                }
            }
        }
    }
}

impl Extend<StoreError> for ErrorCollector {
    fn extend<I: IntoIterator<Item = StoreError>>(&mut self, iter: I) {
        for e in iter {
            match e {
                StoreError::Aggregate {
                    primary,
                    suppressed,
                } => {
                    self.errors.push(*primary);
                    self.errors.extend(suppressed);
                }
                other => self.errors.push(other),
            }
        }
    }
}
