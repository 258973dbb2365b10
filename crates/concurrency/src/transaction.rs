//! Transaction lifecycle state machine
//!
//! State transitions:
//! - `Active` → `Committing` (begin commit)
//! - `Committing` → `Committed` (all stores merged)
//! - `Active` | `Committing` → `RollingBack` (user rollback, or failed prepare)
//! - `RollingBack` → `RolledBack`
//!
//! Terminal states (no transitions allowed):
//! - `Committed`
//! - `RolledBack`
//!
//! `Committing` and `RollingBack` are not re-entrant: starting a commit
//! while the same transaction is committing is a recursive commit.

use std::fmt;
use txstore_core::{Result, StoreError, TransactionHandle};

/// Status of a transaction in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    /// Transaction is executing, can read/write
    Active,
    /// Commit protocol is running
    Committing,
    /// All stores merged
    Committed,
    /// Rollback is running
    RollingBack,
    /// Transaction views were discarded
    RolledBack,
}

impl TransactionStatus {
    /// Check if the transaction accepts reads and writes
    pub fn is_active(&self) -> bool {
        matches!(self, TransactionStatus::Active)
    }

    /// Check if no further transition is possible
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Committed | TransactionStatus::RolledBack
        )
    }

    /// `Active` → `Committing`
    ///
    /// # Errors
    ///
    /// [`StoreError::RecursiveCommit`] if the transaction is already
    /// committing, [`StoreError::InvalidState`] for any other state.
    pub fn begin_commit(&mut self, tx: &TransactionHandle) -> Result<()> {
        match self {
            TransactionStatus::Active => {
                *self = TransactionStatus::Committing;
                Ok(())
            }
            TransactionStatus::Committing => Err(StoreError::RecursiveCommit {
                scope: "container".to_string(),
                tx: tx.to_string(),
            }),
            other => Err(StoreError::InvalidState(format!(
                "cannot commit {} in state {}",
                tx, other
            ))),
        }
    }

    /// `Committing` → `Committed`
    pub fn finish_commit(&mut self, tx: &TransactionHandle) -> Result<()> {
        self.transition(tx, TransactionStatus::Committing, TransactionStatus::Committed)
    }

    /// `Active` | `Committing` → `RollingBack`
    pub fn begin_rollback(&mut self, tx: &TransactionHandle) -> Result<()> {
        match self {
            TransactionStatus::Active | TransactionStatus::Committing => {
                *self = TransactionStatus::RollingBack;
                Ok(())
            }
            other => Err(StoreError::InvalidState(format!(
                "cannot roll back {} in state {}",
                tx, other
            ))),
        }
    }

    /// `RollingBack` → `RolledBack`
    pub fn finish_rollback(&mut self, tx: &TransactionHandle) -> Result<()> {
        self.transition(tx, TransactionStatus::RollingBack, TransactionStatus::RolledBack)
    }

    fn transition(
        &mut self,
        tx: &TransactionHandle,
        from: TransactionStatus,
        to: TransactionStatus,
    ) -> Result<()> {
        if *self != from {
            return Err(StoreError::InvalidState(format!(
                "{} expected state {} but is {}",
                tx, from, self
            )));
        }
        *self = to;
        Ok(())
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransactionStatus::Active => "ACTIVE",
            TransactionStatus::Committing => "COMMITTING",
            TransactionStatus::Committed => "COMMITTED",
            TransactionStatus::RollingBack => "ROLLING_BACK",
            TransactionStatus::RolledBack => "ROLLED_BACK",
        };
        f.write_str(s)
    }
}
