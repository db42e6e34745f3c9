//! Transaction scopes: scoped ambient publication with commit-on-complete.
//!
//! A [`TransactionScope`] publishes a transaction to the ambient slot for
//! its lifetime and decides commit-vs-rollback when it ends. The scope
//! that begins the transaction is its **owner** and holds sole authority
//! over the physical outcome; scopes that join an existing transaction are
//! **participants** whose only power is the veto: leaving without
//! completing marks the transaction rollback-only.

use crate::ambient::AmbientContext;
use crate::error::{CoreError, CoreResult, ScopeError, TransactionError};
use crate::repository::{Entity, Repository};
use crate::transaction::{SharedTransaction, Transaction};
use std::sync::Arc;

/// Whether a scope owns its transaction's outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeMode {
    /// This scope created the transaction and decides commit or rollback.
    Owner,
    /// This scope joined an existing transaction and defers to the owner.
    Participant,
}

/// A scoped handle over a transaction with ambient publication.
///
/// Teardown runs on every exit path: [`TransactionScope::finish`] runs it
/// with error propagation, and `Drop` runs it as a safety net for early
/// returns, panics, and cancellation, logging any physical failure. Either
/// way the ambient slot is restored to the value captured at creation.
///
/// Commit happens only if every scope over the transaction called
/// [`TransactionScope::complete`]; an uncompleted or failed scope anywhere
/// in the chain forces rollback of the whole transaction.
#[derive(Debug)]
pub struct TransactionScope {
    txn: SharedTransaction,
    mode: ScopeMode,
    completed: bool,
    finished: bool,
    prev: Option<SharedTransaction>,
}

impl TransactionScope {
    /// Opens a scope for a repository's connection.
    ///
    /// With no ambient transaction, a new one is begun and this scope
    /// becomes its owner. With an ambient transaction present, the scope
    /// joins it as a participant and no new physical transaction starts.
    pub fn begin<E: Entity>(repository: &Repository<E>) -> CoreResult<Self> {
        match AmbientContext::current() {
            Some(txn) => Ok(Self::participant(txn)),
            None => {
                let txn = Transaction::begin(Arc::clone(repository.handle()))?;
                let prev = AmbientContext::set(Some(Arc::clone(&txn)));
                tracing::debug!(id = %txn.id(), "owner scope opened");
                Ok(Self {
                    txn,
                    mode: ScopeMode::Owner,
                    completed: false,
                    finished: false,
                    prev,
                })
            }
        }
    }

    /// Opens a participant scope over an explicit transaction.
    ///
    /// The transaction is published ambiently for the scope's lifetime,
    /// which is how intentionally nested ambient sub-scopes are built.
    #[must_use]
    pub fn join(txn: SharedTransaction) -> Self {
        Self::participant(txn)
    }

    /// Opens a participant scope over the current ambient transaction.
    ///
    /// # Errors
    ///
    /// Returns [`ScopeError::NoAmbientTransaction`] if none exists.
    pub fn join_ambient() -> CoreResult<Self> {
        match AmbientContext::current() {
            Some(txn) => Ok(Self::participant(txn)),
            None => Err(ScopeError::NoAmbientTransaction.into()),
        }
    }

    fn participant(txn: SharedTransaction) -> Self {
        let prev = AmbientContext::set(Some(Arc::clone(&txn)));
        tracing::debug!(id = %txn.id(), "participant scope opened");
        Self {
            txn,
            mode: ScopeMode::Participant,
            completed: false,
            finished: false,
            prev,
        }
    }

    /// Returns the transaction this scope governs.
    #[must_use]
    pub fn transaction(&self) -> &SharedTransaction {
        &self.txn
    }

    /// Returns whether this scope is the owner or a participant.
    #[must_use]
    pub fn mode(&self) -> ScopeMode {
        self.mode
    }

    /// Returns `true` once `complete` has been called.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// Marks the scope as completed.
    ///
    /// Has no physical effect until teardown.
    ///
    /// # Errors
    ///
    /// Returns [`ScopeError::AlreadyCompleted`] on a second call.
    pub fn complete(&mut self) -> CoreResult<()> {
        if self.completed {
            return Err(ScopeError::AlreadyCompleted.into());
        }
        self.completed = true;
        Ok(())
    }

    /// Tears the scope down, propagating any physical failure.
    ///
    /// Restores the ambient slot, then, for the owner only, commits if the
    /// scope completed and no participant vetoed, and rolls back
    /// otherwise. A failed commit triggers a deferred rollback attempt and
    /// surfaces as [`CoreError::CommitFailed`].
    pub fn finish(mut self) -> CoreResult<()> {
        self.teardown()
    }

    fn teardown(&mut self) -> CoreResult<()> {
        self.finished = true;
        AmbientContext::set(self.prev.take());

        match self.mode {
            ScopeMode::Participant => {
                if !self.completed {
                    self.txn.mark_rollback_only();
                    tracing::debug!(
                        id = %self.txn.id(),
                        "participant scope left incomplete; transaction marked rollback-only"
                    );
                }
                Ok(())
            }
            ScopeMode::Owner => {
                if !self.completed {
                    tracing::warn!(id = %self.txn.id(), "owner scope left incomplete; rolling back");
                    return self.txn.rollback();
                }
                if self.txn.is_rollback_only() {
                    self.txn.rollback()?;
                    return Err(TransactionError::RollbackOnly.into());
                }
                match self.txn.commit() {
                    Ok(()) => Ok(()),
                    Err(commit) => {
                        let rollback = self.txn.rollback().err();
                        Err(CoreError::commit_failed(commit, rollback))
                    }
                }
            }
        }
    }
}

impl Drop for TransactionScope {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(err) = self.teardown() {
                tracing::error!(id = %self.txn.id(), %err, "scope teardown failed during drop");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use txscope_storage::{InMemoryHandle, StorageHandle};

    #[derive(Debug, Serialize, Deserialize)]
    struct Row {
        key: String,
    }

    impl Entity for Row {
        const TABLE: &'static str = "rows";

        fn key(&self) -> String {
            self.key.clone()
        }
    }

    fn repository() -> (Arc<InMemoryHandle>, Repository<Row>) {
        let handle = Arc::new(InMemoryHandle::new());
        let repo = Repository::new(handle.clone());
        (handle, repo)
    }

    #[test]
    fn first_scope_is_owner() {
        let (_handle, repo) = repository();
        let mut scope = TransactionScope::begin(&repo).unwrap();
        assert_eq!(scope.mode(), ScopeMode::Owner);
        assert!(AmbientContext::current().is_some());

        scope.complete().unwrap();
        scope.finish().unwrap();
        assert!(AmbientContext::current().is_none());
    }

    #[test]
    fn nested_scope_is_participant() {
        let (_handle, repo) = repository();
        let outer = TransactionScope::begin(&repo).unwrap();
        let outer_id = outer.transaction().id();

        {
            let mut inner = TransactionScope::begin(&repo).unwrap();
            assert_eq!(inner.mode(), ScopeMode::Participant);
            assert_eq!(inner.transaction().id(), outer_id);
            inner.complete().unwrap();
            inner.finish().unwrap();
        }

        // Ambient restored to the outer scope's transaction.
        assert_eq!(
            AmbientContext::current().map(|t| t.id()),
            Some(outer_id)
        );
        drop(outer);
        assert!(AmbientContext::current().is_none());
    }

    #[test]
    fn complete_twice_is_an_error() {
        let (_handle, repo) = repository();
        let mut scope = TransactionScope::begin(&repo).unwrap();
        scope.complete().unwrap();
        let err = scope.complete().unwrap_err();
        assert!(matches!(err, CoreError::Scope(ScopeError::AlreadyCompleted)));
        scope.finish().unwrap();
    }

    #[test]
    fn drop_without_complete_rolls_back() {
        let (handle, repo) = repository();
        {
            let scope = TransactionScope::begin(&repo).unwrap();
            handle.insert("rows", "k", b"{}").unwrap();
            drop(scope);
        }
        assert_eq!(handle.count("rows").unwrap(), 0);
        assert!(!handle.in_transaction());
    }

    #[test]
    fn join_ambient_requires_ambient() {
        let err = TransactionScope::join_ambient().unwrap_err();
        assert!(matches!(
            err,
            CoreError::Scope(ScopeError::NoAmbientTransaction)
        ));
    }

    #[test]
    fn participant_cannot_commit_physically() {
        let (handle, repo) = repository();
        let mut owner = TransactionScope::begin(&repo).unwrap();
        handle.insert("rows", "k", b"{}").unwrap();

        let mut participant = TransactionScope::join(Arc::clone(owner.transaction()));
        participant.complete().unwrap();
        participant.finish().unwrap();
        // The participant's completion committed nothing.
        assert!(handle.in_transaction());

        owner.complete().unwrap();
        owner.finish().unwrap();
        assert_eq!(handle.count("rows").unwrap(), 1);
    }

    #[test]
    fn incomplete_participant_vetoes_commit() {
        let (handle, repo) = repository();
        let mut owner = TransactionScope::begin(&repo).unwrap();
        handle.insert("rows", "k", b"{}").unwrap();

        {
            let participant = TransactionScope::join(Arc::clone(owner.transaction()));
            // Dropped without complete().
            drop(participant);
        }

        owner.complete().unwrap();
        let err = owner.finish().unwrap_err();
        assert!(matches!(
            err,
            CoreError::Transaction(TransactionError::RollbackOnly)
        ));
        assert_eq!(handle.count("rows").unwrap(), 0);
    }

    #[test]
    fn rollback_failure_at_disposal_surfaces() {
        let (handle, repo) = repository();
        let scope = TransactionScope::begin(&repo).unwrap();
        handle.insert("rows", "k", b"{}").unwrap();

        handle.fail_next_rollback();
        // Uncompleted owner: disposal rolls back, and the failure is fatal
        // rather than swallowed.
        let err = scope.finish().unwrap_err();
        assert!(matches!(err, CoreError::Storage(_)));

        // Dropping the transaction retried the rollback and cleaned up.
        assert!(!handle.in_transaction());
        assert_eq!(handle.count("rows").unwrap(), 0);
    }

    #[test]
    fn commit_failure_surfaces_with_deferred_rollback() {
        let (handle, repo) = repository();
        let mut scope = TransactionScope::begin(&repo).unwrap();
        handle.insert("rows", "k", b"{}").unwrap();
        scope.complete().unwrap();

        handle.fail_next_commit();
        let err = scope.finish().unwrap_err();
        match err {
            CoreError::CommitFailed { rollback, .. } => {
                // The deferred rollback succeeded.
                assert!(rollback.is_none());
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!handle.in_transaction());
        assert_eq!(handle.count("rows").unwrap(), 0);
    }
}
