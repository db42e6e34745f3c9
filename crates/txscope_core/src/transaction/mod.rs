//! Transaction lifecycle over a storage handle.
//!
//! A [`Transaction`] wraps one physical database transaction and carries
//! the savepoint stack that makes partial, independently-revocable
//! rollback possible. Transactions are shared as [`SharedTransaction`]
//! (`Arc`) so scopes, repositories, and the ambient slot can reference the
//! same instance.

mod state;

pub use state::{SavepointStack, TransactionState};

use crate::error::{CoreError, CoreResult, TransactionError};
use crate::types::TransactionId;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use txscope_storage::StorageHandle;

/// A transaction shared across scopes and repositories.
pub type SharedTransaction = Arc<Transaction>;

#[derive(Debug)]
struct TransactionInner {
    state: TransactionState,
    savepoints: SavepointStack,
    /// Set when a participant scope leaves without completing; vetoes the
    /// owner's commit.
    rollback_only: bool,
}

/// One physical database transaction with nested savepoints.
///
/// The state machine is `Active -> Committed` or `Active -> RolledBack`,
/// never reversed. `rollback` is idempotent once terminal so disposal
/// paths can call it unconditionally. A transaction dropped while still
/// active is implicitly rolled back.
pub struct Transaction {
    id: TransactionId,
    handle: Arc<dyn StorageHandle>,
    inner: Mutex<TransactionInner>,
}

impl Transaction {
    /// Begins a new transaction on the given handle.
    ///
    /// # Errors
    ///
    /// Returns [`TransactionError::AlreadyActive`] if the handle already
    /// has a physical transaction open outside this transaction's control.
    pub fn begin(handle: Arc<dyn StorageHandle>) -> CoreResult<SharedTransaction> {
        if handle.in_transaction() {
            return Err(TransactionError::AlreadyActive.into());
        }
        handle.begin_transaction()?;
        let id = TransactionId::next();
        tracing::debug!(%id, "transaction begun");
        Ok(Arc::new(Self {
            id,
            handle,
            inner: Mutex::new(TransactionInner {
                state: TransactionState::Active,
                savepoints: SavepointStack::new(),
                rollback_only: false,
            }),
        }))
    }

    /// Returns the transaction ID.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.inner.lock().state
    }

    /// Returns `true` if the transaction is still active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state() == TransactionState::Active
    }

    /// Returns the storage handle this transaction runs on.
    #[must_use]
    pub fn handle(&self) -> &Arc<dyn StorageHandle> {
        &self.handle
    }

    /// Errors with [`TransactionError::NotActive`] unless active.
    pub fn ensure_active(&self) -> CoreResult<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(TransactionError::NotActive.into())
        }
    }

    /// Marks the transaction so the owning scope rolls back instead of
    /// committing.
    pub fn mark_rollback_only(&self) {
        self.inner.lock().rollback_only = true;
    }

    /// Returns `true` if a participant scope vetoed the commit.
    #[must_use]
    pub fn is_rollback_only(&self) -> bool {
        self.inner.lock().rollback_only
    }

    /// Returns the current savepoint nesting depth.
    #[must_use]
    pub fn savepoint_depth(&self) -> usize {
        self.inner.lock().savepoints.depth()
    }

    /// Commits the transaction.
    ///
    /// Pending savepoints are implicitly released, innermost first, then
    /// the physical transaction commits.
    ///
    /// # Errors
    ///
    /// Returns [`TransactionError::NotActive`] if the transaction is
    /// already terminal, including second calls to `commit`.
    pub fn commit(&self) -> CoreResult<()> {
        let mut inner = self.inner.lock();
        if inner.state != TransactionState::Active {
            return Err(TransactionError::NotActive.into());
        }
        for name in inner.savepoints.drain_lifo() {
            self.handle.release_savepoint(&name)?;
        }
        self.handle.commit_transaction()?;
        inner.state = TransactionState::Committed;
        tracing::debug!(id = %self.id, "transaction committed");
        Ok(())
    }

    /// Rolls back the transaction.
    ///
    /// Unwinds the savepoint stack and rolls back physically. A no-op if
    /// the transaction is already terminal; disposal paths rely on this.
    pub fn rollback(&self) -> CoreResult<()> {
        let mut inner = self.inner.lock();
        if inner.state.is_terminal() {
            return Ok(());
        }
        inner.savepoints.clear();
        self.handle.rollback_transaction()?;
        inner.state = TransactionState::RolledBack;
        tracing::debug!(id = %self.id, "transaction rolled back");
        Ok(())
    }

    /// Runs `action` under a fresh savepoint.
    ///
    /// On success the savepoint is released and the changes stay in the
    /// transaction. On failure only the writes made inside `action` are
    /// undone, the original error is re-raised, and the transaction stays
    /// active.
    ///
    /// # Errors
    ///
    /// Re-raises the action's error unchanged. If the rollback to the
    /// savepoint itself fails, returns
    /// [`CoreError::SavepointRollbackFailed`] carrying the original error
    /// as its source.
    pub fn execute_with_savepoint<T, F>(&self, action: F) -> CoreResult<T>
    where
        F: FnOnce() -> CoreResult<T>,
    {
        let name = self.push_savepoint()?;
        let result = action();
        self.resolve_savepoint(&name, result)
    }

    /// Async variant of [`Transaction::execute_with_savepoint`].
    ///
    /// If the returned future is dropped before completion (cancellation),
    /// the savepoint is rolled back, identically to a failed action.
    pub async fn execute_with_savepoint_async<T, F, Fut>(&self, action: F) -> CoreResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CoreResult<T>>,
    {
        let name = self.push_savepoint()?;
        let mut guard = SavepointGuard {
            txn: self,
            name: name.clone(),
            armed: true,
        };
        let result = action().await;
        guard.armed = false;
        drop(guard);
        self.resolve_savepoint(&name, result)
    }

    /// Creates the next savepoint and pushes it onto the stack.
    fn push_savepoint(&self) -> CoreResult<String> {
        let mut inner = self.inner.lock();
        if inner.state != TransactionState::Active {
            return Err(TransactionError::NotActive.into());
        }
        let name = inner.savepoints.next_name();
        self.handle.create_savepoint(&name)?;
        inner.savepoints.push(name.clone());
        tracing::debug!(id = %self.id, savepoint = %name, "savepoint created");
        Ok(name)
    }

    fn resolve_savepoint<T>(&self, name: &str, result: CoreResult<T>) -> CoreResult<T> {
        match result {
            Ok(value) => {
                self.release_savepoint(name)?;
                Ok(value)
            }
            Err(err) => match self.rollback_to_savepoint(name) {
                Ok(()) => Err(err),
                Err(rollback) => Err(CoreError::savepoint_rollback_failed(rollback, err)),
            },
        }
    }

    /// Releases the innermost savepoint, keeping its writes.
    fn release_savepoint(&self, name: &str) -> CoreResult<()> {
        let mut inner = self.inner.lock();
        inner.savepoints.pop_expecting(name)?;
        self.handle.release_savepoint(name)?;
        tracing::debug!(id = %self.id, savepoint = %name, "savepoint released");
        Ok(())
    }

    /// Rolls back to the innermost savepoint, undoing its writes.
    ///
    /// The savepoint leaves the logical stack; the physical savepoint is
    /// left un-released, which the driver contract permits.
    fn rollback_to_savepoint(&self, name: &str) -> CoreResult<()> {
        let mut inner = self.inner.lock();
        inner.savepoints.pop_expecting(name)?;
        self.handle.rollback_to_savepoint(name)?;
        tracing::debug!(id = %self.id, savepoint = %name, "rolled back to savepoint");
        Ok(())
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        if inner.state == TransactionState::Active {
            inner.savepoints.clear();
            inner.state = TransactionState::RolledBack;
            match self.handle.rollback_transaction() {
                Ok(()) => {
                    tracing::warn!(id = %self.id, "transaction dropped while active; rolled back");
                }
                Err(err) => {
                    tracing::error!(id = %self.id, %err, "implicit rollback on drop failed");
                }
            }
        }
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("savepoint_depth", &self.savepoint_depth())
            .finish_non_exhaustive()
    }
}

struct SavepointGuard<'a> {
    txn: &'a Transaction,
    name: String,
    armed: bool,
}

impl Drop for SavepointGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            match self.txn.rollback_to_savepoint(&self.name) {
                Ok(()) => tracing::warn!(
                    id = %self.txn.id,
                    savepoint = %self.name,
                    "savepoint rolled back after cancellation"
                ),
                Err(err) => tracing::error!(
                    id = %self.txn.id,
                    savepoint = %self.name,
                    %err,
                    "savepoint rollback after cancellation failed"
                ),
            }
        }
    }
}
