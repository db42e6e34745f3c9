//! Error types for the transaction scope engine.

use thiserror::Error;
use txscope_storage::StorageError;

/// Result type for engine operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Logical transaction errors.
///
/// These indicate misuse of the transaction lifecycle and are never
/// silently swallowed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransactionError {
    /// A transaction was begun on a handle that already has one open.
    #[error("a transaction is already active on this handle")]
    AlreadyActive,

    /// An operation requires an active transaction but the transaction is
    /// already committed or rolled back.
    #[error("transaction is not active")]
    NotActive,

    /// A savepoint was released or rolled back out of LIFO order.
    #[error("savepoint order violation: {name}")]
    SavepointOrderViolation {
        /// The savepoint that broke the stack discipline.
        name: String,
    },

    /// A participant scope left the transaction without completing, so the
    /// owner's commit was vetoed and the transaction rolled back instead.
    #[error("transaction was marked rollback-only by an uncompleted participant scope")]
    RollbackOnly,
}

/// Errors raised by transaction scopes.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScopeError {
    /// `complete` was called more than once on the same scope.
    #[error("scope already completed")]
    AlreadyCompleted,

    /// A participant scope was requested but no ambient transaction exists.
    #[error("no ambient transaction to join")]
    NoAmbientTransaction,
}

/// Errors that can occur in engine operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage driver error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Logical transaction error.
    #[error("transaction error: {0}")]
    Transaction(#[from] TransactionError),

    /// Scope lifecycle error.
    #[error("scope error: {0}")]
    Scope(#[from] ScopeError),

    /// Entity encoding or decoding failed.
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// Rolling back to a savepoint failed while handling an earlier
    /// failure. The original failure is preserved as the source.
    #[error("savepoint rollback failed ({rollback}) while handling an earlier failure")]
    SavepointRollbackFailed {
        /// The failure reported by the rollback itself.
        rollback: Box<CoreError>,
        /// The original failure that triggered the rollback.
        source: Box<CoreError>,
    },

    /// Rolling back the transaction failed while handling an earlier
    /// failure. The original failure is preserved as the source.
    #[error("rollback failed ({rollback}) while handling an earlier failure")]
    RollbackFailed {
        /// The failure reported by the rollback itself.
        rollback: Box<CoreError>,
        /// The original failure that triggered the rollback.
        source: Box<CoreError>,
    },

    /// The commit at scope disposal failed. A deferred rollback was
    /// attempted; its outcome is carried alongside.
    #[error("commit failed during scope disposal: {commit}")]
    CommitFailed {
        /// The failure reported by the commit.
        commit: Box<CoreError>,
        /// The failure reported by the deferred rollback, if it also failed.
        rollback: Option<Box<CoreError>>,
    },
}

impl CoreError {
    /// Creates a savepoint rollback failure wrapping the original cause.
    pub fn savepoint_rollback_failed(rollback: CoreError, source: CoreError) -> Self {
        Self::SavepointRollbackFailed {
            rollback: Box::new(rollback),
            source: Box::new(source),
        }
    }

    /// Creates a rollback failure wrapping the original cause.
    pub fn rollback_failed(rollback: CoreError, source: CoreError) -> Self {
        Self::RollbackFailed {
            rollback: Box::new(rollback),
            source: Box::new(source),
        }
    }

    /// Creates a disposal-time commit failure.
    pub fn commit_failed(commit: CoreError, rollback: Option<CoreError>) -> Self {
        Self::CommitFailed {
            commit: Box::new(commit),
            rollback: rollback.map(Box::new),
        }
    }
}
