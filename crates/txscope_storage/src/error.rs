//! Error types for storage operations.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur at the storage driver boundary.
///
/// These are connection- and driver-level failures, distinct from the
/// logical transaction errors raised by the engine above this crate.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The connection to the backing store failed.
    #[error("connection error: {0}")]
    Connection(String),

    /// The driver rejected or failed an operation.
    #[error("driver error: {0}")]
    Driver(String),

    /// A transactional operation was issued with no open transaction.
    #[error("no active transaction on this handle")]
    NoActiveTransaction,

    /// `begin_transaction` was called while a transaction is already open.
    #[error("a transaction is already open on this handle")]
    TransactionAlreadyOpen,

    /// A savepoint operation named a savepoint the driver does not know.
    #[error("unknown savepoint: {name}")]
    UnknownSavepoint {
        /// The savepoint name that was not found.
        name: String,
    },

    /// The handle has been closed.
    #[error("storage handle is closed")]
    Closed,
}

impl StorageError {
    /// Creates a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }

    /// Creates a driver error.
    pub fn driver(message: impl Into<String>) -> Self {
        Self::Driver(message.into())
    }

    /// Creates an unknown savepoint error.
    pub fn unknown_savepoint(name: impl Into<String>) -> Self {
        Self::UnknownSavepoint { name: name.into() }
    }
}
