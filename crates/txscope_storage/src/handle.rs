//! Storage handle trait definition.

use crate::error::StorageResult;
use serde_json::Value;

/// A single open connection to the backing store.
///
/// The transaction scope engine calls through this trait for physical
/// transaction control, savepoint control, and row access. Handles are
/// **opaque row stores**: payloads are byte slices the driver persists
/// without decoding.
///
/// # Invariants
///
/// - At most one physical transaction is open on a handle at a time
/// - Writes issued inside an open transaction become visible on commit
/// - With no open transaction, each row operation auto-commits
/// - `rollback_to_savepoint` keeps the savepoint itself alive, matching
///   SQLite `ROLLBACK TO` semantics; `release_savepoint` discards the
///   savepoint and everything nested inside it while keeping the changes
///
/// # Implementors
///
/// - [`super::InMemoryHandle`] - For testing and ephemeral storage
pub trait StorageHandle: Send + Sync {
    /// Opens a physical transaction on this connection.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::TransactionAlreadyOpen`] if a
    /// transaction is already open.
    fn begin_transaction(&self) -> StorageResult<()>;

    /// Commits the open physical transaction.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::NoActiveTransaction`] if none is open.
    fn commit_transaction(&self) -> StorageResult<()>;

    /// Rolls back the open physical transaction, discarding its writes.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::NoActiveTransaction`] if none is open.
    fn rollback_transaction(&self) -> StorageResult<()>;

    /// Returns `true` if a physical transaction is open on this handle.
    fn in_transaction(&self) -> bool;

    /// Creates a named savepoint inside the open transaction.
    fn create_savepoint(&self, name: &str) -> StorageResult<()>;

    /// Releases a savepoint, keeping the changes made since it was created.
    ///
    /// Savepoints nested inside `name` are released with it.
    fn release_savepoint(&self, name: &str) -> StorageResult<()>;

    /// Rolls back to a savepoint, undoing changes made since it was created.
    ///
    /// The savepoint itself remains valid afterwards.
    fn rollback_to_savepoint(&self, name: &str) -> StorageResult<()>;

    /// Inserts a row.
    ///
    /// # Errors
    ///
    /// Returns a driver error if the key already exists in `table`.
    fn insert(&self, table: &str, key: &str, payload: &[u8]) -> StorageResult<()>;

    /// Reads a row, or `None` if it does not exist.
    fn get(&self, table: &str, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Replaces an existing row.
    ///
    /// # Errors
    ///
    /// Returns a driver error if the key does not exist in `table`.
    fn update(&self, table: &str, key: &str, payload: &[u8]) -> StorageResult<()>;

    /// Deletes a row. Returns `true` if the row existed.
    fn delete(&self, table: &str, key: &str) -> StorageResult<bool>;

    /// Returns the number of rows in a table.
    fn count(&self, table: &str) -> StorageResult<u64>;

    /// Returns all rows in a table, ordered by key.
    fn scan(&self, table: &str) -> StorageResult<Vec<(String, Vec<u8>)>>;

    /// Executes a raw statement with positional parameters.
    ///
    /// Returns the number of rows affected.
    fn execute(&self, statement: &str, params: &[Value]) -> StorageResult<u64>;
}
