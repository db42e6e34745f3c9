//! In-memory storage handle for testing.

use crate::error::{StorageError, StorageResult};
use crate::handle::StorageHandle;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::BTreeMap;

type Table = BTreeMap<String, Vec<u8>>;
type Image = BTreeMap<String, Table>;

/// A snapshot of the working state, tagged by savepoint name.
#[derive(Debug, Clone)]
struct Snapshot {
    name: String,
    tables: Image,
    journal: Vec<String>,
}

/// State of the open physical transaction, if any.
#[derive(Debug, Clone)]
struct OpenTransaction {
    /// Working image the transaction mutates.
    tables: Image,
    /// Working copy of the statement journal.
    journal: Vec<String>,
    /// Savepoint snapshots, oldest first.
    savepoints: Vec<Snapshot>,
}

#[derive(Debug, Default)]
struct MemoryState {
    /// Committed image.
    tables: Image,
    /// Committed raw-statement journal.
    journal: Vec<String>,
    /// Open transaction, if one has been begun and not yet resolved.
    txn: Option<OpenTransaction>,
    /// One-shot fault: next `commit_transaction` fails.
    fail_next_commit: bool,
    /// One-shot fault: next `rollback_transaction` fails.
    fail_next_rollback: bool,
    /// One-shot fault: next `rollback_to_savepoint` fails.
    fail_next_savepoint_rollback: bool,
}

/// An in-memory storage handle.
///
/// This handle keeps all data in memory and is suitable for unit tests,
/// integration tests, and ephemeral stores. It models the driver contract
/// faithfully enough to exercise the engine: a physical transaction is a
/// working copy of the committed image, savepoints are tagged snapshots of
/// that working copy, and raw statements land in a journal that rolls back
/// with the transaction.
///
/// # Fault Injection
///
/// Tests can arm one-shot faults with [`InMemoryHandle::fail_next_commit`]
/// and [`InMemoryHandle::fail_next_savepoint_rollback`] to exercise the
/// engine's disposal-time failure paths.
///
/// # Thread Safety
///
/// The handle is thread-safe and can be shared behind an `Arc`.
#[derive(Debug, Default)]
pub struct InMemoryHandle {
    state: Mutex<MemoryState>,
}

impl InMemoryHandle {
    /// Creates a new empty in-memory handle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms a one-shot fault: the next `commit_transaction` call fails.
    pub fn fail_next_commit(&self) {
        self.state.lock().fail_next_commit = true;
    }

    /// Arms a one-shot fault: the next `rollback_transaction` call fails.
    pub fn fail_next_rollback(&self) {
        self.state.lock().fail_next_rollback = true;
    }

    /// Arms a one-shot fault: the next `rollback_to_savepoint` call fails.
    pub fn fail_next_savepoint_rollback(&self) {
        self.state.lock().fail_next_savepoint_rollback = true;
    }

    /// Returns the committed raw-statement journal.
    ///
    /// Statements executed inside a rolled-back transaction never appear.
    #[must_use]
    pub fn journal(&self) -> Vec<String> {
        self.state.lock().journal.clone()
    }

    /// Returns the number of live savepoints in the open transaction.
    #[must_use]
    pub fn savepoint_depth(&self) -> usize {
        self.state
            .lock()
            .txn
            .as_ref()
            .map_or(0, |txn| txn.savepoints.len())
    }
}

impl MemoryState {
    /// The image row operations should act on: the transaction's working
    /// copy if one is open, otherwise the committed image.
    fn current_tables(&mut self) -> &mut Image {
        match self.txn.as_mut() {
            Some(txn) => &mut txn.tables,
            None => &mut self.tables,
        }
    }

    fn current_tables_ref(&self) -> &Image {
        match self.txn.as_ref() {
            Some(txn) => &txn.tables,
            None => &self.tables,
        }
    }

    fn savepoint_index(&self, name: &str) -> StorageResult<usize> {
        let txn = self.txn.as_ref().ok_or(StorageError::NoActiveTransaction)?;
        txn.savepoints
            .iter()
            .rposition(|sp| sp.name == name)
            .ok_or_else(|| StorageError::unknown_savepoint(name))
    }
}

impl StorageHandle for InMemoryHandle {
    fn begin_transaction(&self) -> StorageResult<()> {
        let mut state = self.state.lock();
        if state.txn.is_some() {
            return Err(StorageError::TransactionAlreadyOpen);
        }
        state.txn = Some(OpenTransaction {
            tables: state.tables.clone(),
            journal: state.journal.clone(),
            savepoints: Vec::new(),
        });
        Ok(())
    }

    fn commit_transaction(&self) -> StorageResult<()> {
        let mut state = self.state.lock();
        if state.txn.is_none() {
            return Err(StorageError::NoActiveTransaction);
        }
        if state.fail_next_commit {
            state.fail_next_commit = false;
            return Err(StorageError::driver("injected commit failure"));
        }
        let txn = state.txn.take().ok_or(StorageError::NoActiveTransaction)?;
        state.tables = txn.tables;
        state.journal = txn.journal;
        Ok(())
    }

    fn rollback_transaction(&self) -> StorageResult<()> {
        let mut state = self.state.lock();
        if state.txn.is_none() {
            return Err(StorageError::NoActiveTransaction);
        }
        if state.fail_next_rollback {
            state.fail_next_rollback = false;
            return Err(StorageError::driver("injected rollback failure"));
        }
        state.txn = None;
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.state.lock().txn.is_some()
    }

    fn create_savepoint(&self, name: &str) -> StorageResult<()> {
        let mut state = self.state.lock();
        let txn = state.txn.as_mut().ok_or(StorageError::NoActiveTransaction)?;
        let snapshot = Snapshot {
            name: name.to_string(),
            tables: txn.tables.clone(),
            journal: txn.journal.clone(),
        };
        txn.savepoints.push(snapshot);
        Ok(())
    }

    fn release_savepoint(&self, name: &str) -> StorageResult<()> {
        let mut state = self.state.lock();
        let index = state.savepoint_index(name)?;
        let txn = state.txn.as_mut().ok_or(StorageError::NoActiveTransaction)?;
        // Releasing discards the tag and everything nested inside it; the
        // changes made since remain in the working image.
        txn.savepoints.truncate(index);
        Ok(())
    }

    fn rollback_to_savepoint(&self, name: &str) -> StorageResult<()> {
        let mut state = self.state.lock();
        if state.fail_next_savepoint_rollback {
            state.fail_next_savepoint_rollback = false;
            return Err(StorageError::driver("injected savepoint rollback failure"));
        }
        let index = state.savepoint_index(name)?;
        let txn = state.txn.as_mut().ok_or(StorageError::NoActiveTransaction)?;
        let snapshot = &txn.savepoints[index];
        txn.tables = snapshot.tables.clone();
        txn.journal = snapshot.journal.clone();
        // The savepoint itself stays valid; deeper ones are gone.
        txn.savepoints.truncate(index + 1);
        Ok(())
    }

    fn insert(&self, table: &str, key: &str, payload: &[u8]) -> StorageResult<()> {
        let mut state = self.state.lock();
        let rows = state.current_tables().entry(table.to_string()).or_default();
        if rows.contains_key(key) {
            return Err(StorageError::driver(format!(
                "duplicate key {key:?} in table {table:?}"
            )));
        }
        rows.insert(key.to_string(), payload.to_vec());
        Ok(())
    }

    fn get(&self, table: &str, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let state = self.state.lock();
        Ok(state
            .current_tables_ref()
            .get(table)
            .and_then(|rows| rows.get(key))
            .cloned())
    }

    fn update(&self, table: &str, key: &str, payload: &[u8]) -> StorageResult<()> {
        let mut state = self.state.lock();
        let row = state
            .current_tables()
            .get_mut(table)
            .and_then(|rows| rows.get_mut(key))
            .ok_or_else(|| {
                StorageError::driver(format!("no row {key:?} in table {table:?}"))
            })?;
        *row = payload.to_vec();
        Ok(())
    }

    fn delete(&self, table: &str, key: &str) -> StorageResult<bool> {
        let mut state = self.state.lock();
        Ok(state
            .current_tables()
            .get_mut(table)
            .and_then(|rows| rows.remove(key))
            .is_some())
    }

    fn count(&self, table: &str) -> StorageResult<u64> {
        let state = self.state.lock();
        Ok(state
            .current_tables_ref()
            .get(table)
            .map_or(0, |rows| rows.len() as u64))
    }

    fn scan(&self, table: &str) -> StorageResult<Vec<(String, Vec<u8>)>> {
        let state = self.state.lock();
        Ok(state
            .current_tables_ref()
            .get(table)
            .map(|rows| {
                rows.iter()
                    .map(|(key, payload)| (key.clone(), payload.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    fn execute(&self, statement: &str, _params: &[Value]) -> StorageResult<u64> {
        let mut state = self.state.lock();
        match state.txn.as_mut() {
            Some(txn) => txn.journal.push(statement.to_string()),
            None => state.journal.push(statement.to_string()),
        }
        // The test double does not parse SQL, so no rows are affected.
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_commit_without_transaction() {
        let handle = InMemoryHandle::new();
        handle.insert("t", "k1", b"v1").unwrap();
        assert_eq!(handle.get("t", "k1").unwrap(), Some(b"v1".to_vec()));
        assert_eq!(handle.count("t").unwrap(), 1);
    }

    #[test]
    fn rollback_discards_writes() {
        let handle = InMemoryHandle::new();
        handle.insert("t", "base", b"v").unwrap();

        handle.begin_transaction().unwrap();
        handle.insert("t", "k1", b"v1").unwrap();
        assert_eq!(handle.count("t").unwrap(), 2);
        handle.rollback_transaction().unwrap();

        assert_eq!(handle.count("t").unwrap(), 1);
        assert!(handle.get("t", "k1").unwrap().is_none());
    }

    #[test]
    fn commit_promotes_writes() {
        let handle = InMemoryHandle::new();
        handle.begin_transaction().unwrap();
        handle.insert("t", "k1", b"v1").unwrap();
        handle.commit_transaction().unwrap();

        assert!(!handle.in_transaction());
        assert_eq!(handle.get("t", "k1").unwrap(), Some(b"v1".to_vec()));
    }

    #[test]
    fn double_begin_rejected() {
        let handle = InMemoryHandle::new();
        handle.begin_transaction().unwrap();
        assert!(matches!(
            handle.begin_transaction(),
            Err(StorageError::TransactionAlreadyOpen)
        ));
    }

    #[test]
    fn commit_without_transaction_rejected() {
        let handle = InMemoryHandle::new();
        assert!(matches!(
            handle.commit_transaction(),
            Err(StorageError::NoActiveTransaction)
        ));
    }

    #[test]
    fn savepoint_rollback_restores_snapshot() {
        let handle = InMemoryHandle::new();
        handle.begin_transaction().unwrap();
        handle.insert("t", "before", b"v").unwrap();

        handle.create_savepoint("sp_0").unwrap();
        handle.insert("t", "inside", b"v").unwrap();
        handle.rollback_to_savepoint("sp_0").unwrap();

        assert!(handle.get("t", "inside").unwrap().is_none());
        assert!(handle.get("t", "before").unwrap().is_some());
        // The savepoint survives a rollback-to.
        assert_eq!(handle.savepoint_depth(), 1);
    }

    #[test]
    fn release_keeps_changes() {
        let handle = InMemoryHandle::new();
        handle.begin_transaction().unwrap();
        handle.create_savepoint("sp_0").unwrap();
        handle.insert("t", "inside", b"v").unwrap();
        handle.release_savepoint("sp_0").unwrap();

        assert!(handle.get("t", "inside").unwrap().is_some());
        assert_eq!(handle.savepoint_depth(), 0);
    }

    #[test]
    fn release_discards_nested_savepoints() {
        let handle = InMemoryHandle::new();
        handle.begin_transaction().unwrap();
        handle.create_savepoint("sp_0").unwrap();
        handle.create_savepoint("sp_1").unwrap();
        handle.release_savepoint("sp_0").unwrap();

        assert_eq!(handle.savepoint_depth(), 0);
        assert!(matches!(
            handle.rollback_to_savepoint("sp_1"),
            Err(StorageError::UnknownSavepoint { .. })
        ));
    }

    #[test]
    fn unknown_savepoint_rejected() {
        let handle = InMemoryHandle::new();
        handle.begin_transaction().unwrap();
        assert!(matches!(
            handle.release_savepoint("nope"),
            Err(StorageError::UnknownSavepoint { .. })
        ));
    }

    #[test]
    fn journal_rolls_back_with_transaction() {
        let handle = InMemoryHandle::new();
        handle.execute("PRAGMA user_version = 1", &[]).unwrap();

        handle.begin_transaction().unwrap();
        handle.execute("DELETE FROM t", &[]).unwrap();
        handle.rollback_transaction().unwrap();

        assert_eq!(handle.journal(), vec!["PRAGMA user_version = 1"]);
    }

    #[test]
    fn injected_commit_failure_is_one_shot() {
        let handle = InMemoryHandle::new();
        handle.fail_next_commit();

        handle.begin_transaction().unwrap();
        assert!(handle.commit_transaction().is_err());
        // The transaction is still open; a retry succeeds.
        assert!(handle.in_transaction());
        handle.commit_transaction().unwrap();
    }

    #[test]
    fn injected_rollback_failure_is_one_shot() {
        let handle = InMemoryHandle::new();
        handle.fail_next_rollback();

        handle.begin_transaction().unwrap();
        assert!(handle.rollback_transaction().is_err());
        // The transaction is still open; a retry succeeds.
        assert!(handle.in_transaction());
        handle.rollback_transaction().unwrap();
    }

    #[test]
    fn update_missing_row_rejected() {
        let handle = InMemoryHandle::new();
        assert!(handle.update("t", "k", b"v").is_err());
    }

    #[test]
    fn duplicate_insert_rejected() {
        let handle = InMemoryHandle::new();
        handle.insert("t", "k", b"v").unwrap();
        assert!(handle.insert("t", "k", b"v").is_err());
    }

    #[test]
    fn scan_orders_by_key() {
        let handle = InMemoryHandle::new();
        handle.insert("t", "b", b"2").unwrap();
        handle.insert("t", "a", b"1").unwrap();
        let rows = handle.scan("t").unwrap();
        assert_eq!(rows[0].0, "a");
        assert_eq!(rows[1].0, "b");
    }
}
