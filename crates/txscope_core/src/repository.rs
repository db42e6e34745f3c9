//! Repository: data-access facade with ambient transaction resolution.

use crate::ambient::AmbientContext;
use crate::error::{CoreError, CoreResult, TransactionError};
use crate::scope::TransactionScope;
use crate::transaction::{SharedTransaction, Transaction};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use txscope_storage::{StorageHandle, StorageResult};

/// A row-mapped entity stored by a [`Repository`].
///
/// Entities serialize to JSON documents; the driver stores the bytes
/// without decoding them.
pub trait Entity: Serialize + DeserializeOwned {
    /// Table the entity's rows live in.
    const TABLE: &'static str;

    /// Primary key for this entity instance, unique within the table.
    fn key(&self) -> String;
}

/// Type-safe data access for one entity type over one connection.
///
/// Every operation accepts an optional explicit transaction. Resolution
/// order: the explicit argument, else the ambient transaction, else a
/// fresh auto-committing transaction spanning just that operation.
pub struct Repository<T: Entity> {
    handle: Arc<dyn StorageHandle>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Entity> Repository<T> {
    /// Creates a repository over a storage handle.
    pub fn new(handle: Arc<dyn StorageHandle>) -> Self {
        Self {
            handle,
            _marker: PhantomData,
        }
    }

    /// Returns the storage handle this repository owns.
    #[must_use]
    pub fn handle(&self) -> &Arc<dyn StorageHandle> {
        &self.handle
    }

    /// Begins an explicit transaction on this repository's connection.
    pub fn begin_transaction(&self) -> CoreResult<SharedTransaction> {
        Transaction::begin(Arc::clone(&self.handle))
    }

    /// Inserts an entity.
    pub fn create(&self, entity: &T, txn: Option<&SharedTransaction>) -> CoreResult<()> {
        let key = entity.key();
        let payload = serde_json::to_vec(entity)?;
        self.write_through(txn, |handle| handle.insert(T::TABLE, &key, &payload))
    }

    /// Reads an entity by key, or `None` if it does not exist.
    pub fn read(&self, key: &str, txn: Option<&SharedTransaction>) -> CoreResult<Option<T>> {
        let payload = self.read_through(txn, |handle| handle.get(T::TABLE, key))?;
        match payload {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Replaces an existing entity.
    pub fn update(&self, entity: &T, txn: Option<&SharedTransaction>) -> CoreResult<()> {
        let key = entity.key();
        let payload = serde_json::to_vec(entity)?;
        self.write_through(txn, |handle| handle.update(T::TABLE, &key, &payload))
    }

    /// Deletes an entity by key. Returns `true` if the row existed.
    pub fn delete(&self, key: &str, txn: Option<&SharedTransaction>) -> CoreResult<bool> {
        self.write_through(txn, |handle| handle.delete(T::TABLE, key))
    }

    /// Returns the number of rows in the entity's table.
    pub fn count(&self, txn: Option<&SharedTransaction>) -> CoreResult<u64> {
        self.read_through(txn, |handle| handle.count(T::TABLE))
    }

    /// Returns all entities in the table, ordered by key.
    pub fn scan_all(&self, txn: Option<&SharedTransaction>) -> CoreResult<Vec<T>> {
        let rows = self.read_through(txn, |handle| handle.scan(T::TABLE))?;
        let mut entities = Vec::with_capacity(rows.len());
        for (_, payload) in rows {
            entities.push(serde_json::from_slice(&payload)?);
        }
        Ok(entities)
    }

    /// Executes a raw statement with positional parameters.
    ///
    /// Returns the number of rows affected.
    pub fn execute_sql(
        &self,
        statement: &str,
        params: &[Value],
        txn: Option<&SharedTransaction>,
    ) -> CoreResult<u64> {
        self.write_through(txn, |handle| handle.execute(statement, params))
    }

    /// Runs `action` inside an owner transaction scope.
    ///
    /// The scope's transaction is ambient while `action` runs, so nested
    /// repository calls participate implicitly. A normal return completes
    /// and commits; a failure rolls back and propagates unchanged. If the
    /// rollback itself fails, both failures surface together.
    pub fn execute_in_transaction_scope<R, F>(&self, action: F) -> CoreResult<R>
    where
        F: FnOnce() -> CoreResult<R>,
    {
        let mut scope = TransactionScope::begin(self)?;
        match action() {
            Ok(value) => {
                scope.complete()?;
                scope.finish()?;
                Ok(value)
            }
            Err(err) => match scope.finish() {
                Ok(()) => Err(err),
                Err(teardown) => Err(CoreError::rollback_failed(teardown, err)),
            },
        }
    }

    /// Async variant of [`Repository::execute_in_transaction_scope`].
    ///
    /// The transaction is bound to the task-local ambient slot, so it
    /// flows across `.await` points with the task rather than the worker
    /// thread. Cancelling the returned future before completion rolls the
    /// transaction back, identically to a failed action.
    pub async fn execute_in_transaction_scope_async<R, F, Fut>(&self, action: F) -> CoreResult<R>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CoreResult<R>>,
    {
        if let Some(txn) = AmbientContext::current() {
            // Participant: the owner decides the physical outcome; a
            // failure here vetoes the commit.
            let result = AmbientContext::scope(Some(Arc::clone(&txn)), action()).await;
            if result.is_err() {
                txn.mark_rollback_only();
            }
            return result;
        }

        let txn = Transaction::begin(Arc::clone(&self.handle))?;
        let result = AmbientContext::scope(Some(Arc::clone(&txn)), action()).await;
        match result {
            Ok(value) => {
                if txn.is_rollback_only() {
                    txn.rollback()?;
                    return Err(TransactionError::RollbackOnly.into());
                }
                txn.commit()?;
                Ok(value)
            }
            Err(err) => match txn.rollback() {
                Ok(()) => Err(err),
                Err(rollback) => Err(CoreError::rollback_failed(rollback, err)),
            },
        }
    }

    /// Resolves the transaction an operation should run in.
    fn resolve(&self, txn: Option<&SharedTransaction>) -> Option<SharedTransaction> {
        txn.cloned().or_else(AmbientContext::current)
    }

    /// Runs a mutating driver operation in the resolved transaction, or in
    /// a fresh auto-committing one when none resolves.
    fn write_through<R>(
        &self,
        txn: Option<&SharedTransaction>,
        op: impl Fn(&dyn StorageHandle) -> StorageResult<R>,
    ) -> CoreResult<R> {
        match self.resolve(txn) {
            Some(txn) => {
                txn.ensure_active()?;
                Ok(op(self.handle.as_ref())?)
            }
            None => {
                let txn = Transaction::begin(Arc::clone(&self.handle))?;
                match op(self.handle.as_ref()) {
                    Ok(value) => {
                        txn.commit()?;
                        Ok(value)
                    }
                    Err(err) => match txn.rollback() {
                        Ok(()) => Err(err.into()),
                        Err(rollback) => Err(CoreError::rollback_failed(rollback, err.into())),
                    },
                }
            }
        }
    }

    /// Runs a read-only driver operation; reads outside a transaction go
    /// straight to the driver's committed state.
    fn read_through<R>(
        &self,
        txn: Option<&SharedTransaction>,
        op: impl Fn(&dyn StorageHandle) -> StorageResult<R>,
    ) -> CoreResult<R> {
        if let Some(txn) = self.resolve(txn) {
            txn.ensure_active()?;
        }
        Ok(op(self.handle.as_ref())?)
    }
}

impl<T: Entity> std::fmt::Debug for Repository<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("table", &T::TABLE)
            .finish_non_exhaustive()
    }
}
