//! Ambient transaction slot for the current logical call chain.
//!
//! Data-access calls that omit an explicit transaction participate in the
//! value held here. The slot follows the call chain, not the process:
//! synchronous chains use a thread-local, and async chains bind a
//! task-local slot that travels with the task across `.await` points, so
//! unrelated operations interleaved on the same worker thread never see
//! each other's transaction.

use crate::transaction::SharedTransaction;
use std::cell::RefCell;
use std::future::Future;

thread_local! {
    static THREAD_SLOT: RefCell<Option<SharedTransaction>> = const { RefCell::new(None) };
}

tokio::task_local! {
    static TASK_SLOT: RefCell<Option<SharedTransaction>>;
}

/// The "current transaction" slot for the logical call chain.
///
/// The slot is mutated only by [`AmbientContext::set`]; restoration of the
/// previous value is centralized in `TransactionScope` teardown so the
/// slot can never dangle past a scope's lifetime.
pub struct AmbientContext;

impl AmbientContext {
    /// Returns the current ambient transaction, if any.
    #[must_use]
    pub fn current() -> Option<SharedTransaction> {
        match TASK_SLOT.try_with(|slot| slot.borrow().clone()) {
            Ok(current) => current,
            Err(_) => THREAD_SLOT.with(|slot| slot.borrow().clone()),
        }
    }

    /// Replaces the slot's value, returning the previous one.
    ///
    /// Callers must restore the returned value when they are done; the
    /// scope types do this on every exit path.
    pub fn set(txn: Option<SharedTransaction>) -> Option<SharedTransaction> {
        match TASK_SLOT.try_with(|slot| slot.replace(txn.clone())) {
            Ok(previous) => previous,
            Err(_) => THREAD_SLOT.with(|slot| slot.replace(txn)),
        }
    }

    /// Runs a future with the task-local slot bound to `txn`.
    ///
    /// The binding travels with the future across `.await` points and is
    /// torn down when the future completes or is dropped.
    pub async fn scope<F>(txn: Option<SharedTransaction>, future: F) -> F::Output
    where
        F: Future,
    {
        TASK_SLOT.scope(RefCell::new(txn), future).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::Transaction;
    use std::sync::Arc;
    use txscope_storage::InMemoryHandle;

    fn begin() -> SharedTransaction {
        Transaction::begin(Arc::new(InMemoryHandle::new())).unwrap()
    }

    #[test]
    fn set_returns_previous() {
        assert!(AmbientContext::current().is_none());

        let txn = begin();
        let prev = AmbientContext::set(Some(Arc::clone(&txn)));
        assert!(prev.is_none());
        assert_eq!(
            AmbientContext::current().map(|t| t.id()),
            Some(txn.id())
        );

        let prev = AmbientContext::set(None);
        assert_eq!(prev.map(|t| t.id()), Some(txn.id()));
        assert!(AmbientContext::current().is_none());
        txn.rollback().unwrap();
    }

    #[test]
    fn slot_is_per_thread() {
        let txn = begin();
        let prev = AmbientContext::set(Some(Arc::clone(&txn)));

        std::thread::spawn(|| {
            assert!(AmbientContext::current().is_none());
        })
        .join()
        .unwrap();

        AmbientContext::set(prev);
        txn.rollback().unwrap();
    }

    #[tokio::test]
    async fn task_slot_flows_across_await() {
        let txn = begin();
        let id = txn.id();

        AmbientContext::scope(Some(txn), async move {
            assert_eq!(AmbientContext::current().map(|t| t.id()), Some(id));
            tokio::task::yield_now().await;
            // Still visible after resuming, wherever we resumed.
            assert_eq!(AmbientContext::current().map(|t| t.id()), Some(id));
        })
        .await;

        assert!(AmbientContext::current().is_none());
    }

    #[tokio::test]
    async fn sibling_tasks_do_not_leak() {
        let txn = begin();
        let scoped = AmbientContext::scope(Some(txn), async {
            tokio::task::yield_now().await;
        });
        let sibling = async {
            assert!(AmbientContext::current().is_none());
        };
        tokio::join!(scoped, sibling);
    }
}
