//! # txscope Core
//!
//! Ambient transaction scope engine.
//!
//! This crate lets arbitrarily nested blocks of data-access code share one
//! underlying database transaction. Inner blocks can take partial,
//! independently-revocable checkpoints (savepoints) without aborting the
//! outer transaction, and code can participate in "the current
//! transaction" without a transaction handle threaded through every call.
//!
//! ## Components
//!
//! - [`Transaction`] - one physical transaction with nested savepoints
//! - [`AmbientContext`] - per-call-chain slot holding the current transaction
//! - [`TransactionScope`] - scoped ambient publication, commit-on-complete
//! - [`Repository`] - data-access facade with ambient resolution
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use serde::{Deserialize, Serialize};
//! use txscope_core::{Entity, Repository};
//! use txscope_storage::InMemoryHandle;
//!
//! #[derive(Serialize, Deserialize)]
//! struct Account { id: String, balance: i64 }
//!
//! impl Entity for Account {
//!     const TABLE: &'static str = "accounts";
//!     fn key(&self) -> String { self.id.clone() }
//! }
//!
//! let repo: Repository<Account> = Repository::new(Arc::new(InMemoryHandle::new()));
//! repo.execute_in_transaction_scope(|| {
//!     repo.create(&Account { id: "a1".into(), balance: 100 }, None)?;
//!     repo.create(&Account { id: "a2".into(), balance: 200 }, None)?;
//!     Ok(())
//! }).unwrap();
//! assert_eq!(repo.count(None).unwrap(), 2);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod ambient;
mod error;
mod repository;
mod scope;
mod transaction;
mod types;

pub use ambient::AmbientContext;
pub use error::{CoreError, CoreResult, ScopeError, TransactionError};
pub use repository::{Entity, Repository};
pub use scope::{ScopeMode, TransactionScope};
pub use transaction::{SavepointStack, SharedTransaction, Transaction, TransactionState};
pub use types::TransactionId;
