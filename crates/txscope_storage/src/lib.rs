//! # txscope Storage
//!
//! Storage handle contract and implementations for txscope.
//!
//! This crate defines the lowest-level storage abstraction for the
//! transaction scope engine. A [`StorageHandle`] is one open connection to
//! a backing store. The engine drives the handle's physical transaction and
//! savepoint controls; it never interprets how the driver persists rows.
//!
//! ## Design Principles
//!
//! - A handle has at most one physical transaction open at a time
//! - Savepoint naming and ordering discipline live above this crate
//! - Handles must be `Send + Sync` so they can sit behind an `Arc`
//! - Row payloads are opaque bytes; drivers do not decode them
//!
//! ## Available Handles
//!
//! - [`InMemoryHandle`] - For testing and ephemeral storage
//!
//! ## Example
//!
//! ```rust
//! use txscope_storage::{InMemoryHandle, StorageHandle};
//!
//! let handle = InMemoryHandle::new();
//! handle.begin_transaction().unwrap();
//! handle.insert("accounts", "a1", b"{}").unwrap();
//! handle.rollback_transaction().unwrap();
//! assert_eq!(handle.count("accounts").unwrap(), 0);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod handle;
mod memory;

pub use error::{StorageError, StorageResult};
pub use handle::StorageHandle;
pub use memory::InMemoryHandle;
