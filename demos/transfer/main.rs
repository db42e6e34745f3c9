//! txscope demo - money transfer with nested scopes and savepoints
//!
//! This demo exercises the engine end to end:
//! - Repositories with ambient transaction resolution
//! - An owner scope spanning a multi-step transfer
//! - A savepoint that absorbs a failed bonus step without aborting the transfer
//! - A scope abandoned before `complete()` rolling everything back
//!
//! Run with: cargo run -p transfer_demo

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use txscope_core::{AmbientContext, CoreResult, Entity, Repository};
use txscope_storage::{InMemoryHandle, StorageError};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Account {
    id: String,
    owner: String,
    balance: i64,
}

impl Entity for Account {
    const TABLE: &'static str = "accounts";

    fn key(&self) -> String {
        self.id.clone()
    }
}

fn transfer(repo: &Repository<Account>, from: &str, to: &str, amount: i64) -> CoreResult<()> {
    repo.execute_in_transaction_scope(|| {
        let mut source = repo
            .read(from, None)?
            .ok_or_else(|| StorageError::driver(format!("no account {from}")))?;
        let mut target = repo
            .read(to, None)?
            .ok_or_else(|| StorageError::driver(format!("no account {to}")))?;

        if source.balance < amount {
            return Err(StorageError::driver("insufficient funds").into());
        }

        source.balance -= amount;
        target.balance += amount;
        repo.update(&source, None)?;
        repo.update(&target, None)?;

        // A best-effort bonus step runs under a savepoint: if it fails,
        // only its writes are undone and the transfer still commits.
        let txn = AmbientContext::current().expect("scope is ambient here");
        let bonus = txn.execute_with_savepoint(|| {
            let mut target = repo.read(to, None)?.expect("just updated");
            target.balance += 1;
            repo.update(&target, None)?;
            if amount >= 50 {
                return Err(StorageError::driver("bonus rejected for large transfers").into());
            }
            Ok(())
        });
        if let Err(err) = bonus {
            tracing::info!(%err, "bonus step rolled back, transfer continues");
        }

        Ok(())
    })
}

fn print_balances(repo: &Repository<Account>) -> CoreResult<()> {
    for account in repo.scan_all(None)? {
        println!("  {} ({}): {}", account.id, account.owner, account.balance);
    }
    Ok(())
}

fn main() -> CoreResult<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let handle = Arc::new(InMemoryHandle::new());
    let repo: Repository<Account> = Repository::new(handle);

    // Seed accounts with auto-committing single operations.
    repo.create(
        &Account {
            id: "acc_alice".into(),
            owner: "Alice".into(),
            balance: 100,
        },
        None,
    )?;
    repo.create(
        &Account {
            id: "acc_bob".into(),
            owner: "Bob".into(),
            balance: 20,
        },
        None,
    )?;

    println!("Initial balances:");
    print_balances(&repo)?;

    // Small transfer: the bonus savepoint succeeds.
    transfer(&repo, "acc_alice", "acc_bob", 30)?;
    println!("\nAfter transferring 30 (bonus applied):");
    print_balances(&repo)?;

    // Large transfer: the bonus savepoint fails and is rolled back, the
    // transfer itself still commits.
    transfer(&repo, "acc_alice", "acc_bob", 50)?;
    println!("\nAfter transferring 50 (bonus rolled back):");
    print_balances(&repo)?;

    // Overdraft: the whole scope rolls back, balances are untouched.
    match transfer(&repo, "acc_bob", "acc_alice", 1_000) {
        Ok(()) => unreachable!("overdraft must fail"),
        Err(err) => println!("\nOverdraft rejected as expected: {err}"),
    }
    print_balances(&repo)?;

    Ok(())
}
