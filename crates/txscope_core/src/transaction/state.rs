//! Transaction state and savepoint stack.

use crate::error::{CoreResult, TransactionError};

/// State of a transaction.
///
/// Transitions are monotone: `Active` moves to exactly one of the terminal
/// states and never back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Transaction is active and can perform operations.
    Active,
    /// Transaction has been committed.
    Committed,
    /// Transaction has been rolled back.
    RolledBack,
}

impl TransactionState {
    /// Returns `true` if the state is terminal.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::RolledBack)
    }
}

/// Ordered stack of savepoint names within one transaction.
///
/// Savepoints nest LIFO: only the innermost savepoint may be released or
/// rolled back to. Names are generated as `sp_<depth>` so they are unique
/// within the stack without coordination.
#[derive(Debug, Default)]
pub struct SavepointStack {
    names: Vec<String>,
}

impl SavepointStack {
    /// Creates an empty stack.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the name the next savepoint will get.
    #[must_use]
    pub fn next_name(&self) -> String {
        format!("sp_{}", self.names.len())
    }

    /// Pushes a savepoint name onto the stack.
    pub fn push(&mut self, name: String) {
        self.names.push(name);
    }

    /// Pops the innermost savepoint, checking it matches `name`.
    ///
    /// # Errors
    ///
    /// Returns [`TransactionError::SavepointOrderViolation`] if `name` is
    /// not the innermost savepoint.
    pub fn pop_expecting(&mut self, name: &str) -> CoreResult<()> {
        match self.names.last() {
            Some(top) if top == name => {
                self.names.pop();
                Ok(())
            }
            _ => Err(TransactionError::SavepointOrderViolation {
                name: name.to_string(),
            }
            .into()),
        }
    }

    /// Drains all savepoint names, innermost first.
    pub fn drain_lifo(&mut self) -> Vec<String> {
        let mut names = std::mem::take(&mut self.names);
        names.reverse();
        names
    }

    /// Returns the current nesting depth.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.names.len()
    }

    /// Removes all savepoints without releasing them at the driver.
    pub fn clear(&mut self) {
        self.names.clear();
    }
}
