// ABOUTME: Local relational store seam used by the sync engine
// ABOUTME: Transactions plus reusable prepared statements with positional bindings

pub mod sqlite;

pub use sqlite::{SqliteStatement, SqliteStore};

use crate::error::SyncError;

/// The local mirror a run writes into.
///
/// A run owns the store exclusively between `begin` and `commit`/`rollback`;
/// callers serialise runs.
pub trait LocalStore: Send {
    type Statement<'a>: PreparedStatement
    where
        Self: 'a;

    fn begin(&mut self) -> Result<(), SyncError>;
    fn commit(&mut self) -> Result<(), SyncError>;
    fn rollback(&mut self) -> Result<(), SyncError>;

    /// Compile `sql`. The statement is closed when dropped.
    fn prepare(&mut self, sql: &str) -> Result<Self::Statement<'_>, SyncError>;
}

/// A compiled statement reused for every record of a page.
pub trait PreparedStatement {
    /// Reset every parameter to NULL.
    fn clear_bindings(&mut self) -> Result<(), SyncError>;
    /// Bind a one-based parameter; `None` binds NULL.
    fn bind(&mut self, index: usize, value: Option<&str>) -> Result<(), SyncError>;
    /// Run with the current bindings, returning the number of affected rows.
    fn execute(&mut self) -> Result<usize, SyncError>;
}

/// Rolls the run back unless it is explicitly committed.
///
/// Every early return out of a run (error, cancellation, abort) passes through
/// `Drop`, so a partially applied run never becomes visible.
pub struct RunTransaction<'s, S: LocalStore> {
    store: &'s mut S,
    open: bool,
}

impl<'s, S: LocalStore> RunTransaction<'s, S> {
    pub fn begin(store: &'s mut S) -> Result<Self, SyncError> {
        store.begin()?;
        Ok(Self { store, open: true })
    }

    pub fn store(&mut self) -> &mut S {
        &mut *self.store
    }

    /// A failed commit still rolls back when the guard drops.
    pub fn commit(mut self) -> Result<(), SyncError> {
        self.store.commit()?;
        self.open = false;
        Ok(())
    }
}

impl<S: LocalStore> Drop for RunTransaction<'_, S> {
    fn drop(&mut self) {
        if self.open {
            if let Err(e) = self.store.rollback() {
                tracing::warn!("Failed to roll back synchronisation: {}", e);
            }
        }
    }
}
