// ABOUTME: SQLite implementation of the local store
// ABOUTME: Opens the device mirror and exposes raw-bound prepared statements to the engine

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rusqlite::types::{Null, Value};
use rusqlite::{Connection, Statement};

use super::{LocalStore, PreparedStatement};
use crate::error::SyncError;
use crate::utils::quote_ident;

pub struct SqliteStore {
    path: Option<PathBuf>,
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create database directory {}", parent.display())
                })?;
            }
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database {}", path.display()))?;
        conn.pragma_update(None, "journal_mode", "wal")
            .context("failed to enable WAL for local database")?;
        conn.pragma_update(None, "synchronous", "normal").ok();
        Ok(Self {
            path: Some(path.to_path_buf()),
            conn,
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory database")?;
        Ok(Self { path: None, conn })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Every row of `table` ordered by rowid, for comparing store states.
    pub fn dump_table(&self, table: &str) -> Result<Vec<Vec<Value>>> {
        let query = format!("SELECT * FROM {} ORDER BY rowid", quote_ident(table));
        let mut stmt = self
            .conn
            .prepare(&query)
            .with_context(|| format!("Failed to prepare dump of table '{}'", table))?;
        let column_count = stmt.column_count();

        let rows = stmt
            .query_map([], |row| {
                (0..column_count)
                    .map(|idx| row.get::<_, Value>(idx))
                    .collect::<rusqlite::Result<Vec<Value>>>()
            })
            .with_context(|| format!("Failed to read table '{}'", table))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .with_context(|| format!("Failed to collect rows of table '{}'", table))?;

        Ok(rows)
    }

    pub fn row_count(&self, table: &str) -> Result<usize> {
        let query = format!("SELECT COUNT(*) FROM {}", quote_ident(table));
        let count: i64 = self
            .conn
            .query_row(&query, [], |row| row.get(0))
            .with_context(|| format!("Failed to count rows in table '{}'", table))?;
        Ok(count as usize)
    }
}

impl LocalStore for SqliteStore {
    type Statement<'a> = SqliteStatement<'a>;

    fn begin(&mut self) -> Result<(), SyncError> {
        // IMMEDIATE takes the write lock up front so no other writer interleaves
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), SyncError> {
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), SyncError> {
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }

    fn prepare(&mut self, sql: &str) -> Result<SqliteStatement<'_>, SyncError> {
        tracing::debug!("Preparing: {}", sql);
        let inner = self.conn.prepare(sql)?;
        Ok(SqliteStatement { inner })
    }
}

pub struct SqliteStatement<'conn> {
    inner: Statement<'conn>,
}

impl PreparedStatement for SqliteStatement<'_> {
    fn clear_bindings(&mut self) -> Result<(), SyncError> {
        for index in 1..=self.inner.parameter_count() {
            self.inner.raw_bind_parameter(index, Null)?;
        }
        Ok(())
    }

    fn bind(&mut self, index: usize, value: Option<&str>) -> Result<(), SyncError> {
        self.inner.raw_bind_parameter(index, value)?;
        Ok(())
    }

    fn execute(&mut self) -> Result<usize, SyncError> {
        Ok(self.inner.raw_execute()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::RunTransaction;

    fn store_with_table() -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .connection()
            .execute_batch("CREATE TABLE town (_id INTEGER PRIMARY KEY, name TEXT)")
            .unwrap();
        store
    }

    #[test]
    fn test_statement_reuse_with_rebinding() {
        let mut store = store_with_table();
        {
            let mut stmt = store
                .prepare("INSERT INTO town (_id, name) VALUES (?1, ?2)")
                .unwrap();
            for (id, name) in [("1", Some("Worcester")), ("2", None)] {
                stmt.clear_bindings().unwrap();
                stmt.bind(1, Some(id)).unwrap();
                stmt.bind(2, name).unwrap();
                assert_eq!(stmt.execute().unwrap(), 1);
            }
        }
        let rows = store.dump_table("town").unwrap();
        assert_eq!(
            rows,
            vec![
                vec![Value::Integer(1), Value::Text("Worcester".to_string())],
                vec![Value::Integer(2), Value::Null],
            ]
        );
    }

    #[test]
    fn test_clear_bindings_resets_to_null() {
        let mut store = store_with_table();
        {
            let mut stmt = store
                .prepare("INSERT INTO town (_id, name) VALUES (?1, ?2)")
                .unwrap();
            stmt.bind(1, Some("1")).unwrap();
            stmt.bind(2, Some("Ceres")).unwrap();
            stmt.execute().unwrap();

            stmt.clear_bindings().unwrap();
            stmt.bind(1, Some("2")).unwrap();
            stmt.execute().unwrap();
        }
        let rows = store.dump_table("town").unwrap();
        assert_eq!(rows[1][1], Value::Null);
    }

    #[test]
    fn test_run_transaction_rolls_back_on_drop() {
        let mut store = store_with_table();
        {
            let mut txn = RunTransaction::begin(&mut store).unwrap();
            let mut stmt = txn
                .store()
                .prepare("INSERT INTO town (_id, name) VALUES (?1, ?2)")
                .unwrap();
            stmt.bind(1, Some("9")).unwrap();
            stmt.bind(2, Some("Tulbagh")).unwrap();
            stmt.execute().unwrap();
        }
        assert_eq!(store.row_count("town").unwrap(), 0);
    }

    #[test]
    fn test_run_transaction_commit() {
        let mut store = store_with_table();
        let mut txn = RunTransaction::begin(&mut store).unwrap();
        {
            let mut stmt = txn
                .store()
                .prepare("INSERT INTO town (_id, name) VALUES (?1, ?2)")
                .unwrap();
            stmt.bind(1, Some("3")).unwrap();
            stmt.bind(2, Some("Wellington")).unwrap();
            stmt.execute().unwrap();
        }
        txn.commit().unwrap();
        assert_eq!(store.row_count("town").unwrap(), 1);
    }

    #[test]
    fn test_open_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("aquatest.db");
        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.path(), Some(path.as_path()));
        assert!(path.exists());
    }
}
