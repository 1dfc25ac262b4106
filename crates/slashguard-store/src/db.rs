//! Connection management for the slashing-protection database.
//!
//! A [`Store`] wraps a single `SQLite` connection behind a mutex. Every
//! write path runs as one immediate-mode transaction, so each
//! check-then-act sequence observes and mutates the database atomically;
//! two racing requests for the same validator can never both see "no
//! existing row". WAL mode keeps readers unblocked in the meantime.

// SQLite integer columns are 64-bit signed; slots and epochs are converted
// through `try_from` on the way in and are non-negative on the way out.
#![allow(clippy::cast_sign_loss)]

use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::{Connection, OpenFlags, Transaction, TransactionBehavior};

use crate::error::StoreError;

/// Schema SQL embedded at compile time.
const SCHEMA_SQL: &str = include_str!("schema.sql");

/// Handle to the slashing-protection database.
#[derive(Debug, Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Opens or creates the database at the specified path.
    ///
    /// The schema is applied on every open; all statements in it are
    /// idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open_with_flags(
            path.as_ref(),
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Creates an in-memory database, for tests and ephemeral setups.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be initialized.
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Runs `f` inside an immediate-mode write transaction.
    ///
    /// The transaction commits when `f` returns `Ok` and rolls back on
    /// `Err`, leaving no partial writes.
    pub(crate) fn with_write_tx<T, E>(
        &self,
        f: impl FnOnce(&Transaction<'_>) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<rusqlite::Error>,
    {
        self.with_tx(TransactionBehavior::Immediate, f)
    }

    /// Runs `f` inside a deferred (read) transaction.
    pub(crate) fn with_read_tx<T, E>(
        &self,
        f: impl FnOnce(&Transaction<'_>) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<rusqlite::Error>,
    {
        self.with_tx(TransactionBehavior::Deferred, f)
    }

    fn with_tx<T, E>(
        &self,
        behavior: TransactionBehavior,
        f: impl FnOnce(&Transaction<'_>) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<rusqlite::Error>,
    {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction_with_behavior(behavior)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}

/// Converts an API-level `u64` slot/epoch to its column representation.
pub(crate) fn to_column(value: u64) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(|_| StoreError::ValueOutOfRange { value })
}

/// Converts a column value back to a `u64`. Columns only ever hold values
/// that passed [`to_column`], so the cast cannot lose information.
pub(crate) fn from_column(value: i64) -> u64 {
    value as u64
}

#[cfg(test)]
mod tests {
    use rusqlite::params;

    use super::*;

    #[test]
    fn schema_applies_and_is_idempotent() {
        let store = Store::in_memory().expect("open in-memory store");
        // Applying the schema a second time must not fail.
        store
            .with_write_tx::<_, StoreError>(|tx| {
                tx.execute_batch(SCHEMA_SQL)?;
                Ok(())
            })
            .expect("reapply schema");
    }

    #[test]
    fn write_tx_rolls_back_on_error() {
        let store = Store::in_memory().expect("open in-memory store");
        let result = store.with_write_tx::<(), StoreError>(|tx| {
            tx.execute(
                "INSERT INTO validators (public_key) VALUES (?1)",
                params![&[1u8, 2, 3][..]],
            )?;
            Err(StoreError::ValueOutOfRange { value: u64::MAX })
        });
        assert!(matches!(result, Err(StoreError::ValueOutOfRange { .. })));

        let count: i64 = store
            .with_read_tx::<_, StoreError>(|tx| {
                Ok(tx.query_row("SELECT COUNT(*) FROM validators", [], |row| row.get(0))?)
            })
            .expect("count validators");
        assert_eq!(count, 0);
    }

    #[test]
    fn to_column_rejects_values_above_i64_max() {
        assert!(to_column(u64::MAX).is_err());
        assert_eq!(to_column(42).expect("convert"), 42);
        assert_eq!(from_column(42), 42);
    }
}
