//! The `validators` table: public keys interned to integer ids.

use rusqlite::{params, OptionalExtension, Transaction};
use slashguard_core::types::PublicKey;

use crate::error::StoreError;

/// Looks up the id for a public key.
pub fn find_id(tx: &Transaction<'_>, pubkey: &PublicKey) -> Result<Option<i64>, StoreError> {
    let id = tx
        .query_row(
            "SELECT id FROM validators WHERE public_key = ?1",
            params![pubkey.as_slice()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id)
}

/// Resolves the id for a public key, creating the validator row on first
/// sight. Ids are never reused; an existing row is never modified.
pub fn intern(tx: &Transaction<'_>, pubkey: &PublicKey) -> Result<i64, StoreError> {
    if let Some(id) = find_id(tx, pubkey)? {
        return Ok(id);
    }
    tx.execute(
        "INSERT INTO validators (public_key) VALUES (?1)",
        params![pubkey.as_slice()],
    )?;
    Ok(tx.last_insert_rowid())
}

/// All registered validators, ordered by id.
pub fn all(tx: &Transaction<'_>) -> Result<Vec<(i64, PublicKey)>, StoreError> {
    let mut stmt = tx.prepare("SELECT id, public_key FROM validators ORDER BY id")?;
    let rows = stmt.query_map([], |row| {
        let id: i64 = row.get(0)?;
        let key: Vec<u8> = row.get(1)?;
        Ok((id, PublicKey::new(key)))
    })?;
    let mut validators = Vec::new();
    for row in rows {
        validators.push(row?);
    }
    Ok(validators)
}

/// Whether signing is enabled for this validator.
pub fn is_enabled(tx: &Transaction<'_>, validator_id: i64) -> Result<bool, StoreError> {
    let enabled: i64 = tx.query_row(
        "SELECT enabled FROM validators WHERE id = ?1",
        params![validator_id],
        |row| row.get(0),
    )?;
    Ok(enabled != 0)
}

/// Enables or disables signing for this validator.
pub fn set_enabled(
    tx: &Transaction<'_>,
    validator_id: i64,
    enabled: bool,
) -> Result<(), StoreError> {
    tx.execute(
        "UPDATE validators SET enabled = ?2 WHERE id = ?1",
        params![validator_id, i64::from(enabled)],
    )?;
    Ok(())
}
