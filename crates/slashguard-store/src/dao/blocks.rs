//! The `signed_blocks` table: the append-only block-proposal ledger.

use rusqlite::{params, OptionalExtension, Transaction};
use slashguard_core::types::{Bytes32, SigningRoot};

use crate::db::{from_column, to_column};
use crate::error::StoreError;

/// One stored block-proposal fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoredBlock {
    pub slot: u64,
    /// `None` for legacy rows that predate root tracking.
    pub signing_root: Option<SigningRoot>,
}

fn root_from_row(index: usize, blob: Option<Vec<u8>>) -> rusqlite::Result<Option<SigningRoot>> {
    blob.map(|bytes| {
        Bytes32::from_slice(&bytes).map_err(|err| {
            rusqlite::Error::FromSqlConversionFailure(
                index,
                rusqlite::types::Type::Blob,
                Box::new(err),
            )
        })
    })
    .transpose()
}

/// Records an authorized proposal.
pub fn insert(
    tx: &Transaction<'_>,
    validator_id: i64,
    slot: u64,
    signing_root: Option<&SigningRoot>,
) -> Result<(), StoreError> {
    tx.execute(
        "INSERT INTO signed_blocks (validator_id, slot, signing_root) VALUES (?1, ?2, ?3)",
        params![
            validator_id,
            to_column(slot)?,
            signing_root.map(Bytes32::as_slice)
        ],
    )?;
    Ok(())
}

/// Finds a proposal at this slot carrying a different, known signing root.
/// Such a row makes any new proposal at the slot a double proposal.
pub fn find_conflicting(
    tx: &Transaction<'_>,
    validator_id: i64,
    slot: u64,
    signing_root: &SigningRoot,
) -> Result<Option<StoredBlock>, StoreError> {
    let row = tx
        .query_row(
            "SELECT slot, signing_root FROM signed_blocks \
             WHERE validator_id = ?1 AND slot = ?2 \
               AND signing_root IS NOT NULL AND signing_root <> ?3 \
             LIMIT 1",
            params![validator_id, to_column(slot)?, signing_root.as_slice()],
            |row| {
                Ok(StoredBlock {
                    slot: from_column(row.get(0)?),
                    signing_root: root_from_row(1, row.get(1)?)?,
                })
            },
        )
        .optional()?;
    Ok(row)
}

/// Whether a proposal at this slot already covers the given root.
///
/// A stored row with a `NULL` root counts as covering any root, and an
/// unknown incoming root is covered by any row at the slot: unknown roots
/// are assumed equal.
pub fn matching_exists(
    tx: &Transaction<'_>,
    validator_id: i64,
    slot: u64,
    signing_root: Option<&SigningRoot>,
) -> Result<bool, StoreError> {
    let count: i64 = match signing_root {
        Some(root) => tx.query_row(
            "SELECT COUNT(*) FROM signed_blocks \
             WHERE validator_id = ?1 AND slot = ?2 \
               AND (signing_root IS NULL OR signing_root = ?3)",
            params![validator_id, to_column(slot)?, root.as_slice()],
            |row| row.get(0),
        )?,
        None => tx.query_row(
            "SELECT COUNT(*) FROM signed_blocks WHERE validator_id = ?1 AND slot = ?2",
            params![validator_id, to_column(slot)?],
            |row| row.get(0),
        )?,
    };
    Ok(count > 0)
}

/// Whether the validator has any proposal on record.
pub fn any_exist(tx: &Transaction<'_>, validator_id: i64) -> Result<bool, StoreError> {
    let count: i64 = tx.query_row(
        "SELECT EXISTS (SELECT 1 FROM signed_blocks WHERE validator_id = ?1)",
        params![validator_id],
        |row| row.get(0),
    )?;
    Ok(count != 0)
}

/// All proposals for a validator, ascending by slot.
pub fn all_for_validator(
    tx: &Transaction<'_>,
    validator_id: i64,
) -> Result<Vec<StoredBlock>, StoreError> {
    let mut stmt = tx.prepare(
        "SELECT slot, signing_root FROM signed_blocks WHERE validator_id = ?1 ORDER BY slot ASC",
    )?;
    let rows = stmt.query_map(params![validator_id], |row| {
        Ok(StoredBlock {
            slot: from_column(row.get(0)?),
            signing_root: root_from_row(1, row.get(1)?)?,
        })
    })?;
    let mut blocks = Vec::new();
    for row in rows {
        blocks.push(row?);
    }
    Ok(blocks)
}

/// The slot of the n-th most recent proposal (1-based), if the validator
/// has that many. This is the retention floor for "keep n entries".
pub fn nth_highest_slot(
    tx: &Transaction<'_>,
    validator_id: i64,
    n: u64,
) -> Result<Option<u64>, StoreError> {
    debug_assert!(n > 0);
    let slot: Option<i64> = tx
        .query_row(
            "SELECT slot FROM signed_blocks WHERE validator_id = ?1 \
             ORDER BY slot DESC LIMIT 1 OFFSET ?2",
            params![validator_id, to_column(n)? - 1],
            |row| row.get(0),
        )
        .optional()?;
    Ok(slot.map(from_column))
}

/// Deletes up to `limit` proposals strictly below `slot`, returning the
/// number deleted. Callers loop until a short batch comes back, each batch
/// in its own transaction, so deletes never hold the write lock for long.
pub fn delete_below_slot(
    tx: &Transaction<'_>,
    validator_id: i64,
    slot: u64,
    limit: usize,
) -> Result<usize, StoreError> {
    let deleted = tx.execute(
        "DELETE FROM signed_blocks WHERE rowid IN ( \
             SELECT rowid FROM signed_blocks \
             WHERE validator_id = ?1 AND slot < ?2 LIMIT ?3)",
        params![validator_id, to_column(slot)?, limit],
    )?;
    Ok(deleted)
}
