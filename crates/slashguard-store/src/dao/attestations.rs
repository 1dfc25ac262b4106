//! The `signed_attestations` table: the append-only attestation ledger.

use rusqlite::{params, OptionalExtension, Transaction};
use slashguard_core::types::{Bytes32, SigningRoot};

use crate::db::{from_column, to_column};
use crate::error::StoreError;

/// One stored attestation fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoredAttestation {
    pub source_epoch: u64,
    pub target_epoch: u64,
    /// `None` for legacy rows that predate root tracking.
    pub signing_root: Option<SigningRoot>,
}

fn attestation_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredAttestation> {
    let blob: Option<Vec<u8>> = row.get(2)?;
    let signing_root = blob
        .map(|bytes| {
            Bytes32::from_slice(&bytes).map_err(|err| {
                rusqlite::Error::FromSqlConversionFailure(
                    2,
                    rusqlite::types::Type::Blob,
                    Box::new(err),
                )
            })
        })
        .transpose()?;
    Ok(StoredAttestation {
        source_epoch: from_column(row.get(0)?),
        target_epoch: from_column(row.get(1)?),
        signing_root,
    })
}

const SELECT_COLUMNS: &str = "source_epoch, target_epoch, signing_root";

/// Records an authorized attestation.
pub fn insert(
    tx: &Transaction<'_>,
    validator_id: i64,
    source_epoch: u64,
    target_epoch: u64,
    signing_root: Option<&SigningRoot>,
) -> Result<(), StoreError> {
    tx.execute(
        "INSERT INTO signed_attestations \
             (validator_id, source_epoch, target_epoch, signing_root) \
         VALUES (?1, ?2, ?3, ?4)",
        params![
            validator_id,
            to_column(source_epoch)?,
            to_column(target_epoch)?,
            signing_root.map(Bytes32::as_slice)
        ],
    )?;
    Ok(())
}

/// Finds an attestation at this target epoch carrying a different, known
/// signing root. Such a row makes any new vote for the target a double vote.
pub fn find_conflicting_at_target(
    tx: &Transaction<'_>,
    validator_id: i64,
    target_epoch: u64,
    signing_root: &SigningRoot,
) -> Result<Option<StoredAttestation>, StoreError> {
    let row = tx
        .query_row(
            &format!(
                "SELECT {SELECT_COLUMNS} FROM signed_attestations \
                 WHERE validator_id = ?1 AND target_epoch = ?2 \
                   AND signing_root IS NOT NULL AND signing_root <> ?3 \
                 LIMIT 1"
            ),
            params![
                validator_id,
                to_column(target_epoch)?,
                signing_root.as_slice()
            ],
            attestation_from_row,
        )
        .optional()?;
    Ok(row)
}

/// Whether an attestation at this target epoch already covers the given
/// root. Unknown roots on either side are assumed equal.
pub fn matching_exists(
    tx: &Transaction<'_>,
    validator_id: i64,
    target_epoch: u64,
    signing_root: Option<&SigningRoot>,
) -> Result<bool, StoreError> {
    let count: i64 = match signing_root {
        Some(root) => tx.query_row(
            "SELECT COUNT(*) FROM signed_attestations \
             WHERE validator_id = ?1 AND target_epoch = ?2 \
               AND (signing_root IS NULL OR signing_root = ?3)",
            params![validator_id, to_column(target_epoch)?, root.as_slice()],
            |row| row.get(0),
        )?,
        None => tx.query_row(
            "SELECT COUNT(*) FROM signed_attestations \
             WHERE validator_id = ?1 AND target_epoch = ?2",
            params![validator_id, to_column(target_epoch)?],
            |row| row.get(0),
        )?,
    };
    Ok(count > 0)
}

/// Finds a stored attestation that surrounds `(source, target)`: one whose
/// interval strictly contains the candidate's.
pub fn find_surrounding(
    tx: &Transaction<'_>,
    validator_id: i64,
    source_epoch: u64,
    target_epoch: u64,
) -> Result<Option<StoredAttestation>, StoreError> {
    let row = tx
        .query_row(
            &format!(
                "SELECT {SELECT_COLUMNS} FROM signed_attestations \
                 WHERE validator_id = ?1 AND source_epoch < ?2 AND target_epoch > ?3 \
                 ORDER BY target_epoch DESC LIMIT 1"
            ),
            params![
                validator_id,
                to_column(source_epoch)?,
                to_column(target_epoch)?
            ],
            attestation_from_row,
        )
        .optional()?;
    Ok(row)
}

/// Finds a stored attestation that `(source, target)` surrounds: one whose
/// interval is strictly contained by the candidate's.
pub fn find_surrounded(
    tx: &Transaction<'_>,
    validator_id: i64,
    source_epoch: u64,
    target_epoch: u64,
) -> Result<Option<StoredAttestation>, StoreError> {
    let row = tx
        .query_row(
            &format!(
                "SELECT {SELECT_COLUMNS} FROM signed_attestations \
                 WHERE validator_id = ?1 AND source_epoch > ?2 AND target_epoch < ?3 \
                 ORDER BY target_epoch DESC LIMIT 1"
            ),
            params![
                validator_id,
                to_column(source_epoch)?,
                to_column(target_epoch)?
            ],
            attestation_from_row,
        )
        .optional()?;
    Ok(row)
}

/// Whether the validator has any attestation on record.
pub fn any_exist(tx: &Transaction<'_>, validator_id: i64) -> Result<bool, StoreError> {
    let exists: i64 = tx.query_row(
        "SELECT EXISTS (SELECT 1 FROM signed_attestations WHERE validator_id = ?1)",
        params![validator_id],
        |row| row.get(0),
    )?;
    Ok(exists != 0)
}

/// All attestations for a validator, ascending by target epoch.
pub fn all_for_validator(
    tx: &Transaction<'_>,
    validator_id: i64,
) -> Result<Vec<StoredAttestation>, StoreError> {
    let mut stmt = tx.prepare(&format!(
        "SELECT {SELECT_COLUMNS} FROM signed_attestations \
         WHERE validator_id = ?1 ORDER BY target_epoch ASC"
    ))?;
    let rows = stmt.query_map(params![validator_id], attestation_from_row)?;
    let mut attestations = Vec::new();
    for row in rows {
        attestations.push(row?);
    }
    Ok(attestations)
}

/// The attestation at exactly this target epoch with the lowest source
/// epoch. With conflicting rows at one target, the lowest source is the
/// conservative anchor for the source-epoch watermark.
pub fn find_lowest_source_at_target(
    tx: &Transaction<'_>,
    validator_id: i64,
    target_epoch: u64,
) -> Result<Option<StoredAttestation>, StoreError> {
    let row = tx
        .query_row(
            &format!(
                "SELECT {SELECT_COLUMNS} FROM signed_attestations \
                 WHERE validator_id = ?1 AND target_epoch = ?2 \
                 ORDER BY source_epoch ASC LIMIT 1"
            ),
            params![validator_id, to_column(target_epoch)?],
            attestation_from_row,
        )
        .optional()?;
    Ok(row)
}

/// The target epoch of the n-th most recent attestation (1-based), if the
/// validator has that many. This is the retention floor for "keep n
/// entries".
pub fn nth_highest_target(
    tx: &Transaction<'_>,
    validator_id: i64,
    n: u64,
) -> Result<Option<u64>, StoreError> {
    debug_assert!(n > 0);
    let epoch: Option<i64> = tx
        .query_row(
            "SELECT target_epoch FROM signed_attestations WHERE validator_id = ?1 \
             ORDER BY target_epoch DESC LIMIT 1 OFFSET ?2",
            params![validator_id, to_column(n)? - 1],
            |row| row.get(0),
        )
        .optional()?;
    Ok(epoch.map(from_column))
}

/// Deletes up to `limit` attestations with target epoch strictly below
/// `target_epoch`, returning the number deleted.
pub fn delete_below_target(
    tx: &Transaction<'_>,
    validator_id: i64,
    target_epoch: u64,
    limit: usize,
) -> Result<usize, StoreError> {
    let deleted = tx.execute(
        "DELETE FROM signed_attestations WHERE rowid IN ( \
             SELECT rowid FROM signed_attestations \
             WHERE validator_id = ?1 AND target_epoch < ?2 LIMIT ?3)",
        params![validator_id, to_column(target_epoch)?, limit],
    )?;
    Ok(deleted)
}
