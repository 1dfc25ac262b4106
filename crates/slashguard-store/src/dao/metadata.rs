//! The `metadata` singleton: network identity and the optional high
//! watermark ceiling.

use rusqlite::{params, OptionalExtension, Transaction};
use slashguard_core::types::Bytes32;

use crate::db::{from_column, to_column};
use crate::error::StoreError;

/// Outcome of checking a supplied genesis validators root against the one
/// this database is scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GvrCheck {
    /// The roots match, or the database was unscoped and is now scoped to
    /// the supplied root.
    Match,
    /// The database is scoped to a different network.
    Mismatch {
        /// The root already persisted.
        stored: Bytes32,
    },
}

/// An optional ceiling above which signing is refused, used to fence off a
/// validator's future range before handing its key to another signer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HighWatermark {
    pub slot: Option<u64>,
    pub epoch: Option<u64>,
}

/// The genesis validators root this database is scoped to, if set.
pub fn genesis_validators_root(tx: &Transaction<'_>) -> Result<Option<Bytes32>, StoreError> {
    let blob: Option<Vec<u8>> = tx
        .query_row(
            "SELECT genesis_validators_root FROM metadata WHERE id = 1",
            [],
            |row| row.get(0),
        )
        .optional()?;
    match blob {
        Some(bytes) => Ok(Some(Bytes32::from_slice(&bytes).map_err(|err| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Blob,
                Box::new(err),
            )
        })?)),
        None => Ok(None),
    }
}

/// Compares `supplied` with the stored root, scoping the database to
/// `supplied` when it was unscoped. The stored value is never overwritten.
pub fn check_or_insert_genesis_root(
    tx: &Transaction<'_>,
    supplied: &Bytes32,
) -> Result<GvrCheck, StoreError> {
    match genesis_validators_root(tx)? {
        Some(stored) if stored == *supplied => Ok(GvrCheck::Match),
        Some(stored) => Ok(GvrCheck::Mismatch { stored }),
        None => {
            tx.execute(
                "INSERT INTO metadata (id, genesis_validators_root) VALUES (1, ?1)",
                params![supplied.as_slice()],
            )?;
            Ok(GvrCheck::Match)
        }
    }
}

/// Reads the high watermark, if one is set.
pub fn high_watermark(tx: &Transaction<'_>) -> Result<Option<HighWatermark>, StoreError> {
    let row = tx
        .query_row(
            "SELECT high_slot, high_epoch FROM metadata WHERE id = 1",
            [],
            |row| {
                let slot: Option<i64> = row.get(0)?;
                let epoch: Option<i64> = row.get(1)?;
                Ok(HighWatermark {
                    slot: slot.map(from_column),
                    epoch: epoch.map(from_column),
                })
            },
        )
        .optional()?;
    Ok(row.filter(|hw| hw.slot.is_some() || hw.epoch.is_some()))
}

/// Sets the high watermark. Requires the database to be scoped to a network
/// already; there is nothing meaningful to fence before that.
pub fn set_high_watermark(
    tx: &Transaction<'_>,
    watermark: HighWatermark,
) -> Result<(), StoreError> {
    let updated = tx.execute(
        "UPDATE metadata SET high_slot = ?1, high_epoch = ?2 WHERE id = 1",
        params![
            watermark.slot.map(to_column).transpose()?,
            watermark.epoch.map(to_column).transpose()?
        ],
    )?;
    if updated == 0 {
        return Err(StoreError::Database(rusqlite::Error::QueryReturnedNoRows));
    }
    Ok(())
}

/// Clears the high watermark. A no-op when none is set.
pub fn clear_high_watermark(tx: &Transaction<'_>) -> Result<(), StoreError> {
    tx.execute(
        "UPDATE metadata SET high_slot = NULL, high_epoch = NULL WHERE id = 1",
        [],
    )?;
    Ok(())
}
