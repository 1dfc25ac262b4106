//! The `low_watermarks` table: per-validator floors below which signing is
//! always refused.
//!
//! The three fields are independent and monotonic: each can only be set or
//! raised, never lowered, which is what lets pruning and imports run
//! concurrently with authorization without ever weakening protection.

use rusqlite::{params, OptionalExtension, Transaction};

use crate::db::{from_column, to_column};
use crate::error::StoreError;

/// A validator's signing floors. Absent fields mean "no floor yet".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LowWatermark {
    pub slot: Option<u64>,
    pub source_epoch: Option<u64>,
    pub target_epoch: Option<u64>,
}

/// Reads the watermark row for a validator.
pub fn find(tx: &Transaction<'_>, validator_id: i64) -> Result<Option<LowWatermark>, StoreError> {
    let row = tx
        .query_row(
            "SELECT slot, source_epoch, target_epoch FROM low_watermarks \
             WHERE validator_id = ?1",
            params![validator_id],
            |row| {
                let slot: Option<i64> = row.get(0)?;
                let source_epoch: Option<i64> = row.get(1)?;
                let target_epoch: Option<i64> = row.get(2)?;
                Ok(LowWatermark {
                    slot: slot.map(from_column),
                    source_epoch: source_epoch.map(from_column),
                    target_epoch: target_epoch.map(from_column),
                })
            },
        )
        .optional()?;
    Ok(row)
}

fn raise_field(
    tx: &Transaction<'_>,
    validator_id: i64,
    field: &str,
    value: u64,
) -> Result<(), StoreError> {
    // Upsert with a guard: only ever move the field upward.
    let sql = format!(
        "INSERT INTO low_watermarks (validator_id, {field}) VALUES (?1, ?2) \
         ON CONFLICT (validator_id) DO UPDATE SET {field} = excluded.{field} \
         WHERE low_watermarks.{field} IS NULL OR low_watermarks.{field} < excluded.{field}"
    );
    tx.execute(&sql, params![validator_id, to_column(value)?])?;
    Ok(())
}

/// Raises the slot floor to `slot` unless an equal or higher floor exists.
pub fn raise_slot(tx: &Transaction<'_>, validator_id: i64, slot: u64) -> Result<(), StoreError> {
    raise_field(tx, validator_id, "slot", slot)
}

/// Raises the source-epoch floor, same monotonic rule as [`raise_slot`].
pub fn raise_source_epoch(
    tx: &Transaction<'_>,
    validator_id: i64,
    source_epoch: u64,
) -> Result<(), StoreError> {
    raise_field(tx, validator_id, "source_epoch", source_epoch)
}

/// Raises the target-epoch floor, same monotonic rule as [`raise_slot`].
pub fn raise_target_epoch(
    tx: &Transaction<'_>,
    validator_id: i64,
    target_epoch: u64,
) -> Result<(), StoreError> {
    raise_field(tx, validator_id, "target_epoch", target_epoch)
}
