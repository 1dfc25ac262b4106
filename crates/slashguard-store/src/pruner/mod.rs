//! Retention pruning of the signing ledger.
//!
//! Pruning keeps the most recent entries per validator and deletes the
//! rest, raising the low watermark to the lowest retained value first.
//! The watermark moves before any row is deleted: if the process dies in
//! between, the leftover rows sit inertly below the watermark until the
//! next run, and protection is never weakened.

mod task;

#[cfg(test)]
mod tests;

pub use task::{PrunerConfig, PrunerTask};

use tracing::{debug, info};

use crate::dao::{attestations, blocks, validators, watermarks};
use crate::engine::SlashingProtection;
use crate::error::StoreError;

/// Rows deleted per transaction. Keeps each delete transaction short so
/// pruning never starves concurrent authorization decisions.
const DELETE_BATCH_SIZE: usize = 512;

/// What one pruning pass removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneSummary {
    pub blocks_deleted: usize,
    pub attestations_deleted: usize,
}

impl PruneSummary {
    fn absorb(&mut self, other: Self) {
        self.blocks_deleted += other.blocks_deleted;
        self.attestations_deleted += other.attestations_deleted;
    }
}

/// Prunes every registered validator.
///
/// Keeps `epochs_to_keep * slots_per_epoch` block entries and
/// `epochs_to_keep` attestation entries per validator, so both ledgers
/// retain a consistent span of history.
///
/// # Errors
///
/// Fails on storage failure, or when either argument is zero.
pub fn prune_all(
    protection: &SlashingProtection,
    epochs_to_keep: u64,
    slots_per_epoch: u64,
) -> Result<PruneSummary, StoreError> {
    let blocks_to_keep = checked_retention(epochs_to_keep, slots_per_epoch)?;
    let validator_ids: Vec<i64> = protection
        .store()
        .with_read_tx(validators::all)?
        .into_iter()
        .map(|(id, _)| id)
        .collect();

    info!(
        validators = validator_ids.len(),
        blocks_to_keep,
        attestations_to_keep = epochs_to_keep,
        "pruning slashing protection database"
    );

    let mut summary = PruneSummary::default();
    for validator_id in validator_ids {
        summary.absorb(prune_validator(
            protection,
            validator_id,
            blocks_to_keep,
            epochs_to_keep,
        )?);
    }
    info!(
        blocks_deleted = summary.blocks_deleted,
        attestations_deleted = summary.attestations_deleted,
        "pruning complete"
    );
    Ok(summary)
}

/// Prunes one validator's ledgers down to the given retention counts.
///
/// # Errors
///
/// Fails on storage failure, or when either count is zero.
pub fn prune_validator(
    protection: &SlashingProtection,
    validator_id: i64,
    blocks_to_keep: u64,
    attestations_to_keep: u64,
) -> Result<PruneSummary, StoreError> {
    if blocks_to_keep == 0 || attestations_to_keep == 0 {
        return Err(StoreError::InvalidRetention);
    }
    let blocks_deleted = prune_blocks(protection, validator_id, blocks_to_keep)?;
    let attestations_deleted = prune_attestations(protection, validator_id, attestations_to_keep)?;
    Ok(PruneSummary {
        blocks_deleted,
        attestations_deleted,
    })
}

/// Raises the slot watermark to the retention floor, then deletes below it.
///
/// A validator with no slot watermark is left untouched: there is nothing
/// safe to anchor the deletion to.
fn prune_blocks(
    protection: &SlashingProtection,
    validator_id: i64,
    blocks_to_keep: u64,
) -> Result<usize, StoreError> {
    let floor = protection.store().with_write_tx(|tx| {
        let watermark = watermarks::find(tx, validator_id)?.and_then(|wm| wm.slot);
        if watermark.is_none() {
            return Ok(None);
        }
        let Some(floor) = blocks::nth_highest_slot(tx, validator_id, blocks_to_keep)? else {
            return Ok(None);
        };
        watermarks::raise_slot(tx, validator_id, floor)?;
        Ok::<_, StoreError>(Some(floor))
    })?;

    let Some(floor) = floor else {
        debug!(validator_id, "no block pruning floor, nothing to do");
        return Ok(0);
    };
    delete_in_batches(|| {
        protection
            .store()
            .with_write_tx(|tx| blocks::delete_below_slot(tx, validator_id, floor, DELETE_BATCH_SIZE))
    })
}

/// Same scheme as [`prune_blocks`], keyed by target epoch.
fn prune_attestations(
    protection: &SlashingProtection,
    validator_id: i64,
    attestations_to_keep: u64,
) -> Result<usize, StoreError> {
    let floor = protection.store().with_write_tx(|tx| {
        let watermark = watermarks::find(tx, validator_id)?;
        if watermark.map_or(true, |wm| wm.source_epoch.is_none() && wm.target_epoch.is_none()) {
            return Ok(None);
        }
        let Some(floor) =
            attestations::nth_highest_target(tx, validator_id, attestations_to_keep)?
        else {
            return Ok(None);
        };
        // Anchor both epoch floors on the retained row at the floor target.
        if let Some(anchor) =
            attestations::find_lowest_source_at_target(tx, validator_id, floor)?
        {
            watermarks::raise_source_epoch(tx, validator_id, anchor.source_epoch)?;
        }
        watermarks::raise_target_epoch(tx, validator_id, floor)?;
        Ok::<_, StoreError>(Some(floor))
    })?;

    let Some(floor) = floor else {
        debug!(validator_id, "no attestation pruning floor, nothing to do");
        return Ok(0);
    };
    delete_in_batches(|| {
        protection.store().with_write_tx(|tx| {
            attestations::delete_below_target(tx, validator_id, floor, DELETE_BATCH_SIZE)
        })
    })
}

fn delete_in_batches(
    mut delete_batch: impl FnMut() -> Result<usize, StoreError>,
) -> Result<usize, StoreError> {
    let mut total = 0;
    loop {
        let deleted = delete_batch()?;
        total += deleted;
        if deleted < DELETE_BATCH_SIZE {
            return Ok(total);
        }
    }
}

fn checked_retention(epochs_to_keep: u64, slots_per_epoch: u64) -> Result<u64, StoreError> {
    if epochs_to_keep == 0 || slots_per_epoch == 0 {
        return Err(StoreError::InvalidRetention);
    }
    epochs_to_keep
        .checked_mul(slots_per_epoch)
        .ok_or(StoreError::InvalidRetention)
}
