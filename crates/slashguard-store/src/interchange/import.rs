//! Transactional interchange import.

use std::io::Read;

use rusqlite::Transaction;
use slashguard_core::interchange::{InterchangeDocument, ValidatorHistory};
use slashguard_core::min_tracker::MinValueTracker;
use tracing::{debug, info, warn};

use crate::dao::metadata::{self, GvrCheck};
use crate::dao::{attestations, blocks, validators, watermarks};
use crate::engine::SlashingProtection;
use crate::error::InterchangeError;

/// Imports an interchange document from `input` as one atomic transaction.
///
/// Duplicate facts are skipped silently; conflicting facts at the same
/// slot or target epoch are retained alongside the existing rows. Any
/// failure rolls back every write the document caused.
pub fn import_data(
    protection: &SlashingProtection,
    input: impl Read,
) -> Result<(), InterchangeError> {
    let document: InterchangeDocument = serde_json::from_reader(input)?;
    if !document.metadata.is_supported_version() {
        return Err(InterchangeError::UnsupportedVersion {
            found: document.metadata.format_version,
        });
    }

    info!(
        validators = document.data.len(),
        genesis_validators_root = %document.metadata.genesis_validators_root,
        "importing slashing protection data"
    );

    let registered = protection.store().with_write_tx(|tx| {
        match metadata::check_or_insert_genesis_root(tx, &document.metadata.genesis_validators_root)?
        {
            GvrCheck::Match => {}
            GvrCheck::Mismatch { stored } => {
                return Err(InterchangeError::GenesisValidatorsRootMismatch {
                    stored,
                    supplied: document.metadata.genesis_validators_root,
                });
            }
        }

        let mut registered = Vec::with_capacity(document.data.len());
        for validator in &document.data {
            let validator_id = validators::intern(tx, &validator.pubkey)?;
            registered.push((validator.pubkey.clone(), validator_id));
            import_blocks(tx, validator_id, validator)?;
            import_attestations(tx, validator_id, validator)?;
        }
        Ok(registered)
    })?;

    // Only cache ids once the import has committed.
    protection.registry().record_all(registered);
    info!("slashing protection import complete");
    Ok(())
}

fn import_blocks(
    tx: &Transaction<'_>,
    validator_id: i64,
    validator: &ValidatorHistory,
) -> Result<(), InterchangeError> {
    let mut min_slot = MinValueTracker::new();

    for record in &validator.signed_blocks {
        if blocks::matching_exists(tx, validator_id, record.slot, record.signing_root.as_ref())? {
            debug!(
                validator = %validator.pubkey,
                slot = record.slot,
                "block already present, not imported"
            );
            continue;
        }
        if let Some(root) = record.signing_root.as_ref() {
            if blocks::find_conflicting(tx, validator_id, record.slot, root)?.is_some() {
                warn!(
                    validator = %validator.pubkey,
                    slot = record.slot,
                    "imported block conflicts with an existing entry, retaining both"
                );
            }
        }
        blocks::insert(tx, validator_id, record.slot, record.signing_root.as_ref())?;
        min_slot.track(record.slot);
    }

    if let Some(minimum) = min_slot.value() {
        let current = watermarks::find(tx, validator_id)?.and_then(|wm| wm.slot);
        if min_slot.is_above(current) {
            info!(
                validator = %validator.pubkey,
                watermark = minimum,
                "raising slot low watermark to imported minimum"
            );
            watermarks::raise_slot(tx, validator_id, minimum)?;
        }
    }
    Ok(())
}

fn import_attestations(
    tx: &Transaction<'_>,
    validator_id: i64,
    validator: &ValidatorHistory,
) -> Result<(), InterchangeError> {
    let mut min_source = MinValueTracker::new();
    let mut min_target = MinValueTracker::new();

    for (index, record) in validator.signed_attestations.iter().enumerate() {
        if record.source_epoch > record.target_epoch {
            return Err(InterchangeError::SourceAfterTarget {
                index,
                pubkey: validator.pubkey.clone(),
                source_epoch: record.source_epoch,
                target_epoch: record.target_epoch,
            });
        }
        if attestations::matching_exists(
            tx,
            validator_id,
            record.target_epoch,
            record.signing_root.as_ref(),
        )? {
            debug!(
                validator = %validator.pubkey,
                target_epoch = record.target_epoch,
                "attestation already present, not imported"
            );
            continue;
        }
        if let Some(root) = record.signing_root.as_ref() {
            if attestations::find_conflicting_at_target(tx, validator_id, record.target_epoch, root)?
                .is_some()
            {
                warn!(
                    validator = %validator.pubkey,
                    target_epoch = record.target_epoch,
                    "imported attestation conflicts with an existing entry, retaining both"
                );
            }
        }
        if attestations::find_surrounding(
            tx,
            validator_id,
            record.source_epoch,
            record.target_epoch,
        )?
        .is_some()
        {
            warn!(
                validator = %validator.pubkey,
                source_epoch = record.source_epoch,
                target_epoch = record.target_epoch,
                "imported attestation is surrounded by an existing entry"
            );
        }
        if attestations::find_surrounded(
            tx,
            validator_id,
            record.source_epoch,
            record.target_epoch,
        )?
        .is_some()
        {
            warn!(
                validator = %validator.pubkey,
                source_epoch = record.source_epoch,
                target_epoch = record.target_epoch,
                "imported attestation surrounds an existing entry"
            );
        }
        attestations::insert(
            tx,
            validator_id,
            record.source_epoch,
            record.target_epoch,
            record.signing_root.as_ref(),
        )?;
        min_source.track(record.source_epoch);
        min_target.track(record.target_epoch);
    }

    if let Some(minimum) = min_source.value() {
        let current = watermarks::find(tx, validator_id)?.and_then(|wm| wm.source_epoch);
        if min_source.is_above(current) {
            info!(
                validator = %validator.pubkey,
                watermark = minimum,
                "raising source epoch low watermark to imported minimum"
            );
            watermarks::raise_source_epoch(tx, validator_id, minimum)?;
        }
    }
    if let Some(minimum) = min_target.value() {
        let current = watermarks::find(tx, validator_id)?.and_then(|wm| wm.target_epoch);
        if min_target.is_above(current) {
            info!(
                validator = %validator.pubkey,
                watermark = minimum,
                "raising target epoch low watermark to imported minimum"
            );
            watermarks::raise_target_epoch(tx, validator_id, minimum)?;
        }
    }
    Ok(())
}
