//! Streaming interchange export.
//!
//! The exporter writes the JSON document incrementally: metadata first,
//! then one `data` entry per validator as each is requested. Only a single
//! validator's history is ever held in memory.

use std::io::Write;

use rusqlite::Transaction;
use slashguard_core::interchange::{
    Metadata, SignedAttestationRecord, SignedBlockRecord, ValidatorHistory,
};
use slashguard_core::types::PublicKey;
use tracing::{info, warn};

use crate::dao::{attestations, blocks, metadata, validators, watermarks};
use crate::engine::SlashingProtection;
use crate::error::InterchangeError;

/// An open, resumable export session.
///
/// Produced by [`SlashingProtection::create_incremental_exporter`]; emits
/// one validator per [`export`](Self::export) call and one well-formed
/// document once [`finalize`](Self::finalize) runs.
pub struct IncrementalExporter<'a, W: Write> {
    protection: &'a SlashingProtection,
    output: W,
    wrote_validator: bool,
}

impl<'a, W: Write> IncrementalExporter<'a, W> {
    pub(crate) fn begin(
        protection: &'a SlashingProtection,
        mut output: W,
    ) -> Result<Self, InterchangeError> {
        let genesis_validators_root = protection
            .store()
            .with_read_tx(metadata::genesis_validators_root)?
            .ok_or(InterchangeError::MissingGenesisValidatorsRoot)?;

        info!("exporting slashing protection database");
        output.write_all(b"{\"metadata\":")?;
        serde_json::to_writer(&mut output, &Metadata::current(genesis_validators_root))?;
        output.write_all(b",\"data\":[")?;

        Ok(Self {
            protection,
            output,
            wrote_validator: false,
        })
    }

    /// Appends one validator's history to the document.
    ///
    /// Unknown validators and validators without a low watermark produce
    /// no entry; both are logged.
    ///
    /// # Errors
    ///
    /// Fails on storage failure or when the sink cannot be written.
    pub fn export(&mut self, pubkey: &PublicKey) -> Result<(), InterchangeError> {
        let history = self
            .protection
            .store()
            .with_read_tx(|tx| load_history(tx, pubkey))?;
        if let Some(history) = history {
            if self.wrote_validator {
                self.output.write_all(b",")?;
            }
            serde_json::to_writer(&mut self.output, &history)?;
            self.wrote_validator = true;
        }
        Ok(())
    }

    /// Closes the document and hands the sink back.
    ///
    /// # Errors
    ///
    /// Fails when the closing bytes cannot be written or flushed.
    pub fn finalize(mut self) -> Result<W, InterchangeError> {
        self.output.write_all(b"]}")?;
        self.output.flush()?;
        info!("slashing protection export complete");
        Ok(self.output)
    }
}

/// Exports every registered validator.
pub fn export_all(
    protection: &SlashingProtection,
    output: impl Write,
) -> Result<(), InterchangeError> {
    let validators = protection.store().with_read_tx(validators::all)?;
    let mut exporter = IncrementalExporter::begin(protection, output)?;
    for (_, pubkey) in validators {
        exporter.export(&pubkey)?;
    }
    exporter.finalize()?;
    Ok(())
}

/// Exports only the listed validators.
pub fn export_filtered(
    protection: &SlashingProtection,
    output: impl Write,
    pubkeys: &[PublicKey],
) -> Result<(), InterchangeError> {
    let mut exporter = IncrementalExporter::begin(protection, output)?;
    for pubkey in pubkeys {
        exporter.export(pubkey)?;
    }
    exporter.finalize()?;
    Ok(())
}

/// Loads one validator's exportable history, floor-filtered by its low
/// watermark so that pruned-away ranges are never re-exported.
fn load_history(
    tx: &Transaction<'_>,
    pubkey: &PublicKey,
) -> Result<Option<ValidatorHistory>, InterchangeError> {
    let Some(validator_id) = validators::find_id(tx, pubkey)? else {
        warn!(validator = %pubkey, "skipping export of unknown validator");
        return Ok(None);
    };
    let Some(watermark) = watermarks::find(tx, validator_id)? else {
        warn!(
            validator = %pubkey,
            "no low watermark available, producing no export entry"
        );
        return Ok(None);
    };

    let signed_blocks = if let Some(floor) = watermark.slot {
        blocks::all_for_validator(tx, validator_id)?
            .into_iter()
            .filter(|block| block.slot >= floor)
            .map(|block| SignedBlockRecord {
                slot: block.slot,
                signing_root: block.signing_root,
            })
            .collect()
    } else {
        warn!(
            validator = %pubkey,
            "no slot low watermark, producing empty block listing"
        );
        Vec::new()
    };

    let signed_attestations = if let (Some(source_floor), Some(target_floor)) =
        (watermark.source_epoch, watermark.target_epoch)
    {
        attestations::all_for_validator(tx, validator_id)?
            .into_iter()
            .filter(|att| att.source_epoch >= source_floor && att.target_epoch >= target_floor)
            .map(|att| SignedAttestationRecord {
                source_epoch: att.source_epoch,
                target_epoch: att.target_epoch,
                signing_root: att.signing_root,
            })
            .collect()
    } else {
        warn!(
            validator = %pubkey,
            "missing attestation low watermark, producing empty attestation listing"
        );
        Vec::new()
    };

    Ok(Some(ValidatorHistory {
        pubkey: pubkey.clone(),
        signed_blocks,
        signed_attestations,
    }))
}
