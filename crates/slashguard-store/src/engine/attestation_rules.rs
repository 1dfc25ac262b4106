//! Per-request safety rules for attestations.

use rusqlite::Transaction;
use slashguard_core::types::{PublicKey, SigningRoot};
use tracing::{debug, warn};

use crate::dao::{attestations, watermarks};
use crate::error::StoreError;

/// Evaluates one candidate attestation against the validator's recorded
/// history, inside the caller's transaction.
pub struct AttestationRules<'a, 't> {
    pub tx: &'a Transaction<'t>,
    pub validator_id: i64,
    pub pubkey: &'a PublicKey,
    pub signing_root: &'a SigningRoot,
    pub source_epoch: u64,
    pub target_epoch: u64,
}

impl AttestationRules<'_, '_> {
    /// Runs the full rule chain, recording the attestation when it is safe.
    pub fn evaluate_and_record(&self) -> Result<bool, StoreError> {
        if self.below_low_watermark()? {
            return Ok(false);
        }
        if self.is_double_vote()? {
            return Ok(false);
        }
        if self.violates_surround_rule()? {
            return Ok(false);
        }
        if self.previously_authorized()? {
            return Ok(true);
        }
        self.record()?;
        Ok(true)
    }

    fn below_low_watermark(&self) -> Result<bool, StoreError> {
        let Some(watermark) = watermarks::find(self.tx, self.validator_id)? else {
            return Ok(false);
        };
        if let Some(floor) = watermark.source_epoch {
            if self.source_epoch < floor {
                warn!(
                    validator = %self.pubkey,
                    source_epoch = self.source_epoch,
                    watermark = floor,
                    "refusing attestation with source epoch below low watermark"
                );
                return Ok(true);
            }
        }
        if let Some(floor) = watermark.target_epoch {
            if self.target_epoch < floor {
                warn!(
                    validator = %self.pubkey,
                    target_epoch = self.target_epoch,
                    watermark = floor,
                    "refusing attestation with target epoch below low watermark"
                );
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn is_double_vote(&self) -> Result<bool, StoreError> {
        if let Some(existing) = attestations::find_conflicting_at_target(
            self.tx,
            self.validator_id,
            self.target_epoch,
            self.signing_root,
        )? {
            warn!(
                validator = %self.pubkey,
                target_epoch = self.target_epoch,
                existing_source = existing.source_epoch,
                "detected double vote: different signing root at the same target epoch"
            );
            return Ok(true);
        }
        Ok(false)
    }

    fn violates_surround_rule(&self) -> Result<bool, StoreError> {
        if let Some(surrounding) = attestations::find_surrounding(
            self.tx,
            self.validator_id,
            self.source_epoch,
            self.target_epoch,
        )? {
            warn!(
                validator = %self.pubkey,
                source_epoch = self.source_epoch,
                target_epoch = self.target_epoch,
                surrounding_source = surrounding.source_epoch,
                surrounding_target = surrounding.target_epoch,
                "detected attestation surrounded by an existing vote"
            );
            return Ok(true);
        }
        if let Some(surrounded) = attestations::find_surrounded(
            self.tx,
            self.validator_id,
            self.source_epoch,
            self.target_epoch,
        )? {
            warn!(
                validator = %self.pubkey,
                source_epoch = self.source_epoch,
                target_epoch = self.target_epoch,
                surrounded_source = surrounded.source_epoch,
                surrounded_target = surrounded.target_epoch,
                "detected attestation surrounding an existing vote"
            );
            return Ok(true);
        }
        Ok(false)
    }

    fn previously_authorized(&self) -> Result<bool, StoreError> {
        let matches = attestations::matching_exists(
            self.tx,
            self.validator_id,
            self.target_epoch,
            Some(self.signing_root),
        )?;
        if matches {
            debug!(
                validator = %self.pubkey,
                target_epoch = self.target_epoch,
                "attestation already authorized, idempotent re-ask"
            );
        }
        Ok(matches)
    }

    fn record(&self) -> Result<(), StoreError> {
        // The first recorded attestation anchors both epoch watermarks.
        let first = !attestations::any_exist(self.tx, self.validator_id)?;
        attestations::insert(
            self.tx,
            self.validator_id,
            self.source_epoch,
            self.target_epoch,
            Some(self.signing_root),
        )?;
        if first {
            watermarks::raise_source_epoch(self.tx, self.validator_id, self.source_epoch)?;
            watermarks::raise_target_epoch(self.tx, self.validator_id, self.target_epoch)?;
            debug!(
                validator = %self.pubkey,
                source_epoch = self.source_epoch,
                target_epoch = self.target_epoch,
                "anchored epoch low watermarks at first recorded attestation"
            );
        }
        Ok(())
    }
}
