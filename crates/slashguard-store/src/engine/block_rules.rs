//! Per-request safety rules for block proposals.

use rusqlite::Transaction;
use slashguard_core::types::{PublicKey, SigningRoot};
use tracing::{debug, warn};

use crate::dao::{blocks, watermarks};
use crate::error::StoreError;

/// Evaluates one candidate block proposal against the validator's recorded
/// history, inside the caller's transaction.
pub struct BlockRules<'a, 't> {
    pub tx: &'a Transaction<'t>,
    pub validator_id: i64,
    pub pubkey: &'a PublicKey,
    pub signing_root: &'a SigningRoot,
    pub slot: u64,
}

impl BlockRules<'_, '_> {
    /// Runs the full rule chain, recording the proposal when it is safe.
    ///
    /// Returns `Ok(false)` for any refusal; storage failures propagate so
    /// the caller fails closed.
    pub fn evaluate_and_record(&self) -> Result<bool, StoreError> {
        if self.below_low_watermark()? {
            return Ok(false);
        }
        if self.conflicts_with_existing_proposal()? {
            return Ok(false);
        }
        if self.previously_authorized()? {
            return Ok(true);
        }
        self.record()?;
        Ok(true)
    }

    fn below_low_watermark(&self) -> Result<bool, StoreError> {
        let watermark = watermarks::find(self.tx, self.validator_id)?.and_then(|wm| wm.slot);
        if let Some(floor) = watermark {
            if self.slot < floor {
                warn!(
                    validator = %self.pubkey,
                    slot = self.slot,
                    watermark = floor,
                    "refusing block proposal below low watermark"
                );
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn conflicts_with_existing_proposal(&self) -> Result<bool, StoreError> {
        if let Some(existing) =
            blocks::find_conflicting(self.tx, self.validator_id, self.slot, self.signing_root)?
        {
            warn!(
                validator = %self.pubkey,
                slot = self.slot,
                existing_root = ?existing.signing_root,
                "detected double block proposal with a different signing root"
            );
            return Ok(true);
        }
        Ok(false)
    }

    fn previously_authorized(&self) -> Result<bool, StoreError> {
        let matches = blocks::matching_exists(
            self.tx,
            self.validator_id,
            self.slot,
            Some(self.signing_root),
        )?;
        if matches {
            debug!(
                validator = %self.pubkey,
                slot = self.slot,
                "block proposal already authorized, idempotent re-ask"
            );
        }
        Ok(matches)
    }

    fn record(&self) -> Result<(), StoreError> {
        // The first recorded proposal anchors the low watermark.
        let first = !blocks::any_exist(self.tx, self.validator_id)?;
        blocks::insert(
            self.tx,
            self.validator_id,
            self.slot,
            Some(self.signing_root),
        )?;
        if first {
            watermarks::raise_slot(self.tx, self.validator_id, self.slot)?;
            debug!(
                validator = %self.pubkey,
                slot = self.slot,
                "anchored slot low watermark at first recorded proposal"
            );
        }
        Ok(())
    }
}
