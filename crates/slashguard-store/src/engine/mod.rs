//! The authorization engine.
//!
//! [`SlashingProtection`] answers the one question that matters: may this
//! validator sign this artifact. Each answer is computed and recorded
//! inside a single immediate-mode transaction, so two racing requests for
//! conflicting artifacts can never both be authorized, and a storage
//! failure rolls everything back and surfaces as an error the caller must
//! treat as a refusal.
//!
//! Denials are ordinary `Ok(false)` results. The engine logs every denial
//! with its reason at warn level; idempotent re-asks log at debug.

mod attestation_rules;
mod block_rules;


use std::io::{Read, Write};
use std::path::Path;

use slashguard_core::types::{Bytes32, PublicKey, SigningRoot};
use tracing::{info, warn};

use self::attestation_rules::AttestationRules;
use self::block_rules::BlockRules;
use crate::dao::metadata::{self, GvrCheck, HighWatermark};
use crate::dao::validators;
use crate::db::{to_column, Store};
use crate::error::{InterchangeError, StoreError};
use crate::interchange::{self, IncrementalExporter};
use crate::pruner::{self, PruneSummary, PrunerConfig};
use crate::registry::ValidatorRegistry;

/// The slashing-protection engine and its administrative surface.
#[derive(Debug)]
pub struct SlashingProtection {
    store: Store,
    registry: ValidatorRegistry,
}

impl SlashingProtection {
    /// Opens or creates the protection database at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Ok(Self::with_store(Store::open(path)?))
    }

    /// Creates an engine over an in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be initialized.
    pub fn in_memory() -> Result<Self, StoreError> {
        Ok(Self::with_store(Store::in_memory()?))
    }

    fn with_store(store: Store) -> Self {
        Self {
            store,
            registry: ValidatorRegistry::new(),
        }
    }

    pub(crate) fn store(&self) -> &Store {
        &self.store
    }

    pub(crate) fn registry(&self) -> &ValidatorRegistry {
        &self.registry
    }

    /// Idempotent bulk pre-registration of validator keys.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure; no keys are registered then.
    pub fn register_validators(&self, pubkeys: &[PublicKey]) -> Result<(), StoreError> {
        let pairs = self.store.with_write_tx(|tx| {
            let mut pairs = Vec::with_capacity(pubkeys.len());
            for pubkey in pubkeys {
                if self.registry.id_for(pubkey).is_some() {
                    continue;
                }
                let id = validators::intern(tx, pubkey)?;
                pairs.push((pubkey.clone(), id));
            }
            Ok::<_, StoreError>(pairs)
        })?;
        info!(registered = pairs.len(), "registered validators");
        self.registry.record_all(pairs);
        Ok(())
    }

    /// Decides whether `pubkey` may sign a block proposal at `slot` with
    /// the given signing root, recording the decision atomically.
    ///
    /// # Errors
    ///
    /// Returns an error when the decision cannot be made or recorded; the
    /// caller must treat that as a refusal (fail closed).
    pub fn may_sign_block(
        &self,
        pubkey: &PublicKey,
        signing_root: &SigningRoot,
        slot: u64,
        genesis_validators_root: &Bytes32,
    ) -> Result<bool, StoreError> {
        to_column(slot)?;
        let (allowed, seen) = self.store.with_write_tx(|tx| {
            let (validator_id, seen) = self.resolve_validator(tx, pubkey)?;
            if !self.network_and_status_checks(tx, validator_id, pubkey, genesis_validators_root)? {
                return Ok((false, seen));
            }
            if let Some(ceiling) =
                metadata::high_watermark(tx)?.and_then(|hw| hw.slot)
            {
                if slot >= ceiling {
                    warn!(
                        validator = %pubkey,
                        slot,
                        ceiling,
                        "refusing block proposal at or beyond high watermark"
                    );
                    return Ok((false, seen));
                }
            }
            let rules = BlockRules {
                tx,
                validator_id,
                pubkey,
                signing_root,
                slot,
            };
            Ok::<_, StoreError>((rules.evaluate_and_record()?, seen))
        })?;
        self.commit_registration(seen);
        Ok(allowed)
    }

    /// Decides whether `pubkey` may sign an attestation voting
    /// `source_epoch -> target_epoch`, recording the decision atomically.
    ///
    /// # Errors
    ///
    /// Returns an error when the decision cannot be made or recorded; the
    /// caller must treat that as a refusal (fail closed).
    pub fn may_sign_attestation(
        &self,
        pubkey: &PublicKey,
        signing_root: &SigningRoot,
        source_epoch: u64,
        target_epoch: u64,
        genesis_validators_root: &Bytes32,
    ) -> Result<bool, StoreError> {
        to_column(source_epoch)?;
        to_column(target_epoch)?;
        let (allowed, seen) = self.store.with_write_tx(|tx| {
            let (validator_id, seen) = self.resolve_validator(tx, pubkey)?;
            if !self.network_and_status_checks(tx, validator_id, pubkey, genesis_validators_root)? {
                return Ok((false, seen));
            }
            if source_epoch > target_epoch {
                warn!(
                    validator = %pubkey,
                    source_epoch,
                    target_epoch,
                    "refusing malformed attestation: source epoch after target epoch"
                );
                return Ok((false, seen));
            }
            if let Some(ceiling) = metadata::high_watermark(tx)?.and_then(|hw| hw.epoch) {
                if source_epoch >= ceiling || target_epoch >= ceiling {
                    warn!(
                        validator = %pubkey,
                        source_epoch,
                        target_epoch,
                        ceiling,
                        "refusing attestation at or beyond high watermark"
                    );
                    return Ok((false, seen));
                }
            }
            let rules = AttestationRules {
                tx,
                validator_id,
                pubkey,
                signing_root,
                source_epoch,
                target_epoch,
            };
            Ok::<_, StoreError>((rules.evaluate_and_record()?, seen))
        })?;
        self.commit_registration(seen);
        Ok(allowed)
    }

    /// Enables or disables signing for a registered validator.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UnknownValidator`] for an unregistered key.
    pub fn set_validator_enabled(
        &self,
        pubkey: &PublicKey,
        enabled: bool,
    ) -> Result<(), StoreError> {
        let id = self.store.with_write_tx(|tx| {
            let id = match self.registry.id_for(pubkey) {
                Some(id) => id,
                None => validators::find_id(tx, pubkey)?.ok_or_else(|| {
                    StoreError::UnknownValidator {
                        pubkey: pubkey.clone(),
                    }
                })?,
            };
            validators::set_enabled(tx, id, enabled)?;
            Ok::<_, StoreError>(id)
        })?;
        self.registry.record(pubkey.clone(), id);
        info!(validator = %pubkey, enabled, "updated validator signing status");
        Ok(())
    }

    /// The high watermark ceiling, if one is set.
    pub fn high_watermark(&self) -> Result<Option<HighWatermark>, StoreError> {
        self.store.with_read_tx(metadata::high_watermark)
    }

    /// Sets the high watermark ceiling. Signing at or beyond it is refused
    /// until the ceiling is removed.
    ///
    /// # Errors
    ///
    /// Fails if the database has not yet been scoped to a network.
    pub fn set_high_watermark(&self, watermark: HighWatermark) -> Result<(), StoreError> {
        self.store
            .with_write_tx(|tx| metadata::set_high_watermark(tx, watermark))?;
        info!(slot = ?watermark.slot, epoch = ?watermark.epoch, "set high watermark");
        Ok(())
    }

    /// Removes the high watermark ceiling.
    pub fn remove_high_watermark(&self) -> Result<(), StoreError> {
        self.store.with_write_tx(metadata::clear_high_watermark)?;
        info!("removed high watermark");
        Ok(())
    }

    /// Exports the whole database as an interchange document.
    ///
    /// # Errors
    ///
    /// Fails on an unscoped database, on storage failure, or when the sink
    /// cannot be written.
    pub fn export(&self, output: impl Write) -> Result<(), InterchangeError> {
        interchange::export_all(self, output)
    }

    /// Exports only the listed validators as an interchange document.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`Self::export`].
    pub fn export_with_filter(
        &self,
        output: impl Write,
        pubkeys: &[PublicKey],
    ) -> Result<(), InterchangeError> {
        interchange::export_filtered(self, output, pubkeys)
    }

    /// Opens a streaming export session over `output`.
    ///
    /// # Errors
    ///
    /// Fails on an unscoped database or when the sink cannot be written.
    pub fn create_incremental_exporter<W: Write>(
        &self,
        output: W,
    ) -> Result<IncrementalExporter<'_, W>, InterchangeError> {
        IncrementalExporter::begin(self, output)
    }

    /// Imports an interchange document as one atomic transaction.
    ///
    /// # Errors
    ///
    /// Any parse failure, invariant violation or network mismatch rolls
    /// the whole import back, leaving the database exactly as it was.
    pub fn import_data(&self, input: impl Read) -> Result<(), InterchangeError> {
        interchange::import_data(self, input)
    }

    /// The interned id for a registered public key, if any.
    pub fn validator_id(&self, pubkey: &PublicKey) -> Result<Option<i64>, StoreError> {
        if let Some(id) = self.registry.id_for(pubkey) {
            return Ok(Some(id));
        }
        let id = self.store.with_read_tx(|tx| validators::find_id(tx, pubkey))?;
        if let Some(id) = id {
            self.registry.record(pubkey.clone(), id);
        }
        Ok(id)
    }

    /// Prunes every validator, keeping `epochs_to_keep` attestation entries
    /// and `epochs_to_keep * slots_per_epoch` block entries each.
    ///
    /// # Errors
    ///
    /// Fails on storage failure or zero/overflowing retention counts.
    pub fn prune(
        &self,
        epochs_to_keep: u64,
        slots_per_epoch: u64,
    ) -> Result<PruneSummary, StoreError> {
        pruner::prune_all(self, epochs_to_keep, slots_per_epoch)
    }

    /// Prunes every validator with the default retention settings.
    ///
    /// # Errors
    ///
    /// Fails on storage failure.
    pub fn prune_with_defaults(&self) -> Result<PruneSummary, StoreError> {
        let config = PrunerConfig::default();
        pruner::prune_all(self, config.epochs_to_keep, config.slots_per_epoch)
    }

    fn resolve_validator(
        &self,
        tx: &rusqlite::Transaction<'_>,
        pubkey: &PublicKey,
    ) -> Result<(i64, Option<(PublicKey, i64)>), StoreError> {
        if let Some(id) = self.registry.id_for(pubkey) {
            return Ok((id, None));
        }
        let id = validators::intern(tx, pubkey)?;
        Ok((id, Some((pubkey.clone(), id))))
    }

    fn commit_registration(&self, seen: Option<(PublicKey, i64)>) {
        if let Some((pubkey, id)) = seen {
            self.registry.record(pubkey, id);
        }
    }

    /// The checks shared by both request kinds: network identity and the
    /// validator's enabled flag.
    fn network_and_status_checks(
        &self,
        tx: &rusqlite::Transaction<'_>,
        validator_id: i64,
        pubkey: &PublicKey,
        genesis_validators_root: &Bytes32,
    ) -> Result<bool, StoreError> {
        if let GvrCheck::Mismatch { stored } =
            metadata::check_or_insert_genesis_root(tx, genesis_validators_root)?
        {
            warn!(
                validator = %pubkey,
                supplied = %genesis_validators_root,
                stored = %stored,
                "refusing signing request for a different network"
            );
            return Ok(false);
        }
        if !validators::is_enabled(tx, validator_id)? {
            warn!(validator = %pubkey, "refusing signing request for disabled validator");
            return Ok(false);
        }
        Ok(true)
    }
}
