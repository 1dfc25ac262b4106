//! In-memory map of registered validators.
//!
//! Validator ids are assigned once and never reused or reassigned, so a
//! pubkey-to-id mapping can be cached safely. Nothing else may be cached:
//! ledger and watermark state must always be read from the database inside
//! the deciding transaction.

use std::collections::HashMap;
use std::sync::RwLock;

use slashguard_core::types::PublicKey;

/// Bidirectional pubkey/id map, filled lazily as validators are seen.
#[derive(Debug, Default)]
pub struct ValidatorRegistry {
    inner: RwLock<Maps>,
}

#[derive(Debug, Default)]
struct Maps {
    by_key: HashMap<PublicKey, i64>,
    by_id: HashMap<i64, PublicKey>,
}

impl ValidatorRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached id for a public key, if this process has seen it.
    pub fn id_for(&self, pubkey: &PublicKey) -> Option<i64> {
        self.inner.read().unwrap().by_key.get(pubkey).copied()
    }

    /// The cached public key for an id, if this process has seen it.
    pub fn key_for(&self, validator_id: i64) -> Option<PublicKey> {
        self.inner.read().unwrap().by_id.get(&validator_id).cloned()
    }

    /// Records a committed pubkey/id pair.
    ///
    /// Only call this after the transaction that created or observed the
    /// row has committed; caching a rolled-back id would poison every
    /// later decision for that key.
    pub fn record(&self, pubkey: PublicKey, validator_id: i64) {
        let mut maps = self.inner.write().unwrap();
        maps.by_key.insert(pubkey.clone(), validator_id);
        maps.by_id.insert(validator_id, pubkey);
    }

    /// Records a batch of committed pairs.
    pub fn record_all(&self, pairs: impl IntoIterator<Item = (PublicKey, i64)>) {
        let mut maps = self.inner.write().unwrap();
        for (pubkey, validator_id) in pairs {
            maps.by_key.insert(pubkey.clone(), validator_id);
            maps.by_id.insert(validator_id, pubkey);
        }
    }
}
