//! Error taxonomy for the slashing-protection store.
//!
//! Policy denials are not errors: the authorization engine answers them as
//! `Ok(false)`. The types here cover malformed input, integrity conflicts
//! and storage failures, all of which must surface as hard failures so the
//! caller fails closed.

use slashguard_core::types::{Bytes32, PublicKey};
use thiserror::Error;

/// Errors raised by the store and the authorization engine.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// Database error from `SQLite`.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// I/O error during database operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A slot or epoch too large for a 64-bit signed integer column.
    #[error("slot or epoch {value} exceeds the storable range")]
    ValueOutOfRange {
        /// The offending value.
        value: u64,
    },

    /// Pruning invoked with a zero or overflowing retention count.
    #[error("retention counts must be positive")]
    InvalidRetention,

    /// A public key that has no validator row and was not allowed to create
    /// one in this context.
    #[error("unknown validator {pubkey}")]
    UnknownValidator {
        /// The unregistered public key.
        pubkey: PublicKey,
    },
}

/// Errors raised by interchange import and export.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum InterchangeError {
    /// The document could not be parsed at all.
    #[error("failed to parse interchange document: {0}")]
    Parse(#[from] serde_json::Error),

    /// The document declares a format version this codec does not speak.
    #[error("expecting an interchange_format_version of 5, got {found:?}")]
    UnsupportedVersion {
        /// The version string found in the document.
        found: String,
    },

    /// The document's genesis validators root conflicts with the one this
    /// database is already scoped to.
    #[error("supplied genesis validators root {supplied} does not match value in database {stored}")]
    GenesisValidatorsRootMismatch {
        /// The root already persisted.
        stored: Bytes32,
        /// The root carried by the document.
        supplied: Bytes32,
    },

    /// An attestation whose source epoch is after its target epoch.
    #[error(
        "attestation #{index} for validator {pubkey} has source epoch {source_epoch} \
         greater than target epoch {target_epoch}"
    )]
    SourceAfterTarget {
        /// Index of the record within the validator's attestation array.
        index: usize,
        /// The validator the record belongs to.
        pubkey: PublicKey,
        source_epoch: u64,
        target_epoch: u64,
    },

    /// Export was requested on a database that has never been scoped to a
    /// network.
    #[error("no genesis validators root for slashing protection data")]
    MissingGenesisValidatorsRoot,

    /// Underlying store failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// I/O failure on the export sink or import source.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rusqlite::Error> for InterchangeError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Store(StoreError::Database(err))
    }
}
