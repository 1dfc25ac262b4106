//! Serde model of the versioned slashing-protection interchange document.
//!
//! The document migrates protection history between independent signer
//! implementations, so the shape here is binding: a `metadata` object naming
//! the format version and the genesis validators root, and a `data` array
//! with one entry per validator. Slot and epoch fields are emitted as
//! base-10 strings but must be accepted as either strings or JSON numbers.

use serde::{Deserialize, Serialize};

use crate::types::{Bytes32, PublicKey, SigningRoot};

/// The interchange format version this codec reads and writes.
pub const FORMAT_VERSION: &str = "5";

/// A complete interchange document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterchangeDocument {
    /// Format version and network identity.
    pub metadata: Metadata,

    /// Per-validator protection history. A missing array is an empty import.
    #[serde(default)]
    pub data: Vec<ValidatorHistory>,
}

/// The `metadata` object of an interchange document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// Interchange format version, currently the string `"5"`.
    #[serde(rename = "interchange_format_version")]
    pub format_version: String,

    /// The network this protection data is scoped to.
    pub genesis_validators_root: Bytes32,
}

/// One validator's exported history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorHistory {
    /// The validator's public key, hex encoded.
    pub pubkey: PublicKey,

    #[serde(default)]
    pub signed_blocks: Vec<SignedBlockRecord>,

    #[serde(default)]
    pub signed_attestations: Vec<SignedAttestationRecord>,
}

/// A previously signed block proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedBlockRecord {
    #[serde(with = "quoted_u64")]
    pub slot: u64,

    /// Absent in legacy data that predates root tracking.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signing_root: Option<SigningRoot>,
}

/// A previously signed attestation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedAttestationRecord {
    #[serde(with = "quoted_u64")]
    pub source_epoch: u64,

    #[serde(with = "quoted_u64")]
    pub target_epoch: u64,

    /// Absent in legacy data that predates root tracking.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signing_root: Option<SigningRoot>,
}

/// Serde codec for slot/epoch fields: emits base-10 strings, accepts both
/// strings and JSON numbers.
pub mod quoted_u64 {
    use std::fmt;

    use serde::de::Visitor;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        struct QuotedU64Visitor;

        impl<'de> Visitor<'de> for QuotedU64Visitor {
            type Value = u64;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("a u64 or a base-10 numeric string")
            }

            fn visit_u64<E: serde::de::Error>(self, value: u64) -> Result<u64, E> {
                Ok(value)
            }

            fn visit_i64<E: serde::de::Error>(self, value: i64) -> Result<u64, E> {
                u64::try_from(value)
                    .map_err(|_| E::custom(format!("negative value {value} is not a valid u64")))
            }

            fn visit_str<E: serde::de::Error>(self, value: &str) -> Result<u64, E> {
                value
                    .parse()
                    .map_err(|_| E::custom(format!("{value:?} is not a base-10 u64")))
            }
        }

        deserializer.deserialize_any(QuotedU64Visitor)
    }
}

impl Metadata {
    /// Builds a current-version metadata object for the given network.
    #[must_use]
    pub fn current(genesis_validators_root: Bytes32) -> Self {
        Self {
            format_version: FORMAT_VERSION.to_owned(),
            genesis_validators_root,
        }
    }

    /// Whether this document's version is one the codec understands.
    #[must_use]
    pub fn is_supported_version(&self) -> bool {
        self.format_version == FORMAT_VERSION
    }
}
