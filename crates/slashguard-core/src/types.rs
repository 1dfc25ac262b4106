//! Byte-value newtypes used throughout the slashing-protection store.
//!
//! All of these render as `0x`-prefixed lowercase hex, which is also the
//! representation used by the interchange document. Parsing accepts the
//! prefix case-insensitively but requires it to be present.

use std::fmt;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Errors raised when parsing a hex byte string.
#[derive(Debug, Error, PartialEq)]
#[non_exhaustive]
pub enum ParseBytesError {
    /// The string did not start with `0x`.
    #[error("byte string must start with 0x")]
    MissingPrefix,

    /// The remainder of the string was not valid hex.
    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    /// The decoded value had the wrong length.
    #[error("expected {expected} bytes, got {actual}")]
    WrongLength {
        /// Required number of bytes.
        expected: usize,
        /// Number of bytes actually decoded.
        actual: usize,
    },
}

fn decode_0x_hex(s: &str) -> Result<Vec<u8>, ParseBytesError> {
    let stripped = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .ok_or(ParseBytesError::MissingPrefix)?;
    Ok(hex::decode(stripped)?)
}

/// A fixed 32-byte value: signing roots and the genesis validators root.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Bytes32([u8; 32]);

impl Bytes32 {
    /// Wraps a raw 32-byte array.
    #[must_use]
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// A `Bytes32` whose low byte is `b` and all other bytes are zero.
    ///
    /// Mostly useful for building distinguishable values in tests.
    #[must_use]
    pub const fn left_pad(b: u8) -> Self {
        let mut bytes = [0u8; 32];
        bytes[31] = b;
        Self(bytes)
    }

    /// Copies a 32-byte slice into a `Bytes32`.
    pub fn from_slice(slice: &[u8]) -> Result<Self, ParseBytesError> {
        let bytes: [u8; 32] =
            slice
                .try_into()
                .map_err(|_| ParseBytesError::WrongLength {
                    expected: 32,
                    actual: slice.len(),
                })?;
        Ok(Self(bytes))
    }

    /// The underlying bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// The underlying bytes as a slice, convenient for SQL binding.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Bytes32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Bytes32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Bytes32({self})")
    }
}

impl FromStr for Bytes32 {
    type Err = ParseBytesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_slice(&decode_0x_hex(s)?)
    }
}

impl Serialize for Bytes32 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Bytes32 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}

/// A signed artifact's digest, treated as an opaque comparison key.
pub type SigningRoot = Bytes32;

/// A validator's public key.
///
/// The store never interprets the key material; it is an opaque identity
/// interned to an integer id on first registration. Length is therefore not
/// validated here.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PublicKey(Vec<u8>);

impl PublicKey {
    /// Wraps raw key bytes.
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// The underlying bytes as a slice.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for PublicKey {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&[u8]> for PublicKey {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(&self.0))
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({self})")
    }
}

impl FromStr for PublicKey {
    type Err = ParseBytesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(decode_0x_hex(s)?))
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}
