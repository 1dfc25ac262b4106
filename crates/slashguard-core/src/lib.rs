//! slashguard-core - domain types for the slashguard slashing-protection
//! store.
//!
//! This crate holds everything that does not touch a database: the byte-value
//! newtypes used to identify validators and signed artifacts, the serde model
//! of the versioned interchange document, and small pure helpers shared by
//! the store and the interchange codec.
//!
//! # Modules
//!
//! - [`types`]: `Bytes32`, [`PublicKey`] and [`SigningRoot`] with
//!   `0x`-prefixed hex parsing and formatting
//! - [`interchange`]: the version `"5"` interchange document model
//! - [`min_tracker`]: optional-minimum tracking used for watermark
//!   recomputation during imports

pub mod interchange;
pub mod min_tracker;
pub mod types;

pub use interchange::{
    InterchangeDocument, Metadata, SignedAttestationRecord, SignedBlockRecord, ValidatorHistory,
    FORMAT_VERSION,
};
pub use min_tracker::MinValueTracker;
pub use types::{Bytes32, ParseBytesError, PublicKey, SigningRoot};
