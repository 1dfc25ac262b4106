//! slashguard-store - the SQLite-backed slashing-protection store.
//!
//! This crate is the safety core of a remote validator signer: before any
//! signature is produced, the request handler asks [`SlashingProtection`]
//! whether the block or attestation is safe to sign. Every decision is
//! checked against, and recorded in, a transactional ledger of everything
//! the validator was previously authorized to sign, so a double proposal,
//! double vote or surround vote is refused even under concurrent load or
//! after a restart.
//!
//! # Modules
//!
//! - [`engine`]: the authorization engine and administrative surface
//! - [`db`]: connection and transaction management
//! - [`dao`]: table-level data access
//! - [`interchange`]: import/export in the versioned JSON exchange format
//! - [`pruner`]: retention pruning and the periodic pruning task
//! - [`registry`]: the in-memory pubkey/id map
//! - [`error`]: the error taxonomy
//!
//! # Example
//!
//! ```rust,no_run
//! use slashguard_core::types::{Bytes32, PublicKey};
//! use slashguard_store::SlashingProtection;
//!
//! # fn example() -> Result<(), slashguard_store::StoreError> {
//! let protection = SlashingProtection::open("/var/lib/signer/protection.db")?;
//! let pubkey = PublicKey::new(vec![0xb8; 48]);
//! let root = Bytes32::left_pad(1);
//! let network = Bytes32::left_pad(2);
//!
//! if protection.may_sign_block(&pubkey, &root, 81_952, &network)? {
//!     // hand the request to the signer
//! }
//! # Ok(())
//! # }
//! ```

pub mod dao;
pub mod db;
pub mod engine;
pub mod error;
pub mod interchange;
pub mod pruner;
pub mod registry;

pub use dao::metadata::HighWatermark;
pub use db::Store;
pub use engine::SlashingProtection;
pub use error::{InterchangeError, StoreError};
pub use interchange::IncrementalExporter;
pub use pruner::{PruneSummary, PrunerConfig, PrunerTask};
