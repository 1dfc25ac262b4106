//! Interchange codec: bit-exact import and export of the protection
//! ledger in the versioned JSON exchange format.
//!
//! Import is all-or-nothing: one transaction covers the entire document,
//! so a single bad record leaves the database untouched. Export streams
//! one validator at a time and never buffers the whole ledger.

mod export;
mod import;

#[cfg(test)]
mod tests;

pub use export::{export_all, export_filtered, IncrementalExporter};
pub use import::import_data;
