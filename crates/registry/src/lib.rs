//! Key Registry and Will Ledger
//!
//! This crate implements the review lifecycle of registered public keys and
//! the witness-signature state machine of wills. All state lives in an
//! external key/value ledger reached through [`testament_storage::KeyValueStore`];
//! nothing is cached in-process beyond a single call.

pub mod errors;
pub mod ledger;
pub mod registry;
pub mod types;
pub mod will;

#[cfg(test)]
mod test_utils;

pub use errors::*;
pub use ledger::Ledger;
pub use registry::Registry;
pub use types::*;
pub use will::WillLedger;
