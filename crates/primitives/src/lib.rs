//! This crate contains the general types and pure functions that are shared across the federator
//! crates: transfers and batches, the validated unspent-output view of chain data, and the
//! federation's multisig descriptor.
//!
//! It lies at the bottom of the crate hierarchy in this workspace i.e., it does not depend on any
//! other crate in this workspace.

pub mod constants;
pub mod errors;
pub mod multisig;
pub mod transfer;
pub mod utxo;
