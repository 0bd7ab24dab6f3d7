//! This crate provides deterministic fixtures for testing the federator crates.
//!
//! Keys, addresses and funding outputs are derived from small integer seeds so that tests are
//! reproducible and failures can be replayed.

pub mod chain;
pub mod federation;
pub mod fixtures;

pub use chain::{MockChain, SubmitBehavior};
pub use federation::{federation, Federation};
pub use fixtures::{
    funding_output, funding_utxo, sample_batch, sample_destination, sample_p2pkh_address,
    sample_transfer,
};
