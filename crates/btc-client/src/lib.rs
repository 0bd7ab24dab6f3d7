//! Access to the Bitcoin chain data the federator needs.
//!
//! The federator only ever lists the federation's unspent outputs, fetches the transactions that
//! created them, and submits finalized payouts. [`ChainDataSource`] captures exactly that surface
//! so the rest of the node can be tested against an in-memory chain; [`BitcoinCoreClient`]
//! implements it over a `bitcoind` JSON-RPC connection.

pub mod bitcoin_core;
pub mod config;
pub mod errors;
pub mod source;

pub use bitcoin_core::BitcoinCoreClient;
pub use config::BtcClientConfig;
pub use errors::ChainError;
pub use source::ChainDataSource;
