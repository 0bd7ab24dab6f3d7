//! The chain data interface consumed by the federator.

use std::fmt::Debug;

use async_trait::async_trait;
use bitcoin::{Address, Transaction, Txid};
use federator_primitives::utxo::UnspentOutput;

use crate::errors::ChainError;

/// Read and submit access to the Bitcoin chain.
///
/// Implementations validate everything they return: outputs come with their parent transaction
/// already checked against the outpoint and amount.
#[async_trait]
pub trait ChainDataSource: Debug + Send + Sync {
    /// Lists the confirmed, unspent outputs paying to `address`.
    async fn list_unspent(&self, address: &Address) -> Result<Vec<UnspentOutput>, ChainError>;

    /// Fetches the transaction with id `txid`.
    async fn get_parent_transaction(&self, txid: Txid) -> Result<Transaction, ChainError>;

    /// Hands a fully signed transaction to the network.
    async fn submit_raw_transaction(&self, tx: &Transaction) -> Result<Txid, ChainError>;
}
