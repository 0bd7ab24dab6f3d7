//! [`ChainDataSource`] over a `bitcoind` JSON-RPC connection.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use bitcoin::{Address, Amount, OutPoint, Transaction, Txid};
use bitcoincore_rpc::{jsonrpc, Auth, Client, RpcApi};
use federator_primitives::utxo::UnspentOutput;
use tracing::{debug, info, warn};

use crate::{config::BtcClientConfig, errors::ChainError, source::ChainDataSource};

/// `RPC_INVALID_ADDRESS_OR_KEY`, returned by `gettransaction` for non-wallet transactions.
const RPC_INVALID_ADDRESS_OR_KEY: i32 = -5;

/// Outputs need at least this many confirmations to be spent.
const MIN_CONFIRMATIONS: usize = 1;

/// A `bitcoind` client.
///
/// The federation address must be imported (watch-only) into the wallet the RPC url points at,
/// so that `listunspent` and `gettransaction` see its outputs.
#[derive(Debug, Clone)]
pub struct BitcoinCoreClient {
    client: Arc<Client>,
    timeout: Duration,
}

impl BitcoinCoreClient {
    /// Connects to the node described by `config`.
    pub fn new(config: &BtcClientConfig) -> Result<Self, ChainError> {
        let auth = Auth::UserPass(config.user.clone(), config.pass.clone());
        let client = Client::new(&config.url, auth).map_err(rpc_error)?;

        Ok(Self {
            client: Arc::new(client),
            timeout: config.timeout(),
        })
    }

    /// Runs a blocking RPC call on the blocking thread pool, bounded by the configured timeout.
    ///
    /// On timeout the call keeps running in the background but its result is discarded.
    async fn spawn_bitcoin_core<T, F>(&self, func: F) -> Result<T, ChainError>
    where
        T: Send + 'static,
        F: FnOnce(&Client) -> Result<T, ChainError> + Send + 'static,
    {
        let client = self.client.clone();
        let handle = tokio::task::spawn_blocking(move || func(&client));

        tokio::time::timeout(self.timeout, handle)
            .await
            .map_err(|_| ChainError::Timeout(self.timeout))?
            .map_err(|e| ChainError::Rpc(format!("RPC task failed: {e}")))?
    }
}

/// Pairs a listed output with its parent transaction.
///
/// Returns `None` when the parent could not be fetched or does not back the output, so one bad
/// entry does not hide the others.
fn checked_unspent(
    outpoint: OutPoint,
    amount: Amount,
    confirmations: u32,
    parent: Result<Transaction, ChainError>,
) -> Option<UnspentOutput> {
    let parent = parent
        .inspect_err(|e| warn!(%outpoint, %e, "skipping output whose parent is unavailable"))
        .ok()?;

    UnspentOutput::new(outpoint, amount, confirmations, parent)
        .inspect_err(|e| warn!(%outpoint, %e, "skipping output that disagrees with its parent"))
        .ok()
}

#[async_trait]
impl ChainDataSource for BitcoinCoreClient {
    async fn list_unspent(&self, address: &Address) -> Result<Vec<UnspentOutput>, ChainError> {
        let address = address.clone();
        let entries = self
            .spawn_bitcoin_core(move |client| {
                client
                    .list_unspent(Some(MIN_CONFIRMATIONS), None, Some(&[&address]), None, None)
                    .map_err(rpc_error)
            })
            .await?;
        debug!(count = entries.len(), "listed unspent outputs");

        let listed = entries.len();
        let mut utxos = Vec::with_capacity(listed);
        for entry in entries {
            let parent = self.get_parent_transaction(entry.txid).await;
            let outpoint = OutPoint {
                txid: entry.txid,
                vout: entry.vout,
            };

            utxos.extend(checked_unspent(
                outpoint,
                entry.amount,
                entry.confirmations,
                parent,
            ));
        }
        if utxos.len() < listed {
            warn!(listed, usable = utxos.len(), "some unspent outputs were skipped");
        }

        Ok(utxos)
    }

    async fn get_parent_transaction(&self, txid: Txid) -> Result<Transaction, ChainError> {
        self.spawn_bitcoin_core(move |client| match client.get_transaction(&txid, Some(true)) {
            Ok(result) => result
                .transaction()
                .map_err(|e| ChainError::InvalidResponse(e.to_string())),

            // not a wallet transaction, try the transaction index instead
            Err(bitcoincore_rpc::Error::JsonRpc(jsonrpc::Error::Rpc(e)))
                if e.code == RPC_INVALID_ADDRESS_OR_KEY =>
            {
                warn!(%txid, "parent is not a wallet transaction, falling back to txindex");
                client.get_raw_transaction(&txid, None).map_err(rpc_error)
            }

            Err(e) => Err(rpc_error(e)),
        })
        .await
    }

    async fn submit_raw_transaction(&self, tx: &Transaction) -> Result<Txid, ChainError> {
        let tx = tx.clone();
        let txid = self
            .spawn_bitcoin_core(move |client| {
                client.send_raw_transaction(&tx).map_err(|e| match e {
                    bitcoincore_rpc::Error::JsonRpc(jsonrpc::Error::Rpc(e)) => {
                        ChainError::RejectedByNetwork {
                            code: e.code,
                            message: e.message,
                        }
                    }
                    other => rpc_error(other),
                })
            })
            .await?;
        info!(%txid, "submitted transaction");

        Ok(txid)
    }
}

fn rpc_error(err: bitcoincore_rpc::Error) -> ChainError {
    ChainError::Rpc(err.to_string())
}

#[cfg(test)]
mod tests {
    use bitcoin::{absolute::LockTime, transaction::Version, ScriptBuf, TxOut};

    use super::*;

    fn parent(value: u64) -> Transaction {
        Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![],
            output: vec![TxOut {
                value: Amount::from_sat(value),
                script_pubkey: ScriptBuf::new(),
            }],
        }
    }

    fn outpoint(parent: &Transaction) -> OutPoint {
        OutPoint {
            txid: parent.compute_txid(),
            vout: 0,
        }
    }

    #[test]
    fn usable_output_is_kept() {
        let tx = parent(50_000);
        let utxo = checked_unspent(outpoint(&tx), Amount::from_sat(50_000), 3, Ok(tx.clone()))
            .expect("consistent output");

        assert_eq!(utxo.outpoint(), outpoint(&tx));
        assert_eq!(utxo.confirmations(), 3);
    }

    #[test]
    fn bad_entries_are_skipped() {
        let tx = parent(50_000);

        let unavailable = Err(ChainError::Timeout(Duration::from_secs(1)));
        assert!(checked_unspent(outpoint(&tx), Amount::from_sat(50_000), 3, unavailable).is_none());

        // node reports a different amount than the parent holds
        assert!(checked_unspent(outpoint(&tx), Amount::from_sat(1), 3, Ok(tx.clone())).is_none());

        // parent does not match the outpoint
        let other = parent(60_000);
        assert!(checked_unspent(outpoint(&tx), Amount::from_sat(60_000), 3, Ok(other)).is_none());
    }
}
