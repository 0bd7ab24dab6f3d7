//! An in-memory [`ChainDataSource`].

use std::collections::BTreeSet;

use async_trait::async_trait;
use bitcoin::{Address, OutPoint, Transaction, Txid};
use federator_btc_client::{ChainDataSource, ChainError};
use federator_primitives::utxo::UnspentOutput;
use parking_lot::Mutex;

/// How [`MockChain`] answers submissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubmitBehavior {
    /// Accept transactions whose inputs are all unspent.
    #[default]
    Accept,

    /// Reject every submission with the given RPC error code.
    Reject(i32),

    /// Never answer.
    Hang,
}

/// A chain that holds a fixed set of unspent outputs and records what is submitted to it.
#[derive(Debug, Default)]
pub struct MockChain {
    utxos: Mutex<Vec<UnspentOutput>>,
    submitted: Mutex<Vec<Transaction>>,
    behavior: Mutex<SubmitBehavior>,
}

impl MockChain {
    /// A chain holding `utxos`.
    pub fn new(utxos: Vec<UnspentOutput>) -> Self {
        Self {
            utxos: Mutex::new(utxos),
            ..Default::default()
        }
    }

    /// Adds an unspent output.
    pub fn add_utxo(&self, utxo: UnspentOutput) {
        self.utxos.lock().push(utxo);
    }

    /// Changes how submissions are answered.
    pub fn set_behavior(&self, behavior: SubmitBehavior) {
        *self.behavior.lock() = behavior;
    }

    /// Transactions accepted so far.
    pub fn submitted(&self) -> Vec<Transaction> {
        self.submitted.lock().clone()
    }
}

#[async_trait]
impl ChainDataSource for MockChain {
    async fn list_unspent(&self, address: &Address) -> Result<Vec<UnspentOutput>, ChainError> {
        let script_pubkey = address.script_pubkey();

        Ok(self
            .utxos
            .lock()
            .iter()
            .filter(|utxo| *utxo.script_pubkey() == script_pubkey)
            .cloned()
            .collect())
    }

    async fn get_parent_transaction(&self, txid: Txid) -> Result<Transaction, ChainError> {
        self.utxos
            .lock()
            .iter()
            .find(|utxo| utxo.outpoint().txid == txid)
            .map(|utxo| utxo.parent_tx().clone())
            .ok_or_else(|| ChainError::InvalidResponse(format!("unknown transaction {txid}")))
    }

    async fn submit_raw_transaction(&self, tx: &Transaction) -> Result<Txid, ChainError> {
        let behavior = *self.behavior.lock();
        match behavior {
            SubmitBehavior::Accept => {}
            SubmitBehavior::Reject(code) => {
                return Err(ChainError::RejectedByNetwork {
                    code,
                    message: "rejected by mock chain".to_string(),
                })
            }
            SubmitBehavior::Hang => std::future::pending::<()>().await,
        }

        let spent: BTreeSet<OutPoint> = tx.input.iter().map(|input| input.previous_output).collect();

        let mut utxos = self.utxos.lock();
        let available: BTreeSet<OutPoint> = utxos.iter().map(UnspentOutput::outpoint).collect();
        if !spent.is_subset(&available) {
            return Err(ChainError::RejectedByNetwork {
                code: -25,
                message: "bad-txns-inputs-missingorspent".to_string(),
            });
        }

        utxos.retain(|utxo| !spent.contains(&utxo.outpoint()));
        self.submitted.lock().push(tx.clone());

        Ok(tx.compute_txid())
    }
}
