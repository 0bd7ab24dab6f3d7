//! The validated view of a spendable output owned by the federation.
//!
//! Chain data sources return loosely-typed RPC responses; they are converted into
//! [`UnspentOutput`] at the boundary so that the rest of the system only ever handles outputs
//! whose parent transaction is present and consistent with the claimed outpoint and value.

use bitcoin::{consensus, Amount, OutPoint, ScriptBuf, Transaction, TxOut, Txid};

use crate::errors::ErrorKind;

/// Error while validating an unspent output reported by a chain data source.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UtxoError {
    /// The supplied parent transaction is not the one referenced by the outpoint.
    #[error("parent transaction {found} does not match outpoint txid {expected}")]
    ParentMismatch {
        /// Txid referenced by the outpoint.
        expected: Txid,
        /// Txid of the supplied parent transaction.
        found: Txid,
    },

    /// The parent transaction has no output at the referenced index.
    #[error("parent transaction has no output at index {0}")]
    MissingOutput(u32),

    /// The reported amount differs from the parent's output value.
    #[error("reported amount {reported} differs from parent output value {actual}")]
    AmountMismatch {
        /// Amount reported by the data source.
        reported: Amount,
        /// Value of the parent transaction's output.
        actual: Amount,
    },

    /// The raw parent transaction bytes do not decode.
    #[error("malformed parent transaction: {0}")]
    MalformedParent(String),
}

impl UtxoError {
    /// Inconsistent chain data is never retried as is.
    pub const fn kind(&self) -> ErrorKind {
        ErrorKind::Protocol
    }
}

/// An unspent output together with the full transaction that created it.
///
/// The parent transaction is needed to sign multisig inputs safely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnspentOutput {
    outpoint: OutPoint,
    amount: Amount,
    confirmations: u32,
    parent_tx: Transaction,
}

impl UnspentOutput {
    /// Creates a new [`UnspentOutput`] after checking it against its parent transaction.
    pub fn new(
        outpoint: OutPoint,
        amount: Amount,
        confirmations: u32,
        parent_tx: Transaction,
    ) -> Result<Self, UtxoError> {
        let found = parent_tx.compute_txid();
        if found != outpoint.txid {
            return Err(UtxoError::ParentMismatch {
                expected: outpoint.txid,
                found,
            });
        }

        let actual = parent_tx
            .output
            .get(outpoint.vout as usize)
            .ok_or(UtxoError::MissingOutput(outpoint.vout))?
            .value;
        if actual != amount {
            return Err(UtxoError::AmountMismatch {
                reported: amount,
                actual,
            });
        }

        Ok(Self {
            outpoint,
            amount,
            confirmations,
            parent_tx,
        })
    }

    /// Like [`UnspentOutput::new`] but takes the consensus-encoded parent transaction.
    pub fn from_raw_parent(
        outpoint: OutPoint,
        amount: Amount,
        confirmations: u32,
        raw_parent: &[u8],
    ) -> Result<Self, UtxoError> {
        let parent_tx: Transaction = consensus::deserialize(raw_parent)
            .map_err(|e| UtxoError::MalformedParent(e.to_string()))?;

        Self::new(outpoint, amount, confirmations, parent_tx)
    }

    /// The outpoint being spent.
    pub const fn outpoint(&self) -> OutPoint {
        self.outpoint
    }

    /// Value of the output.
    pub const fn amount(&self) -> Amount {
        self.amount
    }

    /// Number of confirmations at the time the output was listed.
    pub const fn confirmations(&self) -> u32 {
        self.confirmations
    }

    /// The transaction that created this output.
    pub const fn parent_tx(&self) -> &Transaction {
        &self.parent_tx
    }

    /// The output itself, as found in the parent transaction.
    pub fn txout(&self) -> &TxOut {
        // index checked on construction
        &self.parent_tx.output[self.outpoint.vout as usize]
    }

    /// The locking script of the output.
    pub fn script_pubkey(&self) -> &ScriptBuf {
        &self.txout().script_pubkey
    }
}
