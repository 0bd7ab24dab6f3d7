//! Provides the types associated with outgoing transfers and the batches that carry them.

use std::collections::BTreeSet;

use bitcoin::{address::NetworkUnchecked, Address, Amount, Network};
use serde::{Deserialize, Serialize};

use crate::{
    constants::{MAX_BATCH_SIZE, RESERVED_NONCE},
    errors::ErrorKind,
};

/// Error while creating a [`Transfer`] or a [`TransferBatch`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BatchError {
    /// The batch holds more transfers than allowed.
    #[error("batch holds {size} transfers, exceeding the maximum of {max}")]
    BatchTooLarge {
        /// Number of transfers in the rejected batch.
        size: usize,
        /// Maximum number of transfers allowed.
        max: usize,
    },

    /// A batch must carry at least one transfer.
    #[error("batch is empty")]
    EmptyBatch,

    /// Two transfers of the same batch share a nonce.
    #[error("nonce {0} appears more than once in the batch")]
    DuplicateNonce(u8),

    /// The nonce is the reserved value.
    #[error("nonce {0:#04x} is reserved and cannot be used")]
    InvalidNonce(u8),

    /// The transfer moves no value.
    #[error("transfer amount must be greater than zero")]
    ZeroAmount,

    /// The destination does not parse or is for another network.
    #[error("invalid destination address {address}: {reason}")]
    InvalidDestination {
        /// The address as supplied.
        address: String,
        /// Why it was rejected.
        reason: String,
    },
}

impl BatchError {
    /// How callers should treat this error.
    pub const fn kind(&self) -> ErrorKind {
        ErrorKind::Input
    }
}

/// A single payout authorized by the smart-contract chain.
///
/// Immutable once constructed; every field is validated on construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Transfer {
    /// Where the coins go.
    destination: Address,

    /// How many coins go there, always non-zero.
    amount: Amount,

    /// Per-transfer nonce assigned on the smart-contract chain, in `0..=254`.
    nonce: u8,
}

impl Transfer {
    /// Creates a new transfer.
    pub fn new(destination: Address, amount: Amount, nonce: u8) -> Result<Self, BatchError> {
        if nonce == RESERVED_NONCE {
            return Err(BatchError::InvalidNonce(nonce));
        }

        if amount == Amount::ZERO {
            return Err(BatchError::ZeroAmount);
        }

        Ok(Self {
            destination,
            amount,
            nonce,
        })
    }

    /// Validates a [`TransferRequest`] against the federation's network.
    pub fn from_request(request: &TransferRequest, network: Network) -> Result<Self, BatchError> {
        let invalid = |reason: String| BatchError::InvalidDestination {
            address: request.destination.clone(),
            reason,
        };

        let destination = request
            .destination
            .parse::<Address<NetworkUnchecked>>()
            .map_err(|e| invalid(e.to_string()))?
            .require_network(network)
            .map_err(|e| invalid(e.to_string()))?;

        Self::new(destination, Amount::from_sat(request.amount_sat), request.nonce)
    }

    /// Get the destination address.
    pub const fn destination(&self) -> &Address {
        &self.destination
    }

    /// Get the amount paid to the destination.
    pub const fn amount(&self) -> Amount {
        self.amount
    }

    /// Get the nonce.
    pub const fn nonce(&self) -> u8 {
        self.nonce
    }

    /// Converts the transfer back into its serializable request form.
    pub fn to_request(&self) -> TransferRequest {
        TransferRequest {
            destination: self.destination.to_string(),
            amount_sat: self.amount.to_sat(),
            nonce: self.nonce,
        }
    }
}

/// The unvalidated, serializable form of a [`Transfer`] as it arrives from the event source or a
/// file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    /// Destination address string.
    pub destination: String,

    /// Amount in satoshis.
    pub amount_sat: u64,

    /// Transfer nonce.
    pub nonce: u8,
}

/// An ordered, non-empty list of transfers paid out by a single transaction.
///
/// The order is significant: it is preserved one-to-one as the transaction's output order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferBatch(Vec<Transfer>);

impl TransferBatch {
    /// Creates a batch, rejecting empty or oversized batches and duplicate nonces.
    pub fn new(transfers: Vec<Transfer>) -> Result<Self, BatchError> {
        Self::with_max_size(transfers, MAX_BATCH_SIZE)
    }

    /// Like [`TransferBatch::new`] but with a lower size cap.
    ///
    /// `max` is clamped to [`MAX_BATCH_SIZE`].
    pub fn with_max_size(transfers: Vec<Transfer>, max: usize) -> Result<Self, BatchError> {
        let max = max.min(MAX_BATCH_SIZE);
        if transfers.len() > max {
            return Err(BatchError::BatchTooLarge {
                size: transfers.len(),
                max,
            });
        }

        if transfers.is_empty() {
            return Err(BatchError::EmptyBatch);
        }

        let mut seen = BTreeSet::new();
        for transfer in &transfers {
            if !seen.insert(transfer.nonce) {
                return Err(BatchError::DuplicateNonce(transfer.nonce));
            }
        }

        Ok(Self(transfers))
    }

    /// The transfers in batch order.
    pub fn transfers(&self) -> &[Transfer] {
        &self.0
    }

    /// Number of transfers in the batch.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always `false` for a constructed batch; provided for API completeness.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The nonces in batch order.
    pub fn nonces(&self) -> Vec<u8> {
        self.0.iter().map(Transfer::nonce).collect()
    }

    /// Sum of all transfer amounts, or `None` on overflow.
    pub fn total_amount(&self) -> Option<Amount> {
        self.0
            .iter()
            .try_fold(Amount::ZERO, |acc, transfer| acc.checked_add(transfer.amount))
    }

    /// Consumes the batch, returning the transfers.
    pub fn into_inner(self) -> Vec<Transfer> {
        self.0
    }
}

impl<'a> IntoIterator for &'a TransferBatch {
    type Item = &'a Transfer;
    type IntoIter = std::slice::Iter<'a, Transfer>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
