//! Errors returned by chain data sources.

use std::time::Duration;

use federator_primitives::{errors::ErrorKind, utxo::UtxoError};
use thiserror::Error;

/// Errors while talking to the chain.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    /// The call did not complete within the allotted time.
    #[error("chain request timed out after {0:?}")]
    Timeout(Duration),

    /// The node could not be reached or the request failed in transport.
    #[error("chain RPC failed: {0}")]
    Rpc(String),

    /// The node refused the request, e.g. a submitted transaction that spends an already spent
    /// output or pays too little fee.
    #[error("rejected by the network ({code}): {message}")]
    RejectedByNetwork {
        /// RPC error code returned by the node.
        code: i32,
        /// Message returned by the node.
        message: String,
    },

    /// The node answered with data that fails validation.
    #[error("invalid response from chain: {0}")]
    InvalidResponse(String),
}

impl ChainError {
    /// How callers should treat this error.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            ChainError::Timeout(_) | ChainError::Rpc(_) | ChainError::RejectedByNetwork { .. } => {
                ErrorKind::Resource
            }
            ChainError::InvalidResponse(_) => ErrorKind::Protocol,
        }
    }
}

impl From<UtxoError> for ChainError {
    fn from(err: UtxoError) -> Self {
        ChainError::InvalidResponse(err.to_string())
    }
}
