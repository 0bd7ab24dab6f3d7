//! Error types for building and decoding candidate transactions.

use bitcoin::{Amount, PublicKey, Txid};
use federator_primitives::errors::ErrorKind;
use thiserror::Error;

/// Errors while decoding a transaction's outputs back into a transfer batch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// The outputs do not have the shape of a batch payout.
    #[error("malformed batch: {0}")]
    MalformedBatch(String),

    /// The first output is not a zero-value `OP_RETURN` marker.
    #[error("invalid marker output: {0}")]
    InvalidMarkerOutput(String),

    /// A transfer output does not pay a segwit address on the federation's network.
    #[error("output {index} does not pay a supported destination")]
    InvalidDestination {
        /// Index of the offending output in the transaction.
        index: usize,
    },

    /// A transfer carries the reserved nonce.
    #[error("output {index} carries the reserved nonce {nonce:#04x}")]
    InvalidNonce {
        /// Index of the offending output in the transaction.
        index: usize,
        /// The nonce found in the marker.
        nonce: u8,
    },

    /// The decoded batch is larger than allowed.
    #[error("batch holds {size} transfers, exceeding the maximum of {max}")]
    BatchTooLarge {
        /// Number of transfers found.
        size: usize,
        /// Maximum number of transfers allowed.
        max: usize,
    },
}

impl CodecError {
    /// How callers should treat this error.
    ///
    /// Decoding only ever runs on candidates built by someone else, so every failure means the
    /// candidate must be rejected.
    pub const fn kind(&self) -> ErrorKind {
        ErrorKind::Protocol
    }
}

/// Errors while choosing the inputs of a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectionError {
    /// Even with every available output spent, the targets and fee cannot be covered.
    #[error("insufficient funds: {required} required but only {available} available")]
    InsufficientFunds {
        /// Sum of the targets and the fee for spending all available outputs.
        required: Amount,
        /// Sum of all available outputs.
        available: Amount,
    },
}

/// Errors while assembling a candidate transaction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssemblyError {
    /// The batch is larger than the configured maximum.
    #[error("batch holds {size} transfers, exceeding the maximum of {max}")]
    BatchTooLarge {
        /// Number of transfers in the batch.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// The federation cannot currently afford the batch.
    #[error("insufficient funds: {required} required but only {available} available")]
    InsufficientFunds {
        /// Sum of the transfers and the fee.
        required: Amount,
        /// Sum of the federation's spendable outputs.
        available: Amount,
    },

    /// The assembled transaction violates an invariant that selection should have guaranteed.
    #[error("internal inconsistency: {0}")]
    InternalInconsistency(String),
}

impl AssemblyError {
    /// How callers should treat this error.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            AssemblyError::BatchTooLarge { .. } => ErrorKind::Input,
            AssemblyError::InsufficientFunds { .. } => ErrorKind::Resource,
            AssemblyError::InternalInconsistency(_) => ErrorKind::Protocol,
        }
    }
}

impl From<SelectionError> for AssemblyError {
    fn from(err: SelectionError) -> Self {
        match err {
            SelectionError::InsufficientFunds {
                required,
                available,
            } => AssemblyError::InsufficientFunds {
                required,
                available,
            },
        }
    }
}

/// Errors while encoding, decoding or combining candidate transactions.
#[derive(Debug, Error)]
pub enum CandidateError {
    /// The serialized candidate could not be parsed.
    #[error("malformed candidate encoding: {0}")]
    Encoding(String),

    /// The embedded PSBT could not be parsed.
    #[error("malformed PSBT: {0}")]
    Psbt(#[from] bitcoin::psbt::Error),

    /// The same key appears twice in the signer list.
    #[error("{0} is listed as a signer more than once")]
    DuplicateSigner(PublicKey),

    /// The signer list and the signatures attached to an input disagree.
    #[error("signer list does not match the signatures on input {input}")]
    SignerMismatch {
        /// Index of the inconsistent input.
        input: usize,
    },

    /// The key has already contributed signatures to this candidate.
    #[error("{0} has already signed this candidate")]
    AlreadySigned(PublicKey),

    /// One signature per input is required.
    #[error("expected {expected} signatures (one per input) but got {got}")]
    SignatureCountMismatch {
        /// Number of inputs.
        expected: usize,
        /// Number of signatures supplied.
        got: usize,
    },

    /// The candidates being merged spend different transactions.
    #[error("cannot merge candidate {theirs} into {ours}")]
    DifferentTransaction {
        /// Id of the local candidate.
        ours: Txid,
        /// Id of the incoming candidate.
        theirs: Txid,
    },

    /// The candidates being merged disagree on the quorum.
    #[error("candidates require different numbers of signatures ({ours} vs {theirs})")]
    QuorumMismatch {
        /// Required signatures of the local candidate.
        ours: usize,
        /// Required signatures of the incoming candidate.
        theirs: usize,
    },
}

impl CandidateError {
    /// How callers should treat this error.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            CandidateError::AlreadySigned(_) | CandidateError::SignatureCountMismatch { .. } => {
                ErrorKind::Input
            }
            _ => ErrorKind::Protocol,
        }
    }
}

/// Wrapper type for results that can fail with a [`CandidateError`].
pub type CandidateResult<T> = Result<T, CandidateError>;
