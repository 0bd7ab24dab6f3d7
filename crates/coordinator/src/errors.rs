//! Error types for signing, tracking and broadcasting candidates.

use bitcoin::{Amount, PublicKey, Txid};
use federator_btc_client::ChainError;
use federator_primitives::{errors::ErrorKind, transfer::BatchError};
use federator_tx_builder::{AssemblyError, CandidateError, CodecError};
use thiserror::Error;

use crate::state::CandidateState;

/// Errors while validating, signing or finalizing a candidate.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// The local signing key is not part of the federation.
    #[error("own key {0} is not a cosigner of the federation")]
    NotACosigner(PublicKey),

    /// The candidate asks for a different quorum than the federation's.
    #[error("candidate requires {declared} signatures but the federation requires {expected}")]
    QuorumMismatch {
        /// Required signatures declared by the candidate.
        declared: usize,
        /// The federation's threshold.
        expected: usize,
    },

    /// The candidate's outputs do not decode into a batch.
    #[error("candidate does not decode: {0}")]
    Codec(#[from] CodecError),

    /// The candidate itself is inconsistent.
    #[error("malformed candidate: {0}")]
    Candidate(#[from] CandidateError),

    /// An input does not spend a federation output, or its parent data is inconsistent.
    #[error("input {index} is invalid: {reason}")]
    ForeignInput {
        /// Index of the offending input.
        index: usize,
        /// What is wrong with it.
        reason: String,
    },

    /// The change output does not return the remaining funds to the federation.
    #[error("last output does not pay the federation's multisig script")]
    InvalidChangeOutput,

    /// The transaction does not pay the fee implied by its shape and the federation's fee rate.
    #[error("candidate spends {inputs} into {outputs} of outputs but the fee should be {expected}")]
    UnexpectedFee {
        /// Total value of the spent outputs.
        inputs: Amount,
        /// Total value of the transaction's outputs.
        outputs: Amount,
        /// Fee from the federation's fee estimator.
        expected: Amount,
    },

    /// The decoded batch contains transfers the local node has not authorized.
    #[error("unauthorized batch: {0}")]
    UnauthorizedBatch(String),

    /// Some signers supplied signatures that do not verify.
    #[error("invalid signatures from {signers:?}")]
    InvalidSignature {
        /// Keys whose signatures failed verification.
        signers: Vec<PublicKey>,
    },

    /// The witness of a finalized input does not satisfy the multisig script.
    #[error("witness of input {input} does not satisfy the multisig script")]
    InvalidWitness {
        /// Index of the offending input.
        input: usize,
    },

    /// The signature hash of an input could not be computed.
    #[error("cannot compute the signature hash of input {index}: {reason}")]
    Sighash {
        /// Index of the offending input.
        index: usize,
        /// Underlying failure.
        reason: String,
    },
}

impl CoordinatorError {
    /// How callers should treat this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoordinatorError::NotACosigner(_) => ErrorKind::Input,
            CoordinatorError::Candidate(err) => err.kind(),
            _ => ErrorKind::Protocol,
        }
    }

    /// Whether the failure lies in the unsigned transaction itself.
    ///
    /// Every copy of a candidate shares its unsigned transaction, so such a failure holds for all
    /// copies with the same id. Failures in per-copy data such as parent transactions, the
    /// declared quorum or the signatures do not.
    pub const fn condemns_transaction(&self) -> bool {
        matches!(
            self,
            CoordinatorError::Codec(_)
                | CoordinatorError::InvalidChangeOutput
                | CoordinatorError::UnexpectedFee { .. }
                | CoordinatorError::UnauthorizedBatch(_)
        )
    }
}

/// Errors while handing a final transaction to the network.
#[derive(Debug, Error)]
pub enum BroadcastError {
    /// The final transaction failed re-verification.
    #[error("final transaction failed verification: {0}")]
    Verification(#[from] CoordinatorError),

    /// The chain rejected the transaction or did not answer in time.
    #[error(transparent)]
    Chain(#[from] ChainError),
}

impl BroadcastError {
    /// How callers should treat this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            BroadcastError::Verification(err) => err.kind(),
            BroadcastError::Chain(err) => err.kind(),
        }
    }
}

/// Errors from the in-flight candidate registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The registry tracks as many candidates as allowed.
    #[error("registry is full ({capacity} candidates in flight)")]
    Full {
        /// Configured capacity.
        capacity: usize,
    },

    /// The candidate already reached a terminal state.
    #[error("candidate {id} is already {state}")]
    Finished {
        /// Id of the candidate.
        id: Txid,
        /// The terminal state it reached.
        state: CandidateState,
    },

    /// A transfer is already promised to another candidate.
    #[error("transfer {nonce} is already reserved by candidate {holder}")]
    Reserved {
        /// Nonce of the transfer.
        nonce: u8,
        /// Id of the candidate holding it.
        holder: Txid,
    },
}

impl RegistryError {
    /// How callers should treat this error.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            RegistryError::Full { .. } => ErrorKind::Resource,
            RegistryError::Finished { .. } => ErrorKind::Input,
            RegistryError::Reserved { .. } => ErrorKind::Protocol,
        }
    }
}

/// Errors surfaced by [`FederatorService`](crate::FederatorService).
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Received bytes are not a candidate.
    #[error(transparent)]
    Candidate(#[from] CandidateError),

    /// The candidate was rejected.
    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),

    /// A new candidate could not be built.
    #[error(transparent)]
    Assembly(#[from] AssemblyError),

    /// The authorized transfers do not form a valid batch.
    #[error(transparent)]
    Batch(#[from] BatchError),

    /// A chain call failed.
    #[error(transparent)]
    Chain(#[from] ChainError),

    /// The final transaction could not be broadcast.
    #[error(transparent)]
    Broadcast(#[from] BroadcastError),

    /// The registry refused the candidate.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl ServiceError {
    /// How callers should treat this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::Candidate(err) => err.kind(),
            ServiceError::Coordinator(err) => err.kind(),
            ServiceError::Assembly(err) => err.kind(),
            ServiceError::Batch(err) => err.kind(),
            ServiceError::Chain(err) => err.kind(),
            ServiceError::Broadcast(err) => err.kind(),
            ServiceError::Registry(err) => err.kind(),
        }
    }
}
