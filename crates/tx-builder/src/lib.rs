//! Construction of the federation's batch payout transactions.
//!
//! This crate turns a [`TransferBatch`](federator_primitives::transfer::TransferBatch) and the
//! federation's unspent outputs into an unsigned [`CandidateTransaction`], and turns any
//! candidate received from a peer back into the batch it pays out. Everything here is pure: no
//! I/O, no signing.

pub mod assembler;
pub mod candidate;
pub mod codec;
pub mod errors;
pub mod fees;
mod tx;

pub use assembler::TransactionAssembler;
pub use candidate::CandidateTransaction;
pub use errors::{AssemblyError, CandidateError, CodecError, SelectionError};
pub use fees::{FeeEstimator, InputKind, OutputKind};
