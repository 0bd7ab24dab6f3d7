//! Quorum signing of candidate transactions and their broadcast.
//!
//! A candidate moves through the states of [`CandidateState`]: it is built by one federator,
//! passed around and signed by the others, finalized once enough valid signatures are attached,
//! and finally handed to the network. Every federator validates a candidate independently before
//! signing it; nothing about a candidate's payout is trusted unless it decodes from the
//! transaction itself and matches the transfers the federator has authorized on its own.
//!
//! [`FederatorService`] ties the pieces together for a running node. Operations on one candidate
//! are serialized through the [`CandidateRegistry`]; different candidates proceed concurrently.

pub mod broadcaster;
pub mod coordinator;
pub mod errors;
pub mod registry;
pub mod service;
pub mod state;

pub use broadcaster::Broadcaster;
pub use coordinator::{FinalTransaction, FinalizeOutcome, SignOutcome, SignatureCoordinator};
pub use errors::{BroadcastError, CoordinatorError, RegistryError, ServiceError};
pub use registry::{CandidateRegistry, RegistryConfig};
pub use service::{FederatorService, HandleOutcome, TransferSource};
pub use state::CandidateState;
