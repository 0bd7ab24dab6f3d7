//! A federator node's handling of batch payouts.
//!
//! [`FederatorService`] is what the node's event loop drives: it proposes new candidates from the
//! authorized transfers, and processes candidates received from other federators. Every
//! collaborator is passed in through the constructor.

use std::{fmt::Debug, future::Future, sync::Arc, time::Duration};

use async_trait::async_trait;
use bitcoin::Txid;
use federator_btc_client::{ChainDataSource, ChainError};
use federator_primitives::transfer::{Transfer, TransferBatch};
use federator_tx_builder::CandidateTransaction;
use tracing::{debug, info, warn};

use crate::{
    broadcaster::Broadcaster,
    coordinator::{FinalizeOutcome, SignOutcome, SignatureCoordinator},
    errors::{CoordinatorError, RegistryError, ServiceError},
    registry::{CandidateRegistry, RegistryConfig, TrackedCandidate},
    state::CandidateState,
};

/// Source of the transfers this node has authorized.
#[async_trait]
pub trait TransferSource: Debug + Send + Sync {
    /// Transfers that are confirmed on the smart-contract chain and not yet paid, in chain order.
    async fn authorized_transfers(&self) -> Result<Vec<Transfer>, ChainError>;
}

/// What happened to a candidate handled by the service.
#[derive(Debug, Clone, PartialEq)]
pub enum HandleOutcome {
    /// The candidate carries the local signature but still needs more; relay it to the other
    /// federators.
    Pending {
        /// The latest version of the candidate.
        candidate: CandidateTransaction,
        /// Its state after handling.
        state: CandidateState,
    },

    /// The candidate reached quorum and was accepted by the network.
    Broadcast {
        /// Id of the broadcast transaction.
        txid: Txid,
    },

    /// The candidate was finished earlier; nothing was done.
    AlreadyFinished {
        /// Id of the candidate.
        id: Txid,
        /// The terminal state it reached.
        state: CandidateState,
    },
}

/// Proposes, signs, finalizes and broadcasts batch payouts.
#[derive(Debug)]
pub struct FederatorService {
    transfers: Arc<dyn TransferSource>,
    chain: Arc<dyn ChainDataSource>,
    coordinator: SignatureCoordinator,
    registry: CandidateRegistry,
    broadcaster: Broadcaster,
    call_timeout: Duration,
}

impl FederatorService {
    /// Creates the service.
    ///
    /// Every call to `transfers` and `chain` is bounded by `call_timeout`.
    pub fn new(
        transfers: Arc<dyn TransferSource>,
        chain: Arc<dyn ChainDataSource>,
        coordinator: SignatureCoordinator,
        registry_config: RegistryConfig,
        call_timeout: Duration,
    ) -> Self {
        let broadcaster = Broadcaster::new(
            chain.clone(),
            coordinator.descriptor().clone(),
            call_timeout,
        );

        Self {
            transfers,
            chain,
            coordinator,
            registry: CandidateRegistry::new(registry_config),
            broadcaster,
            call_timeout,
        }
    }

    /// The local signature coordinator.
    pub const fn coordinator(&self) -> &SignatureCoordinator {
        &self.coordinator
    }

    /// The in-flight candidates.
    pub const fn registry(&self) -> &CandidateRegistry {
        &self.registry
    }

    /// Builds and signs a candidate paying out the oldest authorized transfers.
    ///
    /// Returns `None` when there is nothing to pay or a candidate is already in flight.
    pub async fn propose(&self) -> Result<Option<HandleOutcome>, ServiceError> {
        if !self.registry.is_empty() {
            debug!(in_flight = self.registry.len(), "candidates in flight, not proposing");
            return Ok(None);
        }

        let authorized = self.bounded(self.transfers.authorized_transfers()).await?;
        self.registry.release_paid(&authorized);

        let max = self.coordinator.assembler().max_batch_size();
        let oldest: Vec<Transfer> = authorized
            .iter()
            .filter(|transfer| !self.registry.is_reserved(transfer))
            .take(max)
            .cloned()
            .collect();
        if oldest.is_empty() {
            debug!(authorized = authorized.len(), "no unreserved transfers to pay");
            return Ok(None);
        }
        let batch = TransferBatch::with_max_size(oldest, max)?;

        let address = self.coordinator.descriptor().address().clone();
        let available = self.bounded(self.chain.list_unspent(&address)).await?;
        let candidate = self
            .coordinator
            .assembler()
            .build_candidate(&batch, available)
            .inspect_err(|e| warn!(%e, kind = %e.kind(), "could not build candidate"))?;
        info!(id = %candidate.id(), transfers = batch.len(), "proposing candidate");

        let slot = self.registry.get_or_insert(&candidate)?;
        let mut tracked = slot.lock().await;
        self.advance(&mut tracked, &candidate, &authorized)
            .await
            .map(Some)
    }

    /// Processes a serialized candidate received from another federator.
    ///
    /// The received signatures are merged into the locally tracked version, the local signature
    /// is added if the candidate is authorized, and the transaction is broadcast once it reaches
    /// quorum.
    pub async fn handle_incoming(&self, bytes: &[u8]) -> Result<HandleOutcome, ServiceError> {
        let incoming = CandidateTransaction::from_bytes(bytes)
            .inspect_err(|e| warn!(%e, "dropping undecodable candidate"))?;
        let id = incoming.id();

        if let Some(state) = self.registry.finished_state(&id) {
            debug!(%id, %state, "ignoring finished candidate");
            return Ok(HandleOutcome::AlreadyFinished { id, state });
        }

        // a copy is tracked only once it validates on its own
        self.coordinator
            .validate(&incoming)
            .inspect_err(|e| warn!(%id, %e, "dropping invalid candidate"))?;

        let slot = match self.registry.get_or_insert(&incoming) {
            Ok(slot) => slot,
            Err(RegistryError::Finished { id, state }) => {
                debug!(%id, %state, "ignoring finished candidate");
                return Ok(HandleOutcome::AlreadyFinished { id, state });
            }
            Err(e) => return Err(e.into()),
        };

        let mut tracked = slot.lock().await;
        if tracked.state().is_terminal() {
            return Ok(HandleOutcome::AlreadyFinished {
                id,
                state: tracked.state(),
            });
        }

        let merged = tracked
            .candidate()
            .merge(&incoming)
            .inspect_err(|e| warn!(%id, %e, "cannot merge received signatures"))?;

        let authorized = self.bounded(self.transfers.authorized_transfers()).await?;
        self.advance(&mut tracked, &merged, &authorized).await
    }

    /// Drops candidates that outlived the configured expiry.
    pub fn expire_stale(&self) -> Vec<Txid> {
        self.registry.expire_stale()
    }

    /// Signs `candidate` if needed, then finalizes and broadcasts it once it has a quorum.
    ///
    /// The candidate's transfers are reserved before it is signed, and signing is repeated
    /// whenever pruning invalid signatures removes the local one.
    ///
    /// The caller holds the candidate's slot lock.
    async fn advance(
        &self,
        tracked: &mut TrackedCandidate,
        candidate: &CandidateTransaction,
        authorized: &[Transfer],
    ) -> Result<HandleOutcome, ServiceError> {
        let id = candidate.id();

        let batch = match self.coordinator.authorized_batch(candidate, authorized) {
            Ok(batch) => batch,
            Err(err) => return Err(self.reject(tracked, err)),
        };
        if let Err(err) = self.registry.reserve(id, batch.transfers()) {
            let err = CoordinatorError::UnauthorizedBatch(err.to_string());
            return Err(self.reject(tracked, err));
        }

        let mut current = candidate.clone();
        let final_tx = loop {
            current = match self.coordinator.sign(&current, authorized) {
                Ok(SignOutcome::Signed(signed)) => signed,
                Ok(SignOutcome::AlreadySigned) => current,
                Err(err) => return Err(self.reject(tracked, err)),
            };
            tracked.update(current.clone());

            match self.coordinator.try_finalize(&current) {
                Ok(FinalizeOutcome::Quorate(final_tx)) => break final_tx,
                Ok(FinalizeOutcome::QuorumNotReached { valid, required }) => {
                    debug!(%id, valid, required, "waiting for more signatures");
                    return Ok(HandleOutcome::Pending {
                        candidate: current,
                        state: tracked.state(),
                    });
                }
                Err(CoordinatorError::InvalidSignature { signers }) if !signers.is_empty() => {
                    warn!(%id, ?signers, "excluding invalid signatures");
                    current = current.without_signers(&signers);
                    tracked.update(current.clone());
                }
                Err(err) => return Err(self.reject(tracked, err)),
            }
        };

        match self.broadcaster.submit(&final_tx).await {
            Ok(txid) => {
                tracked.transition(CandidateState::Broadcast);
                self.registry.finish(id, CandidateState::Broadcast);
                Ok(HandleOutcome::Broadcast { txid })
            }
            Err(err) => {
                warn!(%id, %err, "broadcast failed, candidate stays quorate");
                Err(err.into())
            }
        }
    }

    /// Marks the candidate rejected if `err` condemns its unsigned transaction.
    ///
    /// Other failures leave the candidate in flight until a later copy succeeds or it expires.
    fn reject(&self, tracked: &mut TrackedCandidate, err: CoordinatorError) -> ServiceError {
        let id = tracked.candidate().id();

        if err.condemns_transaction() {
            warn!(%id, %err, "rejecting candidate");
            tracked.transition(CandidateState::Rejected);
            self.registry.finish(id, CandidateState::Rejected);
        } else {
            warn!(%id, %err, kind = %err.kind(), "cannot process candidate");
        }

        err.into()
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, ChainError>>,
    ) -> Result<T, ChainError> {
        tokio::time::timeout(self.call_timeout, call)
            .await
            .map_err(|_| ChainError::Timeout(self.call_timeout))?
    }
}
