//! Bounded, in-memory tracking of in-flight candidates.
//!
//! Each candidate sits behind its own async mutex; holding that lock is what serializes signing,
//! finalization and broadcast of one candidate. The map itself is only locked briefly to look up
//! or insert entries, never across an `.await`.
//!
//! The registry also reserves the transfers of every candidate the node signs. A transfer stays
//! reserved by one candidate until that candidate is rejected or expires, or, once broadcast,
//! until the transfer source no longer lists it as unpaid. No other candidate paying a reserved
//! transfer is signed in the meantime.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};

use bitcoin::Txid;
use federator_primitives::transfer::Transfer;
use federator_tx_builder::CandidateTransaction;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::{sync::Mutex as AsyncMutex, time::Instant};
use tracing::{debug, info};

use crate::{errors::RegistryError, state::CandidateState};

/// Records of finished candidates kept per unit of capacity.
const FINISHED_PER_SLOT: usize = 16;

/// Limits of the [`CandidateRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Maximum number of candidates in flight.
    pub capacity: usize,

    /// Age in seconds after which an unfinished candidate is dropped.
    pub expiry_secs: u64,
}

impl RegistryConfig {
    /// Age after which an unfinished candidate is dropped.
    pub const fn expiry(&self) -> Duration {
        Duration::from_secs(self.expiry_secs)
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            capacity: 64,
            expiry_secs: 3_600,
        }
    }
}

/// The latest known version of a candidate and its state.
#[derive(Debug)]
pub struct TrackedCandidate {
    candidate: CandidateTransaction,
    state: CandidateState,
}

impl TrackedCandidate {
    fn new(candidate: CandidateTransaction) -> Self {
        let state = CandidateState::for_signatures(
            candidate.signature_count(),
            candidate.required_signatures(),
        );

        Self { candidate, state }
    }

    /// The latest version of the candidate.
    pub const fn candidate(&self) -> &CandidateTransaction {
        &self.candidate
    }

    /// Current state.
    pub const fn state(&self) -> CandidateState {
        self.state
    }

    /// Replaces the candidate with a newer version, moving to the state its signatures imply.
    ///
    /// Ignored once the candidate is in a terminal state.
    pub fn update(&mut self, candidate: CandidateTransaction) {
        let next = CandidateState::for_signatures(
            candidate.signature_count(),
            candidate.required_signatures(),
        );

        if self.state.can_transition_to(next) {
            self.candidate = candidate;
            self.state = next;
        }
    }

    /// Moves to `next` if allowed, returning whether it did.
    pub fn transition(&mut self, next: CandidateState) -> bool {
        let allowed = self.state.can_transition_to(next);
        if allowed {
            debug!(id = %self.candidate.id(), from = %self.state, to = %next, "state transition");
            self.state = next;
        }

        allowed
    }
}

/// Handle to one tracked candidate; lock it to operate on the candidate.
pub type CandidateSlot = Arc<AsyncMutex<TrackedCandidate>>;

#[derive(Debug)]
struct Entry {
    created_at: Instant,
    slot: CandidateSlot,
}

#[derive(Debug, Default)]
struct Inner {
    active: HashMap<Txid, Entry>,

    /// Terminal states of recently finished candidates, so late duplicates are recognized.
    finished: HashMap<Txid, (CandidateState, Instant)>,

    /// Transfers promised to a signed candidate, by the id of that candidate.
    reserved: HashMap<Transfer, Txid>,
}

impl Inner {
    fn remember(&mut self, id: Txid, state: CandidateState, at: Instant, limit: usize) {
        self.finished.insert(id, (state, at));

        while self.finished.len() > limit {
            let oldest = self
                .finished
                .iter()
                .min_by_key(|(_, (_, finished_at))| *finished_at)
                .map(|(id, _)| *id);
            match oldest {
                Some(oldest) => self.finished.remove(&oldest),
                None => break,
            };
        }

        if matches!(state, CandidateState::Rejected | CandidateState::Expired) {
            self.reserved.retain(|_, holder| *holder != id);
        }
    }
}

/// In-flight candidates keyed by id.
#[derive(Debug)]
pub struct CandidateRegistry {
    config: RegistryConfig,
    inner: Mutex<Inner>,
}

impl CandidateRegistry {
    /// Creates an empty registry.
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            inner: Mutex::default(),
        }
    }

    /// The registry's limits.
    pub const fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Returns the slot for `candidate`'s id, tracking `candidate` if the id is new.
    ///
    /// An existing slot is returned untouched; the caller merges `candidate` into it under the
    /// slot's lock.
    pub fn get_or_insert(
        &self,
        candidate: &CandidateTransaction,
    ) -> Result<CandidateSlot, RegistryError> {
        let id = candidate.id();
        let mut inner = self.inner.lock();

        if let Some((state, _)) = inner.finished.get(&id) {
            return Err(RegistryError::Finished { id, state: *state });
        }

        if let Some(entry) = inner.active.get(&id) {
            return Ok(entry.slot.clone());
        }

        if inner.active.len() >= self.config.capacity {
            return Err(RegistryError::Full {
                capacity: self.config.capacity,
            });
        }

        let slot = Arc::new(AsyncMutex::new(TrackedCandidate::new(candidate.clone())));
        inner.active.insert(
            id,
            Entry {
                created_at: Instant::now(),
                slot: slot.clone(),
            },
        );
        debug!(%id, in_flight = inner.active.len(), "tracking candidate");

        Ok(slot)
    }

    /// The slot of an in-flight candidate.
    pub fn get(&self, id: &Txid) -> Option<CandidateSlot> {
        self.inner
            .lock()
            .active
            .get(id)
            .map(|entry| entry.slot.clone())
    }

    /// Stops tracking `id`, remembering the terminal `state` it reached.
    ///
    /// A rejected candidate gives up its reserved transfers; a broadcast one keeps them.
    pub fn finish(&self, id: Txid, state: CandidateState) {
        let limit = self.finished_limit();
        let mut inner = self.inner.lock();
        inner.active.remove(&id);
        inner.remember(id, state, Instant::now(), limit);
        info!(%id, %state, "candidate finished");
    }

    /// Reserves `transfers` for the candidate `id`.
    ///
    /// Fails without reserving anything if one of them is already reserved by another candidate.
    /// Reserving transfers `id` already holds is a no-op.
    pub fn reserve(&self, id: Txid, transfers: &[Transfer]) -> Result<(), RegistryError> {
        let mut inner = self.inner.lock();

        let taken = transfers.iter().find_map(|transfer| {
            inner
                .reserved
                .get(transfer)
                .filter(|holder| **holder != id)
                .map(|holder| (transfer.nonce(), *holder))
        });
        if let Some((nonce, holder)) = taken {
            return Err(RegistryError::Reserved { nonce, holder });
        }

        for transfer in transfers {
            inner.reserved.insert(transfer.clone(), id);
        }
        debug!(%id, transfers = transfers.len(), "reserved transfers");

        Ok(())
    }

    /// Whether `transfer` is reserved by some candidate.
    pub fn is_reserved(&self, transfer: &Transfer) -> bool {
        self.inner.lock().reserved.contains_key(transfer)
    }

    /// Releases transfers of finished candidates that are no longer among `unpaid`.
    ///
    /// Reservations of in-flight candidates are kept.
    pub fn release_paid(&self, unpaid: &[Transfer]) {
        let unpaid: HashSet<&Transfer> = unpaid.iter().collect();
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let before = inner.reserved.len();
        inner.reserved.retain(|transfer, holder| {
            inner.active.contains_key(&*holder) || unpaid.contains(transfer)
        });

        let released = before - inner.reserved.len();
        if released > 0 {
            debug!(released, "released reservations of paid transfers");
        }
    }

    /// The terminal state of a recently finished candidate.
    pub fn finished_state(&self, id: &Txid) -> Option<CandidateState> {
        self.inner.lock().finished.get(id).map(|(state, _)| *state)
    }

    /// Drops candidates older than the configured expiry, returning their ids.
    ///
    /// Records of finished candidates are forgotten after the same period.
    pub fn expire_stale(&self) -> Vec<Txid> {
        let expiry = self.config.expiry();
        let now = Instant::now();
        let mut inner = self.inner.lock();

        let expired: Vec<Txid> = inner
            .active
            .iter()
            .filter(|(_, entry)| now.duration_since(entry.created_at) >= expiry)
            .map(|(id, _)| *id)
            .collect();

        let limit = self.finished_limit();
        for id in &expired {
            inner.active.remove(id);
            inner.remember(*id, CandidateState::Expired, now, limit);
        }
        inner
            .finished
            .retain(|_, (_, finished_at)| now.duration_since(*finished_at) < expiry);

        if !expired.is_empty() {
            info!(count = expired.len(), "expired stale candidates");
        }

        expired
    }

    /// Number of candidates in flight.
    pub fn len(&self) -> usize {
        self.inner.lock().active.len()
    }

    /// Whether no candidates are in flight.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn finished_limit(&self) -> usize {
        self.config.capacity.max(1).saturating_mul(FINISHED_PER_SLOT)
    }
}
