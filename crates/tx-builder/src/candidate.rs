//! The partially signed candidate transaction exchanged between federators.

use std::collections::BTreeSet;

use base64::{engine::general_purpose::STANDARD, Engine};
use bitcoin::{ecdsa, Psbt, PublicKey, Transaction, Txid};
use serde::{Deserialize, Serialize};

use crate::errors::{CandidateError, CandidateResult};

/// A batch payout transaction together with the signatures collected so far.
///
/// The unsigned transaction is fixed once built; only signatures are added. Every signer listed
/// in [`Self::signed_public_keys`] has exactly one signature on every input, and nobody else
/// does.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateTransaction {
    psbt: Psbt,
    signed_public_keys: Vec<PublicKey>,
    required_signatures: usize,
}

/// Serialized form of a [`CandidateTransaction`].
#[derive(Debug, Serialize, Deserialize)]
struct WireCandidate {
    /// Base64-encoded BIP-174 PSBT.
    psbt: String,
    signed_public_keys: Vec<PublicKey>,
    required_signatures: usize,
}

impl CandidateTransaction {
    /// Wraps an unsigned PSBT.
    pub(crate) fn new(psbt: Psbt, required_signatures: usize) -> Self {
        Self {
            psbt,
            signed_public_keys: Vec::new(),
            required_signatures,
        }
    }

    /// Reassembles a candidate, checking that the signer list agrees with the signatures.
    pub fn from_parts(
        psbt: Psbt,
        signed_public_keys: Vec<PublicKey>,
        required_signatures: usize,
    ) -> CandidateResult<Self> {
        let mut signers = BTreeSet::new();
        for key in &signed_public_keys {
            if !signers.insert(*key) {
                return Err(CandidateError::DuplicateSigner(*key));
            }
        }

        for (input_index, input) in psbt.inputs.iter().enumerate() {
            let signed_input: BTreeSet<PublicKey> = input.partial_sigs.keys().copied().collect();
            if signed_input != signers {
                return Err(CandidateError::SignerMismatch { input: input_index });
            }
        }

        Ok(Self {
            psbt,
            signed_public_keys,
            required_signatures,
        })
    }

    /// Splits the candidate into the PSBT, the signer list and the quorum.
    pub fn into_parts(self) -> (Psbt, Vec<PublicKey>, usize) {
        (self.psbt, self.signed_public_keys, self.required_signatures)
    }

    /// Id of the candidate, i.e. the txid of the transaction it will become.
    ///
    /// Segwit signatures do not change the txid, so the id is stable while signatures are added.
    pub fn id(&self) -> Txid {
        self.psbt.unsigned_tx.compute_txid()
    }

    /// The transaction without any signatures.
    pub const fn unsigned_tx(&self) -> &Transaction {
        &self.psbt.unsigned_tx
    }

    /// The underlying PSBT.
    pub const fn psbt(&self) -> &Psbt {
        &self.psbt
    }

    /// Keys that have signed every input, in the order they signed.
    pub fn signed_public_keys(&self) -> &[PublicKey] {
        &self.signed_public_keys
    }

    /// Number of signatures needed to spend the inputs.
    pub const fn required_signatures(&self) -> usize {
        self.required_signatures
    }

    /// Number of signers so far.
    pub fn signature_count(&self) -> usize {
        self.signed_public_keys.len()
    }

    /// Whether `key` has already signed.
    pub fn has_signed(&self, key: &PublicKey) -> bool {
        self.signed_public_keys.contains(key)
    }

    /// Whether enough signers are listed to attempt finalization.
    pub fn has_quorum(&self) -> bool {
        self.signature_count() >= self.required_signatures
    }

    /// Returns a copy with `signer`'s signatures added, one per input in input order.
    pub fn with_signatures(
        &self,
        signer: PublicKey,
        signatures: Vec<ecdsa::Signature>,
    ) -> CandidateResult<Self> {
        if self.has_signed(&signer) {
            return Err(CandidateError::AlreadySigned(signer));
        }

        if signatures.len() != self.psbt.inputs.len() {
            return Err(CandidateError::SignatureCountMismatch {
                expected: self.psbt.inputs.len(),
                got: signatures.len(),
            });
        }

        let mut signed = self.clone();
        for (input, signature) in signed.psbt.inputs.iter_mut().zip(signatures) {
            input.partial_sigs.insert(signer, signature);
        }
        signed.signed_public_keys.push(signer);

        Ok(signed)
    }

    /// Returns a copy with all signatures of `signers` removed.
    pub fn without_signers(&self, signers: &[PublicKey]) -> Self {
        let mut pruned = self.clone();
        for input in &mut pruned.psbt.inputs {
            input.partial_sigs.retain(|key, _| !signers.contains(key));
        }
        pruned
            .signed_public_keys
            .retain(|key| !signers.contains(key));

        pruned
    }

    /// Returns a copy holding the signatures of both candidates.
    ///
    /// Signers known to `self` keep their signatures; signers only known to `other` are
    /// appended in `other`'s order.
    pub fn merge(&self, other: &Self) -> CandidateResult<Self> {
        if self.id() != other.id() {
            return Err(CandidateError::DifferentTransaction {
                ours: self.id(),
                theirs: other.id(),
            });
        }

        if self.required_signatures != other.required_signatures {
            return Err(CandidateError::QuorumMismatch {
                ours: self.required_signatures,
                theirs: other.required_signatures,
            });
        }

        let mut merged = self.clone();
        for signer in other.signed_public_keys() {
            if merged.has_signed(signer) {
                continue;
            }

            for (input_index, (ours, theirs)) in merged
                .psbt
                .inputs
                .iter_mut()
                .zip(&other.psbt.inputs)
                .enumerate()
            {
                let signature = theirs
                    .partial_sigs
                    .get(signer)
                    .ok_or(CandidateError::SignerMismatch { input: input_index })?;
                ours.partial_sigs.insert(*signer, *signature);
            }
            merged.signed_public_keys.push(*signer);
        }

        Ok(merged)
    }

    /// Serializes the candidate for transport to other federators.
    pub fn to_bytes(&self) -> CandidateResult<Vec<u8>> {
        let wire = WireCandidate {
            psbt: STANDARD.encode(self.psbt.serialize()),
            signed_public_keys: self.signed_public_keys.clone(),
            required_signatures: self.required_signatures,
        };

        serde_json::to_vec(&wire).map_err(|e| CandidateError::Encoding(e.to_string()))
    }

    /// Parses a candidate received from another federator.
    pub fn from_bytes(bytes: &[u8]) -> CandidateResult<Self> {
        let wire: WireCandidate =
            serde_json::from_slice(bytes).map_err(|e| CandidateError::Encoding(e.to_string()))?;

        let raw_psbt = STANDARD
            .decode(wire.psbt)
            .map_err(|e| CandidateError::Encoding(e.to_string()))?;
        let psbt = Psbt::deserialize(&raw_psbt)?;

        Self::from_parts(psbt, wire.signed_public_keys, wire.required_signatures)
    }
}
