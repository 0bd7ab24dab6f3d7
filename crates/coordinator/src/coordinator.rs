//! Validation, signing and finalization of candidate transactions.

use std::collections::HashSet;

use bitcoin::{
    ecdsa,
    secp256k1::Message,
    sighash::{EcdsaSighashType, SighashCache},
    Amount, PublicKey, Script, Transaction, TxOut, Txid, Witness,
};
use federator_key_deriv::SigningKey;
use federator_primitives::{
    multisig::MultisigDescriptor,
    transfer::{Transfer, TransferBatch},
};
use federator_tx_builder::{
    fees::{count_outputs, InputCounts},
    CandidateTransaction, TransactionAssembler,
};
use secp256k1::SECP256K1;
use tracing::{debug, info, warn};

use crate::errors::CoordinatorError;

fn checked_total(values: impl IntoIterator<Item = Amount>) -> Option<Amount> {
    values
        .into_iter()
        .try_fold(Amount::ZERO, |sum, value| sum.checked_add(value))
}

/// Result of a successful [`SignatureCoordinator::sign`].
#[derive(Debug, Clone, PartialEq)]
pub enum SignOutcome {
    /// The local signatures were added.
    Signed(CandidateTransaction),

    /// The candidate already carries the local signatures; nothing changed.
    AlreadySigned,
}

/// Result of a successful [`SignatureCoordinator::try_finalize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalizeOutcome {
    /// Enough valid signatures; the transaction is ready for broadcast.
    Quorate(FinalTransaction),

    /// Not enough signatures yet.
    QuorumNotReached {
        /// Number of valid signers so far.
        valid: usize,
        /// Number of signers required.
        required: usize,
    },
}

/// Signers of a candidate split by whether their signatures verify on every input.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignatureReport {
    /// Cosigners whose signatures verify on every input.
    pub valid: Vec<PublicKey>,

    /// Signers with at least one bad or missing signature, or that are not cosigners at all.
    pub invalid: Vec<PublicKey>,
}

/// A fully signed batch payout.
///
/// Only [`SignatureCoordinator::try_finalize`] creates these, so a value of this type always
/// carried a verified quorum when it was made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalTransaction {
    tx: Transaction,
    prevouts: Vec<TxOut>,
    signers: Vec<PublicKey>,
}

impl FinalTransaction {
    /// Id of the transaction.
    pub fn txid(&self) -> Txid {
        self.tx.compute_txid()
    }

    /// The signed transaction.
    pub const fn tx(&self) -> &Transaction {
        &self.tx
    }

    /// The outputs spent by the transaction, in input order.
    pub fn prevouts(&self) -> &[TxOut] {
        &self.prevouts
    }

    /// Keys whose signatures are in the witnesses, in script order.
    pub fn signers(&self) -> &[PublicKey] {
        &self.signers
    }

    /// Consumes the value, returning the signed transaction.
    pub fn into_tx(self) -> Transaction {
        self.tx
    }
}

/// Signs and finalizes candidates on behalf of one federator.
#[derive(Debug)]
pub struct SignatureCoordinator {
    assembler: TransactionAssembler,
    signing_key: SigningKey,
    own_key: PublicKey,
}

impl SignatureCoordinator {
    /// Creates a coordinator signing with `signing_key`.
    ///
    /// Fails if the key is not one of the federation's cosigners.
    pub fn new(
        assembler: TransactionAssembler,
        signing_key: SigningKey,
    ) -> Result<Self, CoordinatorError> {
        let own_key = signing_key.public_key();
        if !assembler.descriptor().contains(&own_key) {
            return Err(CoordinatorError::NotACosigner(own_key));
        }

        Ok(Self {
            assembler,
            signing_key,
            own_key,
        })
    }

    /// The assembler used to build and decode candidates.
    pub const fn assembler(&self) -> &TransactionAssembler {
        &self.assembler
    }

    /// The federation's multisig descriptor.
    pub const fn descriptor(&self) -> &MultisigDescriptor {
        self.assembler.descriptor()
    }

    /// The local federator's public key.
    pub const fn own_key(&self) -> PublicKey {
        self.own_key
    }

    /// Checks everything about `candidate` except its signatures and authorization.
    ///
    /// Returns the batch it pays out and the outputs it spends.
    pub fn validate(
        &self,
        candidate: &CandidateTransaction,
    ) -> Result<(TransferBatch, Vec<TxOut>), CoordinatorError> {
        let expected = self.descriptor().threshold();
        if candidate.required_signatures() != expected {
            return Err(CoordinatorError::QuorumMismatch {
                declared: candidate.required_signatures(),
                expected,
            });
        }

        let batch = self.assembler.decode_candidate(candidate)?;
        let prevouts = self.validate_inputs(candidate)?;

        let change = candidate.unsigned_tx().output.last();
        if change.map(|output| &output.script_pubkey) != Some(&self.descriptor().script_pubkey()) {
            return Err(CoordinatorError::InvalidChangeOutput);
        }

        self.validate_fee(candidate.unsigned_tx(), &prevouts)?;

        Ok((batch, prevouts))
    }

    /// Checks that `tx` pays exactly the fee the estimator charges for its inputs and outputs.
    fn validate_fee(&self, tx: &Transaction, prevouts: &[TxOut]) -> Result<(), CoordinatorError> {
        let assembler = self.assembler();

        let mut input_counts = InputCounts::new();
        input_counts.insert(assembler.input_kind(), tx.input.len());
        let output_counts =
            count_outputs(tx.output.iter().map(|output| output.script_pubkey.as_script()));
        let expected = assembler.estimator().fee(&input_counts, &output_counts);

        let inputs = checked_total(prevouts.iter().map(|prevout| prevout.value));
        let outputs = checked_total(tx.output.iter().map(|output| output.value));

        match (inputs, outputs) {
            (Some(inputs), Some(outputs)) if inputs.checked_sub(outputs) == Some(expected) => {
                Ok(())
            }
            (inputs, outputs) => Err(CoordinatorError::UnexpectedFee {
                inputs: inputs.unwrap_or(Amount::MAX),
                outputs: outputs.unwrap_or(Amount::MAX),
                expected,
            }),
        }
    }

    /// Validates `candidate` and checks that it pays only transfers in `authorized`.
    ///
    /// Returns the batch it pays out.
    pub fn authorized_batch(
        &self,
        candidate: &CandidateTransaction,
        authorized: &[Transfer],
    ) -> Result<TransferBatch, CoordinatorError> {
        let (batch, _) = self.validate(candidate)?;
        authorize(&batch, authorized)?;

        Ok(batch)
    }

    /// Adds the local signature to every input of `candidate`.
    ///
    /// The candidate must decode into a batch whose every transfer is in `authorized`, the
    /// transfers the local node has itself observed as confirmed and not yet paid.
    pub fn sign(
        &self,
        candidate: &CandidateTransaction,
        authorized: &[Transfer],
    ) -> Result<SignOutcome, CoordinatorError> {
        let id = candidate.id();
        let (batch, prevouts) = self.validate(candidate)?;
        authorize(&batch, authorized)?;

        if candidate.has_signed(&self.own_key) {
            debug!(%id, "candidate already carries our signature");
            return Ok(SignOutcome::AlreadySigned);
        }

        let redeem_script = self.descriptor().redeem_script();
        let mut cache = SighashCache::new(candidate.unsigned_tx());
        let secret_key = self.signing_key.secret_key();
        let signatures = prevouts
            .iter()
            .enumerate()
            .map(|(index, prevout)| {
                let message = signature_message(&mut cache, index, redeem_script, prevout.value)?;
                let signature = SECP256K1.sign_ecdsa(&message, &secret_key);
                Ok(ecdsa::Signature::sighash_all(signature))
            })
            .collect::<Result<Vec<_>, CoordinatorError>>()?;

        let signed = candidate.with_signatures(self.own_key, signatures)?;
        info!(
            %id,
            transfers = batch.len(),
            signatures = signed.signature_count(),
            required = signed.required_signatures(),
            "signed candidate"
        );

        Ok(SignOutcome::Signed(signed))
    }

    /// Verifies the signatures of every listed signer.
    pub fn verify_signatures(
        &self,
        candidate: &CandidateTransaction,
    ) -> Result<SignatureReport, CoordinatorError> {
        let prevouts = self.validate_inputs(candidate)?;
        self.verify_against(candidate, &prevouts)
    }

    /// Assembles the final transaction if enough valid signatures are attached.
    ///
    /// Any signer with an invalid signature fails the call with
    /// [`CoordinatorError::InvalidSignature`]; callers drop those signers with
    /// [`CandidateTransaction::without_signers`] and carry on.
    pub fn try_finalize(
        &self,
        candidate: &CandidateTransaction,
    ) -> Result<FinalizeOutcome, CoordinatorError> {
        let id = candidate.id();
        let (_, prevouts) = self.validate(candidate)?;
        let report = self.verify_against(candidate, &prevouts)?;

        if !report.invalid.is_empty() {
            warn!(%id, signers = ?report.invalid, "candidate carries invalid signatures");
            return Err(CoordinatorError::InvalidSignature {
                signers: report.invalid,
            });
        }

        let required = self.descriptor().threshold();
        if report.valid.len() < required {
            debug!(%id, valid = report.valid.len(), required, "quorum not reached");
            return Ok(FinalizeOutcome::QuorumNotReached {
                valid: report.valid.len(),
                required,
            });
        }

        // OP_CHECKMULTISIG consumes signatures in key order
        let signers: Vec<PublicKey> = self
            .descriptor()
            .keys()
            .iter()
            .filter(|key| report.valid.contains(key))
            .take(required)
            .copied()
            .collect();

        let redeem_script = self.descriptor().redeem_script();
        let mut tx = candidate.unsigned_tx().clone();
        for (txin, input) in tx.input.iter_mut().zip(&candidate.psbt().inputs) {
            let mut witness = Witness::new();
            witness.push(Vec::<u8>::new());
            for signer in &signers {
                let signature = input.partial_sigs.get(signer).ok_or_else(|| {
                    CoordinatorError::InvalidSignature {
                        signers: vec![*signer],
                    }
                })?;
                witness.push(signature.to_vec());
            }
            witness.push(redeem_script.as_bytes());

            txin.witness = witness;
        }

        let final_tx = FinalTransaction {
            tx,
            prevouts,
            signers,
        };
        verify_final(self.descriptor(), &final_tx)?;
        info!(%id, signers = final_tx.signers.len(), "candidate reached quorum");

        Ok(FinalizeOutcome::Quorate(final_tx))
    }

    fn validate_inputs(
        &self,
        candidate: &CandidateTransaction,
    ) -> Result<Vec<TxOut>, CoordinatorError> {
        let tx = candidate.unsigned_tx();
        if tx.input.is_empty() {
            return Err(CoordinatorError::ForeignInput {
                index: 0,
                reason: "transaction has no inputs".to_string(),
            });
        }

        let federation_spk = self.descriptor().script_pubkey();
        let redeem_script = self.descriptor().redeem_script();

        tx.input
            .iter()
            .zip(&candidate.psbt().inputs)
            .enumerate()
            .map(|(index, (txin, input))| {
                let invalid = |reason: &str| CoordinatorError::ForeignInput {
                    index,
                    reason: reason.to_string(),
                };

                let parent = input
                    .non_witness_utxo
                    .as_ref()
                    .ok_or_else(|| invalid("missing parent transaction"))?;
                if parent.compute_txid() != txin.previous_output.txid {
                    return Err(invalid("parent transaction does not match the outpoint"));
                }

                let prevout = parent
                    .output
                    .get(txin.previous_output.vout as usize)
                    .ok_or_else(|| invalid("parent transaction has no such output"))?;
                if input.witness_utxo.as_ref() != Some(prevout) {
                    return Err(invalid("witness UTXO disagrees with the parent transaction"));
                }
                if prevout.script_pubkey != federation_spk {
                    return Err(invalid("does not spend the federation's multisig script"));
                }
                if input
                    .witness_script
                    .as_ref()
                    .is_some_and(|script| script != redeem_script)
                {
                    return Err(invalid("unexpected witness script"));
                }

                Ok(prevout.clone())
            })
            .collect()
    }

    fn verify_against(
        &self,
        candidate: &CandidateTransaction,
        prevouts: &[TxOut],
    ) -> Result<SignatureReport, CoordinatorError> {
        let redeem_script = self.descriptor().redeem_script();
        let mut cache = SighashCache::new(candidate.unsigned_tx());
        let messages = prevouts
            .iter()
            .enumerate()
            .map(|(index, prevout)| {
                signature_message(&mut cache, index, redeem_script, prevout.value)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut report = SignatureReport::default();
        for signer in candidate.signed_public_keys() {
            let verifies = self.descriptor().contains(signer)
                && candidate
                    .psbt()
                    .inputs
                    .iter()
                    .zip(&messages)
                    .all(|(input, message)| {
                        input.partial_sigs.get(signer).is_some_and(|signature| {
                            signature.sighash_type == EcdsaSighashType::All
                                && SECP256K1
                                    .verify_ecdsa(message, &signature.signature, &signer.inner)
                                    .is_ok()
                        })
                    });

            if verifies {
                report.valid.push(*signer);
            } else {
                report.invalid.push(*signer);
            }
        }

        Ok(report)
    }
}

/// Checks that every decoded transfer is one the local node authorized.
fn authorize(batch: &TransferBatch, authorized: &[Transfer]) -> Result<(), CoordinatorError> {
    let authorized: HashSet<&Transfer> = authorized.iter().collect();

    match batch.transfers().iter().find(|transfer| !authorized.contains(transfer)) {
        Some(transfer) => Err(CoordinatorError::UnauthorizedBatch(format!(
            "transfer {} of {} to {} is not authorized",
            transfer.nonce(),
            transfer.amount(),
            transfer.destination()
        ))),
        None => Ok(()),
    }
}

/// Re-checks the witnesses of a final transaction against the federation's script.
///
/// Mirrors `OP_CHECKMULTISIG`: each signature must verify against a key that comes after the
/// key matched by the previous signature.
pub fn verify_final(
    descriptor: &MultisigDescriptor,
    final_tx: &FinalTransaction,
) -> Result<(), CoordinatorError> {
    let tx = &final_tx.tx;
    if final_tx.prevouts.len() != tx.input.len() {
        return Err(CoordinatorError::InvalidWitness { input: 0 });
    }

    let federation_spk = descriptor.script_pubkey();
    let redeem_script = descriptor.redeem_script();
    let required = descriptor.threshold();
    let mut cache = SighashCache::new(tx);

    for (index, (txin, prevout)) in tx.input.iter().zip(&final_tx.prevouts).enumerate() {
        if prevout.script_pubkey != federation_spk {
            return Err(CoordinatorError::ForeignInput {
                index,
                reason: "does not spend the federation's multisig script".to_string(),
            });
        }

        let items: Vec<&[u8]> = txin.witness.iter().collect();
        let well_formed = items.len() == required + 2
            && items[0].is_empty()
            && items[required + 1] == redeem_script.as_bytes();
        if !well_formed {
            return Err(CoordinatorError::InvalidWitness { input: index });
        }

        let message = signature_message(&mut cache, index, redeem_script, prevout.value)?;
        let mut keys = descriptor.keys().iter();
        for raw in &items[1..=required] {
            let signature = ecdsa::Signature::from_slice(raw)
                .map_err(|_| CoordinatorError::InvalidWitness { input: index })?;
            if signature.sighash_type != EcdsaSighashType::All {
                return Err(CoordinatorError::InvalidWitness { input: index });
            }

            let matched = keys.by_ref().any(|key| {
                SECP256K1
                    .verify_ecdsa(&message, &signature.signature, &key.inner)
                    .is_ok()
            });
            if !matched {
                return Err(CoordinatorError::InvalidWitness { input: index });
            }
        }
    }

    Ok(())
}

fn signature_message(
    cache: &mut SighashCache<&Transaction>,
    index: usize,
    witness_script: &Script,
    value: Amount,
) -> Result<Message, CoordinatorError> {
    let sighash = cache
        .p2wsh_signature_hash(index, witness_script, value, EcdsaSighashType::All)
        .map_err(|e| CoordinatorError::Sighash {
            index,
            reason: e.to_string(),
        })?;

    Ok(Message::from(sighash))
}
