//! Builds unsigned candidate transactions from transfer batches.

use bitcoin::{psbt::PsbtSighashType, sighash::EcdsaSighashType, Amount, FeeRate, Psbt, TxOut};
use federator_primitives::{
    constants::MAX_BATCH_SIZE, multisig::MultisigDescriptor, transfer::TransferBatch,
    utxo::UnspentOutput,
};
use tracing::{debug, info, warn};

use crate::{
    candidate::CandidateTransaction,
    codec::{decode, encode},
    errors::{AssemblyError, CodecError},
    fees::{count_outputs, select_and_fee, FeeEstimator, InputCounts, InputKind},
    tx::{create_tx, create_tx_ins},
};

/// Assembles batch payouts spending the federation's multisig outputs.
#[derive(Debug, Clone)]
pub struct TransactionAssembler {
    descriptor: MultisigDescriptor,
    estimator: FeeEstimator,
    max_batch_size: usize,
}

impl TransactionAssembler {
    /// Creates an assembler for `descriptor`.
    ///
    /// `max_batch_size` is clamped to [`MAX_BATCH_SIZE`].
    pub fn new(descriptor: MultisigDescriptor, fee_rate: FeeRate, max_batch_size: usize) -> Self {
        Self {
            descriptor,
            estimator: FeeEstimator::new(fee_rate),
            max_batch_size: max_batch_size.min(MAX_BATCH_SIZE),
        }
    }

    /// The federation's multisig descriptor.
    pub const fn descriptor(&self) -> &MultisigDescriptor {
        &self.descriptor
    }

    /// The fee model in use.
    pub const fn estimator(&self) -> &FeeEstimator {
        &self.estimator
    }

    /// Largest batch this assembler accepts.
    pub const fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    /// The kind of every input this assembler spends.
    pub fn input_kind(&self) -> InputKind {
        InputKind::MultisigP2wsh {
            required: self.descriptor.threshold(),
            total: self.descriptor.total(),
        }
    }

    /// Builds the unsigned candidate paying out `batch`.
    ///
    /// Outputs in `available` that do not pay the federation's script are ignored.
    pub fn build_candidate(
        &self,
        batch: &TransferBatch,
        available: Vec<UnspentOutput>,
    ) -> Result<CandidateTransaction, AssemblyError> {
        if batch.len() > self.max_batch_size {
            return Err(AssemblyError::BatchTooLarge {
                size: batch.len(),
                max: self.max_batch_size,
            });
        }

        let target = batch.total_amount().ok_or_else(|| {
            AssemblyError::InternalInconsistency("transfer amounts overflow".to_string())
        })?;

        let federation_spk = self.descriptor.script_pubkey();
        let (owned, foreign): (Vec<_>, Vec<_>) = available
            .into_iter()
            .partition(|utxo| *utxo.script_pubkey() == federation_spk);
        if !foreign.is_empty() {
            warn!(count = foreign.len(), "ignoring outputs not owned by the federation");
        }

        let mut outputs = encode(batch);
        outputs.push(TxOut {
            value: Amount::ZERO,
            script_pubkey: federation_spk,
        });
        let output_counts =
            count_outputs(outputs.iter().map(|output| output.script_pubkey.as_script()));

        let selection = select_and_fee(
            target,
            owned,
            self.input_kind(),
            &output_counts,
            &self.estimator,
        )?;
        debug!(
            inputs = selection.inputs.len(),
            fee = %selection.fee,
            total_in = %selection.total_in,
            "selected inputs"
        );

        let change = selection
            .total_in
            .checked_sub(target)
            .and_then(|rest| rest.checked_sub(selection.fee))
            .ok_or_else(|| {
                AssemblyError::InternalInconsistency(format!(
                    "selected {} cannot pay {} plus fee {}",
                    selection.total_in, target, selection.fee
                ))
            })?;
        if let Some(change_output) = outputs.last_mut() {
            change_output.value = change;
        }

        let mut input_counts = InputCounts::new();
        input_counts.insert(self.input_kind(), selection.inputs.len());
        let final_fee = self.estimator.fee(
            &input_counts,
            &count_outputs(outputs.iter().map(|output| output.script_pubkey.as_script())),
        );
        if final_fee != selection.fee {
            return Err(AssemblyError::InternalInconsistency(format!(
                "fee for the assembled transaction is {final_fee} but selection charged {}",
                selection.fee
            )));
        }

        let tx = create_tx(
            create_tx_ins(selection.inputs.iter().map(UnspentOutput::outpoint)),
            outputs,
        );
        let mut psbt = Psbt::from_unsigned_tx(tx)
            .map_err(|e| AssemblyError::InternalInconsistency(e.to_string()))?;

        for (input, utxo) in psbt.inputs.iter_mut().zip(&selection.inputs) {
            input.non_witness_utxo = Some(utxo.parent_tx().clone());
            input.witness_utxo = Some(utxo.txout().clone());
            input.witness_script = Some(self.descriptor.redeem_script().clone());
            input.sighash_type = Some(PsbtSighashType::from(EcdsaSighashType::All));
        }

        let candidate = CandidateTransaction::new(psbt, self.descriptor.threshold());
        info!(
            txid = %candidate.id(),
            transfers = batch.len(),
            inputs = selection.inputs.len(),
            fee = %selection.fee,
            %change,
            "built candidate transaction"
        );

        Ok(candidate)
    }

    /// Recovers the batch paid out by `candidate`.
    pub fn decode_candidate(
        &self,
        candidate: &CandidateTransaction,
    ) -> Result<TransferBatch, CodecError> {
        let batch = decode(&candidate.unsigned_tx().output, self.descriptor.network())?;
        if batch.len() > self.max_batch_size {
            return Err(CodecError::BatchTooLarge {
                size: batch.len(),
                max: self.max_batch_size,
            });
        }

        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use bitcoin::Network;
    use federator_primitives::transfer::Transfer;
    use federator_test_utils::{
        federation, funding_output, funding_utxo, sample_destination, Federation,
    };

    use super::*;

    const NETWORK: Network = Network::Regtest;

    fn assembler(fed: &Federation) -> TransactionAssembler {
        TransactionAssembler::new(
            fed.descriptor.clone(),
            FeeRate::from_sat_per_vb(10).expect("valid fee rate"),
            MAX_BATCH_SIZE,
        )
    }

    fn batch(transfers: &[(u8, u64)]) -> TransferBatch {
        TransferBatch::new(
            transfers
                .iter()
                .map(|&(nonce, amount)| {
                    Transfer::new(
                        sample_destination(nonce, NETWORK),
                        Amount::from_sat(amount),
                        nonce,
                    )
                    .unwrap()
                })
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn two_transfers_from_one_input() {
        let fed = federation(3, 2, NETWORK);
        let assembler = assembler(&fed);
        let batch = batch(&[(3, 100_000), (7, 250_000)]);
        let utxo = funding_utxo(&fed.descriptor, Amount::from_sat(1_000_000), 6, 0);

        let candidate = assembler.build_candidate(&batch, vec![utxo.clone()]).unwrap();
        let tx = candidate.unsigned_tx();

        assert_eq!(tx.input.len(), 1);
        assert_eq!(tx.input[0].previous_output, utxo.outpoint());
        assert_eq!(tx.output.len(), 4);
        assert_eq!(tx.output[0].script_pubkey.as_bytes(), &[0x6a, 2, 3, 7]);

        let change = &tx.output[3];
        assert_eq!(change.script_pubkey, fed.descriptor.script_pubkey());
        let mut inputs = InputCounts::new();
        inputs.insert(assembler.input_kind(), 1);
        let outputs = count_outputs(tx.output.iter().map(|o| o.script_pubkey.as_script()));
        let fee = assembler.estimator().fee(&inputs, &outputs);
        assert_eq!(change.value, Amount::from_sat(1_000_000 - 350_000) - fee);

        assert_eq!(candidate.signature_count(), 0);
        assert_eq!(candidate.required_signatures(), 2);

        let input = &candidate.psbt().inputs[0];
        assert_eq!(input.non_witness_utxo.as_ref(), Some(utxo.parent_tx()));
        assert_eq!(input.witness_utxo.as_ref(), Some(utxo.txout()));
        assert_eq!(input.witness_script.as_ref(), Some(fed.descriptor.redeem_script()));

        assert_eq!(assembler.decode_candidate(&candidate), Ok(batch));
    }

    #[test]
    fn rejects_oversized_batch() {
        let fed = federation(3, 2, NETWORK);
        let assembler = TransactionAssembler::new(
            fed.descriptor.clone(),
            FeeRate::from_sat_per_vb(10).expect("valid fee rate"),
            1,
        );
        let utxo = funding_utxo(&fed.descriptor, Amount::from_sat(1_000_000), 6, 0);

        let err = assembler
            .build_candidate(&batch(&[(1, 1_000), (2, 1_000)]), vec![utxo])
            .unwrap_err();
        assert_eq!(err, AssemblyError::BatchTooLarge { size: 2, max: 1 });
    }

    #[test]
    fn ignores_foreign_outputs() {
        let fed = federation(3, 2, NETWORK);
        let assembler = assembler(&fed);
        let foreign = funding_output(
            sample_destination(9, NETWORK).script_pubkey(),
            Amount::from_sat(10_000_000),
            100,
            0,
        );
        let owned = funding_utxo(&fed.descriptor, Amount::from_sat(1_000_000), 1, 1);

        let candidate = assembler
            .build_candidate(&batch(&[(1, 10_000)]), vec![foreign.clone(), owned.clone()])
            .unwrap();

        let spent: Vec<_> = candidate
            .unsigned_tx()
            .input
            .iter()
            .map(|input| input.previous_output)
            .collect();
        assert_eq!(spent, vec![owned.outpoint()]);

        let err = assembler
            .build_candidate(&batch(&[(1, 10_000)]), vec![foreign])
            .unwrap_err();
        assert!(matches!(err, AssemblyError::InsufficientFunds { .. }));
    }

    #[test]
    fn insufficient_funds() {
        let fed = federation(3, 2, NETWORK);
        let utxo = funding_utxo(&fed.descriptor, Amount::from_sat(100_000), 6, 0);

        let err = assembler(&fed)
            .build_candidate(&batch(&[(1, 100_000)]), vec![utxo])
            .unwrap_err();
        assert!(matches!(
            err,
            AssemblyError::InsufficientFunds { available, .. } if available == Amount::from_sat(100_000)
        ));
        assert_eq!(err.kind(), federator_primitives::errors::ErrorKind::Resource);
    }

    #[test]
    fn full_batch_fits() {
        let fed = federation(3, 2, NETWORK);
        let transfers: Vec<_> = (0..MAX_BATCH_SIZE as u8).map(|n| (n, 5_000)).collect();
        let batch = batch(&transfers);
        let utxos = (0..3)
            .map(|i| funding_utxo(&fed.descriptor, Amount::from_sat(100_000), 6, i))
            .collect();

        let assembler = assembler(&fed);
        let candidate = assembler.build_candidate(&batch, utxos).unwrap();

        assert_eq!(candidate.unsigned_tx().output.len(), MAX_BATCH_SIZE + 2);
        assert_eq!(assembler.decode_candidate(&candidate), Ok(batch));
    }
}
