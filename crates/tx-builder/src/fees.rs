//! Transaction size estimation, fee computation and greedy input selection.
//!
//! Sizes are estimated in weight units from the count of each kind of input and output, then
//! converted to virtual bytes. The estimate for multisig inputs assumes the largest possible DER
//! signatures, so it never undershoots the size of the finalized transaction.

use std::collections::BTreeMap;

use bitcoin::{Amount, FeeRate, Script, VarInt};
use federator_primitives::utxo::UnspentOutput;

use crate::errors::SelectionError;

/// Count of each kind of input in a transaction.
pub type InputCounts = BTreeMap<InputKind, usize>;

/// Count of each kind of output in a transaction.
pub type OutputCounts = BTreeMap<OutputKind, usize>;

/// Spend paths understood by the estimator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum InputKind {
    /// A P2WSH input spending an m-of-n `OP_CHECKMULTISIG` script.
    MultisigP2wsh {
        /// Number of signatures in the witness (m).
        required: usize,
        /// Number of keys in the script (n).
        total: usize,
    },
}

impl InputKind {
    /// Weight of one input of this kind, witness included.
    pub const fn weight(&self) -> u64 {
        match *self {
            // outpoint, empty script_sig and sequence are 41 bytes of base data; the witness
            // holds the item count, the empty dummy, m signatures and the n-key script.
            InputKind::MultisigP2wsh { required, total } => {
                6 + 41 * 4 + 73 * required as u64 + 34 * total as u64
            }
        }
    }

    /// Whether spending this kind of input puts data in the witness.
    pub const fn has_witness(&self) -> bool {
        match self {
            InputKind::MultisigP2wsh { .. } => true,
        }
    }
}

/// Output script families understood by the estimator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OutputKind {
    /// Pay to public key hash.
    P2pkh,
    /// Pay to script hash.
    P2sh,
    /// Pay to witness public key hash.
    P2wpkh,
    /// Pay to witness script hash.
    P2wsh,
    /// Pay to taproot.
    P2tr,
    /// An `OP_RETURN` output.
    NullData {
        /// Length of the whole script, opcode included.
        script_len: usize,
    },
    /// Anything else.
    Other {
        /// Length of the script.
        script_len: usize,
    },
}

impl OutputKind {
    /// Classifies a locking script.
    pub fn of(script: &Script) -> Self {
        if script.is_p2pkh() {
            OutputKind::P2pkh
        } else if script.is_p2sh() {
            OutputKind::P2sh
        } else if script.is_p2wpkh() {
            OutputKind::P2wpkh
        } else if script.is_p2wsh() {
            OutputKind::P2wsh
        } else if script.is_p2tr() {
            OutputKind::P2tr
        } else if script.is_op_return() {
            OutputKind::NullData {
                script_len: script.len(),
            }
        } else {
            OutputKind::Other {
                script_len: script.len(),
            }
        }
    }

    /// Length of the locking script.
    pub const fn script_len(&self) -> usize {
        match *self {
            OutputKind::P2pkh => 25,
            OutputKind::P2sh => 23,
            OutputKind::P2wpkh => 22,
            OutputKind::P2wsh | OutputKind::P2tr => 34,
            OutputKind::NullData { script_len } | OutputKind::Other { script_len } => script_len,
        }
    }

    /// Weight of one output of this kind: value, script length prefix and script.
    pub fn weight(&self) -> u64 {
        let script_len = self.script_len() as u64;
        (8 + VarInt(script_len).size() as u64 + script_len) * 4
    }
}

/// Tallies the kinds of the given locking scripts.
pub fn count_outputs<'a>(scripts: impl IntoIterator<Item = &'a Script>) -> OutputCounts {
    let mut counts = OutputCounts::new();
    for script in scripts {
        *counts.entry(OutputKind::of(script)).or_default() += 1;
    }
    counts
}

/// Fee computation at a fixed fee rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeEstimator {
    fee_rate: FeeRate,
}

impl FeeEstimator {
    /// Creates an estimator charging `fee_rate`.
    pub const fn new(fee_rate: FeeRate) -> Self {
        Self { fee_rate }
    }

    /// The configured fee rate.
    pub const fn fee_rate(&self) -> FeeRate {
        self.fee_rate
    }

    /// Estimated virtual size in bytes of a transaction with the given input and output mix.
    pub fn estimate_vsize(&self, inputs: &InputCounts, outputs: &OutputCounts) -> u64 {
        let num_inputs: usize = inputs.values().sum();
        let num_outputs: usize = outputs.values().sum();
        let has_witness = inputs
            .iter()
            .any(|(kind, count)| *count > 0 && kind.has_witness());

        let inputs_weight: u64 = inputs
            .iter()
            .map(|(kind, count)| kind.weight() * *count as u64)
            .sum();
        let outputs_weight: u64 = outputs
            .iter()
            .map(|(kind, count)| kind.weight() * *count as u64)
            .sum();

        // segwit marker and flag
        let witness_header = if has_witness { 2 } else { 0 };
        // version and locktime
        let fixed = 4 * (4 + 4);
        let counts = 4 * (VarInt(num_inputs as u64).size() + VarInt(num_outputs as u64).size())
            as u64;

        let weight = inputs_weight + outputs_weight + witness_header + fixed + counts;
        weight.div_ceil(4)
    }

    /// Fee for a transaction with the given input and output mix.
    ///
    /// Saturates at [`Amount::MAX_MONEY`], which no selection can cover.
    pub fn fee(&self, inputs: &InputCounts, outputs: &OutputCounts) -> Amount {
        self.fee_rate
            .fee_vb(self.estimate_vsize(inputs, outputs))
            .unwrap_or(Amount::MAX_MONEY)
    }
}

/// Inputs chosen to fund a transaction, with the fee their use requires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    /// The chosen outputs, most confirmed first.
    pub inputs: Vec<UnspentOutput>,

    /// Fee for the final input and output mix.
    pub fee: Amount,

    /// Sum of the chosen outputs.
    pub total_in: Amount,
}

/// Greedily picks the most-confirmed outputs until they cover `target` plus the fee.
///
/// The fee is recomputed after every added input, since each one grows the transaction. Outputs
/// with equal confirmations keep their relative order from `available`.
pub fn select_and_fee(
    target: Amount,
    mut available: Vec<UnspentOutput>,
    input_kind: InputKind,
    outputs: &OutputCounts,
    estimator: &FeeEstimator,
) -> Result<Selection, SelectionError> {
    available.sort_by(|a, b| b.confirmations().cmp(&a.confirmations()));

    let mut inputs = Vec::new();
    let mut input_counts = InputCounts::new();
    let mut total_in = Amount::ZERO;
    let mut fee = estimator.fee(&input_counts, outputs);

    for utxo in available {
        total_in = total_in
            .checked_add(utxo.amount())
            .unwrap_or(Amount::MAX_MONEY);
        *input_counts.entry(input_kind).or_default() += 1;
        inputs.push(utxo);

        fee = estimator.fee(&input_counts, outputs);
        if target
            .checked_add(fee)
            .is_some_and(|required| total_in >= required)
        {
            return Ok(Selection {
                inputs,
                fee,
                total_in,
            });
        }
    }

    Err(SelectionError::InsufficientFunds {
        required: target.checked_add(fee).unwrap_or(Amount::MAX_MONEY),
        available: total_in,
    })
}

#[cfg(test)]
mod tests {
    use bitcoin::{Network, ScriptBuf};
    use federator_test_utils::{federation, funding_utxo};
    use proptest::prelude::*;

    use super::*;

    const TWO_OF_THREE: InputKind = InputKind::MultisigP2wsh {
        required: 2,
        total: 3,
    };

    fn estimator() -> FeeEstimator {
        FeeEstimator::new(FeeRate::from_sat_per_vb(10).expect("valid fee rate"))
    }

    /// Marker with `n` nonces, `n` P2WPKH payments and a P2WSH change output.
    fn batch_outputs(n: usize) -> OutputCounts {
        let mut outputs = OutputCounts::new();
        outputs.insert(OutputKind::NullData { script_len: 2 + n }, 1);
        outputs.insert(OutputKind::P2wpkh, n);
        outputs.insert(OutputKind::P2wsh, 1);
        outputs
    }

    #[test]
    fn output_weights() {
        assert_eq!(OutputKind::P2pkh.weight(), 34 * 4);
        assert_eq!(OutputKind::P2sh.weight(), 32 * 4);
        assert_eq!(OutputKind::P2wpkh.weight(), 31 * 4);
        assert_eq!(OutputKind::P2wsh.weight(), 43 * 4);
        assert_eq!(OutputKind::P2tr.weight(), 43 * 4);
        assert_eq!(OutputKind::NullData { script_len: 4 }.weight(), 13 * 4);
    }

    #[test]
    fn classify_scripts() {
        assert_eq!(
            OutputKind::of(&ScriptBuf::from_bytes(vec![0x6a, 2, 3, 7])),
            OutputKind::NullData { script_len: 4 }
        );
        assert_eq!(
            OutputKind::of(&ScriptBuf::new_p2wsh(&ScriptBuf::new().wscript_hash())),
            OutputKind::P2wsh
        );
        assert_eq!(
            OutputKind::of(&ScriptBuf::from_bytes(vec![0x51])),
            OutputKind::Other { script_len: 1 }
        );
    }

    #[test]
    fn two_of_three_vsize() {
        let mut inputs = InputCounts::new();
        inputs.insert(TWO_OF_THREE, 1);

        // input 418, outputs 52 + 2 * 124 + 172, header 2 + 32 + 4 + 4
        assert_eq!(estimator().estimate_vsize(&inputs, &batch_outputs(2)), 233);
        assert_eq!(
            estimator().fee(&inputs, &batch_outputs(2)),
            Amount::from_sat(2_330)
        );
    }

    #[test]
    fn prefers_most_confirmed() {
        let fed = federation(3, 2, Network::Regtest);
        let available = vec![
            funding_utxo(&fed.descriptor, Amount::from_sat(500_000), 1, 0),
            funding_utxo(&fed.descriptor, Amount::from_sat(500_000), 10, 1),
            funding_utxo(&fed.descriptor, Amount::from_sat(500_000), 5, 2),
        ];

        let selection = select_and_fee(
            Amount::from_sat(100_000),
            available.clone(),
            TWO_OF_THREE,
            &batch_outputs(1),
            &estimator(),
        )
        .unwrap();

        assert_eq!(selection.inputs, vec![available[1].clone()]);
        assert_eq!(selection.total_in, Amount::from_sat(500_000));
    }

    #[test]
    fn accumulates_until_fee_is_covered() {
        let fed = federation(3, 2, Network::Regtest);
        let available = vec![
            funding_utxo(&fed.descriptor, Amount::from_sat(60_000), 3, 0),
            funding_utxo(&fed.descriptor, Amount::from_sat(50_000), 2, 1),
        ];

        // the first input alone covers the target but not the fee
        let selection = select_and_fee(
            Amount::from_sat(59_000),
            available,
            TWO_OF_THREE,
            &batch_outputs(1),
            &estimator(),
        )
        .unwrap();

        assert_eq!(selection.inputs.len(), 2);
        let mut inputs = InputCounts::new();
        inputs.insert(TWO_OF_THREE, 2);
        assert_eq!(selection.fee, estimator().fee(&inputs, &batch_outputs(1)));
    }

    #[test]
    fn insufficient_funds() {
        let fed = federation(3, 2, Network::Regtest);
        let available = vec![funding_utxo(
            &fed.descriptor,
            Amount::from_sat(10_000),
            6,
            0,
        )];

        let err = select_and_fee(
            Amount::from_sat(10_000),
            available,
            TWO_OF_THREE,
            &batch_outputs(1),
            &estimator(),
        )
        .unwrap_err();

        let SelectionError::InsufficientFunds {
            required,
            available,
        } = err;
        assert_eq!(available, Amount::from_sat(10_000));
        assert!(required > available);
    }

    #[test]
    fn nothing_available() {
        let err = select_and_fee(
            Amount::from_sat(1),
            Vec::new(),
            TWO_OF_THREE,
            &batch_outputs(1),
            &estimator(),
        )
        .unwrap_err();

        assert!(matches!(
            err,
            SelectionError::InsufficientFunds { available, .. } if available == Amount::ZERO
        ));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn selection_covers_target_and_fee(
            amounts in prop::collection::vec((1_000u64..5_000_000, 0u32..100), 1..12),
            target in 1_000u64..10_000_000,
            transfers in 1usize..=40,
        ) {
            let fed = federation(3, 2, Network::Regtest);
            let available: Vec<_> = amounts
                .iter()
                .enumerate()
                .map(|(i, (amount, conf))| {
                    funding_utxo(&fed.descriptor, Amount::from_sat(*amount), *conf, i as u32)
                })
                .collect();
            let outputs = batch_outputs(transfers);

            match select_and_fee(Amount::from_sat(target), available, TWO_OF_THREE, &outputs, &estimator()) {
                Ok(selection) => {
                    let mut inputs = InputCounts::new();
                    inputs.insert(TWO_OF_THREE, selection.inputs.len());
                    let fee = estimator().fee(&inputs, &outputs);

                    prop_assert_eq!(selection.fee, fee);
                    prop_assert!(selection.total_in >= Amount::from_sat(target) + fee);
                    prop_assert!(selection
                        .inputs
                        .windows(2)
                        .all(|w| w[0].confirmations() >= w[1].confirmations()));
                }
                Err(SelectionError::InsufficientFunds { available, .. }) => {
                    let total: u64 = amounts.iter().map(|(amount, _)| amount).sum();
                    prop_assert_eq!(available, Amount::from_sat(total));
                }
            }
        }
    }
}
