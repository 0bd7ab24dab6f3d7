//! Encoding of a [`TransferBatch`] into transaction outputs and back.
//!
//! A batch payout lays its outputs out as:
//!
//! 1. a zero-value marker: `OP_RETURN <len> <nonce_1> ... <nonce_len>`,
//! 2. one output per transfer, in batch order,
//! 3. the change output back to the federation.
//!
//! [`decode`] is the inverse of [`encode`] (with the change appended) and is what every
//! federator runs on a candidate before agreeing to sign it.

use bitcoin::{opcodes::all::OP_RETURN, Address, AddressType, Amount, Network, TxOut};
use federator_primitives::{
    constants::{MAX_BATCH_SIZE, RESERVED_NONCE},
    transfer::{BatchError, Transfer, TransferBatch},
};

use crate::{errors::CodecError, tx::nonce_marker_script};

/// Marker, at least one transfer, change.
const MIN_OUTPUTS: usize = 3;

/// Encodes the batch as the marker output followed by one output per transfer.
///
/// The caller appends the change output.
pub fn encode(batch: &TransferBatch) -> Vec<TxOut> {
    let marker = TxOut {
        value: Amount::ZERO,
        script_pubkey: nonce_marker_script(&batch.nonces()),
    };

    std::iter::once(marker)
        .chain(batch.transfers().iter().map(|transfer| TxOut {
            value: transfer.amount(),
            script_pubkey: transfer.destination().script_pubkey(),
        }))
        .collect()
}

/// Decodes the transfers paid out by a batch transaction's outputs.
///
/// The last output is treated as change and is not part of the batch. Destinations are
/// restricted to the segwit families P2WPKH, P2WSH and P2TR on `network`.
pub fn decode(outputs: &[TxOut], network: Network) -> Result<TransferBatch, CodecError> {
    if outputs.len() < MIN_OUTPUTS {
        return Err(CodecError::MalformedBatch(format!(
            "expected at least {MIN_OUTPUTS} outputs, found {}",
            outputs.len()
        )));
    }

    let marker = &outputs[0];
    if marker.value != Amount::ZERO {
        return Err(CodecError::InvalidMarkerOutput(format!(
            "marker carries {} instead of zero",
            marker.value
        )));
    }

    let script = marker.script_pubkey.as_bytes();
    if script.first() != Some(&OP_RETURN.to_u8()) {
        return Err(CodecError::InvalidMarkerOutput(
            "marker does not start with OP_RETURN".to_string(),
        ));
    }

    let declared = *script
        .get(1)
        .ok_or_else(|| CodecError::MalformedBatch("marker has no length byte".to_string()))?
        as usize;
    let nonces = &script[2..];
    if declared != nonces.len() {
        return Err(CodecError::MalformedBatch(format!(
            "marker declares {declared} nonces but holds {}",
            nonces.len()
        )));
    }

    let transfer_outputs = &outputs[1..outputs.len() - 1];
    if nonces.len() != transfer_outputs.len() {
        return Err(CodecError::MalformedBatch(format!(
            "{} nonces for {} transfer outputs",
            nonces.len(),
            transfer_outputs.len()
        )));
    }

    let mut transfers = Vec::with_capacity(transfer_outputs.len());
    for (offset, (output, &nonce)) in transfer_outputs.iter().zip(nonces).enumerate() {
        let index = offset + 1;

        let destination = Address::from_script(&output.script_pubkey, network)
            .map_err(|_| CodecError::InvalidDestination { index })?;
        if !is_supported_destination(&destination) {
            return Err(CodecError::InvalidDestination { index });
        }

        if nonce == RESERVED_NONCE {
            return Err(CodecError::InvalidNonce { index, nonce });
        }

        let transfer = Transfer::new(destination, output.value, nonce)
            .map_err(|e| CodecError::MalformedBatch(format!("output {index}: {e}")))?;
        transfers.push(transfer);
    }

    TransferBatch::new(transfers).map_err(|e| match e {
        BatchError::BatchTooLarge { size, max } => CodecError::BatchTooLarge { size, max },
        other => CodecError::MalformedBatch(other.to_string()),
    })
}

/// Whether transfers may pay to this address.
pub fn is_supported_destination(address: &Address) -> bool {
    matches!(
        address.address_type(),
        Some(AddressType::P2wpkh | AddressType::P2wsh | AddressType::P2tr)
    )
}

#[cfg(test)]
mod tests {
    use bitcoin::ScriptBuf;
    use federator_test_utils::{sample_destination, sample_p2pkh_address};
    use proptest::{prelude::*, sample::subsequence};

    use super::*;

    const NETWORK: Network = Network::Regtest;

    fn transfer(nonce: u8, amount: u64, seed: u8) -> Transfer {
        Transfer::new(
            sample_destination(seed, NETWORK),
            Amount::from_sat(amount),
            nonce,
        )
        .expect("valid transfer")
    }

    fn change() -> TxOut {
        TxOut {
            value: Amount::from_sat(12_345),
            script_pubkey: sample_destination(200, NETWORK).script_pubkey(),
        }
    }

    fn with_change(batch: &TransferBatch) -> Vec<TxOut> {
        let mut outputs = encode(batch);
        outputs.push(change());
        outputs
    }

    #[test]
    fn encode_layout() {
        let batch = TransferBatch::new(vec![transfer(7, 1_000, 1), transfer(3, 2_000, 2)]).unwrap();
        let outputs = encode(&batch);

        assert_eq!(outputs.len(), 3);
        assert_eq!(outputs[0].value, Amount::ZERO);
        assert_eq!(outputs[0].script_pubkey.as_bytes(), &[0x6a, 2, 7, 3]);
        assert_eq!(outputs[1].value, Amount::from_sat(1_000));
        assert_eq!(outputs[2].value, Amount::from_sat(2_000));
        assert_eq!(
            outputs[2].script_pubkey,
            sample_destination(2, NETWORK).script_pubkey()
        );
    }

    #[test]
    fn decode_boundary_nonces() {
        let batch =
            TransferBatch::new(vec![transfer(0, 1_000, 1), transfer(254, 5_000, 2)]).unwrap();
        assert_eq!(decode(&with_change(&batch), NETWORK), Ok(batch));
    }

    #[test]
    fn decode_rejects_short_output_list() {
        let batch = TransferBatch::new(vec![transfer(1, 1_000, 1)]).unwrap();
        let outputs = encode(&batch);

        assert!(matches!(
            decode(&outputs, NETWORK),
            Err(CodecError::MalformedBatch(_))
        ));
    }

    #[test]
    fn decode_rejects_bad_marker() {
        let batch = TransferBatch::new(vec![transfer(1, 1_000, 1)]).unwrap();

        let mut outputs = with_change(&batch);
        outputs[0].value = Amount::from_sat(1);
        assert!(matches!(
            decode(&outputs, NETWORK),
            Err(CodecError::InvalidMarkerOutput(_))
        ));

        let mut outputs = with_change(&batch);
        outputs[0].script_pubkey = ScriptBuf::from_bytes(vec![0x51, 1, 1]);
        assert!(matches!(
            decode(&outputs, NETWORK),
            Err(CodecError::InvalidMarkerOutput(_))
        ));

        let mut outputs = with_change(&batch);
        outputs[0].script_pubkey = ScriptBuf::from_bytes(vec![0x6a]);
        assert!(matches!(
            decode(&outputs, NETWORK),
            Err(CodecError::MalformedBatch(_))
        ));
    }

    #[test]
    fn decode_rejects_length_mismatch() {
        let batch = TransferBatch::new(vec![transfer(1, 1_000, 1), transfer(2, 1_000, 2)]).unwrap();

        let mut outputs = with_change(&batch);
        outputs[0].script_pubkey = ScriptBuf::from_bytes(vec![0x6a, 3, 1, 2]);
        assert!(matches!(
            decode(&outputs, NETWORK),
            Err(CodecError::MalformedBatch(_))
        ));

        // consistent marker, but one nonce short for the outputs
        let mut outputs = with_change(&batch);
        outputs[0].script_pubkey = ScriptBuf::from_bytes(vec![0x6a, 1, 1]);
        assert!(matches!(
            decode(&outputs, NETWORK),
            Err(CodecError::MalformedBatch(_))
        ));
    }

    #[test]
    fn decode_rejects_reserved_nonce() {
        let batch = TransferBatch::new(vec![transfer(1, 1_000, 1), transfer(2, 1_000, 2)]).unwrap();

        let mut outputs = with_change(&batch);
        outputs[0].script_pubkey = ScriptBuf::from_bytes(vec![0x6a, 2, 1, 0xff]);
        assert_eq!(
            decode(&outputs, NETWORK),
            Err(CodecError::InvalidNonce {
                index: 2,
                nonce: 0xff
            })
        );
    }

    #[test]
    fn decode_rejects_duplicate_nonce() {
        let batch = TransferBatch::new(vec![transfer(1, 1_000, 1), transfer(2, 1_000, 2)]).unwrap();

        let mut outputs = with_change(&batch);
        outputs[0].script_pubkey = ScriptBuf::from_bytes(vec![0x6a, 2, 9, 9]);
        assert!(matches!(
            decode(&outputs, NETWORK),
            Err(CodecError::MalformedBatch(_))
        ));
    }

    #[test]
    fn decode_rejects_unsupported_destination() {
        let batch = TransferBatch::new(vec![transfer(1, 1_000, 1)]).unwrap();

        let mut outputs = with_change(&batch);
        outputs[1].script_pubkey = sample_p2pkh_address(NETWORK).script_pubkey();
        assert_eq!(
            decode(&outputs, NETWORK),
            Err(CodecError::InvalidDestination { index: 1 })
        );

        let mut outputs = with_change(&batch);
        outputs[1].script_pubkey = ScriptBuf::from_bytes(vec![0x51]);
        assert_eq!(
            decode(&outputs, NETWORK),
            Err(CodecError::InvalidDestination { index: 1 })
        );
    }

    #[test]
    fn decode_rejects_zero_amount_transfer() {
        let batch = TransferBatch::new(vec![transfer(1, 1_000, 1)]).unwrap();

        let mut outputs = with_change(&batch);
        outputs[1].value = Amount::ZERO;
        assert!(matches!(
            decode(&outputs, NETWORK),
            Err(CodecError::MalformedBatch(_))
        ));
    }

    #[test]
    fn decode_rejects_oversized_batch() {
        let size = MAX_BATCH_SIZE + 1;
        let nonces: Vec<u8> = (0..size as u8).collect();

        let mut outputs = vec![TxOut {
            value: Amount::ZERO,
            script_pubkey: nonce_marker_script(&nonces),
        }];
        outputs.extend(nonces.iter().map(|&nonce| TxOut {
            value: Amount::from_sat(1_000),
            script_pubkey: sample_destination(nonce, NETWORK).script_pubkey(),
        }));
        outputs.push(change());

        assert_eq!(
            decode(&outputs, NETWORK),
            Err(CodecError::BatchTooLarge {
                size,
                max: MAX_BATCH_SIZE
            })
        );
    }

    fn arb_batch() -> impl Strategy<Value = TransferBatch> {
        subsequence((0u8..RESERVED_NONCE).collect::<Vec<_>>(), 1..=MAX_BATCH_SIZE)
            .prop_shuffle()
            .prop_flat_map(|nonces| {
                let len = nonces.len();
                (
                    Just(nonces),
                    prop::collection::vec(1u64..=2_100_000_000_000_000, len),
                    prop::collection::vec(any::<u8>(), len),
                )
            })
            .prop_map(|(nonces, amounts, seeds)| {
                let transfers = nonces
                    .into_iter()
                    .zip(amounts)
                    .zip(seeds)
                    .map(|((nonce, amount), seed)| transfer(nonce, amount, seed))
                    .collect();
                TransferBatch::new(transfers).expect("unique nonces within bounds")
            })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn decode_inverts_encode(batch in arb_batch()) {
            prop_assert_eq!(decode(&with_change(&batch), NETWORK), Ok(batch));
        }
    }
}
