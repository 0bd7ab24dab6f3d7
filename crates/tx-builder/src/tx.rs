//! Low-level helpers for laying out transactions.

use bitcoin::{
    absolute::LockTime,
    opcodes::all::OP_RETURN,
    transaction::{self, Sequence},
    OutPoint, ScriptBuf, Transaction, TxIn, TxOut, Witness,
};

/// Creates a version 2 [`Transaction`] with no locktime for the given inputs and outputs.
pub(crate) fn create_tx(tx_ins: Vec<TxIn>, tx_outs: Vec<TxOut>) -> Transaction {
    Transaction {
        version: transaction::Version::TWO,
        lock_time: LockTime::ZERO,
        input: tx_ins,
        output: tx_outs,
    }
}

/// Creates a list of [`TxIn`]'s from given [`OutPoint`]'s.
///
/// Each input has an empty `witness`, an empty `script_sig` and the `sequence` set to enable
/// replace-by-fee with no locktime.
pub(crate) fn create_tx_ins(utxos: impl IntoIterator<Item = OutPoint>) -> Vec<TxIn> {
    utxos
        .into_iter()
        .map(|previous_output| TxIn {
            previous_output,
            sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
            script_sig: ScriptBuf::default(),
            witness: Witness::new(),
        })
        .collect()
}

/// Builds the nonce marker script: `OP_RETURN`, one length byte, then the nonces.
///
/// The length is written as a raw byte rather than through the script builder so that the
/// layout stays fixed regardless of push-opcode minimality rules. Callers guarantee that
/// `nonces.len()` fits in a direct push.
pub(crate) fn nonce_marker_script(nonces: &[u8]) -> ScriptBuf {
    let mut bytes = Vec::with_capacity(nonces.len() + 2);
    bytes.push(OP_RETURN.to_u8());
    bytes.push(nonces.len() as u8);
    bytes.extend_from_slice(nonces);

    ScriptBuf::from_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_layout() {
        let script = nonce_marker_script(&[7, 3, 0]);
        assert_eq!(script.as_bytes(), &[0x6a, 3, 7, 3, 0]);
        assert!(script.is_op_return());
    }

    #[test]
    fn inputs_signal_rbf() {
        let ins = create_tx_ins([OutPoint::null()]);
        assert_eq!(ins.len(), 1);
        assert!(ins[0].sequence.is_rbf());
        assert!(ins[0].witness.is_empty());
    }
}
