//! Addresses, transfers and funding outputs.

use bitcoin::{
    absolute::LockTime,
    hashes::Hash,
    key::CompressedPublicKey,
    opcodes::all::OP_CHECKSIG,
    script::Builder,
    secp256k1::SecretKey,
    transaction::Version,
    Address, Amount, Network, OutPoint, PublicKey, ScriptBuf, Sequence, Transaction, TxIn, TxOut,
    Txid, Witness,
};
use federator_primitives::{
    multisig::MultisigDescriptor,
    transfer::{Transfer, TransferBatch},
    utxo::UnspentOutput,
};
use secp256k1::SECP256K1;

fn sample_key(seed: u8) -> secp256k1::PublicKey {
    let mut bytes = [1u8; 32];
    bytes[31] = seed;
    let secret_key = SecretKey::from_slice(&bytes).expect("within curve order");

    secret_key.public_key(SECP256K1)
}

/// A segwit address derived from `seed`, cycling through P2WPKH, P2WSH and P2TR.
pub fn sample_destination(seed: u8, network: Network) -> Address {
    let key = sample_key(seed);

    match seed % 3 {
        0 => Address::p2wpkh(&CompressedPublicKey(key), network),
        1 => {
            let script = Builder::new()
                .push_key(&PublicKey::new(key))
                .push_opcode(OP_CHECKSIG)
                .into_script();
            Address::p2wsh(&script, network)
        }
        _ => Address::p2tr(SECP256K1, key.x_only_public_key().0, None, network),
    }
}

/// A legacy P2PKH address, which transfers may not pay to.
pub fn sample_p2pkh_address(network: Network) -> Address {
    Address::p2pkh(PublicKey::new(sample_key(0)), network)
}

/// A transfer of `amount_sat` to [`sample_destination`] of `nonce`.
pub fn sample_transfer(nonce: u8, amount_sat: u64, network: Network) -> Transfer {
    Transfer::new(
        sample_destination(nonce, network),
        Amount::from_sat(amount_sat),
        nonce,
    )
    .expect("valid transfer")
}

/// A batch of [`sample_transfer`]s from `(nonce, amount_sat)` pairs.
pub fn sample_batch(transfers: &[(u8, u64)], network: Network) -> TransferBatch {
    TransferBatch::new(
        transfers
            .iter()
            .map(|&(nonce, amount_sat)| sample_transfer(nonce, amount_sat, network))
            .collect(),
    )
    .expect("valid batch")
}

/// An unspent output of `amount` paying `script_pubkey`, with a synthetic parent transaction.
///
/// Distinct `salt`s give distinct parent transactions.
pub fn funding_output(
    script_pubkey: ScriptBuf,
    amount: Amount,
    confirmations: u32,
    salt: u32,
) -> UnspentOutput {
    let parent = Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: OutPoint {
                txid: Txid::all_zeros(),
                vout: salt,
            },
            script_sig: ScriptBuf::new(),
            sequence: Sequence::MAX,
            witness: Witness::new(),
        }],
        output: vec![TxOut {
            value: amount,
            script_pubkey,
        }],
    };

    let outpoint = OutPoint {
        txid: parent.compute_txid(),
        vout: 0,
    };

    UnspentOutput::new(outpoint, amount, confirmations, parent).expect("consistent parent")
}

/// An unspent output owned by the federation described by `descriptor`.
pub fn funding_utxo(
    descriptor: &MultisigDescriptor,
    amount: Amount,
    confirmations: u32,
    salt: u32,
) -> UnspentOutput {
    funding_output(descriptor.script_pubkey(), amount, confirmations, salt)
}
