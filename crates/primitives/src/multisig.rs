//! The federation's m-of-n multisig descriptor and the script builder behind it.
//!
//! Every federator derives the child public keys of all cosigners independently. The keys are
//! sorted by their serialized bytes before being placed in the redeem script, so any two
//! federators holding the same unordered key set produce byte-identical scripts and addresses.

use std::collections::BTreeSet;

use bitcoin::{
    opcodes::all::OP_CHECKMULTISIG, script::Builder, Address, Network, PublicKey, ScriptBuf,
};

use crate::{constants::MAX_MULTISIG_KEYS, errors::ErrorKind};

/// Error while building a multisig script.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MultisigError {
    /// Fewer keys than the threshold.
    #[error("{supplied} keys supplied but the threshold requires {threshold}")]
    InsufficientKeys {
        /// Number of distinct keys supplied.
        supplied: usize,
        /// Required number of signatures.
        threshold: usize,
    },

    /// A zero threshold would make the output spendable by anyone.
    #[error("threshold must be at least 1")]
    ZeroThreshold,

    /// More keys than `OP_CHECKMULTISIG` accepts.
    #[error("at most 20 keys are supported, got {0}")]
    TooManyKeys(usize),

    /// The same key was supplied twice.
    #[error("key {0} appears more than once")]
    DuplicateKey(PublicKey),

    /// Segwit scripts only accept compressed keys.
    #[error("key {0} is uncompressed")]
    UncompressedKey(PublicKey),
}

impl MultisigError {
    /// Bad key sets are configuration errors.
    pub const fn kind(&self) -> ErrorKind {
        ErrorKind::Input
    }
}

/// Sorts keys ascending by their serialized (compressed) bytes.
///
/// The order is independent of who contributed which key.
pub fn sort_keys(keys: impl IntoIterator<Item = PublicKey>) -> Vec<PublicKey> {
    let mut keys: Vec<PublicKey> = keys.into_iter().collect();
    keys.sort_by_key(|key| key.to_bytes());
    keys
}

/// Builds the `threshold`-of-`n` redeem script over the sorted keys and its P2WSH address.
pub fn build_multisig_script(
    keys: impl IntoIterator<Item = PublicKey>,
    threshold: usize,
    network: Network,
) -> Result<(ScriptBuf, Address), MultisigError> {
    let keys = validate_keys(keys, threshold)?;
    let redeem_script = redeem_script(&keys, threshold);
    let address = Address::p2wsh(&redeem_script, network);

    Ok((redeem_script, address))
}

fn validate_keys(
    keys: impl IntoIterator<Item = PublicKey>,
    threshold: usize,
) -> Result<Vec<PublicKey>, MultisigError> {
    let keys = sort_keys(keys);

    let mut seen = BTreeSet::new();
    for key in &keys {
        if !key.compressed {
            return Err(MultisigError::UncompressedKey(*key));
        }
        if !seen.insert(key.to_bytes()) {
            return Err(MultisigError::DuplicateKey(*key));
        }
    }

    if threshold == 0 {
        return Err(MultisigError::ZeroThreshold);
    }
    if keys.len() < threshold {
        return Err(MultisigError::InsufficientKeys {
            supplied: keys.len(),
            threshold,
        });
    }
    if keys.len() > MAX_MULTISIG_KEYS {
        return Err(MultisigError::TooManyKeys(keys.len()));
    }

    Ok(keys)
}

/// `OP_m <key_1> ... <key_n> OP_n OP_CHECKMULTISIG` over already sorted keys.
fn redeem_script(sorted_keys: &[PublicKey], threshold: usize) -> ScriptBuf {
    let builder = sorted_keys
        .iter()
        .fold(Builder::new().push_int(threshold as i64), |builder, key| {
            builder.push_key(key)
        });

    builder
        .push_int(sorted_keys.len() as i64)
        .push_opcode(OP_CHECKMULTISIG)
        .into_script()
}

/// The federation's multisig wallet for one key epoch.
///
/// Derived once from the cosigners' child public keys and read-only thereafter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultisigDescriptor {
    /// Child public keys, sorted ascending by serialized bytes.
    keys: Vec<PublicKey>,

    /// Number of signatures required to spend.
    threshold: usize,

    /// Network the address is encoded for.
    network: Network,

    /// The multisig redeem (witness) script.
    redeem_script: ScriptBuf,

    /// P2WSH address paying to [`Self::redeem_script`].
    address: Address,
}

impl MultisigDescriptor {
    /// Creates the descriptor from an unordered set of child public keys.
    pub fn new(
        keys: impl IntoIterator<Item = PublicKey>,
        threshold: usize,
        network: Network,
    ) -> Result<Self, MultisigError> {
        let keys = validate_keys(keys, threshold)?;
        let redeem_script = redeem_script(&keys, threshold);
        let address = Address::p2wsh(&redeem_script, network);

        Ok(Self {
            keys,
            threshold,
            network,
            redeem_script,
            address,
        })
    }

    /// Sorted cosigner keys.
    pub fn keys(&self) -> &[PublicKey] {
        &self.keys
    }

    /// Required number of signatures (m).
    pub const fn threshold(&self) -> usize {
        self.threshold
    }

    /// Total number of cosigners (n).
    pub fn total(&self) -> usize {
        self.keys.len()
    }

    /// The network the federation operates on.
    pub const fn network(&self) -> Network {
        self.network
    }

    /// The witness script spent by every federation input.
    pub const fn redeem_script(&self) -> &ScriptBuf {
        &self.redeem_script
    }

    /// The federation's address.
    pub const fn address(&self) -> &Address {
        &self.address
    }

    /// The locking script of outputs owned by the federation.
    pub fn script_pubkey(&self) -> ScriptBuf {
        self.address.script_pubkey()
    }

    /// Whether `key` is one of the cosigners.
    pub fn contains(&self, key: &PublicKey) -> bool {
        self.keys.contains(key)
    }
}

#[cfg(test)]
mod tests {
    use bitcoin::{opcodes::all::OP_PUSHNUM_2, AddressType};
    use proptest::prelude::*;
    use secp256k1::{SecretKey, SECP256K1};

    use super::*;

    fn keys(count: usize) -> Vec<PublicKey> {
        (0..count)
            .map(|i| {
                let sk = SecretKey::from_slice(&[i as u8 + 1; 32]).expect("valid secret key");
                PublicKey::new(sk.public_key(SECP256K1))
            })
            .collect()
    }

    #[test]
    fn test_two_of_three_layout() {
        let (script, address) = build_multisig_script(keys(3), 2, Network::Regtest).unwrap();
        let bytes = script.as_bytes();

        assert_eq!(bytes[0], OP_PUSHNUM_2.to_u8());
        assert_eq!(bytes[bytes.len() - 1], OP_CHECKMULTISIG.to_u8());
        // OP_2 + 3 * (push33 + key) + OP_3 + OP_CHECKMULTISIG
        assert_eq!(bytes.len(), 1 + 3 * 34 + 1 + 1);
        assert_eq!(address.address_type(), Some(AddressType::P2wsh));
        assert!(address.to_string().starts_with("bcrt1q"));
    }

    #[test]
    fn test_keys_are_sorted() {
        let descriptor = MultisigDescriptor::new(keys(5), 3, Network::Regtest).unwrap();
        let serialized: Vec<Vec<u8>> = descriptor.keys().iter().map(|k| k.to_bytes()).collect();

        let mut sorted = serialized.clone();
        sorted.sort();
        assert_eq!(serialized, sorted);
        assert_eq!(descriptor.total(), 5);
        assert_eq!(descriptor.script_pubkey(), descriptor.address().script_pubkey());
    }

    #[test]
    fn test_invalid_key_sets() {
        assert_eq!(
            build_multisig_script(keys(1), 2, Network::Regtest),
            Err(MultisigError::InsufficientKeys {
                supplied: 1,
                threshold: 2
            })
        );
        assert_eq!(
            MultisigDescriptor::new(keys(3), 0, Network::Regtest),
            Err(MultisigError::ZeroThreshold)
        );
        assert_eq!(
            MultisigDescriptor::new(keys(MAX_MULTISIG_KEYS + 1), 2, Network::Regtest),
            Err(MultisigError::TooManyKeys(MAX_MULTISIG_KEYS + 1))
        );

        let mut duplicated = keys(2);
        duplicated.push(duplicated[0]);
        assert_eq!(
            MultisigDescriptor::new(duplicated.clone(), 2, Network::Regtest),
            Err(MultisigError::DuplicateKey(duplicated[0]))
        );

        let mut uncompressed = keys(3);
        uncompressed[1].compressed = false;
        assert!(matches!(
            MultisigDescriptor::new(uncompressed, 2, Network::Regtest),
            Err(MultisigError::UncompressedKey(_))
        ));
    }

    fn key_set_with_threshold() -> impl Strategy<Value = (Vec<PublicKey>, Vec<PublicKey>, usize)> {
        (1usize..=7).prop_flat_map(|n| {
            let keys = keys(n);
            (Just(keys.clone()), Just(keys).prop_shuffle(), 1..=n)
        })
    }

    proptest! {
        // Any permutation of the same key set yields the same script and address.
        #[test]
        fn script_is_order_independent((keys, shuffled, threshold) in key_set_with_threshold()) {
            let expected = build_multisig_script(keys, threshold, Network::Regtest).unwrap();
            let actual = build_multisig_script(shuffled, threshold, Network::Regtest).unwrap();
            prop_assert_eq!(expected, actual);
        }
    }
}
