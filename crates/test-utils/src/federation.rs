//! Key material for a whole federation.

use bitcoin::{
    bip32::{DerivationPath, Xpriv, Xpub},
    Network, PublicKey,
};
use federator_key_deriv::{
    parse_derivation_path, MasterKey, SigningKey, DEFAULT_MULTISIG_KEY_PATH,
};
use federator_primitives::multisig::MultisigDescriptor;
use secp256k1::SECP256K1;

/// All key material of an `m`-of-`n` federation, indexed by federator.
#[derive(Debug)]
pub struct Federation {
    /// Master private keys.
    pub master_keys: Vec<Xpriv>,

    /// Derivation path of the multisig keys.
    pub path: DerivationPath,

    /// Child signing keys at [`Self::path`].
    pub signing_keys: Vec<SigningKey>,

    /// Child public keys at [`Self::path`], in federator order (not sorted).
    pub public_keys: Vec<PublicKey>,

    /// The federation's multisig descriptor.
    pub descriptor: MultisigDescriptor,
}

impl Federation {
    /// The master private key of federator `index`.
    pub fn master_key(&self, index: usize) -> MasterKey {
        MasterKey::Private(self.master_keys[index])
    }

    /// Extended public keys of all federators.
    pub fn master_xpubs(&self) -> Vec<Xpub> {
        self.master_keys
            .iter()
            .map(|xpriv| Xpub::from_priv(SECP256K1, xpriv))
            .collect()
    }

    /// A fresh copy of federator `index`'s signing key.
    pub fn signing_key(&self, index: usize) -> SigningKey {
        self.master_key(index)
            .derive_signing_key(&self.path)
            .expect("fixture keys derive")
    }
}

/// Generates a deterministic `threshold`-of-`total` federation on `network`.
pub fn federation(total: usize, threshold: usize, network: Network) -> Federation {
    let path = parse_derivation_path(DEFAULT_MULTISIG_KEY_PATH).expect("default path parses");

    let master_keys: Vec<Xpriv> = (0..total)
        .map(|i| Xpriv::new_master(network, &[i as u8 + 1; 32]).expect("valid seed"))
        .collect();

    let signing_keys: Vec<SigningKey> = master_keys
        .iter()
        .map(|xpriv| {
            MasterKey::Private(*xpriv)
                .derive_signing_key(&path)
                .expect("fixture keys derive")
        })
        .collect();
    let public_keys: Vec<PublicKey> = signing_keys.iter().map(SigningKey::public_key).collect();

    let descriptor =
        MultisigDescriptor::new(public_keys.clone(), threshold, network).expect("valid federation");

    Federation {
        master_keys,
        path,
        signing_keys,
        public_keys,
        descriptor,
    }
}
