//! Derivation of a federator's child keys from its master key material.
//!
//! The signing key is an opaque wrapper that can only be obtained through derivation from an
//! extended private key, so every signing key in the process is valid by construction.

use std::{fmt, ops::Deref, str::FromStr};

use bitcoin::{
    bip32::{self, DerivationPath, Xpriv, Xpub},
    key::Keypair,
    secp256k1::SecretKey,
    Network, NetworkKind, PublicKey,
};
use federator_primitives::errors::ErrorKind;
use secp256k1::SECP256K1;

/// Error returned when master key material or a derivation path cannot be used.
#[derive(Debug, thiserror::Error)]
pub enum InvalidKeyMaterial {
    /// The extended key is not a valid base58 `xprv`/`xpub` (or testnet equivalent).
    #[error("malformed extended key: {0}")]
    MalformedKey(bip32::Error),

    /// The derivation path does not parse.
    #[error("malformed derivation path: {0}")]
    MalformedPath(bip32::Error),

    /// The extended key was generated for a different kind of network.
    #[error("extended key is for {found:?} but the federation runs on {expected:?}")]
    WrongNetwork {
        /// Network kind of the configured federation.
        expected: NetworkKind,
        /// Network kind encoded in the extended key.
        found: NetworkKind,
    },

    /// Hardened steps can only be derived from private key material.
    #[error("cannot derive hardened path {0} from an extended public key")]
    HardenedFromPublic(DerivationPath),

    /// A signing key was requested from public-only key material.
    #[error("an extended private key is required to derive a signing key")]
    PublicOnly,

    /// BIP32 derivation failed.
    #[error("BIP32 derivation error: {0}")]
    Bip32(#[from] bip32::Error),
}

impl InvalidKeyMaterial {
    /// Bad key material is always a configuration problem.
    pub const fn kind(&self) -> ErrorKind {
        ErrorKind::Input
    }
}

/// Master key material of a single federator.
///
/// The local federator holds the private form of its own master key while cosigners are only
/// known by their extended public keys.
#[derive(Clone, PartialEq, Eq)]
pub enum MasterKey {
    /// Extended private key, only ever held for the local federator.
    Private(Xpriv),

    /// Extended public key of a cosigner (or of the local federator).
    Public(Xpub),
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // never print private key material
            MasterKey::Private(xpriv) => f
                .debug_tuple("Private")
                .field(&Xpub::from_priv(SECP256K1, xpriv))
                .finish(),
            MasterKey::Public(xpub) => f.debug_tuple("Public").field(xpub).finish(),
        }
    }
}

impl MasterKey {
    /// Parses a base58-encoded extended key and checks that it belongs to `network`.
    pub fn parse(encoded: &str, network: Network) -> Result<Self, InvalidKeyMaterial> {
        let encoded = encoded.trim();
        let key = match Xpriv::from_str(encoded) {
            Ok(xpriv) => MasterKey::Private(xpriv),
            Err(_) => Xpub::from_str(encoded)
                .map(MasterKey::Public)
                .map_err(InvalidKeyMaterial::MalformedKey)?,
        };

        let expected = NetworkKind::from(network);
        let found = key.network_kind();
        if expected != found {
            return Err(InvalidKeyMaterial::WrongNetwork { expected, found });
        }

        Ok(key)
    }

    /// Network kind encoded in the extended key.
    pub const fn network_kind(&self) -> NetworkKind {
        match self {
            MasterKey::Private(xpriv) => xpriv.network,
            MasterKey::Public(xpub) => xpub.network,
        }
    }

    /// Returns the extended public form of this master key.
    pub fn to_xpub(&self) -> Xpub {
        match self {
            MasterKey::Private(xpriv) => Xpub::from_priv(SECP256K1, xpriv),
            MasterKey::Public(xpub) => *xpub,
        }
    }

    /// Derives the child public key at `path`.
    ///
    /// Works for both private and public master keys. The result is always a compressed key
    /// since it ends up in a segwit script.
    pub fn derive_public(&self, path: &DerivationPath) -> Result<PublicKey, InvalidKeyMaterial> {
        let child = match self {
            MasterKey::Private(xpriv) => {
                let child = xpriv.derive_priv(SECP256K1, path)?;
                Xpub::from_priv(SECP256K1, &child)
            }
            MasterKey::Public(xpub) => {
                if path.as_ref().iter().any(|step| step.is_hardened()) {
                    return Err(InvalidKeyMaterial::HardenedFromPublic(path.clone()));
                }
                xpub.derive_pub(SECP256K1, path)?
            }
        };

        Ok(PublicKey::new(child.public_key))
    }

    /// Derives the child signing key at `path`.
    ///
    /// Fails with [`InvalidKeyMaterial::PublicOnly`] for public master keys.
    pub fn derive_signing_key(
        &self,
        path: &DerivationPath,
    ) -> Result<SigningKey, InvalidKeyMaterial> {
        let MasterKey::Private(xpriv) = self else {
            return Err(InvalidKeyMaterial::PublicOnly);
        };

        let child = xpriv.derive_priv(SECP256K1, path)?;
        Ok(SigningKey(Keypair::from_secret_key(
            SECP256K1,
            &child.private_key,
        )))
    }
}

/// A child key derived from a [`MasterKey`].
#[derive(Debug)]
pub enum ChildKey {
    /// Derived from an extended private key; can sign.
    Private(SigningKey),

    /// Derived from an extended public key; can only be used to build scripts and verify.
    Public(PublicKey),
}

impl ChildKey {
    /// Public half of the child key.
    pub fn public_key(&self) -> PublicKey {
        match self {
            ChildKey::Private(key) => key.public_key(),
            ChildKey::Public(pubkey) => *pubkey,
        }
    }
}

/// Derives the child key at `path`, keeping the private form when the master key has one.
///
/// This is a pure function of `(master, path)`: the same inputs always produce the same child.
pub fn derive(master: &MasterKey, path: &DerivationPath) -> Result<ChildKey, InvalidKeyMaterial> {
    match master {
        MasterKey::Private(_) => master.derive_signing_key(path).map(ChildKey::Private),
        MasterKey::Public(_) => master.derive_public(path).map(ChildKey::Public),
    }
}

/// The federator's multisig signing keypair.
///
/// This type can only be constructed via [`MasterKey::derive_signing_key`].
/// Implements [`Deref<Target = Keypair>`] for access to signing methods.
pub struct SigningKey(Keypair);

impl SigningKey {
    /// Compressed public key that identifies this federator in the multisig script.
    pub fn public_key(&self) -> PublicKey {
        PublicKey::new(self.0.public_key())
    }

    /// Secret key used for ECDSA signing.
    pub fn secret_key(&self) -> SecretKey {
        self.0.secret_key()
    }
}

impl Deref for SigningKey {
    type Target = Keypair;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("public_key", &self.public_key())
            .finish_non_exhaustive()
    }
}

impl Drop for SigningKey {
    fn drop(&mut self) {
        // NOTE: `non_secure_erase` overwrites the secret with a constant, it is not a guaranteed
        // zeroization.
        self.0.non_secure_erase();
    }
}
