//! Key derivation primitives for federators.
//!
//! Every federator holds one extended private key of its own and the extended public keys of all
//! its cosigners. The child keys that make up the federation's multisig script are derived from
//! those master keys along a single, shared derivation path.
//!
//! # Usage
//!
//! ```rust,ignore
//! use bitcoin::Network;
//! use federator_key_deriv::{MasterKey, parse_derivation_path};
//!
//! let path = parse_derivation_path("m/0/0/0")?;
//! let own = MasterKey::parse(&xprv, Network::Regtest)?;
//! let signing_key = own.derive_signing_key(&path)?;
//!
//! let cosigner = MasterKey::parse(&xpub, Network::Regtest)?;
//! let cosigner_pubkey = cosigner.derive_public(&path)?;
//! ```

pub mod derive;
mod paths;

pub use derive::{derive, ChildKey, InvalidKeyMaterial, MasterKey, SigningKey};
pub use paths::{parse_derivation_path, DEFAULT_MULTISIG_KEY_PATH};
