//! BIP32 derivation paths used by the federation.
//!
//! Unlike a single-operator wallet, the multisig key path has to be identical on every
//! federator, otherwise the derived redeem scripts (and therefore the multisig address) diverge.
//! It is therefore part of the consensus-critical parameters rather than a local setting.

use std::str::FromStr;

use bitcoin::bip32::DerivationPath;

use crate::derive::InvalidKeyMaterial;

/// Path at which each federator's multisig child key is derived when none is configured.
///
/// Non-hardened so that the child public keys of cosigners can be derived from their extended
/// public keys alone.
pub const DEFAULT_MULTISIG_KEY_PATH: &str = "m/0/0/0";

/// Parses a derivation path such as `m/0/0/0`.
///
/// The leading `m/` is optional since some operators configure paths relative to the master key.
pub fn parse_derivation_path(path: &str) -> Result<DerivationPath, InvalidKeyMaterial> {
    let trimmed = path.trim();
    let normalized = if trimmed == "m" || trimmed.starts_with("m/") {
        trimmed.to_owned()
    } else {
        format!("m/{trimmed}")
    };

    DerivationPath::from_str(&normalized).map_err(InvalidKeyMaterial::MalformedPath)
}
