use bitcoin::{bip32::Xpub, FeeRate, Network, NetworkKind};
use federator_key_deriv::{
    parse_derivation_path, InvalidKeyMaterial, MasterKey, DEFAULT_MULTISIG_KEY_PATH,
};
use federator_primitives::{
    constants::MAX_BATCH_SIZE,
    multisig::{MultisigDescriptor, MultisigError},
};
use federator_tx_builder::TransactionAssembler;
use serde::{Deserialize, Serialize};
use tracing::info;

/// The consensus-critical parameters of the federation.
///
/// Every federator must run with identical values; a federator with different params builds
/// different candidates and rejects those of its cosigners.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Params {
    /// The network the federation operates on.
    pub network: Network,

    /// Number of signatures required to spend the federation's outputs.
    pub threshold: usize,

    /// Extended public keys of all federators, including the local one.
    pub master_xpubs: Vec<Xpub>,

    /// Path of the multisig child keys below every master key.
    #[serde(default = "default_derivation_path")]
    pub derivation_path: String,

    /// Fee rate of batch payouts in sat/vB.
    pub fee_rate: u64,

    /// Maximum number of transfers in a batch.
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
}

fn default_derivation_path() -> String {
    DEFAULT_MULTISIG_KEY_PATH.to_string()
}

const fn default_max_batch_size() -> usize {
    MAX_BATCH_SIZE
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum ParamsError {
    #[error(transparent)]
    KeyMaterial(#[from] InvalidKeyMaterial),

    #[error(transparent)]
    Multisig(#[from] MultisigError),

    #[error("fee rate of {0} sat/vB is out of range")]
    FeeRate(u64),

    #[error("max batch size must be in 1..={MAX_BATCH_SIZE}, got {0}")]
    BatchSize(usize),
}

impl Params {
    /// Checks the params and derives the federation's multisig descriptor.
    pub(crate) fn descriptor(&self) -> Result<MultisigDescriptor, ParamsError> {
        let path = parse_derivation_path(&self.derivation_path)?;
        let expected = NetworkKind::from(self.network);

        let keys = self
            .master_xpubs
            .iter()
            .map(|xpub| {
                if xpub.network != expected {
                    return Err(InvalidKeyMaterial::WrongNetwork {
                        expected,
                        found: xpub.network,
                    });
                }
                MasterKey::Public(*xpub).derive_public(&path)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let descriptor = MultisigDescriptor::new(keys, self.threshold, self.network)?;
        info!(
            address = %descriptor.address(),
            threshold = descriptor.threshold(),
            total = descriptor.total(),
            "derived federation descriptor"
        );

        Ok(descriptor)
    }

    /// Builds the transaction assembler for these params.
    pub(crate) fn assembler(&self) -> Result<TransactionAssembler, ParamsError> {
        if self.max_batch_size == 0 || self.max_batch_size > MAX_BATCH_SIZE {
            return Err(ParamsError::BatchSize(self.max_batch_size));
        }

        let fee_rate = FeeRate::from_sat_per_vb(self.fee_rate)
            .filter(|rate| *rate > FeeRate::ZERO)
            .ok_or(ParamsError::FeeRate(self.fee_rate))?;

        Ok(TransactionAssembler::new(
            self.descriptor()?,
            fee_rate,
            self.max_batch_size,
        ))
    }
}
