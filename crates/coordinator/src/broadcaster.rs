//! Hands finalized transactions to the network.

use std::{sync::Arc, time::Duration};

use bitcoin::Txid;
use federator_btc_client::{ChainDataSource, ChainError};
use federator_primitives::multisig::MultisigDescriptor;
use tracing::{error, info};

use crate::{
    coordinator::{verify_final, FinalTransaction},
    errors::BroadcastError,
};

/// Submits final transactions after verifying them once more.
///
/// Failures are returned to the caller and never retried here: a resubmission may need a
/// rebuilt transaction with fresh inputs.
#[derive(Debug, Clone)]
pub struct Broadcaster {
    chain: Arc<dyn ChainDataSource>,
    descriptor: MultisigDescriptor,
    timeout: Duration,
}

impl Broadcaster {
    /// Creates a broadcaster submitting to `chain`, waiting at most `timeout` per submission.
    pub fn new(
        chain: Arc<dyn ChainDataSource>,
        descriptor: MultisigDescriptor,
        timeout: Duration,
    ) -> Self {
        Self {
            chain,
            descriptor,
            timeout,
        }
    }

    /// Verifies every witness of `final_tx` and submits it.
    pub async fn submit(&self, final_tx: &FinalTransaction) -> Result<Txid, BroadcastError> {
        let txid = final_tx.txid();
        verify_final(&self.descriptor, final_tx).inspect_err(|e| {
            error!(%txid, %e, "refusing to submit a transaction that fails verification");
        })?;

        let submitted = tokio::time::timeout(
            self.timeout,
            self.chain.submit_raw_transaction(final_tx.tx()),
        )
        .await
        .map_err(|_| ChainError::Timeout(self.timeout))??;
        info!(%txid, "transaction accepted by the network");

        Ok(submitted)
    }
}
