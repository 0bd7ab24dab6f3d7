//! File-based stand-ins for the chain event source and the peer transport.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{ensure, Context};
use async_trait::async_trait;
use bitcoin::Network;
use federator_btc_client::ChainError;
use federator_coordinator::TransferSource;
use federator_primitives::transfer::{Transfer, TransferRequest};
use federator_tx_builder::CandidateTransaction;
use tracing::{debug, warn};

use crate::constants::CANDIDATE_EXTENSION;

/// Reads a JSON list of transfer requests and validates them for `network`.
pub(crate) fn read_transfers(path: &Path, network: Network) -> anyhow::Result<Vec<Transfer>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("cannot read transfers from {}", path.display()))?;
    let requests: Vec<TransferRequest> =
        serde_json::from_str(&raw).context("transfers file is not a list of transfers")?;

    requests
        .iter()
        .map(|request| {
            Transfer::from_request(request, network)
                .with_context(|| format!("invalid transfer with nonce {}", request.nonce))
        })
        .collect()
}

/// Reads candidate files and merges their signatures in order.
pub(crate) fn read_candidates(paths: &[PathBuf]) -> anyhow::Result<CandidateTransaction> {
    let (first, rest) = paths.split_first().context("no candidate files given")?;

    let mut merged = read_candidate(first)?;
    for path in rest {
        merged = merged
            .merge(&read_candidate(path)?)
            .with_context(|| format!("cannot merge {}", path.display()))?;
    }

    Ok(merged)
}

pub(crate) fn read_candidate(path: &Path) -> anyhow::Result<CandidateTransaction> {
    let bytes =
        fs::read(path).with_context(|| format!("cannot read candidate {}", path.display()))?;

    CandidateTransaction::from_bytes(&bytes)
        .with_context(|| format!("{} is not a candidate", path.display()))
}

pub(crate) fn write_candidate(path: &Path, candidate: &CandidateTransaction) -> anyhow::Result<()> {
    fs::write(path, candidate.to_bytes()?)
        .with_context(|| format!("cannot write candidate {}", path.display()))?;
    debug!(id = %candidate.id(), path = %path.display(), "wrote candidate");

    Ok(())
}

/// Writes `candidate` into `dir`, named after its id and signature count.
pub(crate) fn publish_candidate(
    dir: &Path,
    candidate: &CandidateTransaction,
) -> anyhow::Result<PathBuf> {
    let name = format!(
        "{}-{}.{CANDIDATE_EXTENSION}",
        candidate.id(),
        candidate.signature_count()
    );
    let path = dir.join(name);
    write_candidate(&path, candidate)?;

    Ok(path)
}

/// Reads a received candidate file and removes it, so it is handled at most once.
pub(crate) fn take_candidate(path: &Path) -> anyhow::Result<Vec<u8>> {
    let bytes =
        fs::read(path).with_context(|| format!("cannot read candidate {}", path.display()))?;
    fs::remove_file(path)
        .with_context(|| format!("cannot remove handled candidate {}", path.display()))?;

    Ok(bytes)
}

/// Candidate files currently waiting in `dir`, oldest name first.
pub(crate) fn pending_candidates(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    ensure!(dir.is_dir(), "{} is not a directory", dir.display());

    let mut paths = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.ends_with(CANDIDATE_EXTENSION))
        })
        .collect::<Vec<_>>();
    paths.sort();

    Ok(paths)
}

/// A [`TransferSource`] backed by a transfers file that an external watcher keeps current.
#[derive(Debug, Clone)]
pub(crate) struct FileTransfers {
    path: PathBuf,
    network: Network,
}

impl FileTransfers {
    pub(crate) const fn new(path: PathBuf, network: Network) -> Self {
        Self { path, network }
    }
}

#[async_trait]
impl TransferSource for FileTransfers {
    async fn authorized_transfers(&self) -> Result<Vec<Transfer>, ChainError> {
        read_transfers(&self.path, self.network).map_err(|e| {
            warn!(path = %self.path.display(), %e, "cannot load authorized transfers");
            ChainError::InvalidResponse(format!("{e:#}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use federator_test_utils::{federation, funding_utxo, sample_batch};
    use federator_tx_builder::TransactionAssembler;

    use super::*;

    const NETWORK: Network = Network::Regtest;

    fn write_requests(dir: &Path, transfers: &[Transfer]) -> PathBuf {
        let path = dir.join("transfers.json");
        let requests: Vec<_> = transfers.iter().map(Transfer::to_request).collect();
        fs::write(&path, serde_json::to_vec(&requests).unwrap()).unwrap();
        path
    }

    #[tokio::test]
    async fn transfers_file_is_a_source() {
        let dir = tempfile::tempdir().unwrap();
        let batch = sample_batch(&[(1, 10_000), (2, 20_000)], NETWORK);
        let path = write_requests(dir.path(), batch.transfers());

        let source = FileTransfers::new(path.clone(), NETWORK);
        assert_eq!(source.authorized_transfers().await.unwrap(), batch.transfers());

        let wrong_network = FileTransfers::new(path, Network::Bitcoin);
        assert!(matches!(
            wrong_network.authorized_transfers().await,
            Err(ChainError::InvalidResponse(_))
        ));
    }

    #[test]
    fn candidates_round_trip_through_directories() {
        let dir = tempfile::tempdir().unwrap();
        let fed = federation(3, 2, NETWORK);
        let assembler = TransactionAssembler::new(
            fed.descriptor.clone(),
            bitcoin::FeeRate::from_sat_per_vb(2).unwrap(),
            40,
        );
        let candidate = assembler
            .build_candidate(
                &sample_batch(&[(1, 10_000)], NETWORK),
                vec![funding_utxo(&fed.descriptor, bitcoin::Amount::from_sat(100_000), 3, 0)],
            )
            .unwrap();

        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        let path = publish_candidate(dir.path(), &candidate).unwrap();

        assert_eq!(pending_candidates(dir.path()).unwrap(), vec![path.clone()]);
        assert_eq!(read_candidates(&[path.clone(), path]).unwrap(), candidate);
        assert!(read_candidates(&[]).is_err());
    }
}
