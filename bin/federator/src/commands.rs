//! Handlers of the CLI subcommands.

use std::{path::Path, sync::Arc, time::Duration};

use anyhow::{bail, Context};
use bitcoin::{consensus::encode::serialize_hex, Amount};
use federator_btc_client::{BitcoinCoreClient, ChainDataSource};
use federator_coordinator::{
    Broadcaster, CandidateState, FederatorService, FinalTransaction, FinalizeOutcome,
    HandleOutcome, SignOutcome, SignatureCoordinator,
};
use federator_key_deriv::{parse_derivation_path, MasterKey};
use federator_primitives::transfer::{Transfer, TransferBatch, TransferRequest};
use federator_tx_builder::CandidateTransaction;
use serde::Serialize;
use tokio::time::interval;
use tracing::{info, warn};

use crate::{
    args::Command,
    config::Config,
    constants::DEFAULT_POLL_INTERVAL,
    files::{
        pending_candidates, publish_candidate, read_candidate, read_candidates, read_transfers,
        take_candidate, write_candidate, FileTransfers,
    },
    params::Params,
};

/// Runs `command` to completion.
pub(crate) async fn execute(
    command: Command,
    params: Params,
    config: Config,
) -> anyhow::Result<()> {
    if let Command::Address = command {
        return address(&params);
    }

    let coordinator = bootstrap(&params, &config)?;
    let network = params.network;

    match command {
        Command::Address => address(&params),
        Command::Build { transfers, out } => {
            let chain = chain(&config)?;
            let authorized = read_transfers(&transfers, network)?;
            build(&coordinator, chain.as_ref(), &authorized, &out).await
        }
        Command::Sign {
            candidates,
            transfers,
            out,
        } => {
            let authorized = read_transfers(&transfers, network)?;
            let candidate = read_candidates(&candidates)?;
            let out = out.as_deref().unwrap_or(&candidates[0]);
            sign(&coordinator, &candidate, &authorized, out)
        }
        Command::Finalize { candidates } => {
            let final_tx = finalize(&coordinator, &read_candidates(&candidates)?)?;
            println!("{}", serialize_hex(final_tx.tx()));
            Ok(())
        }
        Command::Submit { candidates } => {
            let final_tx = finalize(&coordinator, &read_candidates(&candidates)?)?;
            let broadcaster = Broadcaster::new(
                chain(&config)?,
                coordinator.descriptor().clone(),
                config.btc_client.timeout(),
            );
            let txid = broadcaster.submit(&final_tx).await?;
            println!("{txid}");
            Ok(())
        }
        Command::Inspect { candidate } => {
            let summary = inspect(&coordinator, &read_candidate(&candidate)?)?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
        Command::Run {
            transfers,
            inbox,
            outbox,
            interval,
        } => {
            let service = FederatorService::new(
                Arc::new(FileTransfers::new(transfers, network)),
                chain(&config)?,
                coordinator,
                config.registry,
                config.btc_client.timeout(),
            );
            let period = interval.map_or(DEFAULT_POLL_INTERVAL, Duration::from_secs);
            run(&service, &inbox, &outbox, period).await
        }
    }
}

/// Derives the local signing key and checks it belongs to the federation.
fn bootstrap(params: &Params, config: &Config) -> anyhow::Result<SignatureCoordinator> {
    let assembler = params.assembler()?;
    let path = parse_derivation_path(&params.derivation_path)?;

    let master = MasterKey::parse(&config.keys.load()?, params.network)?;
    let signing_key = master.derive_signing_key(&path)?;

    let coordinator = SignatureCoordinator::new(assembler, signing_key)?;
    info!(own_key = %coordinator.own_key(), "federator key loaded");

    Ok(coordinator)
}

fn chain(config: &Config) -> anyhow::Result<Arc<dyn ChainDataSource>> {
    Ok(Arc::new(BitcoinCoreClient::new(&config.btc_client)?))
}

fn address(params: &Params) -> anyhow::Result<()> {
    let descriptor = params.descriptor()?;

    println!("address: {}", descriptor.address());
    println!(
        "redeem script: {}",
        descriptor.redeem_script().to_hex_string()
    );
    println!(
        "threshold: {}-of-{}",
        descriptor.threshold(),
        descriptor.total()
    );

    Ok(())
}

async fn build(
    coordinator: &SignatureCoordinator,
    chain: &dyn ChainDataSource,
    authorized: &[Transfer],
    out: &Path,
) -> anyhow::Result<()> {
    let assembler = coordinator.assembler();
    let oldest = authorized
        .iter()
        .take(assembler.max_batch_size())
        .cloned()
        .collect();
    let batch = TransferBatch::with_max_size(oldest, assembler.max_batch_size())?;

    let available = chain
        .list_unspent(coordinator.descriptor().address())
        .await?;
    let candidate = assembler.build_candidate(&batch, available)?;

    sign(coordinator, &candidate, authorized, out)
}

fn sign(
    coordinator: &SignatureCoordinator,
    candidate: &CandidateTransaction,
    authorized: &[Transfer],
    out: &Path,
) -> anyhow::Result<()> {
    let signed = match coordinator.sign(candidate, authorized)? {
        SignOutcome::Signed(signed) => signed,
        SignOutcome::AlreadySigned => {
            info!(id = %candidate.id(), "already signed");
            candidate.clone()
        }
    };

    write_candidate(out, &signed)?;
    println!(
        "{} {}/{}",
        signed.id(),
        signed.signature_count(),
        signed.required_signatures()
    );

    Ok(())
}

fn finalize(
    coordinator: &SignatureCoordinator,
    candidate: &CandidateTransaction,
) -> anyhow::Result<FinalTransaction> {
    match coordinator.try_finalize(candidate)? {
        FinalizeOutcome::Quorate(final_tx) => Ok(final_tx),
        FinalizeOutcome::QuorumNotReached { valid, required } => {
            bail!("candidate has {valid} of {required} required signatures")
        }
    }
}

/// What `inspect` prints.
#[derive(Debug, Serialize)]
struct CandidateSummary {
    id: String,
    state: CandidateState,
    required_signatures: usize,
    valid_signers: Vec<String>,
    invalid_signers: Vec<String>,
    transfers: Vec<TransferRequest>,
    input_sat: u64,
    change_sat: u64,
    fee_sat: u64,
}

fn inspect(
    coordinator: &SignatureCoordinator,
    candidate: &CandidateTransaction,
) -> anyhow::Result<CandidateSummary> {
    let (batch, prevouts) = coordinator.validate(candidate)?;
    let report = coordinator.verify_signatures(candidate)?;

    let input: Amount = prevouts.iter().map(|prevout| prevout.value).sum();
    let output: Amount = candidate
        .unsigned_tx()
        .output
        .iter()
        .map(|output| output.value)
        .sum();
    let change = candidate
        .unsigned_tx()
        .output
        .last()
        .map(|output| output.value)
        .context("candidate has no outputs")?;
    let fee = input
        .checked_sub(output)
        .context("candidate spends more than its inputs")?;

    Ok(CandidateSummary {
        id: candidate.id().to_string(),
        state: CandidateState::for_signatures(report.valid.len(), candidate.required_signatures()),
        required_signatures: candidate.required_signatures(),
        valid_signers: report.valid.iter().map(ToString::to_string).collect(),
        invalid_signers: report.invalid.iter().map(ToString::to_string).collect(),
        transfers: batch.transfers().iter().map(|t| t.to_request()).collect(),
        input_sat: input.to_sat(),
        change_sat: change.to_sat(),
        fee_sat: fee.to_sat(),
    })
}

/// Polls `inbox` for candidates and proposes new ones, writing every candidate that still needs
/// signatures to `outbox`.
async fn run(
    service: &FederatorService,
    inbox: &Path,
    outbox: &Path,
    period: Duration,
) -> anyhow::Result<()> {
    info!(inbox = %inbox.display(), outbox = %outbox.display(), ?period, "node loop started");
    let mut ticker = interval(period);

    loop {
        ticker.tick().await;

        for id in service.expire_stale() {
            warn!(%id, "candidate expired");
        }

        let pending = pending_candidates(inbox).unwrap_or_else(|e| {
            warn!(inbox = %inbox.display(), "{e:#}");
            Vec::new()
        });
        for path in pending {
            let bytes = match take_candidate(&path) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(path = %path.display(), "{e:#}");
                    continue;
                }
            };

            match service.handle_incoming(&bytes).await {
                Ok(outcome) => publish(outbox, outcome),
                Err(e) => {
                    warn!(path = %path.display(), %e, kind = %e.kind(), "candidate not handled")
                }
            }
        }

        match service.propose().await {
            Ok(Some(outcome)) => publish(outbox, outcome),
            Ok(None) => {}
            Err(e) => warn!(%e, kind = %e.kind(), "could not propose"),
        }
    }
}

fn publish(outbox: &Path, outcome: HandleOutcome) {
    match outcome {
        HandleOutcome::Pending { candidate, state } => match publish_candidate(outbox, &candidate) {
            Ok(path) => {
                info!(id = %candidate.id(), %state, path = %path.display(), "candidate published");
            }
            Err(e) => warn!(id = %candidate.id(), %state, "{e:#}"),
        },
        HandleOutcome::Broadcast { txid } => info!(%txid, "batch payout broadcast"),
        HandleOutcome::AlreadyFinished { id, state } => {
            info!(%id, %state, "candidate already finished")
        }
    }
}
