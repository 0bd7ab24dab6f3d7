//! A federator of the custodial bitcoin bridge.
//!
//! The federator builds, signs, finalizes and broadcasts batch payout transactions that spend the
//! federation's multisig outputs. Candidates are exchanged with other federators as files.

use std::{fs, path::Path};

use anyhow::Context;
use clap::Parser;
use config::Config;
use constants::DEFAULT_THREAD_COUNT;
use federator_common::{logging, logging::LoggerConfig};
use params::Params;
use serde::de::DeserializeOwned;
use tokio::runtime;
use tracing::debug;

mod args;
mod commands;
mod config;
mod files;
mod params;

mod constants;

fn main() -> anyhow::Result<()> {
    let cli = args::Cli::parse();

    let params = parse_toml::<Params>(&cli.params)?;
    let config = parse_toml::<Config>(&cli.config)?;

    logging::init(LoggerConfig::with_base_name("federator").apply(&config.logging))?;
    debug!(?params, "loaded params");

    let runtime = runtime::Builder::new_multi_thread()
        .worker_threads(config.num_threads.unwrap_or(DEFAULT_THREAD_COUNT).max(1).into())
        .enable_all()
        .build()
        .context("cannot create runtime")?;

    runtime.block_on(commands::execute(cli.command, params, config))
}

/// Reads and parses a TOML file from the given path into the given type `T`.
fn parse_toml<T>(path: &Path) -> anyhow::Result<T>
where
    T: DeserializeOwned,
{
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read TOML file {}", path.display()))?;

    toml::from_str::<T>(&raw)
        .with_context(|| format!("failed to parse TOML file {}", path.display()))
}
