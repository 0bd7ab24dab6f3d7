//! Parses command-line arguments for the federator CLI.

use std::path::PathBuf;

use clap::{crate_version, Parser, Subcommand};

#[derive(Debug, Parser)]
#[clap(
    name = "federator",
    about = "A federator of the custodial bitcoin bridge",
    version = crate_version!()
)]
pub(crate) struct Cli {
    #[clap(
        long,
        short = 'p',
        help = "The file containing the federation params",
        default_value = "params.toml"
    )]
    pub params: PathBuf,

    #[clap(
        long,
        short = 'c',
        help = "The file containing the configuration for this federator",
        default_value = "config.toml"
    )]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    /// Print the federation's multisig address and redeem script.
    Address,

    /// Build a candidate paying the oldest transfers in a file, and sign it.
    Build {
        #[arg(long, short = 't', help = "JSON list of authorized transfers")]
        transfers: PathBuf,

        #[arg(long, short = 'o', help = "Where to write the candidate")]
        out: PathBuf,
    },

    /// Merge candidate files and add the local signature.
    Sign {
        #[arg(required = true, help = "Candidate files, merged in order")]
        candidates: Vec<PathBuf>,

        #[arg(long, short = 't', help = "JSON list of authorized transfers")]
        transfers: PathBuf,

        #[arg(long, short = 'o', help = "Where to write the result [default: first candidate]")]
        out: Option<PathBuf>,
    },

    /// Merge candidate files and print the fully signed transaction as hex.
    Finalize {
        #[arg(required = true, help = "Candidate files, merged in order")]
        candidates: Vec<PathBuf>,
    },

    /// Merge candidate files, finalize, and submit the transaction to bitcoind.
    Submit {
        #[arg(required = true, help = "Candidate files, merged in order")]
        candidates: Vec<PathBuf>,
    },

    /// Print a summary of a candidate file.
    Inspect {
        #[arg(help = "Candidate file")]
        candidate: PathBuf,
    },

    /// Run the node loop, exchanging candidates through directories.
    Run {
        #[arg(long, short = 't', help = "JSON list of authorized transfers, re-read every poll")]
        transfers: PathBuf,

        #[arg(long, help = "Directory polled for candidates from other federators")]
        inbox: PathBuf,

        #[arg(long, help = "Directory candidates for other federators are written to")]
        outbox: PathBuf,

        #[arg(long, help = "Seconds between polls")]
        interval: Option<u64>,
    },
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn sign_takes_many_candidates() {
        let cli = Cli::parse_from([
            "federator",
            "sign",
            "a.json",
            "b.json",
            "--transfers",
            "transfers.json",
        ]);

        assert_eq!(cli.params, PathBuf::from("params.toml"));
        let Command::Sign {
            candidates, out, ..
        } = cli.command
        else {
            panic!("must parse as sign");
        };
        assert_eq!(candidates.len(), 2);
        assert!(out.is_none());
    }
}
