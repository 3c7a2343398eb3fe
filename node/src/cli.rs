//! # CLI Interface
//!
//! Defines the command-line argument structure for `upay-node` using
//! `clap` derive. Every flag that matters in a deployment can also come from
//! an `UPAY_*` environment variable.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::logging::LogFormat;

/// upay token authority.
///
/// Serves the token ledger over HTTP: validate, transform, create and
/// status. Also carries the operator tools to mint tokens into the ledger
/// and to wipe it.
#[derive(Parser, Debug)]
#[command(
    name = "upay-node",
    about = "upay token authority",
    version,
    propagate_version = true
)]
pub struct UpayNodeCli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log output format.
    #[arg(long, global = true, env = "UPAY_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

/// Top-level subcommands for the upay node binary.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Serve the token authority API.
    Run(RunArgs),
    /// Drop every row from the ledger. Outstanding tokens become worthless.
    Bootstrap(BootstrapArgs),
    /// Mint tokens straight into the ledger and print them as JSON lines.
    Issue(IssueArgs),
    /// Ask a running authority whether its ledger is up.
    Status(StatusArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Directory holding the ledger database. Created on first run.
    #[arg(long, short = 'd', env = "UPAY_DATA_DIR", default_value = "./upay-data")]
    pub data_dir: PathBuf,

    /// Address to bind the API and metrics listeners to.
    #[arg(long, env = "UPAY_LISTEN", default_value = "0.0.0.0")]
    pub listen: String,

    /// Port for the token API.
    #[arg(long, env = "UPAY_PORT", default_value_t = 8080)]
    pub port: u16,

    /// Port for the Prometheus metrics endpoint.
    #[arg(long, env = "UPAY_METRICS_PORT", default_value_t = 9090)]
    pub metrics_port: u16,

    /// Largest accepted distance, in seconds, between a token's creation
    /// time and the authority clock.
    #[arg(long, env = "UPAY_SKEW_TOLERANCE", default_value_t = 60)]
    pub skew_tolerance: u64,
}

/// Arguments for the `bootstrap` subcommand.
#[derive(Parser, Debug)]
pub struct BootstrapArgs {
    #[arg(long, short = 'd', env = "UPAY_DATA_DIR", default_value = "./upay-data")]
    pub data_dir: PathBuf,

    /// Confirm that every outstanding token should be destroyed.
    #[arg(long)]
    pub yes: bool,
}

/// Arguments for the `issue` subcommand.
#[derive(Parser, Debug)]
pub struct IssueArgs {
    #[arg(long, short = 'd', env = "UPAY_DATA_DIR", default_value = "./upay-data")]
    pub data_dir: PathBuf,

    /// Value of each token, e.g. `0.50` or `20`.
    pub value: String,

    /// Number of tokens to mint.
    #[arg(default_value_t = 1)]
    pub count: usize,
}

/// Arguments for the `status` subcommand.
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Base URL of the running authority.
    #[arg(long, env = "UPAY_URL", default_value = "http://127.0.0.1:8080")]
    pub url: String,

    /// Request timeout in seconds.
    #[arg(long, default_value_t = 5)]
    pub timeout: u64,

    /// PEM root certificate to trust, for authorities on a private CA.
    #[arg(long, env = "UPAY_CA_CERT")]
    pub ca_cert: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli_structure() {
        UpayNodeCli::command().debug_assert();
    }

    #[test]
    fn issue_takes_value_and_count() {
        let cli = UpayNodeCli::parse_from(["upay-node", "issue", "0.50", "4", "-d", "/tmp/ledger"]);
        match cli.command {
            Commands::Issue(args) => {
                assert_eq!(args.value, "0.50");
                assert_eq!(args.count, 4);
                assert_eq!(args.data_dir, PathBuf::from("/tmp/ledger"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn log_format_is_global() {
        let cli = UpayNodeCli::parse_from(["upay-node", "version", "--log-format", "json"]);
        assert_eq!(cli.log_format, LogFormat::Json);
    }
}
