// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # upay Token Authority Node
//!
//! Entry point for the `upay-node` binary. Parses CLI arguments, initializes
//! logging and metrics, and serves the token ledger over HTTP.
//!
//! Subcommands:
//!
//! - `run`      : serve the token API and the metrics endpoint
//! - `bootstrap`: wipe the ledger
//! - `issue`    : mint tokens into the ledger, print them as JSON lines
//! - `status`   : query a running authority's `/status`
//! - `version`  : print build version information

mod api;
mod cli;
mod logging;
mod metrics;

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

use upay_protocol::client::{ClientConfig, TokenClient, TokenService};
use upay_protocol::ledger::{AuthorityConfig, TokenAuthority};
use upay_protocol::schema::DatabaseStatus;
use upay_protocol::token::Amount;

use cli::{Commands, UpayNodeCli};
use metrics::NodeMetrics;

const DEFAULT_LOG_FILTER: &str = "upay_node=info,upay_protocol=info,tower_http=info";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = UpayNodeCli::parse();
    logging::init_logging(DEFAULT_LOG_FILTER, cli.log_format);

    match cli.command {
        Commands::Run(args) => run_node(args).await,
        Commands::Bootstrap(args) => bootstrap_ledger(args),
        Commands::Issue(args) => issue_tokens(args),
        Commands::Status(args) => query_status(args).await,
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

fn ledger_path(data_dir: &Path) -> PathBuf {
    data_dir.join("ledger")
}

fn open_authority(data_dir: &Path, config: AuthorityConfig) -> Result<TokenAuthority> {
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;
    let path = ledger_path(data_dir);
    let authority = TokenAuthority::open(&path, config)
        .with_context(|| format!("failed to open ledger at {}", path.display()))?;
    tracing::info!(path = %path.display(), rows = authority.db().row_count(), "ledger opened");
    Ok(authority)
}

/// Serves the token API and the metrics endpoint until a shutdown signal.
async fn run_node(args: cli::RunArgs) -> Result<()> {
    tracing::info!(
        port = args.port,
        metrics_port = args.metrics_port,
        data_dir = %args.data_dir.display(),
        skew_tolerance = args.skew_tolerance,
        "starting upay-node"
    );

    let authority = open_authority(
        &args.data_dir,
        AuthorityConfig {
            skew_tolerance: Duration::from_secs(args.skew_tolerance),
            ..AuthorityConfig::default()
        },
    )?;

    let node_metrics = Arc::new(NodeMetrics::new().context("failed to register metrics")?);

    let app_state = api::AppState {
        version: format!(
            "{} (protocol {})",
            env!("CARGO_PKG_VERSION"),
            upay_protocol::config::PROTOCOL_VERSION,
        ),
        authority: authority.clone(),
        metrics: Arc::clone(&node_metrics),
    };

    // --- API server ---
    let api_router = api::create_router(app_state);
    let api_addr = format!("{}:{}", args.listen, args.port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("failed to bind API listener on {api_addr}"))?;
    tracing::info!("token API listening on {}", api_addr);

    // --- Metrics server ---
    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(Arc::clone(&node_metrics));
    let metrics_addr = format!("{}:{}", args.listen, args.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {metrics_addr}"))?;
    tracing::info!("metrics server listening on {}", metrics_addr);

    tokio::select! {
        res = axum::serve(api_listener, api_router) => {
            if let Err(e) = res {
                tracing::error!(error = %e, "API server error");
            }
        }
        res = axum::serve(metrics_listener, metrics_router) => {
            if let Err(e) = res {
                tracing::error!(error = %e, "metrics server error");
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received");
        }
    }

    authority.db().flush().context("failed to flush ledger")?;
    tracing::info!("upay-node stopped");
    Ok(())
}

/// Drops every ledger row. Refuses to run without `--yes`.
fn bootstrap_ledger(args: cli::BootstrapArgs) -> Result<()> {
    if !args.yes {
        bail!("bootstrap destroys every outstanding token; pass --yes to confirm");
    }

    let authority = open_authority(
        &args.data_dir,
        AuthorityConfig {
            allow_bootstrap: true,
            ..AuthorityConfig::default()
        },
    )?;
    authority.bootstrap().context("bootstrap failed")?;

    println!("Ledger bootstrapped: {}", ledger_path(&args.data_dir).display());
    Ok(())
}

/// Mints tokens straight into the ledger and prints one JSON token per line.
fn issue_tokens(args: cli::IssueArgs) -> Result<()> {
    let value: Amount = args
        .value
        .parse()
        .with_context(|| format!("invalid token value: {}", args.value))?;
    if !value.is_token_value() {
        bail!("token value must lie in [0.01, 999.99], got {value}");
    }
    if args.count == 0 {
        bail!("count must be at least 1");
    }

    let authority = open_authority(&args.data_dir, AuthorityConfig::default())?;
    let issued = authority
        .issue_tokens(value, args.count)
        .context("failed to issue tokens")?;

    for token in &issued {
        println!("{}", token.to_json().context("failed to render token")?);
    }
    Ok(())
}

/// Asks a running authority whether its ledger is up.
async fn query_status(args: cli::StatusArgs) -> Result<()> {
    let config = ClientConfig {
        timeout: Duration::from_secs(args.timeout),
        ca_certificate: args.ca_cert.clone(),
        ..ClientConfig::new(args.url.clone())
    };

    // The blocking client builds its own runtime; keep it off ours.
    let status = tokio::task::spawn_blocking(move || {
        let client = TokenClient::new(config)?;
        client.status()
    })
    .await
    .context("status task failed")?
    .with_context(|| format!("failed to query {}", args.url))?;

    match status {
        DatabaseStatus::Ok => {
            println!("database: OK");
            Ok(())
        }
        DatabaseStatus::Down => bail!("database: DOWN"),
    }
}

fn print_version() {
    println!("upay-node {}", env!("CARGO_PKG_VERSION"));
    println!("protocol  {}", upay_protocol::config::PROTOCOL_VERSION);
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
