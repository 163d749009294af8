//! multihost-ctl - bring up a multi-host overlay network.
//!
//! Deploys an etcd cluster across the given Docker hosts, runs a flannel
//! agent on each of them and creates one bridge network per host whose
//! address range is that host's overlay lease.
//!
//! # Usage
//!
//! ```bash
//! # Bring the overlay up and keep it until Ctrl-C
//! multihost-ctl --host tcp://10.0.0.1:2375 --host tcp://10.0.0.2:2375 up
//!
//! # Bring it up, ping across every host, tear it down
//! multihost-ctl --config lab.toml smoke
//!
//! # Print the default configuration
//! multihost-ctl print-config
//! ```
//!
//! # Pipeline
//!
//! ```text
//! ┌──────────────┐   ┌──────────────────┐   ┌────────────────────────┐
//! │ etcd members │──►│ flannel agents   │──►│ per-host networks      │
//! │ (one/host)   │   │ (config record)  │   │ (subnet = agent lease) │
//! └──────────────┘   └──────────────────┘   └────────────────────────┘
//! ```

mod config;
mod smoke;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::CtlConfig;
use multihost_orchestrator::{DeploymentUnit, Host, MultiHostNetworkProvider};
use std::path::PathBuf;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// CLI arguments for multihost-ctl.
#[derive(Parser, Debug)]
#[command(
    name = "multihost-ctl",
    about = "Bring up, smoke-test and tear down a multi-host overlay network",
    version,
    author
)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Docker endpoint of a participating host. Repeat for every host.
    #[arg(long = "host", value_name = "ENDPOINT", global = true)]
    hosts: Vec<String>,

    /// Network name.
    #[arg(short, long, value_name = "NAME", global = true)]
    name: Option<String>,

    /// Overlay range in CIDR notation.
    #[arg(short, long, value_name = "CIDR", global = true)]
    subnet: Option<String>,

    /// VXLAN port.
    #[arg(short, long, value_name = "PORT", global = true)]
    port: Option<u16>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, value_name = "LEVEL", global = true)]
    log_level: Option<String>,

    /// Enable JSON log output.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// Deploy the overlay and keep it until interrupted.
    Up,
    /// Deploy, check connectivity across hosts, tear down.
    Smoke,
    /// Print the default configuration and exit.
    PrintConfig,
}

/// Initialize tracing/logging.
fn init_tracing(config: &config::LoggingConfig, json_logs: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .context("Failed to parse log filter")?;

    let format = if json_logs || config.format == "json" {
        "json"
    } else {
        &config.format
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json())
                .try_init()
                .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))?;
        }
        "compact" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().compact())
                .try_init()
                .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))?;
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().pretty())
                .try_init()
                .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))?;
        }
    }

    Ok(())
}

/// Waits for Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
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
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

fn build_provider(config: &CtlConfig) -> Result<(Vec<Host>, MultiHostNetworkProvider)> {
    let hosts = config
        .network
        .hosts
        .iter()
        .map(|endpoint| {
            Host::docker(endpoint).with_context(|| format!("Failed to connect to {}", endpoint))
        })
        .collect::<Result<Vec<_>>>()?;

    let provider = MultiHostNetworkProvider::new(
        hosts.clone(),
        &config.network.name,
        config.network.subnet()?,
        config.network.port,
        config.provider.clone(),
    )
    .context("Failed to build network provider")?;

    Ok((hosts, provider))
}

async fn deploy(provider: &MultiHostNetworkProvider) -> Result<()> {
    provider
        .deploy()
        .await
        .context("Failed to deploy multi-host network")?;

    for (host, network) in provider.networks().await {
        println!("{}\t{}", host, network);
    }
    Ok(())
}

async fn up(config: &CtlConfig) -> Result<()> {
    let (_, provider) = build_provider(config)?;
    deploy(&provider).await?;

    info!(name = %config.network.name, "Network is up, waiting for shutdown signal");
    shutdown_signal().await;
    info!("Shutdown signal received");

    provider.close().await.context("Teardown incomplete")?;
    Ok(())
}

async fn run_smoke(config: &CtlConfig) -> Result<()> {
    let (hosts, provider) = build_provider(config)?;
    deploy(&provider).await?;

    let outcome = smoke::run(&provider, &config.smoke).await;
    if let Err(e) = provider.close().await {
        warn!(error = %e, "Teardown incomplete");
    }

    let report = outcome?;
    for failure in report.failures() {
        println!("FAIL\t{} -> {}", failure.from, failure.to);
    }

    if report.passed() {
        println!(
            "PASS\t{} hosts, {} pings without loss",
            hosts.len(),
            report.results.len()
        );
        Ok(())
    } else {
        anyhow::bail!("Connectivity check failed")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let args = CliArgs::parse();

    if args.command == Command::PrintConfig {
        let config = CtlConfig::default();
        println!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    // Load configuration
    let mut config = if let Some(ref config_path) = args.config {
        CtlConfig::from_file(config_path)
            .with_context(|| format!("Failed to load config from {:?}", config_path))?
    } else {
        CtlConfig::default()
    };

    config.merge_cli_args(&args);
    config.validate().context("Invalid configuration")?;

    init_tracing(&config.logging, args.json_logs)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        hosts = config.network.hosts.len(),
        "multihost-ctl starting"
    );

    let result = match args.command {
        Command::Up => up(&config).await,
        Command::Smoke => run_smoke(&config).await,
        Command::PrintConfig => Ok(()),
    };

    if let Err(ref e) = result {
        error!(error = %e, "multihost-ctl failed");
    }
    result
}
