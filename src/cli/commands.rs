use crate::ids::Fingerprint;
use crate::net::is_port_reachable;
use crate::runtime_config::SmokerConfig;
use crate::smoker::Smoker;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tracing::info;

/// Command-line interface for smoker
#[derive(Parser, Debug)]
#[command(name = "smoker", version)]
#[command(about = "Mock/record HTTP server for integration tests", long_about = None)]
pub struct Cli {
    /// The subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a mock/record server until interrupted
    Serve {
        /// Interface to bind
        #[arg(long)]
        host: Option<String>,

        /// Port to bind; 0 picks an ephemeral port
        #[arg(short, long)]
        port: Option<u16>,

        /// JSON or YAML file with a list of mocks
        #[arg(short, long)]
        mocks: Option<PathBuf>,

        /// Write the matched-mock history as JSON here on shutdown
        #[arg(long)]
        history_out: Option<PathBuf>,
    },
    /// Print the fingerprint of a method and path
    Fingerprint {
        /// HTTP method, e.g. GET
        #[arg(short, long)]
        method: String,

        /// Request path without query string, e.g. /api/testing
        #[arg(short, long)]
        path: String,
    },
    /// Check whether a TCP port accepts connections
    Probe {
        /// Port to check
        #[arg(short, long)]
        port: u16,

        /// Host to check
        #[arg(long, default_value = "localhost")]
        host: String,

        /// Time to wait before giving up, in milliseconds
        #[arg(long, default_value_t = 1000)]
        timeout_ms: u64,
    },
}

/// Execute a parsed command line.
pub async fn run_cli(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Commands::Serve {
            host,
            port,
            mocks,
            history_out,
        } => {
            let mut config = SmokerConfig::from_env();
            if let Some(host) = host {
                config.host = host;
            }
            if let Some(port) = port {
                config.port = port;
            }
            serve(config, mocks.as_deref(), history_out.as_deref()).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Fingerprint { method, path } => {
            println!("{}", fingerprint_of(&method, &path));
            Ok(ExitCode::SUCCESS)
        }
        Commands::Probe {
            port,
            host,
            timeout_ms,
        } => {
            let reachable =
                is_port_reachable(port, &host, Duration::from_millis(timeout_ms)).await;
            println!("{}", reachable);
            Ok(if reachable {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}

/// Fingerprint as recorded by the server, which sees methods upper-cased.
pub(crate) fn fingerprint_of(method: &str, path: &str) -> Fingerprint {
    Fingerprint::compute(&method.to_ascii_uppercase(), path)
}

async fn serve(
    config: SmokerConfig,
    mocks: Option<&Path>,
    history_out: Option<&Path>,
) -> Result<()> {
    let mut smoker = Smoker::with_config(config);
    if let Some(path) = mocks {
        smoker.load_mocks(path)?;
    }

    smoker.start().await?;
    if let Some(address) = smoker.get_address_info() {
        println!("{}", serde_json::to_string(&address)?);
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutdown requested");

    let history = smoker.get_history(None);
    smoker.destroy().await;

    if let Some(path) = history_out {
        let json = serde_json::to_vec_pretty(&history)?;
        fs::write(path, json)
            .with_context(|| format!("Failed to write history to {}", path.display()))?;
        info!(path = %path.display(), entries = history.len(), "History written");
    }

    Ok(())
}
