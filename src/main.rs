use clap::Parser;
use smoker::cli::{run_cli, Cli};
use smoker::logging::{init_logging_with_config, LogConfig};
use std::process::ExitCode;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let _logging = init_logging_with_config(&LogConfig::from_env())?;
    run_cli(cli).await
}
