//! Recut CLI - Command-line interface
//!
//! Runs exports on the simulated device and inspects container files.

mod commands;

use std::path::PathBuf;

use clap::Parser;
use recut_core::tracing_setup::{CliLogLevel, TracingOptions, init_tracing};
use tracing::debug;

#[derive(Parser)]
#[command(name = "recut")]
#[command(about = "Export compositions of edited media into a single file")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: commands::Commands,

    /// Console log level
    #[arg(long, default_value = "info")]
    log_level: CliLogLevel,

    /// Directory for the full-detail log file
    #[arg(long, default_value = "logs")]
    logs_dir: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_file = init_tracing(&TracingOptions {
        console_level: cli.log_level.as_tracing_level(),
        logs_dir: cli.logs_dir,
    })?;
    debug!("Writing the full log to {}", log_file.display());

    commands::handle_command(cli.command).await
}
