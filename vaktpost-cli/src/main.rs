//! ## vaktpost-cli
//! **Unified operational interface**
//! Runs the policy reconciler, the verdict service, the capture client and
//! the one-shot maintenance commands (enforce, purge, logs).

use clap::Parser;
use vaktpost_telemetry::EventLogger;

mod commands;
mod error;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cli = Cli::parse();
    let config = commands::load_config(cli.config.as_ref())?;
    EventLogger::init(&config.telemetry.log_level)?;

    commands::run_command(cli.command, config).await?;
    Ok(())
}
