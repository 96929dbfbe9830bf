/// CLI entry point: parses arguments and dispatches to the `run` and `crds`
/// commands.
use crate::cli::args::{Cli, Commands};
use clap::Parser;
use tracing_subscriber::EnvFilter;

pub mod args;
pub mod commands;

/// Initializes the logging system for the CLI.
pub fn init_logging(log_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Parses command-line arguments and executes the requested command.
pub async fn run() -> crate::error::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    match cli.command {
        Commands::Run(args) => {
            tracing::info!(config = %args.config, "starting certman-operator");
            commands::handle_run(args.config).await?;
        }
        Commands::Crds => {
            commands::handle_crds()?;
        }
    }

    Ok(())
}
