//! ferry CLI - command-line invoker for cross-account build workflows.
//!
//! The main entry point for the `ferry` CLI binary.

use anyhow::Result;
use clap::Parser;

use ferry_cli::{Cli, Commands};
use ferry_core::observability::{init_logging, LogFormat};

fn main() -> Result<()> {
    init_logging(LogFormat::from_env()?);

    // Parse CLI arguments
    let cli = Cli::parse();
    let config = cli.config();

    // Create runtime and execute
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        match cli.command {
            Commands::Run(args) => ferry_cli::commands::run::execute(args, &config).await,
            Commands::Start(args) => ferry_cli::commands::start::execute(args, &config).await,
            Commands::Status(args) => ferry_cli::commands::status::execute(args, &config).await,
        }
    })
}
