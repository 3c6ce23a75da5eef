//! pack-exec - buildpack lifecycle execution
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use pack_exec::cli::{Cli, Commands};
use pack_exec::config::ConfigManager;
use pack_exec::error::PackResult;
use pack_exec::logging;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run() -> PackResult<()> {
    let cli = Cli::parse();

    let config_manager = match cli.config {
        Some(ref path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };
    let config = config_manager.load().await?;

    logging::init(cli.verbose, &config.general.log_format);

    match cli.command {
        Commands::Build(args) => pack_exec::cli::commands::build(args, &config, cli.verbose > 0).await,
        Commands::Cache(args) => pack_exec::cli::commands::cache(args, &config).await,
        Commands::Config(args) => {
            pack_exec::cli::commands::config(args, &config, &config_manager).await
        }
    }
}
