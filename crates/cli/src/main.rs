//! dropwatch CLI entry point

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod args;
mod commands;
mod config;

use args::{Cli, Commands};
use config::AppConfig;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins, then --log-level, then the config file
    let log_level = match (&cli.log_level, &cli.command) {
        (Some(level), _) => level.clone(),
        (None, Commands::Run(run)) if run.debug => "debug".to_string(),
        (None, _) => AppConfig::load(cli.config.as_deref())
            .map(|c| c.log_level().to_string())
            .unwrap_or_else(|_| "info".to_string()),
    };
    init_logging(&log_level)?;

    match cli.command {
        Commands::Run(args) => commands::run::execute(args, cli.config).await,
        Commands::Extract(args) => commands::extract::execute(args, cli.config).await,
        Commands::Config(args) => commands::config::execute(args).await,
        Commands::Doctor(args) => commands::doctor::execute(args, cli.config).await,
    }
}

fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(filter)
        .init();

    Ok(())
}
