//! CLI argument definitions

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// dropwatch: relay bonus drop codes from Telegram channels to a Discord webhook
#[derive(Parser, Debug)]
#[command(name = "dropwatch")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Watch the source channels and publish extracted codes
    Run(RunArgs),

    /// One-shot extraction over a piece of text
    Extract(ExtractArgs),

    /// Configuration management
    Config(ConfigArgs),

    /// Validate configuration and external tools
    Doctor(DoctorArgs),
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Log notices instead of publishing them
    #[arg(long)]
    pub dry_run: bool,

    /// Append notices to the outbox file instead of calling the webhook
    #[arg(long)]
    pub outbox: bool,

    /// Override the outbox path from the config
    #[arg(long, requires = "outbox")]
    pub outbox_path: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,
}

#[derive(Args, Debug)]
pub struct ExtractArgs {
    /// Message text
    #[arg(long)]
    pub text: String,

    /// Spoiler annotation as OFFSET:LEN in UTF-16 units (repeatable)
    #[arg(long, value_parser = parse_span)]
    pub spoiler: Vec<(usize, usize)>,

    /// URL attached to the message as a text link
    #[arg(long)]
    pub link: Option<String>,

    /// Channel the text is attributed to
    #[arg(long, default_value = "@dropwatch")]
    pub channel: String,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Generate example configuration file
    Init {
        /// Path to write config file
        #[arg(long, default_value = "./config.toml")]
        path: PathBuf,

        /// Overwrite existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Args, Debug)]
pub struct DoctorArgs {
    /// Check specific component (config, database, telegram, discord, media)
    #[arg(long)]
    pub check: Option<String>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

fn parse_span(raw: &str) -> Result<(usize, usize), String> {
    let (offset, length) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected OFFSET:LEN, got {raw:?}"))?;
    let offset = offset
        .trim()
        .parse()
        .map_err(|_| format!("invalid offset {offset:?}"))?;
    let length = length
        .trim()
        .parse()
        .map_err(|_| format!("invalid length {length:?}"))?;
    Ok((offset, length))
}
