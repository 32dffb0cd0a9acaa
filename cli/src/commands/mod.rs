//! CLI command definitions and dispatch.

mod copy;

pub use copy::{copy_container, CopyRequest};

use clap::{Parser, Subcommand};
use depot_core::log::LogFormat;

/// Depot - image and container management client.
#[derive(Parser)]
#[command(name = "depot", version, about)]
pub struct Cli {
    /// Log output format (text or json)
    #[arg(long, global = true, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// Copy a container or snapshot, locally or between daemons
    #[command(alias = "cp")]
    Copy(copy::CopyArgs),
}

/// Dispatch a parsed CLI command to its handler.
pub async fn dispatch(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Command::Copy(args) => copy::execute(args).await,
    }
}
