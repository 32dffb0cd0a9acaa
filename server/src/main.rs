//! depotd - Depot image daemon.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use depot_core::log::{init_tracing, LogFormat};
use depot_core::DaemonConfig;
use depot_runtime::Daemon;
use depot_server::DepotServer;

/// Depot image daemon
#[derive(Parser, Debug)]
#[command(name = "depotd", about = "Depot image daemon", version)]
struct Args {
    /// Path to the daemon configuration file.
    #[arg(long, default_value = "/etc/depot/depotd.yml")]
    config: PathBuf,

    /// Override the configured state directory.
    #[arg(long)]
    var_dir: Option<PathBuf>,

    /// Override the configured log format (text, json).
    #[arg(long)]
    log_format: Option<LogFormat>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = DaemonConfig::load(&args.config)
        .with_context(|| format!("Failed to load {}", args.config.display()))?;
    if let Some(var_dir) = args.var_dir {
        config.var_dir = var_dir;
    }
    if let Some(format) = args.log_format {
        config.log_format = format;
    }

    init_tracing(config.log_format, "info");

    tracing::info!(
        config = %args.config.display(),
        var_dir = %config.var_dir.display(),
        backend = %config.storage.backend,
        "Starting depotd"
    );

    let daemon = Arc::new(Daemon::init(config).context("Failed to initialise daemon state")?);
    DepotServer::new(daemon).serve().await
}
