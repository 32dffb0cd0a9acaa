//! Depot CLI entry point.

use clap::Parser;
use depot_core::log::init_tracing;

use depot_cli::commands::{dispatch, Cli};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.log_format, "warn");

    if let Err(e) = dispatch(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
