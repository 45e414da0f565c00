//! CRDS E2E - scenario runner for the CRDS user-management service
//!
//! Runs YAML scenarios that drive the CRDS HTTP API and verify the results
//! on Kafka and in the database.

use clap::Parser;
use commands::Commands;
use crds_e2e::{cli, commands, common::logging};

#[derive(Parser)]
#[command(name = "crds-e2e", about = "End-to-end scenario runner for CRDS")]
#[command(version, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let verbose = matches!(cli.command, Commands::Run { verbose: true, .. });
    logging::init_cli(verbose);

    if let Err(e) = cli::dispatch(cli.command).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
