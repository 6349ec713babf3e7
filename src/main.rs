//! migrate CLI
//!
//! Moves the workloads of a set of namespaces from one cluster to another.

use clap::Parser;

use migrator::{logging, Cli, Result};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(&cli.log_level, cli.log_format);
    cli.run().await
}
