//! migrate CLI library

pub mod commands;
pub mod error;
pub mod logging;

pub use error::{Error, Result};

use clap::{Parser, Subcommand};

use crate::logging::LogFormat;

/// migrate - Kubernetes workload migration
#[derive(Parser, Debug)]
#[command(name = "migrate")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Log level used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "debug")]
    pub log_level: String,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Migrate namespaces from a source cluster to a destination cluster
    Exec(commands::exec::ExecArgs),
}

impl Cli {
    /// Run the CLI command
    pub async fn run(self) -> Result<()> {
        match self.command {
            Commands::Exec(args) => commands::exec::run(args).await,
        }
    }
}
