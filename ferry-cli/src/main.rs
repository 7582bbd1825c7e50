//! Ferry CLI
//!
//! Runs a build/deploy pipeline described in a YAML file on the local
//! machine.

mod commands;
mod config;
mod render;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, handle_command};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "ferry")]
#[command(about = "Ferry build/deploy pipeline runner", long_about = None)]
struct Cli {
    /// Pipeline file
    #[arg(
        short,
        long,
        global = true,
        env = "FERRY_CONFIG",
        default_value = "ferry.yaml"
    )]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ferry=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    handle_command(cli.command, &cli.config).await
}
