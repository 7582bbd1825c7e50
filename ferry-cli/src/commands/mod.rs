//! Commands module
//!
//! Defines the CLI commands and their handlers.

mod list;
mod run;

use anyhow::Result;
use clap::Subcommand;
use ferry_runner::StageRange;
use std::path::Path;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Run the pipeline
    Run {
        /// Stages to run, 1-based: N, N-M, N- or -M
        range: Option<StageRange>,

        /// Run only the named tasks (repeatable)
        #[arg(long = "only", value_name = "TASK")]
        only: Vec<String>,

        /// Deploy only to this server
        #[arg(long)]
        server: Option<String>,
    },
    /// List stages and tasks with their stage numbers
    List,
}

/// Handle a CLI command
///
/// # Arguments
/// * `command` - The command to execute
/// * `config_path` - Path of the pipeline file
pub async fn handle_command(command: Commands, config_path: &Path) -> Result<()> {
    match command {
        Commands::Run {
            range,
            only,
            server,
        } => run::run_pipeline(config_path, range, only, server).await,
        Commands::List => list::list_pipeline(config_path),
    }
}
