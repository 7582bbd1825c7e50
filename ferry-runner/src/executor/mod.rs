//! Task executors
//!
//! Every task kind maps to one executor. Executors stream output through an
//! [`OutputHandler`] while they run and return once the underlying process
//! or remote session ends, times out, or the run is cancelled.

mod build;
mod factory;
pub mod image;
mod process;
pub mod remote;
mod shell;

use async_trait::async_trait;
use ferry_core::domain::OutputLine;
use tokio_util::sync::CancellationToken;

use crate::error::TaskError;

pub use build::BuildExecutor;
pub use factory::{ExecutorFactory, FactoryContext, Resources, StandardExecutorFactory};
pub use image::{ImageBuildExecutor, ImagePushExecutor, ImageScanner, expand_auto_scan};
pub use process::{ProcessCommand, ProcessRunner};
pub use remote::RemoteDeployExecutor;
pub use shell::ShellExecutor;

/// Receives output lines as a task produces them
///
/// Awaiting `handle` is how a slow consumer pushes back on a fast producer.
#[async_trait]
pub trait OutputHandler: Send + Sync {
    async fn handle(&self, line: OutputLine);

    /// Emits an informational line on the standard output stream
    async fn note(&self, text: String) {
        self.handle(OutputLine::stdout(text)).await;
    }
}

/// An image produced by a successful image-build task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltImage {
    /// Fully-qualified `name:tag` reference
    pub reference: String,
    /// Whether the build already pushed it (multi-platform builds)
    pub pushed: bool,
}

/// Runtime behavior bound to a task's kind
#[async_trait]
pub trait Executor: Send + Sync {
    /// Task name this executor was created for
    fn name(&self) -> &str;

    /// Task kind name
    fn kind(&self) -> &'static str;

    /// Runs the task to completion
    ///
    /// Returns promptly with [`TaskError::Cancelled`] once `cancel` fires.
    async fn execute(
        &self,
        cancel: &CancellationToken,
        output: &dyn OutputHandler,
    ) -> Result<(), TaskError>;

    /// Image this executor produced, reported after a successful run
    fn built_image(&self) -> Option<BuiltImage> {
        None
    }
}

/// Working directory for display, falling back to the process cwd
pub(crate) fn display_dir(dir: Option<&std::path::Path>) -> String {
    match dir {
        Some(dir) => dir.display().to_string(),
        None => std::env::current_dir()
            .map(|d| d.display().to_string())
            .unwrap_or_else(|_| ".".to_string()),
    }
}
