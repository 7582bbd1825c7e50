//! Remote deployment executor
//!
//! Each task connects once, runs exactly one action, and disconnects:
//! - an uploaded local script (removed again afterwards)
//! - a script already present on the remote host
//! - a list of commands joined so each only runs if the previous succeeded

mod session;

use async_trait::async_trait;
use ferry_core::domain::{RemoteDeployConfig, Server};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use crate::error::TaskError;
use crate::executor::{Executor, OutputHandler};
use session::{Deadline, RemoteSession};

/// The single thing a remote task does once connected
#[derive(Debug, Clone, PartialEq, Eq)]
enum RemoteAction {
    LocalScript(PathBuf),
    RemoteScript(String),
    Commands(Vec<String>),
}

/// Joins commands into one invocation so state such as the working
/// directory carries over, stopping at the first failure
pub fn join_commands(commands: &[String]) -> String {
    commands
        .iter()
        .map(|c| c.trim())
        .filter(|c| !c.is_empty())
        .collect::<Vec<_>>()
        .join(" && ")
}

pub struct RemoteDeployExecutor {
    name: String,
    server: Server,
    config: RemoteDeployConfig,
    timeout: Duration,
    connect_timeout: Duration,
}

impl RemoteDeployExecutor {
    /// Creates a new remote deployment executor
    ///
    /// # Arguments
    /// * `name` - Task name
    /// * `server` - Resolved target server
    /// * `config` - Remote deployment options
    /// * `timeout` - Deadline for the whole task, connection included
    /// * `connect_timeout` - Upper bound for opening the connection
    pub fn new(
        name: impl Into<String>,
        server: Server,
        config: RemoteDeployConfig,
        timeout: Duration,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            server,
            config,
            timeout,
            connect_timeout,
        }
    }

    fn action(&self) -> Result<RemoteAction, TaskError> {
        if let Some(local) = &self.config.local_script {
            return Ok(RemoteAction::LocalScript(local.clone()));
        }

        if let Some(script) = self.config.script.as_deref().filter(|s| !s.trim().is_empty()) {
            return Ok(RemoteAction::RemoteScript(script.to_string()));
        }

        let commands: Vec<String> = self
            .config
            .commands
            .iter()
            .filter(|c| !c.trim().is_empty())
            .cloned()
            .collect();
        if commands.is_empty() {
            return Err(TaskError::InvalidConfig(format!(
                "remote task '{}' needs commands, a script or a local script",
                self.name
            )));
        }

        Ok(RemoteAction::Commands(commands))
    }

    async fn run_action(
        &self,
        session: &RemoteSession,
        action: RemoteAction,
        cancel: &CancellationToken,
        deadline: &Deadline,
        output: &dyn OutputHandler,
    ) -> Result<(), TaskError> {
        match action {
            RemoteAction::Commands(commands) => {
                for (i, command) in commands.iter().enumerate() {
                    output
                        .note(format!("[{}/{}] {}", i + 1, commands.len(), command))
                        .await;
                }
                let joined = join_commands(&commands);
                session.exec(&joined, cancel, deadline, output).await
            }
            RemoteAction::RemoteScript(script) => {
                let path = script.split_whitespace().next().unwrap_or(&script);
                session.require_file(path, cancel, deadline).await?;

                output.note(format!("Running remote script: {}", script)).await;
                session.exec(&script, cancel, deadline, output).await
            }
            RemoteAction::LocalScript(local) => {
                let remote_path = format!("/tmp/ferry-script-{}.sh", Uuid::new_v4().simple());
                output
                    .note(format!(
                        "Uploading {} to {}",
                        local.display(),
                        remote_path
                    ))
                    .await;

                session.upload(&local, &remote_path, cancel, deadline).await?;

                let quoted = session::shell_quote(&remote_path);
                let result = session
                    .exec(&quoted, cancel, deadline, output)
                    .await;

                session.remove(&remote_path, cancel).await;
                result
            }
        }
    }
}

#[async_trait]
impl Executor for RemoteDeployExecutor {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "remote-deploy"
    }

    async fn execute(
        &self,
        cancel: &CancellationToken,
        output: &dyn OutputHandler,
    ) -> Result<(), TaskError> {
        let action = self.action()?;
        if let RemoteAction::LocalScript(local) = &action {
            if !local.exists() {
                return Err(TaskError::ScriptNotFound(local.display().to_string()));
            }
        }

        let deadline = Deadline::after(self.timeout);
        let session = RemoteSession::new(self.server.clone(), self.connect_timeout);

        output
            .note(format!("Connecting to {}", self.server.address()))
            .await;
        session.connect(cancel, &deadline).await?;
        info!("Task '{}': connected to {}", self.name, self.server.address());

        let result = self
            .run_action(&session, action, cancel, &deadline, output)
            .await;

        if cancel.is_cancelled() {
            // Cancelled runs return without waiting on the master
            tokio::spawn(async move { session.disconnect().await });
        } else {
            session.disconnect().await;
        }

        result
    }
}
