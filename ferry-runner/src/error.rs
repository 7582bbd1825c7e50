//! Error types for the execution engine

use ferry_core::domain::TaskId;
use std::time::Duration;
use thiserror::Error;

/// Errors that fail a single task
#[derive(Debug, Error)]
pub enum TaskError {
    /// A referenced server or registry does not exist; no process was started
    #[error("Configuration reference error: {0}")]
    ConfigReference(String),

    /// The task's configuration cannot be executed as written
    #[error("Invalid task configuration: {0}")]
    InvalidConfig(String),

    /// The process did not finish within its timeout
    #[error("Command timed out after {0:?}")]
    Timeout(Duration),

    /// The run was cancelled while the process was running
    #[error("Command was cancelled")]
    Cancelled,

    /// The process could not be started
    #[error("Failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The process exited unsuccessfully
    #[error("Command failed: {0}")]
    Execution(String),

    /// The remote host could not be reached or refused authentication
    #[error("Remote connection failed: {0}")]
    RemoteConnection(String),

    /// A command on the remote host failed
    #[error("Remote command failed: {0}")]
    RemoteCommand(String),

    /// A local or remote script path does not exist
    #[error("Script not found: {0}")]
    ScriptNotFound(String),

    /// Logging in to an image registry failed
    #[error("Registry login failed for {registry}: {reason}")]
    RegistryLogin { registry: String, reason: String },

    /// Tagging or pushing an image failed
    #[error("Image push failed for {image}: {reason}")]
    ImagePush { image: String, reason: String },

    /// Local filesystem access failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TaskError {
    pub fn config_reference(message: impl Into<String>) -> Self {
        Self::ConfigReference(message.into())
    }

    /// Check if this error came from the run being cancelled
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Check if this error came from a timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

/// Error returned by a pipeline run: the first task failure that stopped it
#[derive(Debug, Error)]
#[error("Stage '{stage_name}' failed: task '{task_name}' ({task_id}): {source}")]
pub struct PipelineError {
    pub stage_index: usize,
    pub stage_name: String,
    pub task_id: TaskId,
    pub task_name: String,
    #[source]
    pub source: TaskError,
}

/// Errors from pre-run task selection
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectionError {
    #[error("Invalid stage range '{0}'")]
    InvalidRange(String),

    #[error("Start stage {start} is out of range ({total} stage(s))")]
    StageOutOfRange { start: usize, total: usize },

    #[error("No tasks match {0}")]
    NoMatchingTasks(String),

    #[error("Unknown server: {0}")]
    UnknownServer(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(TaskError::Cancelled.is_cancelled());
        assert!(TaskError::Timeout(Duration::from_secs(1)).is_timeout());
        assert!(!TaskError::Execution("exit status: 1".to_string()).is_timeout());
    }

    #[test]
    fn test_pipeline_error_message() {
        let err = PipelineError {
            stage_index: 1,
            stage_name: "Deploy".to_string(),
            task_id: TaskId::new(1, 0),
            task_name: "ship".to_string(),
            source: TaskError::RemoteCommand("exit status: 2".to_string()),
        };
        let msg = err.to_string();
        assert!(msg.contains("Deploy"));
        assert!(msg.contains("task-1-0"));
        assert!(msg.contains("exit status: 2"));
    }
}
