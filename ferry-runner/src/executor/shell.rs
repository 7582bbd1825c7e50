//! Generic shell task executor

use async_trait::async_trait;
use ferry_core::domain::ShellConfig;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{Executor, OutputHandler, ProcessRunner, display_dir};
use crate::error::TaskError;

pub struct ShellExecutor {
    name: String,
    config: ShellConfig,
    timeout: Duration,
}

impl ShellExecutor {
    pub fn new(name: impl Into<String>, config: ShellConfig, timeout: Duration) -> Self {
        Self {
            name: name.into(),
            config,
            timeout,
        }
    }

    fn runner(&self) -> Result<ProcessRunner, TaskError> {
        let script = self.config.script.as_deref().filter(|s| !s.trim().is_empty());
        let command = self.config.command.as_deref().filter(|c| !c.trim().is_empty());

        let runner = match (script, command) {
            (Some(script), _) => {
                let path = PathBuf::from(script);
                let path = match &self.config.working_dir {
                    Some(dir) if path.is_relative() => dir.join(path),
                    _ => path,
                };
                ProcessRunner::script(path)?
            }
            (None, Some(command)) => ProcessRunner::shell(command),
            (None, None) => {
                return Err(TaskError::InvalidConfig(format!(
                    "shell task '{}' needs a command or a script",
                    self.name
                )));
            }
        };

        Ok(runner
            .current_dir(self.config.working_dir.clone())
            .envs(self.config.env.clone())
            .timeout(self.timeout))
    }
}

#[async_trait]
impl Executor for ShellExecutor {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "shell"
    }

    async fn execute(
        &self,
        cancel: &CancellationToken,
        output: &dyn OutputHandler,
    ) -> Result<(), TaskError> {
        let runner = self.runner()?;

        info!("Task '{}': running '{}'", self.name, runner.display());
        output.note(format!("Running: {}", runner.display())).await;
        output
            .note(format!(
                "Working directory: {}",
                display_dir(self.config.working_dir.as_deref())
            ))
            .await;

        runner.run(cancel, output).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::testing::Collector;

    #[tokio::test]
    async fn test_runs_command_with_env() {
        let mut config = ShellConfig {
            command: Some("echo \"hi $WHO\"".to_string()),
            ..Default::default()
        };
        config.env.insert("WHO".to_string(), "ferry".to_string());

        let exec = ShellExecutor::new("greet", config, Duration::from_secs(10));
        let out = Collector::default();
        exec.execute(&CancellationToken::new(), &out).await.unwrap();

        assert_eq!(out.texts().last().map(String::as_str), Some("hi ferry"));
    }

    #[tokio::test]
    async fn test_script_wins_over_command() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("run.sh"), "echo from-script\n").unwrap();

        let config = ShellConfig {
            command: Some("echo from-command".to_string()),
            script: Some("run.sh".to_string()),
            working_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        };

        let exec = ShellExecutor::new("run", config, Duration::from_secs(10));
        let out = Collector::default();
        exec.execute(&CancellationToken::new(), &out).await.unwrap();

        let texts = out.texts();
        assert!(texts.contains(&"from-script".to_string()));
        assert!(!texts.contains(&"from-command".to_string()));
    }

    #[tokio::test]
    async fn test_script_in_relative_working_dir() {
        let dir = tempfile::Builder::new()
            .prefix("ferry-shell")
            .tempdir_in(".")
            .unwrap();
        let relative = PathBuf::from(dir.path().file_name().unwrap());
        std::fs::write(relative.join("run.sh"), "echo relative-ok\n").unwrap();

        let config = ShellConfig {
            script: Some("run.sh".to_string()),
            working_dir: Some(relative),
            ..Default::default()
        };

        let exec = ShellExecutor::new("run", config, Duration::from_secs(10));
        let out = Collector::default();
        exec.execute(&CancellationToken::new(), &out).await.unwrap();

        assert_eq!(out.texts().last().map(String::as_str), Some("relative-ok"));
    }

    #[tokio::test]
    async fn test_neither_command_nor_script() {
        let exec = ShellExecutor::new("empty", ShellConfig::default(), Duration::from_secs(10));
        let out = Collector::default();
        let err = exec
            .execute(&CancellationToken::new(), &out)
            .await
            .unwrap_err();

        assert!(matches!(err, TaskError::InvalidConfig(_)));
        assert!(out.lines().is_empty());
    }

    #[tokio::test]
    async fn test_timeout_is_applied() {
        let config = ShellConfig {
            command: Some("sleep 5".to_string()),
            ..Default::default()
        };
        let exec = ShellExecutor::new("slow", config, Duration::from_secs(1));
        let out = Collector::default();

        let started = std::time::Instant::now();
        let err = exec
            .execute(&CancellationToken::new(), &out)
            .await
            .unwrap_err();

        assert!(err.is_timeout());
        assert!(started.elapsed() < Duration::from_secs(3));
    }
}
