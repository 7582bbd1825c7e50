//! Compiled-language build executor (Maven and Go)

use async_trait::async_trait;
use ferry_core::domain::{BuildConfig, BuildTool, GoOptions};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{Executor, OutputHandler, ProcessRunner, display_dir};
use crate::error::TaskError;

const MAVEN_DEFAULT_COMMAND: &str = "mvn clean package -DskipTests";

/// Runs a build script, a custom command, or the tool's default invocation
pub struct BuildExecutor {
    name: String,
    config: BuildConfig,
    timeout: Duration,
}

impl BuildExecutor {
    pub fn new(name: impl Into<String>, config: BuildConfig, timeout: Duration) -> Self {
        Self {
            name: name.into(),
            config,
            timeout,
        }
    }

    /// Environment overlay: configured variables plus the Go toolchain settings
    fn env(&self) -> Vec<(String, String)> {
        let mut env: Vec<(String, String)> = self
            .config
            .env
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        if self.config.tool == BuildTool::Go {
            env.extend(go_env(&self.config.go));
        }

        env
    }

    /// Resolves what to run: script, then command, then the default
    fn runner(&self) -> Result<ProcessRunner, TaskError> {
        let runner = if let Some(script) = non_empty(&self.config.script) {
            ProcessRunner::script(self.script_path(script))?
        } else if let Some(command) = non_empty(&self.config.command) {
            ProcessRunner::shell(command)
        } else {
            match self.config.tool {
                BuildTool::Maven => ProcessRunner::shell(MAVEN_DEFAULT_COMMAND),
                BuildTool::Go => {
                    let args = go_args(&self.config.go);
                    ProcessRunner::argv("go", args)
                }
            }
        };

        Ok(runner
            .current_dir(self.config.working_dir.clone())
            .envs(self.env())
            .timeout(self.timeout))
    }

    fn script_path(&self, script: &str) -> PathBuf {
        let path = PathBuf::from(script);
        match &self.config.working_dir {
            Some(dir) if path.is_relative() => dir.join(path),
            _ => path,
        }
    }
}

#[async_trait]
impl Executor for BuildExecutor {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "build"
    }

    async fn execute(
        &self,
        cancel: &CancellationToken,
        output: &dyn OutputHandler,
    ) -> Result<(), TaskError> {
        let runner = self.runner()?;
        let tool = match self.config.tool {
            BuildTool::Maven => "maven",
            BuildTool::Go => "go",
        };

        info!("Task '{}': {} build: {}", self.name, tool, runner.display());

        output
            .note(format!("Running {} build: {}", tool, runner.display()))
            .await;
        output
            .note(format!(
                "Working directory: {}",
                display_dir(self.config.working_dir.as_deref())
            ))
            .await;

        if self.config.tool == BuildTool::Go {
            let go = &self.config.go;
            if go.goos.is_some() || go.goarch.is_some() {
                output
                    .note(format!(
                        "Target platform: {}/{}",
                        go.goos.as_deref().unwrap_or("native"),
                        go.goarch.as_deref().unwrap_or("native")
                    ))
                    .await;
            }
            if let Some(cgo) = go.cgo_enabled {
                let state = if cgo { "enabled" } else { "disabled" };
                output.note(format!("CGO: {}", state)).await;
            }
        }

        runner.run(cancel, output).await
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn go_env(go: &GoOptions) -> Vec<(String, String)> {
    let mut env = Vec::new();
    if let Some(goos) = &go.goos {
        env.push(("GOOS".to_string(), goos.clone()));
    }
    if let Some(goarch) = &go.goarch {
        env.push(("GOARCH".to_string(), goarch.clone()));
    }
    if let Some(cgo) = go.cgo_enabled {
        let value = if cgo { "1" } else { "0" };
        env.push(("CGO_ENABLED".to_string(), value.to_string()));
    }
    if let Some(private) = &go.goprivate {
        env.push(("GOPRIVATE".to_string(), private.clone()));
    }
    if let Some(proxy) = &go.goproxy {
        env.push(("GOPROXY".to_string(), proxy.clone()));
    }
    env
}

/// Arguments for the default `go` invocation (without the `go` program)
fn go_args(go: &GoOptions) -> Vec<String> {
    let command = go.go_command.as_deref().unwrap_or("build");
    let mut args = Vec::new();

    match command {
        "test" => {
            args.push("test".to_string());
            if go.verbose {
                args.push("-v".to_string());
            }
            if go.race {
                args.push("-race".to_string());
            }
            if let Some(mode) = &go.module_mode {
                args.push(format!("-mod={}", mode));
            }
        }
        "generate" => {
            args.push("generate".to_string());
            if go.verbose {
                args.push("-v".to_string());
            }
        }
        _ => {
            args.push("build".to_string());
            if go.verbose {
                args.push("-v".to_string());
            }
            if let Some(output) = &go.output {
                args.extend(["-o".to_string(), output.clone()]);
            }
            if let Some(ldflags) = &go.ldflags {
                args.extend(["-ldflags".to_string(), ldflags.clone()]);
            }
            if let Some(tags) = &go.tags {
                args.extend(["-tags".to_string(), tags.clone()]);
            }
            if go.race {
                args.push("-race".to_string());
            }
            if go.trimpath {
                args.push("-trimpath".to_string());
            }
            if let Some(mode) = &go.module_mode {
                args.push(format!("-mod={}", mode));
            }
        }
    }

    match go.packages.as_deref().map(str::trim) {
        Some(packages) if !packages.is_empty() => {
            args.extend(packages.split_whitespace().map(str::to_string));
        }
        _ => args.push(".".to_string()),
    }

    args
}
