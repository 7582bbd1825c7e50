//! Image push executor

use async_trait::async_trait;
use ferry_core::domain::Registry;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::latest_variant;
use crate::error::TaskError;
use crate::executor::{Executor, OutputHandler, ProcessRunner};

/// Pushes a fixed list of image references, resolved when the task starts
pub struct ImagePushExecutor {
    name: String,
    images: Vec<String>,
    registry: Option<Registry>,
    push_latest: bool,
    auto: bool,
    cli: String,
    timeout: Duration,
    registry_timeout: Duration,
}

impl ImagePushExecutor {
    /// Creates a new push executor
    ///
    /// # Arguments
    /// * `name` - Task name
    /// * `images` - References to push, in order
    /// * `registry` - Registry to log in to first, if it has credentials
    /// * `cli` - Container CLI binary (docker or podman)
    /// * `timeout` - Timeout for each push
    pub fn new(
        name: impl Into<String>,
        images: Vec<String>,
        registry: Option<Registry>,
        cli: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            images,
            registry,
            push_latest: false,
            auto: false,
            cli: cli.into(),
            timeout,
            registry_timeout: Duration::from_secs(30),
        }
    }

    /// Also push the `latest` variant of every tagged reference
    pub fn push_latest(mut self, enabled: bool) -> Self {
        self.push_latest = enabled;
        self
    }

    /// Images came from this run's builds rather than the task config
    pub fn auto(mut self, enabled: bool) -> Self {
        self.auto = enabled;
        self
    }

    /// Timeout for login and local re-tagging
    pub fn registry_timeout(mut self, timeout: Duration) -> Self {
        self.registry_timeout = timeout;
        self
    }

    pub fn images(&self) -> &[String] {
        &self.images
    }

    async fn login(
        &self,
        registry: &Registry,
        cancel: &CancellationToken,
        output: &dyn OutputHandler,
    ) -> Result<(), TaskError> {
        output.note(format!("Logging in to registry: {}", registry.url)).await;

        let args = [
            "login",
            registry.url.as_str(),
            "-u",
            registry.username.as_str(),
            "--password-stdin",
        ];

        ProcessRunner::argv(&self.cli, args)
            .stdin(registry.password.as_bytes())
            .timeout(self.registry_timeout)
            .run(cancel, output)
            .await
            .map_err(|e| match e {
                TaskError::Cancelled => TaskError::Cancelled,
                other => TaskError::RegistryLogin {
                    registry: registry.url.clone(),
                    reason: other.to_string(),
                },
            })
    }

    async fn push(
        &self,
        image: &str,
        cancel: &CancellationToken,
        output: &dyn OutputHandler,
    ) -> Result<(), TaskError> {
        output.note(format!("Pushing image: {}", image)).await;

        ProcessRunner::argv(&self.cli, ["push", image])
            .timeout(self.timeout)
            .run(cancel, output)
            .await
            .map_err(|e| push_error(image, e))?;

        output.note(format!("Pushed: {}", image)).await;
        Ok(())
    }

    async fn tag(
        &self,
        source: &str,
        target: &str,
        cancel: &CancellationToken,
        output: &dyn OutputHandler,
    ) -> Result<(), TaskError> {
        output.note(format!("Tagging {} as {}", source, target)).await;

        ProcessRunner::argv(&self.cli, ["tag", source, target])
            .timeout(self.registry_timeout)
            .run(cancel, output)
            .await
            .map_err(|e| push_error(source, e))
    }
}

fn push_error(image: &str, error: TaskError) -> TaskError {
    match error {
        TaskError::Cancelled => TaskError::Cancelled,
        other => TaskError::ImagePush {
            image: image.to_string(),
            reason: other.to_string(),
        },
    }
}

#[async_trait]
impl Executor for ImagePushExecutor {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "image-push"
    }

    async fn execute(
        &self,
        cancel: &CancellationToken,
        output: &dyn OutputHandler,
    ) -> Result<(), TaskError> {
        if self.images.is_empty() {
            if self.auto {
                output
                    .note("No images built in this run are waiting to be pushed".to_string())
                    .await;
                return Ok(());
            }
            return Err(TaskError::InvalidConfig(format!(
                "push task '{}' has no images",
                self.name
            )));
        }

        if let Some(registry) = self.registry.as_ref().filter(|r| r.requires_login()) {
            self.login(registry, cancel, output).await?;
        }

        info!("Task '{}': pushing {} image(s)", self.name, self.images.len());

        for image in &self.images {
            self.push(image, cancel, output).await?;

            if !self.push_latest {
                continue;
            }

            match latest_variant(image) {
                Some(latest) => {
                    self.tag(image, &latest, cancel, output).await?;
                    self.push(&latest, cancel, output).await?;
                }
                None => debug!("{} already refers to latest", image),
            }
        }

        Ok(())
    }
}
