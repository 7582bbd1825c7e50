//! Image build executor
//!
//! Plain builds produce a local image for a later push task. Multi-platform
//! builds go through buildx and, unless disabled, push as part of the build;
//! they leave no separately pushable local image behind.

use async_trait::async_trait;
use ferry_core::domain::ImageBuildConfig;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::TaskError;
use crate::executor::{BuiltImage, Executor, OutputHandler, ProcessRunner};

pub struct ImageBuildExecutor {
    name: String,
    config: ImageBuildConfig,
    cli: String,
    timeout: Duration,
}

impl ImageBuildExecutor {
    /// Creates a new image build executor
    ///
    /// # Arguments
    /// * `name` - Task name
    /// * `config` - Image build options
    /// * `cli` - Container CLI binary (docker or podman)
    /// * `timeout` - Timeout for the whole build
    pub fn new(
        name: impl Into<String>,
        config: ImageBuildConfig,
        cli: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            cli: cli.into(),
            timeout,
        }
    }

    fn pushes_on_build(&self) -> bool {
        self.config.is_multi_platform() && self.config.push_on_build.unwrap_or(true)
    }

    /// Container CLI arguments for this build
    pub fn build_args(&self) -> Vec<String> {
        let cfg = &self.config;
        let reference = cfg.reference();
        let mut args = Vec::new();

        if cfg.is_multi_platform() {
            args.extend(["buildx".to_string(), "build".to_string()]);
            if self.pushes_on_build() {
                args.push("--push".to_string());
            }
        } else {
            args.push("build".to_string());
        }

        if let Some(dockerfile) = cfg.dockerfile.as_deref().filter(|d| !d.is_empty()) {
            args.extend(["-f".to_string(), dockerfile.to_string()]);
        }

        args.extend(["-t".to_string(), reference]);

        if cfg.is_multi_platform() && cfg.push_latest_on_build && cfg.tag() != "latest" {
            args.extend(["-t".to_string(), format!("{}:latest", cfg.image_name)]);
        }

        for (key, value) in &cfg.build_args {
            args.extend(["--build-arg".to_string(), format!("{}={}", key, value)]);
        }

        if cfg.is_multi_platform() {
            args.extend(["--platform".to_string(), cfg.platforms.join(",")]);
        }

        args.push(cfg.context().to_string());
        args
    }
}

#[async_trait]
impl Executor for ImageBuildExecutor {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "image-build"
    }

    async fn execute(
        &self,
        cancel: &CancellationToken,
        output: &dyn OutputHandler,
    ) -> Result<(), TaskError> {
        let cfg = &self.config;
        if cfg.image_name.trim().is_empty() {
            return Err(TaskError::InvalidConfig(format!(
                "image build '{}' has no image name",
                self.name
            )));
        }

        info!("Task '{}': building image {}", self.name, cfg.reference());

        output.note(format!("Building image: {}", cfg.reference())).await;
        if let Some(dockerfile) = &cfg.dockerfile {
            output.note(format!("Dockerfile: {}", dockerfile)).await;
        }
        output.note(format!("Context: {}", cfg.context())).await;
        if cfg.is_multi_platform() {
            output
                .note(format!("Platforms: {}", cfg.platforms.join(", ")))
                .await;
            if self.pushes_on_build() {
                output.note("Image is pushed as part of the build".to_string()).await;
            }
        }

        ProcessRunner::argv(&self.cli, self.build_args())
            .current_dir(cfg.working_dir.clone())
            .timeout(self.timeout)
            .run(cancel, output)
            .await
    }

    fn built_image(&self) -> Option<BuiltImage> {
        Some(BuiltImage {
            reference: self.config.reference(),
            pushed: self.pushes_on_build(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ImageBuildConfig {
        let mut cfg = ImageBuildConfig {
            dockerfile: Some("docker/Dockerfile".to_string()),
            context: Some("services/api".to_string()),
            image_name: "registry.local/api".to_string(),
            tag: Some("1.4.0".to_string()),
            ..Default::default()
        };
        cfg.build_args.insert("PROFILE".to_string(), "prod".to_string());
        cfg
    }

    #[test]
    fn test_plain_build_args() {
        let exec = ImageBuildExecutor::new("api", config(), "docker", Duration::from_secs(60));
        assert_eq!(
            exec.build_args(),
            vec![
                "build",
                "-f",
                "docker/Dockerfile",
                "-t",
                "registry.local/api:1.4.0",
                "--build-arg",
                "PROFILE=prod",
                "services/api"
            ]
        );
        assert_eq!(
            exec.built_image(),
            Some(BuiltImage {
                reference: "registry.local/api:1.4.0".to_string(),
                pushed: false,
            })
        );
    }

    #[test]
    fn test_multi_platform_pushes_by_default() {
        let cfg = ImageBuildConfig {
            platforms: vec!["linux/amd64".to_string(), "linux/arm64".to_string()],
            push_latest_on_build: true,
            ..config()
        };
        let exec = ImageBuildExecutor::new("api", cfg, "docker", Duration::from_secs(60));
        let args = exec.build_args();

        assert_eq!(&args[..3], ["buildx", "build", "--push"]);
        assert!(args.windows(2).any(|w| w == ["-t", "registry.local/api:latest"]));
        assert!(
            args.windows(2)
                .any(|w| w == ["--platform", "linux/amd64,linux/arm64"])
        );
        assert_eq!(args.last().map(String::as_str), Some("services/api"));
        assert!(exec.built_image().unwrap().pushed);
    }

    #[test]
    fn test_multi_platform_without_push() {
        let cfg = ImageBuildConfig {
            platforms: vec!["linux/amd64".to_string()],
            push_on_build: Some(false),
            ..config()
        };
        let exec = ImageBuildExecutor::new("api", cfg, "podman", Duration::from_secs(60));

        assert!(!exec.build_args().contains(&"--push".to_string()));
        assert!(!exec.built_image().unwrap().pushed);
    }

    #[test]
    fn test_latest_tag_is_not_duplicated() {
        let cfg = ImageBuildConfig {
            tag: None,
            platforms: vec!["linux/amd64".to_string()],
            push_latest_on_build: true,
            ..config()
        };
        let exec = ImageBuildExecutor::new("api", cfg, "docker", Duration::from_secs(60));
        let tags = exec.build_args().iter().filter(|a| *a == "-t").count();
        assert_eq!(tags, 1);
    }
}
