//! Engine configuration
//!
//! Defines the tunables of the execution engine: default timeouts per task
//! kind, the output batching policy, and the external tools it drives.

use std::time::Duration;

/// Engine configuration
///
/// Task-level settings from the pipeline file always win; these values only
/// apply where a task leaves something unset.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Default timeout for compiled-language builds
    pub build_timeout: Duration,

    /// Default timeout for image builds
    pub image_build_timeout: Duration,

    /// Default timeout for each image push
    pub image_push_timeout: Duration,

    /// Default timeout for a whole remote deployment
    pub remote_deploy_timeout: Duration,

    /// Default timeout for generic shell tasks
    pub shell_timeout: Duration,

    /// Timeout for registry login and local re-tagging
    pub registry_op_timeout: Duration,

    /// Timeout for opening the SSH master connection
    pub ssh_connect_timeout: Duration,

    /// Largest batch the output batcher emits
    pub batch_max_lines: usize,

    /// How long the output batcher holds a partial batch
    pub batch_flush_interval: Duration,

    /// Bounded queue between a task's output and its batcher
    pub batch_queue_capacity: usize,

    /// Output lines kept per task for failure reports
    pub output_tail_lines: usize,

    /// Container CLI binary (docker or podman)
    pub container_cli: String,
}

impl EngineConfig {
    /// Creates a new configuration with defaults
    pub fn new() -> Self {
        Self {
            build_timeout: Duration::from_secs(30 * 60),
            image_build_timeout: Duration::from_secs(30 * 60),
            image_push_timeout: Duration::from_secs(20 * 60),
            remote_deploy_timeout: Duration::from_secs(10 * 60),
            shell_timeout: Duration::from_secs(10 * 60),
            registry_op_timeout: Duration::from_secs(30),
            ssh_connect_timeout: Duration::from_secs(30),
            batch_max_lines: 200,
            batch_flush_interval: Duration::from_millis(120),
            batch_queue_capacity: 2048,
            output_tail_lines: 20,
            container_cli: "docker".to_string(),
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Every variable is optional and falls back to the default:
    /// - FERRY_CONTAINER_CLI (default: docker)
    /// - FERRY_BATCH_MAX_LINES (default: 200)
    /// - FERRY_BATCH_FLUSH_MS (default: 120)
    /// - FERRY_OUTPUT_TAIL_LINES (default: 20)
    /// - FERRY_SSH_CONNECT_TIMEOUT (seconds, default: 30)
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = Self::new();

        if let Ok(cli) = std::env::var("FERRY_CONTAINER_CLI") {
            config.container_cli = cli;
        }

        if let Some(lines) = env_parse::<usize>("FERRY_BATCH_MAX_LINES")? {
            config.batch_max_lines = lines;
        }

        if let Some(ms) = env_parse::<u64>("FERRY_BATCH_FLUSH_MS")? {
            config.batch_flush_interval = Duration::from_millis(ms);
        }

        if let Some(lines) = env_parse::<usize>("FERRY_OUTPUT_TAIL_LINES")? {
            config.output_tail_lines = lines;
        }

        if let Some(secs) = env_parse::<u64>("FERRY_SSH_CONNECT_TIMEOUT")? {
            config.ssh_connect_timeout = Duration::from_secs(secs);
        }

        Ok(config)
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.container_cli.trim().is_empty() {
            anyhow::bail!("container_cli cannot be empty");
        }

        if self.batch_max_lines == 0 {
            anyhow::bail!("batch_max_lines must be greater than 0");
        }

        if self.batch_flush_interval.is_zero() {
            anyhow::bail!("batch_flush_interval must be greater than 0");
        }

        if self.batch_queue_capacity == 0 {
            anyhow::bail!("batch_queue_capacity must be greater than 0");
        }

        if self.ssh_connect_timeout.as_secs() == 0 {
            anyhow::bail!("ssh_connect_timeout must be at least one second");
        }

        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> anyhow::Result<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| anyhow::anyhow!("{} has an invalid value: '{}'", name, raw)),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.build_timeout, Duration::from_secs(1800));
        assert_eq!(config.image_build_timeout, Duration::from_secs(1800));
        assert_eq!(config.image_push_timeout, Duration::from_secs(1200));
        assert_eq!(config.remote_deploy_timeout, Duration::from_secs(600));
        assert_eq!(config.shell_timeout, Duration::from_secs(600));
        assert_eq!(config.batch_max_lines, 200);
        assert_eq!(config.batch_flush_interval, Duration::from_millis(120));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = EngineConfig::default();

        config.batch_max_lines = 0;
        assert!(config.validate().is_err());
        config.batch_max_lines = 50;

        config.container_cli = "  ".to_string();
        assert!(config.validate().is_err());
        config.container_cli = "podman".to_string();

        config.batch_flush_interval = Duration::ZERO;
        assert!(config.validate().is_err());
        config.batch_flush_interval = Duration::from_millis(10);

        assert!(config.validate().is_ok());
    }
}
