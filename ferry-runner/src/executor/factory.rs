//! Executor construction
//!
//! Binds a task spec to the executor for its kind, resolving server and
//! registry references. A missing reference fails the task before anything
//! is started.

use ferry_core::domain::{ImagePushConfig, Registry, Server, TaskKind, TaskSpec};
use std::collections::HashMap;
use std::time::Duration;

use super::{
    BuildExecutor, Executor, ImageBuildExecutor, ImagePushExecutor, RemoteDeployExecutor,
    ShellExecutor,
};
use crate::config::EngineConfig;
use crate::error::TaskError;

/// Named servers and registries, resolved by the configuration layer
#[derive(Debug, Clone, Default)]
pub struct Resources {
    pub servers: HashMap<String, Server>,
    pub registries: HashMap<String, Registry>,
}

/// Everything an executor may need besides its own task spec
pub struct FactoryContext<'a> {
    pub resources: &'a Resources,
    pub config: &'a EngineConfig,
    /// Images built earlier in this run that no build pushed yet
    pub unpushed_images: Vec<String>,
}

/// Creates the executor for a task
pub trait ExecutorFactory: Send + Sync {
    fn create(
        &self,
        task: &TaskSpec,
        ctx: &FactoryContext<'_>,
    ) -> Result<Box<dyn Executor>, TaskError>;
}

/// Factory for the built-in task kinds
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardExecutorFactory;

impl ExecutorFactory for StandardExecutorFactory {
    fn create(
        &self,
        task: &TaskSpec,
        ctx: &FactoryContext<'_>,
    ) -> Result<Box<dyn Executor>, TaskError> {
        let config = ctx.config;
        let timeout = |default: Duration| task.kind.timeout().unwrap_or(default);

        let executor: Box<dyn Executor> = match &task.kind {
            TaskKind::Build(cfg) => Box::new(BuildExecutor::new(
                &task.name,
                cfg.clone(),
                timeout(config.build_timeout),
            )),
            TaskKind::ImageBuild(cfg) => Box::new(ImageBuildExecutor::new(
                &task.name,
                cfg.clone(),
                &config.container_cli,
                timeout(config.image_build_timeout),
            )),
            TaskKind::ImagePush(cfg) => {
                let registry = match cfg.registry.as_deref() {
                    Some(name) => Some(
                        ctx.resources
                            .registries
                            .get(name)
                            .cloned()
                            .ok_or_else(|| {
                                TaskError::config_reference(format!("unknown registry '{}'", name))
                            })?,
                    ),
                    None => None,
                };

                let images = push_list(cfg, &ctx.unpushed_images);

                Box::new(
                    ImagePushExecutor::new(
                        &task.name,
                        images,
                        registry,
                        &config.container_cli,
                        timeout(config.image_push_timeout),
                    )
                    .push_latest(cfg.push_latest)
                    .auto(cfg.auto)
                    .registry_timeout(config.registry_op_timeout),
                )
            }
            TaskKind::RemoteDeploy(cfg) => {
                let server = ctx.resources.servers.get(&cfg.server).ok_or_else(|| {
                    TaskError::config_reference(format!("unknown server '{}'", cfg.server))
                })?;

                Box::new(RemoteDeployExecutor::new(
                    &task.name,
                    server.clone(),
                    cfg.clone(),
                    timeout(config.remote_deploy_timeout),
                    config.ssh_connect_timeout,
                ))
            }
            TaskKind::Shell(cfg) => Box::new(ShellExecutor::new(
                &task.name,
                cfg.clone(),
                timeout(config.shell_timeout),
            )),
        };

        Ok(executor)
    }
}

/// Images an image-push task pushes: in auto mode exactly the images built
/// earlier in the run that no build pushed, otherwise the configured list
fn push_list(cfg: &ImagePushConfig, unpushed: &[String]) -> Vec<String> {
    if cfg.auto {
        unpushed.to_vec()
    } else {
        cfg.images.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_core::domain::{BuildConfig, ImageBuildConfig, RemoteDeployConfig, ServerAuth};

    fn resources() -> Resources {
        let mut resources = Resources::default();
        resources.servers.insert(
            "prod".to_string(),
            Server {
                host: "10.0.0.5".to_string(),
                port: 22,
                username: "deploy".to_string(),
                auth: ServerAuth::Key {
                    key_path: "~/.ssh/id_ed25519".to_string(),
                },
            },
        );
        resources.registries.insert(
            "main".to_string(),
            Registry {
                url: "registry.local".to_string(),
                ..Default::default()
            },
        );
        resources
    }

    fn create(kind: TaskKind, unpushed: Vec<String>) -> Result<Box<dyn Executor>, TaskError> {
        let resources = resources();
        let config = EngineConfig::default();
        let ctx = FactoryContext {
            resources: &resources,
            config: &config,
            unpushed_images: unpushed,
        };
        StandardExecutorFactory.create(&TaskSpec::new("t", kind), &ctx)
    }

    #[test]
    fn test_every_kind_is_constructed() {
        let kinds = vec![
            TaskKind::Build(BuildConfig::default()),
            TaskKind::ImageBuild(ImageBuildConfig::default()),
            TaskKind::ImagePush(ImagePushConfig::default()),
            TaskKind::RemoteDeploy(RemoteDeployConfig {
                server: "prod".to_string(),
                ..Default::default()
            }),
            TaskKind::Shell(Default::default()),
        ];

        for kind in kinds {
            let expected = kind.name();
            let executor = create(kind, Vec::new()).unwrap();
            assert_eq!(executor.kind(), expected);
            assert_eq!(executor.name(), "t");
        }
    }

    #[test]
    fn test_auto_push_replaces_configured_images() {
        let unpushed = vec!["api:1.0".to_string()];

        let auto = ImagePushConfig {
            images: vec!["web:1.0".to_string(), "api:1.0".to_string()],
            auto: true,
            ..Default::default()
        };
        assert_eq!(push_list(&auto, &unpushed), vec!["api:1.0"]);
        assert!(push_list(&auto, &[]).is_empty());

        let listed = ImagePushConfig {
            images: vec!["web:1.0".to_string()],
            ..Default::default()
        };
        assert_eq!(push_list(&listed, &unpushed), vec!["web:1.0"]);
    }

    #[test]
    fn test_unknown_server_is_a_reference_error() {
        let kind = TaskKind::RemoteDeploy(RemoteDeployConfig {
            server: "staging".to_string(),
            ..Default::default()
        });
        assert!(matches!(
            create(kind, Vec::new()),
            Err(TaskError::ConfigReference(_))
        ));
    }

    #[test]
    fn test_unknown_registry_is_a_reference_error() {
        let kind = TaskKind::ImagePush(ImagePushConfig {
            registry: Some("backup".to_string()),
            ..Default::default()
        });
        assert!(matches!(
            create(kind, Vec::new()),
            Err(TaskError::ConfigReference(_))
        ));
    }
}
