//! Pipeline domain types
//!
//! A pipeline is an ordered list of stages; a stage is an ordered list of
//! tasks that run either strictly in sequence or all at once. Each task has
//! exactly one kind, and each kind carries its own closed set of options.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Fully resolved pipeline definition
///
/// Supplied by the configuration layer with variables already expanded.
/// Immutable once execution starts.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PipelineDefinition {
    #[serde(alias = "pipeline", default)]
    pub stages: Vec<Stage>,
}

impl PipelineDefinition {
    pub fn new(stages: Vec<Stage>) -> Self {
        Self { stages }
    }

    /// Total number of tasks across all stages
    pub fn task_count(&self) -> usize {
        self.stages.iter().map(|s| s.tasks.len()).sum()
    }
}

/// A group of tasks and the unit of fail-fast progression
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Stage {
    #[serde(alias = "stage", default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub parallel: bool,
    #[serde(default)]
    pub tasks: Vec<TaskSpec>,
}

impl Stage {
    pub fn new(id: impl Into<String>, name: impl Into<String>, parallel: bool) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            parallel,
            tasks: Vec::new(),
        }
    }

    pub fn with_task(mut self, task: TaskSpec) -> Self {
        self.tasks.push(task);
        self
    }
}

/// A single unit of work of one fixed kind
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawTaskSpec")]
pub struct TaskSpec {
    pub name: String,
    pub kind: TaskKind,
}

impl TaskSpec {
    pub fn new(name: impl Into<String>, kind: TaskKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// Closed set of task kinds with their kind-specific configuration
#[derive(Debug, Clone, PartialEq)]
pub enum TaskKind {
    Build(BuildConfig),
    ImageBuild(ImageBuildConfig),
    ImagePush(ImagePushConfig),
    RemoteDeploy(RemoteDeployConfig),
    Shell(ShellConfig),
}

impl TaskKind {
    /// Canonical kind name, as written in pipeline files
    pub fn name(&self) -> &'static str {
        match self {
            TaskKind::Build(_) => "build",
            TaskKind::ImageBuild(_) => "image-build",
            TaskKind::ImagePush(_) => "image-push",
            TaskKind::RemoteDeploy(_) => "remote-deploy",
            TaskKind::Shell(_) => "shell",
        }
    }

    /// Task-configured timeout; `None` (or zero) means the kind default applies
    pub fn timeout(&self) -> Option<Duration> {
        let secs = match self {
            TaskKind::Build(c) => c.timeout,
            TaskKind::ImageBuild(c) => c.timeout,
            TaskKind::ImagePush(c) => c.timeout,
            TaskKind::RemoteDeploy(c) => c.timeout,
            TaskKind::Shell(c) => c.timeout,
        };
        secs.filter(|s| *s > 0).map(Duration::from_secs)
    }

    /// Whether this task opted into batched output delivery
    ///
    /// Only image builds and remote deployments produce enough output to
    /// make batching worthwhile.
    pub fn batches_output(&self) -> bool {
        match self {
            TaskKind::ImageBuild(c) => c.batch_output,
            TaskKind::RemoteDeploy(c) => c.batch_output,
            TaskKind::Build(_) | TaskKind::ImagePush(_) | TaskKind::Shell(_) => false,
        }
    }

    /// Server targeted by a remote deployment
    pub fn target_server(&self) -> Option<&str> {
        match self {
            TaskKind::RemoteDeploy(c) => Some(c.server.as_str()),
            _ => None,
        }
    }
}

/// Compiled-language build tool
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildTool {
    #[default]
    Maven,
    Go,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct BuildConfig {
    #[serde(default)]
    pub tool: BuildTool,
    pub command: Option<String>,
    pub script: Option<String>,
    pub working_dir: Option<PathBuf>,
    pub timeout: Option<u64>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(flatten)]
    pub go: GoOptions,
}

/// Options for the default `go` invocation
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct GoOptions {
    /// build, test or generate
    pub go_command: Option<String>,
    pub goos: Option<String>,
    pub goarch: Option<String>,
    pub output: Option<String>,
    pub ldflags: Option<String>,
    pub tags: Option<String>,
    pub cgo_enabled: Option<bool>,
    pub goprivate: Option<String>,
    pub goproxy: Option<String>,
    pub race: bool,
    pub trimpath: bool,
    #[serde(rename = "mod")]
    pub module_mode: Option<String>,
    pub packages: Option<String>,
    #[serde(alias = "go_verbose")]
    pub verbose: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ImageBuildConfig {
    pub dockerfile: Option<String>,
    pub context: Option<String>,
    #[serde(default)]
    pub image_name: String,
    pub tag: Option<String>,
    #[serde(default)]
    pub build_args: BTreeMap<String, String>,
    #[serde(default)]
    pub platforms: Vec<String>,
    /// Multi-platform builds push as part of the build unless disabled
    pub push_on_build: Option<bool>,
    #[serde(default)]
    pub push_latest_on_build: bool,
    pub working_dir: Option<PathBuf>,
    pub timeout: Option<u64>,
    #[serde(default, alias = "force_refresh")]
    pub batch_output: bool,
    pub auto_scan: Option<AutoScanConfig>,
}

impl ImageBuildConfig {
    pub fn tag(&self) -> &str {
        match self.tag.as_deref() {
            Some(tag) if !tag.is_empty() => tag,
            _ => "latest",
        }
    }

    pub fn context(&self) -> &str {
        match self.context.as_deref() {
            Some(ctx) if !ctx.is_empty() => ctx,
            _ => ".",
        }
    }

    /// Fully-qualified `name:tag` reference
    pub fn reference(&self) -> String {
        format!("{}:{}", self.image_name, self.tag())
    }

    pub fn is_multi_platform(&self) -> bool {
        !self.platforms.is_empty()
    }
}

/// Dockerfile auto-discovery settings
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct AutoScanConfig {
    pub enabled: bool,
    pub root: Option<PathBuf>,
    pub pattern: Option<String>,
    pub exclude: Vec<String>,
    pub image_prefix: Option<String>,
    pub tag: Option<String>,
    pub platforms: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ImagePushConfig {
    pub registry: Option<String>,
    #[serde(default)]
    pub images: Vec<String>,
    /// Push exactly the images built earlier in this run that their build
    /// did not push, ignoring `images`
    #[serde(default)]
    pub auto: bool,
    #[serde(default)]
    pub push_latest: bool,
    pub timeout: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RemoteDeployConfig {
    pub server: String,
    #[serde(default)]
    pub commands: Vec<String>,
    /// Path of a script that already exists on the remote host
    pub script: Option<String>,
    /// Local script uploaded to the remote host before running
    pub local_script: Option<PathBuf>,
    pub timeout: Option<u64>,
    #[serde(default, alias = "force_refresh")]
    pub batch_output: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ShellConfig {
    pub command: Option<String>,
    pub script: Option<String>,
    pub working_dir: Option<PathBuf>,
    pub timeout: Option<u64>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// Wire shape of a task: `{name, type, config}`
#[derive(Deserialize)]
struct RawTaskSpec {
    name: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default = "empty_config")]
    config: serde_json::Value,
}

fn empty_config() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl TryFrom<RawTaskSpec> for TaskSpec {
    type Error = String;

    fn try_from(raw: RawTaskSpec) -> Result<Self, Self::Error> {
        let config = if raw.config.is_null() {
            empty_config()
        } else {
            raw.config
        };
        let invalid = |e: serde_json::Error| format!("task '{}': {}", raw.name, e);

        let kind = match raw.kind.as_str() {
            "build" => TaskKind::Build(serde_json::from_value(config).map_err(invalid)?),
            "maven" => {
                let mut cfg: BuildConfig = serde_json::from_value(config).map_err(invalid)?;
                cfg.tool = BuildTool::Maven;
                TaskKind::Build(cfg)
            }
            "go-build" => {
                let mut cfg: BuildConfig = serde_json::from_value(config).map_err(invalid)?;
                cfg.tool = BuildTool::Go;
                TaskKind::Build(cfg)
            }
            "image-build" | "docker-build" => {
                TaskKind::ImageBuild(serde_json::from_value(config).map_err(invalid)?)
            }
            "image-push" | "docker-push" => {
                TaskKind::ImagePush(serde_json::from_value(config).map_err(invalid)?)
            }
            "remote-deploy" | "ssh" => {
                TaskKind::RemoteDeploy(serde_json::from_value(config).map_err(invalid)?)
            }
            "shell" | "command" => TaskKind::Shell(serde_json::from_value(config).map_err(invalid)?),
            other => return Err(format!("task '{}': unknown task type '{}'", raw.name, other)),
        };

        Ok(TaskSpec {
            name: raw.name,
            kind,
        })
    }
}
