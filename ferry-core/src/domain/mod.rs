//! Core domain types
//!
//! These types are produced by the configuration layer (already resolved and
//! validated) and consumed read-only by the execution engine.

pub mod output;
pub mod pipeline;
pub mod target;
pub mod task;

pub use output::OutputLine;
pub use pipeline::{
    AutoScanConfig, BuildConfig, BuildTool, GoOptions, ImageBuildConfig, ImagePushConfig,
    PipelineDefinition, RemoteDeployConfig, ShellConfig, Stage, TaskKind, TaskSpec,
};
pub use target::{Registry, Server, ServerAuth};
pub use task::{TaskId, TaskStatus};
