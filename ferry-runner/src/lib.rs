//! Ferry Runner
//!
//! Execution engine for Ferry pipelines.
//!
//! Architecture:
//! - Pipeline: stage orchestration, fail-fast, run state and task selection
//! - Executors: one per task kind, all driving external processes
//! - Batcher: coalesces chatty output into batches for the display layer
//! - Events: the ordered stream a display layer consumes
//!
//! A run takes a resolved [`ferry_core::domain::PipelineDefinition`] and the
//! servers and registries it references; loading those from a file is the
//! caller's job.

pub mod batcher;
pub mod config;
pub mod error;
pub mod events;
pub mod executor;
pub mod pipeline;

pub use config::EngineConfig;
pub use error::{PipelineError, SelectionError, TaskError};
pub use events::EventSink;
pub use executor::{ExecutorFactory, Resources, StandardExecutorFactory, expand_auto_scan};
pub use pipeline::{Pipeline, RunState, RuntimeTask, StageRange};
