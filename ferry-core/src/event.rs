//! Pipeline lifecycle events
//!
//! The orchestrator emits these, in order, to whatever display layer is
//! attached. Consumers only read them; nothing flows back.

use serde::Serialize;
use std::time::Duration;

use crate::domain::{OutputLine, TaskId, TaskStatus};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum PipelineEvent {
    PipelineStarted,
    StageStarted {
        index: usize,
        name: String,
    },
    StageCompleted {
        index: usize,
        name: String,
        success: bool,
        duration: Duration,
    },
    TaskStatusChanged {
        task_id: TaskId,
        status: TaskStatus,
    },
    Output {
        task_id: TaskId,
        line: OutputLine,
    },
    OutputBatch {
        task_id: TaskId,
        lines: Vec<OutputLine>,
    },
    PipelineCompleted {
        success: bool,
        duration: Duration,
        failure: Option<TaskFailure>,
    },
}

/// Diagnostics for the task that failed the pipeline
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskFailure {
    pub task_id: TaskId,
    pub task_name: String,
    pub stage_index: usize,
    pub message: String,
    /// Last lines the task printed before failing
    pub output_tail: Vec<OutputLine>,
    /// Other failures in the same parallel stage, in task order
    pub suppressed: Vec<(TaskId, String)>,
}
