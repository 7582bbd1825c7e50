//! Runtime task records

use chrono::{DateTime, Utc};
use ferry_core::domain::{TaskId, TaskSpec, TaskStatus};
use serde::Serialize;

/// Lifecycle of one task within a run
///
/// Created for every task when the pipeline is built and kept for
/// reporting after the run ends.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuntimeTask {
    pub id: TaskId,
    pub name: String,
    pub kind: &'static str,
    pub stage_index: usize,
    pub status: TaskStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl RuntimeTask {
    pub fn new(stage_index: usize, task_index: usize, spec: &TaskSpec) -> Self {
        Self {
            id: TaskId::new(stage_index, task_index),
            name: spec.name.clone(),
            kind: spec.kind.name(),
            stage_index,
            status: TaskStatus::Pending,
            start_time: None,
            end_time: None,
            last_error: None,
        }
    }

    pub fn start(&mut self) {
        self.status = TaskStatus::Running;
        self.start_time = Some(Utc::now());
    }

    pub fn finish(&mut self, status: TaskStatus, error: Option<String>) {
        self.status = status;
        self.end_time = Some(Utc::now());
        self.last_error = error;
    }

    /// Wall-clock run time, once the task has finished
    pub fn duration(&self) -> Option<chrono::Duration> {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_core::domain::{ShellConfig, TaskKind};

    #[test]
    fn test_lifecycle() {
        let spec = TaskSpec::new("notify", TaskKind::Shell(ShellConfig::default()));
        let mut task = RuntimeTask::new(1, 3, &spec);

        assert_eq!(task.id.as_str(), "task-1-3");
        assert_eq!(task.kind, "shell");
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.duration().is_none());

        task.start();
        assert_eq!(task.status, TaskStatus::Running);

        task.finish(TaskStatus::Failed, Some("exit status: 1".to_string()));
        assert!(task.status.is_terminal());
        assert!(task.duration().unwrap() >= chrono::Duration::zero());
        assert_eq!(task.last_error.as_deref(), Some("exit status: 1"));
    }
}
