//! Per-task output routing

use async_trait::async_trait;
use ferry_core::domain::{OutputLine, TaskId};
use ferry_core::event::PipelineEvent;
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use crate::batcher::{BatchPolicy, OutputBatcher};
use crate::events::EventSink;
use crate::executor::OutputHandler;

/// Receives one task's output, keeps its tail for failure reports, and
/// forwards each line either directly or through a batcher
pub(crate) struct TaskOutput {
    task_id: TaskId,
    events: EventSink,
    batcher: Option<OutputBatcher>,
    tail: Mutex<VecDeque<OutputLine>>,
    tail_len: usize,
}

impl TaskOutput {
    pub fn direct(task_id: TaskId, events: EventSink, tail_len: usize) -> Self {
        Self {
            task_id,
            events,
            batcher: None,
            tail: Mutex::new(VecDeque::with_capacity(tail_len)),
            tail_len,
        }
    }

    pub fn batched(task_id: TaskId, events: EventSink, policy: BatchPolicy, tail_len: usize) -> Self {
        let batcher = OutputBatcher::spawn(task_id.clone(), events.clone(), policy);
        Self {
            batcher: Some(batcher),
            ..Self::direct(task_id, events, tail_len)
        }
    }

    /// Flushes anything still buffered
    pub async fn finish(&self) {
        if let Some(batcher) = &self.batcher {
            batcher.shutdown().await;
        }
    }

    pub fn tail(&self) -> Vec<OutputLine> {
        self.tail
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }
}

#[async_trait]
impl OutputHandler for TaskOutput {
    async fn handle(&self, line: OutputLine) {
        if self.tail_len > 0 {
            let mut tail = self.tail.lock().unwrap_or_else(PoisonError::into_inner);
            if tail.len() == self.tail_len {
                tail.pop_front();
            }
            tail.push_back(line.clone());
        }

        match &self.batcher {
            Some(batcher) => batcher.handle(line).await,
            None => {
                self.events
                    .send(PipelineEvent::Output {
                        task_id: self.task_id.clone(),
                        line,
                    })
                    .await
            }
        }
    }
}
