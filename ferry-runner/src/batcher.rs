//! Output batcher
//!
//! Sits between a chatty task and the display layer. Lines go into a bounded
//! queue; a worker task collects them and emits one `OutputBatch` event when
//! the batch is full or the flush interval passes, whichever comes first.
//! Shutdown drains the queue and flushes what is left, so no line is lost.

use async_trait::async_trait;
use ferry_core::domain::{OutputLine, TaskId};
use ferry_core::event::PipelineEvent;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::events::EventSink;
use crate::executor::OutputHandler;

/// Batch size and timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPolicy {
    pub max_lines: usize,
    pub flush_interval: Duration,
    pub queue_capacity: usize,
}

impl BatchPolicy {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            max_lines: config.batch_max_lines,
            flush_interval: config.batch_flush_interval,
            queue_capacity: config.batch_queue_capacity,
        }
    }
}

impl Default for BatchPolicy {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

pub struct OutputBatcher {
    task_id: TaskId,
    tx: mpsc::Sender<OutputLine>,
    events: EventSink,
    shutdown: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl OutputBatcher {
    /// Starts the drain worker for one task's output
    pub fn spawn(task_id: TaskId, events: EventSink, policy: BatchPolicy) -> Self {
        let (tx, rx) = mpsc::channel(policy.queue_capacity.max(1));
        let shutdown = CancellationToken::new();

        let worker = tokio::spawn(drain(
            task_id.clone(),
            rx,
            events.clone(),
            policy,
            shutdown.clone(),
        ));

        Self {
            task_id,
            tx,
            events,
            shutdown,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Stops the worker after it has flushed every queued line
    ///
    /// Lines handled after this are forwarded one by one.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();

        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                warn!("Output batcher for {} stopped abnormally: {}", self.task_id, e);
            }
        }
    }

    async fn forward(&self, line: OutputLine) {
        self.events
            .send(PipelineEvent::Output {
                task_id: self.task_id.clone(),
                line,
            })
            .await;
    }
}

#[async_trait]
impl OutputHandler for OutputBatcher {
    async fn handle(&self, line: OutputLine) {
        if self.shutdown.is_cancelled() {
            self.forward(line).await;
            return;
        }

        if let Err(mpsc::error::SendError(line)) = self.tx.send(line).await {
            self.forward(line).await;
        }
    }
}

async fn drain(
    task_id: TaskId,
    mut rx: mpsc::Receiver<OutputLine>,
    events: EventSink,
    policy: BatchPolicy,
    shutdown: CancellationToken,
) {
    let max_lines = policy.max_lines.max(1);
    let mut batch: Vec<OutputLine> = Vec::with_capacity(max_lines);
    let mut ticker = interval_at(Instant::now() + policy.flush_interval, policy.flush_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => break,
            line = rx.recv() => match line {
                Some(line) => {
                    batch.push(line);
                    if batch.len() >= max_lines {
                        flush(&task_id, &events, &mut batch).await;
                    }
                }
                None => break,
            },
            _ = ticker.tick() => {
                if !batch.is_empty() {
                    flush(&task_id, &events, &mut batch).await;
                }
            }
        }
    }

    rx.close();
    while let Some(line) = rx.recv().await {
        batch.push(line);
        if batch.len() >= max_lines {
            flush(&task_id, &events, &mut batch).await;
        }
    }

    if !batch.is_empty() {
        flush(&task_id, &events, &mut batch).await;
    }

    debug!("Output batcher for {} drained", task_id);
}

async fn flush(task_id: &TaskId, events: &EventSink, batch: &mut Vec<OutputLine>) {
    let lines = std::mem::take(batch);
    events
        .send(PipelineEvent::OutputBatch {
            task_id: task_id.clone(),
            lines,
        })
        .await;
}
