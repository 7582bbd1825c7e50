//! Pipeline orchestrator
//!
//! Runs stages in order and stops at the first failed stage:
//! - sequential stages run their tasks one at a time and stop at the first
//!   failure, skipping the rest
//! - parallel stages start every task, wait for all of them, and report the
//!   failure of the lowest-indexed failing task
//!
//! Lifecycle events go out through the [`EventSink`] in the order things
//! happen.

mod output;
mod run_state;
mod selection;
mod task;

use ferry_core::domain::{PipelineDefinition, Stage, TaskId, TaskSpec, TaskStatus};
use ferry_core::event::{PipelineEvent, TaskFailure};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::batcher::BatchPolicy;
use crate::config::EngineConfig;
use crate::error::{PipelineError, TaskError};
use crate::events::EventSink;
use crate::executor::{ExecutorFactory, FactoryContext, Resources, StandardExecutorFactory};
use output::TaskOutput;

pub use run_state::RunState;
pub use selection::{StageRange, select_server, select_stage_range, select_tasks};
pub use task::RuntimeTask;

/// A task that did not succeed
struct TaskRunError {
    task_id: TaskId,
    task_name: String,
    error: TaskError,
    output_tail: Vec<ferry_core::domain::OutputLine>,
}

/// Why a stage failed: the reported error plus the others of a parallel stage
struct StageFailure {
    first: TaskRunError,
    suppressed: Vec<(TaskId, String)>,
}

/// State shared with the tasks of a parallel stage
struct Shared {
    resources: Resources,
    config: EngineConfig,
    events: EventSink,
    factory: Arc<dyn ExecutorFactory>,
    state: RunState,
    tasks: Mutex<Vec<Vec<RuntimeTask>>>,
}

impl Shared {
    fn update_task<F>(&self, id: &TaskId, stage: usize, index: usize, f: F)
    where
        F: FnOnce(&mut RuntimeTask),
    {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        match tasks.get_mut(stage).and_then(|s| s.get_mut(index)) {
            Some(task) => f(task),
            None => warn!("No runtime record for {}", id),
        }
    }

    async fn set_status(
        &self,
        stage: usize,
        index: usize,
        status: TaskStatus,
        error: Option<String>,
    ) {
        let id = TaskId::new(stage, index);
        self.update_task(&id, stage, index, |task| match status {
            TaskStatus::Running => task.start(),
            _ => task.finish(status, error),
        });

        self.events
            .send(PipelineEvent::TaskStatusChanged {
                task_id: id,
                status,
            })
            .await;
    }
}

/// Executes one pipeline definition
pub struct Pipeline {
    definition: PipelineDefinition,
    shared: Arc<Shared>,
}

impl Pipeline {
    /// Creates a pipeline with the built-in executors
    ///
    /// # Arguments
    /// * `definition` - Fully resolved stages and tasks
    /// * `resources` - Servers and registries tasks may reference
    /// * `config` - Engine defaults
    /// * `events` - Where lifecycle and output events go
    pub fn new(
        definition: PipelineDefinition,
        resources: Resources,
        config: EngineConfig,
        events: EventSink,
    ) -> Self {
        Self::with_factory(
            definition,
            resources,
            config,
            events,
            Arc::new(StandardExecutorFactory),
        )
    }

    /// Creates a pipeline that builds executors with `factory`
    pub fn with_factory(
        definition: PipelineDefinition,
        resources: Resources,
        config: EngineConfig,
        events: EventSink,
        factory: Arc<dyn ExecutorFactory>,
    ) -> Self {
        let tasks = definition
            .stages
            .iter()
            .enumerate()
            .map(|(s, stage)| {
                stage
                    .tasks
                    .iter()
                    .enumerate()
                    .map(|(t, spec)| RuntimeTask::new(s, t, spec))
                    .collect()
            })
            .collect();

        Self {
            definition,
            shared: Arc::new(Shared {
                resources,
                config,
                events,
                factory,
                state: RunState::new(),
                tasks: Mutex::new(tasks),
            }),
        }
    }

    pub fn definition(&self) -> &PipelineDefinition {
        &self.definition
    }

    /// Snapshot of every task's runtime record, in stage and task order
    pub fn tasks(&self) -> Vec<RuntimeTask> {
        self.shared
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .flatten()
            .cloned()
            .collect()
    }

    /// Image references built so far in this run
    pub fn built_images(&self) -> Vec<String> {
        self.shared.state.built_images()
    }

    /// Runs every stage in order until one fails
    ///
    /// Returns the failure of the first failed stage. Cancelling `cancel`
    /// makes every running task return promptly.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<(), PipelineError> {
        let shared = &self.shared;
        let started = Instant::now();

        info!(
            "Starting pipeline: {} stage(s), {} task(s)",
            self.definition.stages.len(),
            self.definition.task_count()
        );
        shared.events.send(PipelineEvent::PipelineStarted).await;

        for (index, stage) in self.definition.stages.iter().enumerate() {
            info!("Stage {} '{}' started", index + 1, stage.name);
            shared
                .events
                .send(PipelineEvent::StageStarted {
                    index,
                    name: stage.name.clone(),
                })
                .await;

            let stage_started = Instant::now();
            let outcome = if stage.parallel {
                self.run_parallel(index, stage, cancel).await
            } else {
                self.run_sequential(index, stage, cancel).await
            };

            shared
                .events
                .send(PipelineEvent::StageCompleted {
                    index,
                    name: stage.name.clone(),
                    success: outcome.is_ok(),
                    duration: stage_started.elapsed(),
                })
                .await;

            let Err(failure) = outcome else {
                info!(
                    "Stage {} '{}' completed in {:?}",
                    index + 1,
                    stage.name,
                    stage_started.elapsed()
                );
                continue;
            };

            error!(
                "Stage {} '{}' failed: task '{}': {}",
                index + 1,
                stage.name,
                failure.first.task_name,
                failure.first.error
            );

            self.skip_from_stage(index + 1).await;

            let StageFailure { first, suppressed } = failure;
            shared
                .events
                .send(PipelineEvent::PipelineCompleted {
                    success: false,
                    duration: started.elapsed(),
                    failure: Some(TaskFailure {
                        task_id: first.task_id.clone(),
                        task_name: first.task_name.clone(),
                        stage_index: index,
                        message: first.error.to_string(),
                        output_tail: first.output_tail,
                        suppressed,
                    }),
                })
                .await;

            return Err(PipelineError {
                stage_index: index,
                stage_name: stage.name.clone(),
                task_id: first.task_id,
                task_name: first.task_name,
                source: first.error,
            });
        }

        info!("Pipeline completed in {:?}", started.elapsed());
        shared
            .events
            .send(PipelineEvent::PipelineCompleted {
                success: true,
                duration: started.elapsed(),
                failure: None,
            })
            .await;

        Ok(())
    }

    async fn run_sequential(
        &self,
        stage_index: usize,
        stage: &Stage,
        cancel: &CancellationToken,
    ) -> Result<(), StageFailure> {
        for (index, spec) in stage.tasks.iter().enumerate() {
            let result = run_task(
                self.shared.clone(),
                stage_index,
                index,
                spec.clone(),
                cancel.clone(),
            )
            .await;

            if let Err(first) = result {
                for skipped in index + 1..stage.tasks.len() {
                    self.shared
                        .set_status(stage_index, skipped, TaskStatus::Skipped, None)
                        .await;
                }
                return Err(StageFailure {
                    first,
                    suppressed: Vec::new(),
                });
            }
        }

        Ok(())
    }

    async fn run_parallel(
        &self,
        stage_index: usize,
        stage: &Stage,
        cancel: &CancellationToken,
    ) -> Result<(), StageFailure> {
        let handles: Vec<_> = stage
            .tasks
            .iter()
            .enumerate()
            .map(|(index, spec)| {
                tokio::spawn(run_task(
                    self.shared.clone(),
                    stage_index,
                    index,
                    spec.clone(),
                    cancel.clone(),
                ))
            })
            .collect();

        debug!(
            "Stage {} running {} task(s) in parallel",
            stage_index + 1,
            handles.len()
        );

        // Awaited in task order, so the first error kept is the lowest index
        let mut failures = Vec::new();
        for (index, handle) in handles.into_iter().enumerate() {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(failure)) => failures.push(failure),
                Err(e) => {
                    let message = format!("task panicked: {}", e);
                    self.shared
                        .set_status(stage_index, index, TaskStatus::Failed, Some(message.clone()))
                        .await;
                    failures.push(TaskRunError {
                        task_id: TaskId::new(stage_index, index),
                        task_name: stage.tasks[index].name.clone(),
                        error: TaskError::Execution(message),
                        output_tail: Vec::new(),
                    });
                }
            }
        }

        let mut failures = failures.into_iter();
        match failures.next() {
            None => Ok(()),
            Some(first) => Err(StageFailure {
                first,
                suppressed: failures.map(|f| (f.task_id, f.error.to_string())).collect(),
            }),
        }
    }

    /// Marks every task of `from` and later stages as skipped
    async fn skip_from_stage(&self, from: usize) {
        for (stage_index, stage) in self.definition.stages.iter().enumerate().skip(from) {
            for index in 0..stage.tasks.len() {
                self.shared
                    .set_status(stage_index, index, TaskStatus::Skipped, None)
                    .await;
            }
        }
    }
}

/// Runs one task from start to terminal status
async fn run_task(
    shared: Arc<Shared>,
    stage_index: usize,
    index: usize,
    spec: TaskSpec,
    cancel: CancellationToken,
) -> Result<(), TaskRunError> {
    let task_id = TaskId::new(stage_index, index);
    let fail = |error: TaskError, output_tail| TaskRunError {
        task_id: task_id.clone(),
        task_name: spec.name.clone(),
        error,
        output_tail,
    };

    shared
        .set_status(stage_index, index, TaskStatus::Running, None)
        .await;

    if cancel.is_cancelled() {
        shared
            .set_status(stage_index, index, TaskStatus::Cancelled, None)
            .await;
        return Err(fail(TaskError::Cancelled, Vec::new()));
    }

    let ctx = FactoryContext {
        resources: &shared.resources,
        config: &shared.config,
        unpushed_images: shared.state.unpushed_images(),
    };

    let executor = match shared.factory.create(&spec, &ctx) {
        Ok(executor) => executor,
        Err(e) => {
            warn!("Task '{}' could not be created: {}", spec.name, e);
            shared
                .set_status(stage_index, index, TaskStatus::Failed, Some(e.to_string()))
                .await;
            return Err(fail(e, Vec::new()));
        }
    };

    let tail_len = shared.config.output_tail_lines;
    let output = if spec.kind.batches_output() {
        TaskOutput::batched(
            task_id.clone(),
            shared.events.clone(),
            BatchPolicy::from_config(&shared.config),
            tail_len,
        )
    } else {
        TaskOutput::direct(task_id.clone(), shared.events.clone(), tail_len)
    };

    info!("Task '{}' ({}) started", spec.name, executor.kind());
    let started = Instant::now();
    let result = executor.execute(&cancel, &output).await;
    output.finish().await;

    match result {
        Ok(()) => {
            if let Some(image) = executor.built_image() {
                if shared.state.record_built(&image) {
                    debug!("Recorded image {} (pushed: {})", image.reference, image.pushed);
                }
            }
            info!("Task '{}' succeeded in {:?}", spec.name, started.elapsed());
            shared
                .set_status(stage_index, index, TaskStatus::Success, None)
                .await;
            Ok(())
        }
        Err(e) => {
            let status = if e.is_cancelled() {
                TaskStatus::Cancelled
            } else {
                TaskStatus::Failed
            };
            warn!("Task '{}' {}: {}", spec.name, status, e);
            shared
                .set_status(stage_index, index, status, Some(e.to_string()))
                .await;
            Err(fail(e, output.tail()))
        }
    }
}
