//! Bounded-concurrency batch scheduler.
//!
//! A batch is split into fixed-size waves. The members of one wave run
//! concurrently on the current task (joined futures, not threads) and the
//! whole wave settles before the next one starts, so at most `max_parallel`
//! tasks are ever `Converting`. Per-task failures are recorded on the task and
//! never abort the batch.

use std::collections::HashSet;
use std::sync::Arc;

use bytes::Bytes;
use futures::future::join_all;
use serde::{Deserialize, Serialize};

use mb_core::config::FormatsConfig;
use mb_core::events::{EventBus, EventPayload};
use mb_core::{BatchId, Error, Result, TaskId};
use mb_engine::{Engine, EngineHandle};

use crate::plan::{ConversionPlan, VirtualNames};
use crate::registry::ResultRegistry;
use crate::store::TaskStore;
use crate::task::TaskState;

/// Which tasks to run and how.
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub task_ids: Vec<TaskId>,
    /// Wave size; values below one are treated as one.
    pub max_parallel: usize,
    /// Target format for every non-video input.
    pub output_format: String,
}

/// Tally of one batch run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub completed: usize,
    pub failed: usize,
    /// Requested ids that were terminal, unknown, duplicated, or removed
    /// before their wave.
    pub skipped: usize,
    pub waves: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskOutcome {
    Completed,
    Failed,
    Skipped,
}

pub struct BatchScheduler {
    engine: Arc<EngineHandle>,
    store: Arc<TaskStore>,
    registry: Arc<ResultRegistry>,
    events: Arc<EventBus>,
    formats: FormatsConfig,
}

impl BatchScheduler {
    pub fn new(
        engine: Arc<EngineHandle>,
        store: Arc<TaskStore>,
        registry: Arc<ResultRegistry>,
        events: Arc<EventBus>,
        formats: FormatsConfig,
    ) -> Self {
        Self {
            engine,
            store,
            registry,
            events,
            formats,
        }
    }

    /// Run every runnable task of `request` to a terminal state.
    pub async fn run_batch(&self, request: &BatchRequest) -> BatchSummary {
        let mut summary = BatchSummary::default();
        let max_parallel = request.max_parallel.max(1);

        let mut seen = HashSet::new();
        let mut runnable = Vec::with_capacity(request.task_ids.len());
        for &id in &request.task_ids {
            if !seen.insert(id) {
                summary.skipped += 1;
                continue;
            }
            match self.store.get(id) {
                Some(task) if task.state == TaskState::Pending => runnable.push(id),
                Some(task) => {
                    tracing::debug!(task_id = %id, state = %task.state, "Skipping task that is not pending");
                    summary.skipped += 1;
                }
                None => {
                    tracing::warn!(task_id = %id, "Skipping unknown task");
                    summary.skipped += 1;
                }
            }
        }

        if runnable.is_empty() {
            tracing::debug!(skipped = summary.skipped, "Nothing to convert");
            return summary;
        }

        let batch_id = BatchId::new();
        let waves: Vec<&[TaskId]> = runnable.chunks(max_parallel).collect();
        summary.waves = waves.len();

        tracing::info!(
            batch_id = %batch_id,
            tasks = runnable.len(),
            waves = waves.len(),
            max_parallel,
            format = %request.output_format,
            "Starting batch"
        );
        self.events.publish(EventPayload::BatchStarted {
            batch_id,
            tasks: runnable.len(),
            waves: waves.len(),
        });

        let engine = match self.engine.acquire().await {
            Ok(engine) => engine,
            Err(e) => {
                tracing::error!(batch_id = %batch_id, error = %e, "Engine unavailable, failing batch");
                for &id in &runnable {
                    match self.fail_task(id, &e) {
                        TaskOutcome::Failed => summary.failed += 1,
                        _ => summary.skipped += 1,
                    }
                }
                self.finish(batch_id, &summary);
                return summary;
            }
        };

        for (index, wave) in waves.iter().enumerate() {
            tracing::debug!(batch_id = %batch_id, index, size = wave.len(), "Starting wave");
            self.events.publish(EventPayload::WaveStarted {
                batch_id,
                index,
                size: wave.len(),
            });

            let outcomes = join_all(
                wave.iter()
                    .map(|&id| self.run_task(engine.as_ref(), id, &request.output_format)),
            )
            .await;

            for outcome in outcomes {
                match outcome {
                    TaskOutcome::Completed => summary.completed += 1,
                    TaskOutcome::Failed => summary.failed += 1,
                    TaskOutcome::Skipped => summary.skipped += 1,
                }
            }
        }

        self.finish(batch_id, &summary);
        summary
    }

    fn finish(&self, batch_id: BatchId, summary: &BatchSummary) {
        tracing::info!(
            batch_id = %batch_id,
            completed = summary.completed,
            failed = summary.failed,
            skipped = summary.skipped,
            "Batch finished"
        );
        self.events.publish(EventPayload::BatchFinished {
            batch_id,
            completed: summary.completed,
            failed: summary.failed,
        });
    }

    /// Drive one task from `Pending` to a terminal state.
    async fn run_task(&self, engine: &dyn Engine, id: TaskId, output_format: &str) -> TaskOutcome {
        let Some(task) = self.store.get(id) else {
            tracing::debug!(task_id = %id, "Task removed before its wave");
            return TaskOutcome::Skipped;
        };

        let plan = ConversionPlan::for_input(&task.input_name, &self.formats, output_format);
        let input = match self.store.claim(id, plan.output_format()) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::debug!(task_id = %id, error = %e, "Task no longer claimable");
                return TaskOutcome::Skipped;
            }
        };

        tracing::info!(task_id = %id, name = %task.input_name, plan = ?plan, "Converting");
        self.events.publish(EventPayload::TaskStarted { task_id: id });
        self.events.publish(EventPayload::TaskProgress {
            task_id: id,
            progress: 0,
        });

        let output_name = plan.output_name(&task.input_name);
        let names = VirtualNames::new(id, &task.input_name, &output_name);

        let result = convert(engine, &plan, &names, input).await;
        cleanup(engine, &names).await;

        match result {
            Ok(bytes) => {
                let artifact =
                    self.registry
                        .register(id, output_name, plan.output_format(), bytes);
                if let Err(e) = self.store.complete(id, artifact.id) {
                    tracing::error!(task_id = %id, error = %e, "Could not complete task");
                    self.registry.release_one(id);
                    return self.fail_task(id, &e);
                }
                tracing::info!(task_id = %id, output = %artifact.output_name, size = artifact.size_bytes, "Conversion completed");
                self.events.publish(EventPayload::TaskProgress {
                    task_id: id,
                    progress: 100,
                });
                self.events.publish(EventPayload::TaskCompleted {
                    task_id: id,
                    artifact_id: artifact.id,
                });
                TaskOutcome::Completed
            }
            Err(e) => self.fail_task(id, &e),
        }
    }

    fn fail_task(&self, id: TaskId, cause: &Error) -> TaskOutcome {
        match self.store.fail(id, cause) {
            Ok(()) => {
                if cause.is_task_scoped() {
                    tracing::warn!(task_id = %id, error = %cause, "Conversion failed");
                } else {
                    tracing::error!(task_id = %id, error = %cause, "Conversion failed");
                }
                self.events.publish(EventPayload::TaskFailed {
                    task_id: id,
                    kind: cause.kind(),
                    error: cause.to_string(),
                });
                TaskOutcome::Failed
            }
            Err(e) => {
                tracing::debug!(task_id = %id, error = %e, "Task could not be failed");
                TaskOutcome::Skipped
            }
        }
    }
}

impl std::fmt::Debug for BatchScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchScheduler")
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

async fn convert(
    engine: &dyn Engine,
    plan: &ConversionPlan,
    names: &VirtualNames,
    input: Bytes,
) -> Result<Bytes> {
    engine.write_input(&names.input, input).await?;
    engine.exec(&plan.args(&names.input, &names.output)).await?;
    engine.read_output(&names.output).await
}

/// Remove both virtual files whatever the outcome.
async fn cleanup(engine: &dyn Engine, names: &VirtualNames) {
    for name in [&names.input, &names.output] {
        if let Err(e) = engine.delete_file(name).await {
            tracing::warn!(file = %name, error = %e, "Failed to delete engine file");
        }
    }
}
