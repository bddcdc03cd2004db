//! Claims and executes one task per invocation.

use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::flow;
use crate::handlers::{HandlerError, HandlerRegistry};
use crate::model::{JobId, TaskId, TaskType};
use crate::store::{StoreError, TaskStore};

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("no handler registered for task type '{0}'")]
    UnknownTaskType(TaskType),

    #[error("task {task_id} ({task_type}) failed: {source}")]
    Handler {
        task_id: TaskId,
        task_type: TaskType,
        #[source]
        source: HandlerError,
    },
}

/// What one dispatch attempt did.
#[derive(Debug)]
pub enum DispatchOutcome {
    /// Nothing pending, or another dispatcher won the claim race.
    Idle,
    /// One task was executed and completed.
    Processed {
        task_id: TaskId,
        task_type: TaskType,
        job_id: JobId,
        output: Value,
        /// Successor tasks created by this completion.
        created: Vec<TaskId>,
    },
}

/// Single-task work loop body: claim, execute, complete, advance.
pub struct Dispatcher<S> {
    store: Arc<S>,
    handlers: Arc<HandlerRegistry>,
    config: PipelineConfig,
}

impl<S: TaskStore> Dispatcher<S> {
    pub fn new(store: Arc<S>, handlers: Arc<HandlerRegistry>, config: PipelineConfig) -> Self {
        Self {
            store,
            handlers,
            config,
        }
    }

    /// Claim at most one pending task, run its handler, and on success
    /// persist the completion, create successors, and refresh the job status.
    ///
    /// A handler error leaves the task locked. The dispatcher cannot tell a
    /// flaky provider from a poisoned payload, so the reaper makes the
    /// retry-or-fail call once the lease runs out.
    pub async fn dispatch_once(&self) -> Result<DispatchOutcome, DispatchError> {
        let worker_id = Uuid::new_v4().to_string();

        let Some(task) = self.store.claim_next(&worker_id, self.config.lease).await? else {
            debug!("no pending tasks");
            return Ok(DispatchOutcome::Idle);
        };

        info!(task_id = %task.id, task_type = %task.task_type, job_id = %task.job_id,
            attempt = task.retry_count + 1, "claimed task");

        let handler = self
            .handlers
            .get(task.task_type)
            .ok_or(DispatchError::UnknownTaskType(task.task_type))?;

        let output = match handler.execute(task.input.clone()).await {
            Ok(output) => output,
            Err(source) => {
                warn!(task_id = %task.id, task_type = %task.task_type, error = %source,
                    "handler failed; task stays locked until the lease expires");
                return Err(DispatchError::Handler {
                    task_id: task.id,
                    task_type: task.task_type,
                    source,
                });
            }
        };

        let completed = self
            .store
            .complete_task(task.id, &worker_id, &output)
            .await?;
        if !completed {
            // The lease was reclaimed while the handler ran and the task has
            // a new owner; this result is discarded.
            warn!(task_id = %task.id, "completion guard lost; discarding result");
            return Ok(DispatchOutcome::Idle);
        }

        let created = flow::advance(self.store.as_ref(), &task, &output).await?;
        let job_status = self.store.recompute_job_status(task.job_id).await?;

        info!(task_id = %task.id, task_type = %task.task_type, job_id = %task.job_id,
            job_status = job_status.as_str(), created = created.len(), "task completed");

        Ok(DispatchOutcome::Processed {
            task_id: task.id,
            task_type: task.task_type,
            job_id: task.job_id,
            output,
            created,
        })
    }
}
