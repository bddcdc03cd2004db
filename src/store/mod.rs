//! Task storage trait and types.

pub mod sqlite_store;

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::model::{Job, JobId, JobStatus, Task, TaskId, TaskType};

pub use sqlite_store::SqliteTaskStore;

/// Error type for store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),

    #[error("task graph inconsistency: {0}")]
    Inconsistent(String),
}

/// Parameters for creating a job and its initial save_file task.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub original_filename: String,
    pub language: Option<String>,
    pub context: Option<String>,
    pub metadata: serde_json::Value,
    pub max_retries: i64,
}

/// The rows created for one upload.
#[derive(Debug, Clone)]
pub struct CreatedJob {
    pub job_id: JobId,
    pub task_id: TaskId,
    /// Blob key the upload should be written under; also the save_file input.
    pub storage_path: String,
}

/// Parameters for creating one task.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub job_id: JobId,
    pub task_type: TaskType,
    pub input: serde_json::Value,
    pub priority: i64,
    pub max_retries: i64,
    pub parent_task_id: Option<TaskId>,
    pub sequence_order: Option<i64>,
}

/// Result of a fan-in merge-creation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// At least one sibling is not terminal yet.
    NotReady,
    /// Every sibling is terminal but at least one failed; no merge is created.
    SiblingFailed,
    /// This caller created the merge task.
    Created(TaskId),
    /// Another caller created the merge task first.
    AlreadyExists,
}

/// Per-job completion counts for the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct JobProgress {
    pub total_segments: Option<i64>,
    pub completed_transcriptions: i64,
    pub completed_proofreads: i64,
    /// Type of the first still-outstanding task in flow order.
    pub current_phase: Option<TaskType>,
}

/// Trait for task storage backends.
///
/// The task table is the only shared mutable state in the pipeline; every
/// write that can race carries an expected-status guard and reports whether
/// it won.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Create a job together with its initial save_file task.
    async fn create_job(&self, job: NewJob) -> Result<CreatedJob, StoreError>;

    /// Insert one pending task.
    async fn create_task(&self, task: NewTask) -> Result<TaskId, StoreError>;

    /// Insert a batch of pending tasks in one transaction.
    async fn create_tasks(&self, tasks: Vec<NewTask>) -> Result<Vec<TaskId>, StoreError>;

    /// Atomically claim the pending task with the highest priority (oldest
    /// first) and lock it under `worker_id` for `lease`. Returns `None` when
    /// nothing is pending or another caller won the race.
    async fn claim_next(&self, worker_id: &str, lease: Duration)
        -> Result<Option<Task>, StoreError>;

    /// Guarded `locked → completed` transition; the guard also checks the
    /// claim owner so an outlived lease cannot overwrite a newer attempt.
    /// Returns false when the guard lost.
    async fn complete_task(
        &self,
        id: TaskId,
        worker_id: &str,
        output: &serde_json::Value,
    ) -> Result<bool, StoreError>;

    /// Guarded `locked → failed` transition (manual adjudication).
    async fn fail_task(&self, id: TaskId, error: &str) -> Result<bool, StoreError>;

    /// Tasks whose lease expired without completion.
    async fn expired_leases(&self) -> Result<Vec<Task>, StoreError>;

    /// Guarded reaper retry: `locked` + expired lease → `pending`, with
    /// `retry_count` incremented and lease/error fields cleared.
    async fn release_expired(&self, id: TaskId) -> Result<bool, StoreError>;

    /// Guarded reaper failure: `locked` + expired lease → `failed`.
    async fn fail_expired(&self, id: TaskId, error: &str) -> Result<bool, StoreError>;

    /// All tasks sharing a fan-out group, ordered by `sequence_order`.
    async fn list_siblings(
        &self,
        job_id: JobId,
        task_type: TaskType,
        parent_task_id: TaskId,
    ) -> Result<Vec<Task>, StoreError>;

    /// Fan-in resolution: when every `(job_id, child_type, parent_task_id)`
    /// sibling is terminal and none failed, create the merge task with the
    /// siblings' outputs as ordered `parts`. Creation is a single conditional
    /// insert behind a uniqueness constraint, so concurrent callers produce
    /// exactly one merge task.
    async fn try_create_merge(
        &self,
        job_id: JobId,
        parent_task_id: TaskId,
        child_type: TaskType,
        merge_type: TaskType,
        priority: i64,
        max_retries: i64,
    ) -> Result<MergeOutcome, StoreError>;

    async fn get_task(&self, id: TaskId) -> Result<Option<Task>, StoreError>;

    async fn get_job(&self, id: JobId) -> Result<Option<Job>, StoreError>;

    /// Record the fan-out width once split_audio completes.
    async fn set_job_segments(&self, id: JobId, segments: i64) -> Result<(), StoreError>;

    /// Record the merged proofread text as the job's terminal result.
    async fn set_job_result(&self, id: JobId, final_text: &str) -> Result<(), StoreError>;

    /// Recompute the job's status from its tasks: completed when all are
    /// terminal and none failed, failed when all are terminal and at least
    /// one failed, otherwise processing/pending. Idempotent.
    async fn recompute_job_status(&self, id: JobId) -> Result<JobStatus, StoreError>;

    /// Completion counts and current phase for the status endpoint.
    async fn job_progress(&self, id: JobId) -> Result<Option<JobProgress>, StoreError>;
}
