//! Lease expiry sweep.
//!
//! Nothing in the claim path ever takes a task away from a live worker; an
//! expired lease is the only evidence of a dead one. The reaper turns that
//! evidence into a retry while the budget lasts and a permanent failure once
//! it is spent.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::model::{JobId, TaskId, TaskType};
use crate::store::{StoreError, TaskStore};

/// How the reaper settled one expired lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReapAction {
    /// Retry budget left; the task went back to pending.
    ResetForRetry,
    /// Budget exhausted; the task is now failed.
    MarkedFailed,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReapedTask {
    pub task_id: TaskId,
    pub job_id: JobId,
    pub task_type: TaskType,
    pub action: ReapAction,
    /// Attempts consumed so far, counting the reset one.
    pub retry_count: i64,
}

/// Summary of one sweep.
#[derive(Debug, Clone, Serialize)]
pub struct ReapReport {
    pub processed: usize,
    pub results: Vec<ReapedTask>,
}

pub struct Reaper<S> {
    store: Arc<S>,
}

impl<S: TaskStore> Reaper<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Settle every expired lease. Each transition is guarded on the lease
    /// still being expired, so concurrent sweeps settle a task at most once;
    /// a lost guard is skipped silently.
    pub async fn reap_once(&self) -> Result<ReapReport, StoreError> {
        let expired = self.store.expired_leases().await?;
        let mut results = Vec::new();

        for task in expired {
            if task.retry_count >= task.max_retries {
                if self
                    .store
                    .fail_expired(task.id, "Max retries exceeded")
                    .await?
                {
                    warn!(task_id = %task.id, task_type = %task.task_type, job_id = %task.job_id,
                        retries = task.retry_count, "lease expired with no retries left; task failed");
                    self.store.recompute_job_status(task.job_id).await?;
                    results.push(ReapedTask {
                        task_id: task.id,
                        job_id: task.job_id,
                        task_type: task.task_type,
                        action: ReapAction::MarkedFailed,
                        retry_count: task.retry_count,
                    });
                }
            } else if self.store.release_expired(task.id).await? {
                info!(task_id = %task.id, task_type = %task.task_type, job_id = %task.job_id,
                    retry = task.retry_count + 1, "lease expired; task reset for retry");
                results.push(ReapedTask {
                    task_id: task.id,
                    job_id: task.job_id,
                    task_type: task.task_type,
                    action: ReapAction::ResetForRetry,
                    retry_count: task.retry_count + 1,
                });
            }
        }

        let processed = results.len();
        if processed > 0 {
            info!(processed, "reaper sweep settled expired leases");
        }
        Ok(ReapReport { processed, results })
    }
}
