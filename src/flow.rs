//! The pipeline flow graph.
//!
//! Stages form a fixed DAG over [`TaskType`]:
//!
//! ```text
//! save_file -> convert_audio -> split_audio -> transcribe (xN)
//!     -> merge_transcriptions -> split_text -> proofread (xN)
//!     -> merge_proofreads -> cleanup
//! ```
//!
//! [`advance`] is the only place successor tasks are created. It runs after a
//! task's completion has been persisted, so a crash between the two leaves a
//! completed task without successors rather than a half-built graph; the job
//! stays in `processing` and the gap is visible in the status endpoint.

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::handlers::audio::SplitAudioOutput;
use crate::handlers::cleanup::CleanupInput;
use crate::handlers::proofread::ProofreadInput;
use crate::handlers::text::{FinalTranscript, SplitTextOutput};
use crate::handlers::transcribe::TranscribeInput;
use crate::model::{Task, TaskId, TaskType};
use crate::store::{MergeOutcome, NewTask, StoreError, TaskStore};

/// 1:1 successor edges. Fan-out stages (`split_audio`, `split_text`) and
/// fan-in children (`transcribe`, `proofread`) return `None`; their edges are
/// data-dependent and handled by [`advance`] directly.
pub fn successor(ty: TaskType) -> Option<TaskType> {
    match ty {
        TaskType::SaveFile => Some(TaskType::ConvertAudio),
        TaskType::ConvertAudio => Some(TaskType::SplitAudio),
        TaskType::SplitAudio => None,
        TaskType::Transcribe => None,
        TaskType::MergeTranscriptions => Some(TaskType::SplitText),
        TaskType::SplitText => None,
        TaskType::Proofread => None,
        TaskType::MergeProofreads => Some(TaskType::Cleanup),
        TaskType::Cleanup => None,
    }
}

/// Create whatever follows from `task` completing with `output`. Returns the
/// ids of any created tasks.
///
/// Must only be called after the completion itself has been persisted; merge
/// creation reads sibling rows and trusts terminal ones not to change.
pub async fn advance<S>(
    store: &S,
    task: &Task,
    output: &Value,
) -> Result<Vec<TaskId>, StoreError>
where
    S: TaskStore + ?Sized,
{
    match task.task_type {
        TaskType::SaveFile | TaskType::ConvertAudio | TaskType::MergeTranscriptions => {
            match successor(task.task_type) {
                Some(next) => chain(store, task, next, output.clone()).await,
                None => Ok(vec![]),
            }
        }
        TaskType::SplitAudio => fan_out_transcribes(store, task, output).await,
        TaskType::Transcribe => resolve_merge(store, task, TaskType::MergeTranscriptions).await,
        TaskType::SplitText => fan_out_proofreads(store, task, output).await,
        TaskType::Proofread => resolve_merge(store, task, TaskType::MergeProofreads).await,
        TaskType::MergeProofreads => finish_job(store, task, output).await,
        TaskType::Cleanup => Ok(vec![]),
    }
}

/// Insert the single successor task, feeding it the predecessor's output.
async fn chain<S>(
    store: &S,
    task: &Task,
    next: TaskType,
    input: Value,
) -> Result<Vec<TaskId>, StoreError>
where
    S: TaskStore + ?Sized,
{
    let id = store
        .create_task(NewTask {
            job_id: task.job_id,
            task_type: next,
            input,
            priority: task.priority,
            max_retries: task.max_retries,
            parent_task_id: None,
            sequence_order: None,
        })
        .await?;

    debug!(job_id = %task.job_id, task_type = %next, task_id = %id, "created successor task");
    Ok(vec![id])
}

async fn fan_out_transcribes<S>(
    store: &S,
    task: &Task,
    output: &Value,
) -> Result<Vec<TaskId>, StoreError>
where
    S: TaskStore + ?Sized,
{
    let parsed: SplitAudioOutput = serde_json::from_value(output.clone())
        .map_err(|e| StoreError::Deserialization(format!("split_audio output: {}", e)))?;
    let job = store
        .get_job(task.job_id)
        .await?
        .ok_or_else(|| StoreError::Inconsistent(format!("job {} not found", task.job_id)))?;

    store
        .set_job_segments(task.job_id, parsed.segments.len() as i64)
        .await?;

    let mut children = Vec::with_capacity(parsed.segments.len());
    for segment in &parsed.segments {
        let input = serde_json::to_value(TranscribeInput {
            path: segment.path.clone(),
            index: segment.index,
            duration_secs: segment.duration_secs,
            language: job.language.clone(),
        })
        .map_err(|e| StoreError::Serialization(e.to_string()))?;

        children.push(NewTask {
            job_id: task.job_id,
            task_type: TaskType::Transcribe,
            input,
            priority: task.priority,
            max_retries: task.max_retries,
            parent_task_id: Some(task.id),
            sequence_order: Some(segment.index as i64),
        });
    }

    let ids = store.create_tasks(children).await?;
    info!(job_id = %task.job_id, segments = ids.len(), "fanned out transcription tasks");
    Ok(ids)
}

async fn fan_out_proofreads<S>(
    store: &S,
    task: &Task,
    output: &Value,
) -> Result<Vec<TaskId>, StoreError>
where
    S: TaskStore + ?Sized,
{
    let parsed: SplitTextOutput = serde_json::from_value(output.clone())
        .map_err(|e| StoreError::Deserialization(format!("split_text output: {}", e)))?;
    let job = store
        .get_job(task.job_id)
        .await?
        .ok_or_else(|| StoreError::Inconsistent(format!("job {} not found", task.job_id)))?;

    let total = parsed.chunks.len();
    let mut children = Vec::with_capacity(total);
    for chunk in &parsed.chunks {
        let input = serde_json::to_value(ProofreadInput {
            text: chunk.text.clone(),
            index: chunk.index,
            total,
            context: job.context.clone(),
        })
        .map_err(|e| StoreError::Serialization(e.to_string()))?;

        children.push(NewTask {
            job_id: task.job_id,
            task_type: TaskType::Proofread,
            input,
            priority: task.priority,
            max_retries: task.max_retries,
            parent_task_id: Some(task.id),
            sequence_order: Some(chunk.index as i64),
        });
    }

    let ids = store.create_tasks(children).await?;
    info!(job_id = %task.job_id, chunks = ids.len(), "fanned out proofreading tasks");
    Ok(ids)
}

/// Fan-in: the last sibling to complete creates the merge task. Every sibling
/// completion lands here, so no separate watcher is needed.
async fn resolve_merge<S>(
    store: &S,
    task: &Task,
    merge_type: TaskType,
) -> Result<Vec<TaskId>, StoreError>
where
    S: TaskStore + ?Sized,
{
    let Some(parent) = task.parent_task_id else {
        return Err(StoreError::Inconsistent(format!(
            "{} task {} has no parent fan-out task",
            task.task_type, task.id
        )));
    };

    let outcome = store
        .try_create_merge(
            task.job_id,
            parent,
            task.task_type,
            merge_type,
            task.priority,
            task.max_retries,
        )
        .await?;

    match outcome {
        MergeOutcome::Created(id) => {
            info!(job_id = %task.job_id, task_type = %merge_type, task_id = %id,
                "all siblings terminal; created merge task");
            Ok(vec![id])
        }
        MergeOutcome::AlreadyExists => {
            debug!(job_id = %task.job_id, task_type = %merge_type, "merge task already exists");
            Ok(vec![])
        }
        MergeOutcome::NotReady => {
            debug!(job_id = %task.job_id, "siblings still outstanding");
            Ok(vec![])
        }
        MergeOutcome::SiblingFailed => {
            warn!(job_id = %task.job_id, "a sibling failed permanently; not creating merge task");
            Ok(vec![])
        }
    }
}

/// Record the final text on the job, then chain into cleanup.
async fn finish_job<S>(
    store: &S,
    task: &Task,
    output: &Value,
) -> Result<Vec<TaskId>, StoreError>
where
    S: TaskStore + ?Sized,
{
    let parsed: FinalTranscript = serde_json::from_value(output.clone())
        .map_err(|e| StoreError::Deserialization(format!("merge_proofreads output: {}", e)))?;

    store.set_job_result(task.job_id, &parsed.final_text).await?;

    let input = serde_json::to_value(CleanupInput {
        prefix: format!("{}/", task.job_id),
    })
    .map_err(|e| StoreError::Serialization(e.to_string()))?;

    chain(store, task, TaskType::Cleanup, input).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_edges_walk_the_whole_pipeline() {
        assert_eq!(successor(TaskType::SaveFile), Some(TaskType::ConvertAudio));
        assert_eq!(successor(TaskType::ConvertAudio), Some(TaskType::SplitAudio));
        assert_eq!(successor(TaskType::MergeTranscriptions), Some(TaskType::SplitText));
        assert_eq!(successor(TaskType::MergeProofreads), Some(TaskType::Cleanup));
    }

    #[test]
    fn fan_stages_have_no_static_successor() {
        assert_eq!(successor(TaskType::SplitAudio), None);
        assert_eq!(successor(TaskType::Transcribe), None);
        assert_eq!(successor(TaskType::SplitText), None);
        assert_eq!(successor(TaskType::Proofread), None);
        assert_eq!(successor(TaskType::Cleanup), None);
    }

    #[test]
    fn stage_order_matches_pipeline_order() {
        assert!(TaskType::SaveFile.stage() < TaskType::Transcribe.stage());
        assert!(TaskType::Transcribe.stage() < TaskType::Proofread.stage());
        assert!(TaskType::Proofread.stage() < TaskType::Cleanup.stage());
    }
}
