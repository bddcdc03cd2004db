//! Job and task data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub i64);

/// Unique identifier for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub i64);

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// The stages of the transcription pipeline.
///
/// Each variant names one task type; the flow graph over these types lives in
/// [`crate::flow`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    SaveFile,
    ConvertAudio,
    SplitAudio,
    Transcribe,
    MergeTranscriptions,
    SplitText,
    Proofread,
    MergeProofreads,
    Cleanup,
}

impl TaskType {
    /// All task types in pipeline order.
    pub const ALL: [TaskType; 9] = [
        TaskType::SaveFile,
        TaskType::ConvertAudio,
        TaskType::SplitAudio,
        TaskType::Transcribe,
        TaskType::MergeTranscriptions,
        TaskType::SplitText,
        TaskType::Proofread,
        TaskType::MergeProofreads,
        TaskType::Cleanup,
    ];

    /// Database string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::SaveFile => "save_file",
            TaskType::ConvertAudio => "convert_audio",
            TaskType::SplitAudio => "split_audio",
            TaskType::Transcribe => "transcribe",
            TaskType::MergeTranscriptions => "merge_transcriptions",
            TaskType::SplitText => "split_text",
            TaskType::Proofread => "proofread",
            TaskType::MergeProofreads => "merge_proofreads",
            TaskType::Cleanup => "cleanup",
        }
    }

    /// Parse the database string form.
    pub fn parse(s: &str) -> Option<TaskType> {
        Self::ALL.iter().copied().find(|t| t.as_str() == s)
    }

    /// Position of this type in pipeline order.
    pub fn stage(&self) -> usize {
        Self::ALL.iter().position(|t| t == self).unwrap_or(Self::ALL.len())
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a single task.
///
/// Transitions are `pending → locked → {completed | failed}`, plus
/// `locked → pending` when the reaper resets an expired lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Locked,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Locked => "locked",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<TaskStatus> {
        match s {
            "pending" => Some(TaskStatus::Pending),
            "locked" => Some(TaskStatus::Locked),
            "completed" => Some(TaskStatus::Completed),
            "failed" => Some(TaskStatus::Failed),
            _ => None,
        }
    }

    /// Completed or failed; no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

/// Aggregate status of a job, recomputed from its tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<JobStatus> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// One upload's transcription and proofreading request.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub status: JobStatus,
    pub original_filename: String,
    /// Blob key of the uploaded source file.
    pub storage_path: String,
    /// Language hint passed through to the transcription provider.
    pub language: Option<String>,
    /// Domain context passed through to the proofreading provider.
    pub context: Option<String>,
    /// Number of audio segments, known once split_audio completes.
    pub segments_count: Option<i64>,
    /// The proofread-merged text; set when merge_proofreads completes.
    pub final_result: Option<String>,
    pub error: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// A task retrieved from storage.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: TaskId,
    pub job_id: JobId,
    pub task_type: TaskType,
    pub status: TaskStatus,
    /// Opaque payload consumed by the handler.
    pub input: serde_json::Value,
    /// Opaque payload produced by the handler; feeds the successor's input.
    pub output: Option<serde_json::Value>,
    pub priority: i64,
    /// Lease expiry; present only while the task is locked.
    pub locked_until: Option<DateTime<Utc>>,
    /// Claim owner token; present only while the task is locked.
    pub locked_by: Option<String>,
    pub retry_count: i64,
    pub max_retries: i64,
    /// Set for fan-out children and for merge tasks.
    pub parent_task_id: Option<TaskId>,
    /// Position within a sibling group; dense from 0 for fan-out children.
    pub sequence_order: Option<i64>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_type_round_trips_through_db_form() {
        for ty in TaskType::ALL {
            assert_eq!(TaskType::parse(ty.as_str()), Some(ty));
        }
        assert_eq!(TaskType::parse("bogus"), None);
    }

    #[test]
    fn terminal_statuses() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Locked.is_terminal());
    }
}
