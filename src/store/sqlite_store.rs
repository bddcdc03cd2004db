//! SQLite implementation of TaskStore.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use super::{CreatedJob, JobProgress, MergeOutcome, NewJob, NewTask, StoreError, TaskStore};
use crate::model::{Job, JobId, JobStatus, Task, TaskId, TaskStatus, TaskType};

const TASK_COLUMNS: &str = "id, job_id, task_type, status, input, output, priority, \
     locked_until, locked_by, retry_count, max_retries, parent_task_id, \
     sequence_order, error_message, created_at, started_at, completed_at";

const JOB_COLUMNS: &str = "id, status, original_filename, storage_path, language, context, \
     segments_count, final_result, error_message, metadata, created_at, updated_at, \
     completed_at";

/// SQLite-backed task store.
pub struct SqliteTaskStore {
    pool: SqlitePool,
}

impl SqliteTaskStore {
    /// Create a new SqliteTaskStore.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Run migrations to create the jobs and tasks tables.
    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS scribe_jobs (
                id INTEGER PRIMARY KEY,
                status TEXT NOT NULL DEFAULT 'pending',
                original_filename TEXT NOT NULL,
                storage_path TEXT NOT NULL,
                language TEXT,
                context TEXT,
                segments_count INTEGER,
                final_result TEXT,
                error_message TEXT,
                metadata TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at TEXT,
                completed_at TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS scribe_tasks (
                id INTEGER PRIMARY KEY,
                job_id INTEGER NOT NULL REFERENCES scribe_jobs(id),
                task_type TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                input TEXT NOT NULL,
                output TEXT,
                priority INTEGER NOT NULL DEFAULT 0,
                locked_until TEXT,
                locked_by TEXT,
                retry_count INTEGER NOT NULL DEFAULT 0,
                max_retries INTEGER NOT NULL DEFAULT 3,
                parent_task_id INTEGER REFERENCES scribe_tasks(id),
                sequence_order INTEGER,
                error_message TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                started_at TEXT,
                completed_at TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_scribe_tasks_claim
            ON scribe_tasks(status, priority, created_at)
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_scribe_tasks_job
            ON scribe_tasks(job_id, task_type)
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(e.to_string()))?;

        // One merge task per fan-out group. INSERT OR IGNORE against this
        // index is the conditional insert that makes fan-in race-free.
        sqlx::query(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_scribe_tasks_merge_once
            ON scribe_tasks(parent_task_id, task_type)
            WHERE task_type IN ('merge_transcriptions', 'merge_proofreads')
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(e.to_string()))?;

        Ok(())
    }
}

fn format_db_time(dt: DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S").to_string()
}

fn parse_db_time(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&format!("{}Z", raw.replace(' ', "T")))
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn clip_error(error: &str) -> String {
    error.chars().take(2000).collect()
}

fn task_from_row(row: &SqliteRow) -> Result<Task, StoreError> {
    let col = |e: sqlx::Error| StoreError::Storage(e.to_string());

    let task_type: String = row.try_get("task_type").map_err(col)?;
    let status: String = row.try_get("status").map_err(col)?;
    let input: String = row.try_get("input").map_err(col)?;
    let output: Option<String> = row.try_get("output").map_err(col)?;
    let locked_until: Option<String> = row.try_get("locked_until").map_err(col)?;
    let parent_task_id: Option<i64> = row.try_get("parent_task_id").map_err(col)?;
    let created_at: String = row.try_get("created_at").map_err(col)?;
    let started_at: Option<String> = row.try_get("started_at").map_err(col)?;
    let completed_at: Option<String> = row.try_get("completed_at").map_err(col)?;

    Ok(Task {
        id: TaskId(row.try_get("id").map_err(col)?),
        job_id: JobId(row.try_get("job_id").map_err(col)?),
        task_type: TaskType::parse(&task_type)
            .ok_or_else(|| StoreError::Deserialization(format!("unknown task type '{}'", task_type)))?,
        status: TaskStatus::parse(&status)
            .ok_or_else(|| StoreError::Deserialization(format!("unknown task status '{}'", status)))?,
        input: serde_json::from_str(&input)
            .map_err(|e| StoreError::Deserialization(e.to_string()))?,
        output: output
            .map(|raw| serde_json::from_str(&raw))
            .transpose()
            .map_err(|e| StoreError::Deserialization(e.to_string()))?,
        priority: row.try_get("priority").map_err(col)?,
        locked_until: locked_until.map(|raw| parse_db_time(&raw)),
        locked_by: row.try_get("locked_by").map_err(col)?,
        retry_count: row.try_get("retry_count").map_err(col)?,
        max_retries: row.try_get("max_retries").map_err(col)?,
        parent_task_id: parent_task_id.map(TaskId),
        sequence_order: row.try_get("sequence_order").map_err(col)?,
        error: row.try_get("error_message").map_err(col)?,
        created_at: parse_db_time(&created_at),
        started_at: started_at.map(|raw| parse_db_time(&raw)),
        completed_at: completed_at.map(|raw| parse_db_time(&raw)),
    })
}

fn job_from_row(row: &SqliteRow) -> Result<Job, StoreError> {
    let col = |e: sqlx::Error| StoreError::Storage(e.to_string());

    let status: String = row.try_get("status").map_err(col)?;
    let metadata: String = row.try_get("metadata").map_err(col)?;
    let created_at: String = row.try_get("created_at").map_err(col)?;
    let updated_at: Option<String> = row.try_get("updated_at").map_err(col)?;
    let completed_at: Option<String> = row.try_get("completed_at").map_err(col)?;

    Ok(Job {
        id: JobId(row.try_get("id").map_err(col)?),
        status: JobStatus::parse(&status)
            .ok_or_else(|| StoreError::Deserialization(format!("unknown job status '{}'", status)))?,
        original_filename: row.try_get("original_filename").map_err(col)?,
        storage_path: row.try_get("storage_path").map_err(col)?,
        language: row.try_get("language").map_err(col)?,
        context: row.try_get("context").map_err(col)?,
        segments_count: row.try_get("segments_count").map_err(col)?,
        final_result: row.try_get("final_result").map_err(col)?,
        error: row.try_get("error_message").map_err(col)?,
        metadata: serde_json::from_str(&metadata)
            .map_err(|e| StoreError::Deserialization(e.to_string()))?,
        created_at: parse_db_time(&created_at),
        updated_at: updated_at.map(|raw| parse_db_time(&raw)),
        completed_at: completed_at.map(|raw| parse_db_time(&raw)),
    })
}

async fn insert_task<'e, E>(executor: E, task: &NewTask) -> Result<TaskId, StoreError>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let input_str = serde_json::to_string(&task.input)
        .map_err(|e| StoreError::Serialization(e.to_string()))?;

    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO scribe_tasks
            (job_id, task_type, input, priority, max_retries, parent_task_id, sequence_order)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        RETURNING id
        "#,
    )
    .bind(task.job_id.0)
    .bind(task.task_type.as_str())
    .bind(input_str)
    .bind(task.priority)
    .bind(task.max_retries)
    .bind(task.parent_task_id.map(|t| t.0))
    .bind(task.sequence_order)
    .fetch_one(executor)
    .await
    .map_err(|e| StoreError::Storage(e.to_string()))?;

    Ok(TaskId(id))
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn create_job(&self, job: NewJob) -> Result<CreatedJob, StoreError> {
        let metadata_str = serde_json::to_string(&job.metadata)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Storage(e.to_string()))?;

        // The storage key embeds the job id, so it is filled in after the
        // insert hands one out.
        let job_id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO scribe_jobs (status, original_filename, storage_path, language, context, metadata)
            VALUES ('pending', ?, '', ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(&job.original_filename)
        .bind(&job.language)
        .bind(&job.context)
        .bind(metadata_str)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| StoreError::Storage(e.to_string()))?;

        let storage_path = format!("{}/original/{}", job_id, job.original_filename);

        sqlx::query("UPDATE scribe_jobs SET storage_path = ? WHERE id = ?")
            .bind(&storage_path)
            .bind(job_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Storage(e.to_string()))?;

        let input = serde_json::json!({ "storage_path": storage_path });
        let input_str = serde_json::to_string(&input)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let task_id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO scribe_tasks (job_id, task_type, input, max_retries)
            VALUES (?, 'save_file', ?, ?)
            RETURNING id
            "#,
        )
        .bind(job_id)
        .bind(input_str)
        .bind(job.max_retries)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| StoreError::Storage(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| StoreError::Storage(e.to_string()))?;

        Ok(CreatedJob {
            job_id: JobId(job_id),
            task_id: TaskId(task_id),
            storage_path,
        })
    }

    async fn create_task(&self, task: NewTask) -> Result<TaskId, StoreError> {
        insert_task(&self.pool, &task).await
    }

    async fn create_tasks(&self, tasks: Vec<NewTask>) -> Result<Vec<TaskId>, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Storage(e.to_string()))?;

        let mut ids = Vec::with_capacity(tasks.len());
        for task in &tasks {
            ids.push(insert_task(&mut *tx, task).await?);
        }

        tx.commit()
            .await
            .map_err(|e| StoreError::Storage(e.to_string()))?;

        Ok(ids)
    }

    async fn claim_next(
        &self,
        worker_id: &str,
        lease: Duration,
    ) -> Result<Option<Task>, StoreError> {
        let locked_until =
            format_db_time(Utc::now() + chrono::Duration::seconds(lease.as_secs() as i64));

        // One guarded statement: the subselect picks the candidate and the
        // status guard settles races between concurrent claimers. A loser
        // updates zero rows and comes back empty.
        let query = format!(
            r#"
            UPDATE scribe_tasks
            SET status = 'locked',
                locked_by = ?,
                locked_until = ?,
                started_at = COALESCE(started_at, datetime('now'))
            WHERE id = (
                SELECT id FROM scribe_tasks
                WHERE status = 'pending'
                ORDER BY priority DESC, created_at ASC, id ASC
                LIMIT 1
            ) AND status = 'pending'
            RETURNING {}
            "#,
            TASK_COLUMNS
        );

        let row = sqlx::query(&query)
            .bind(worker_id)
            .bind(locked_until)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(e.to_string()))?;

        row.as_ref().map(task_from_row).transpose()
    }

    async fn complete_task(
        &self,
        id: TaskId,
        worker_id: &str,
        output: &serde_json::Value,
    ) -> Result<bool, StoreError> {
        let output_str = serde_json::to_string(output)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let result = sqlx::query(
            r#"
            UPDATE scribe_tasks
            SET status = 'completed', output = ?, error_message = NULL,
                locked_until = NULL, locked_by = NULL, completed_at = datetime('now')
            WHERE id = ? AND status = 'locked' AND locked_by = ?
            "#,
        )
        .bind(output_str)
        .bind(id.0)
        .bind(worker_id)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn fail_task(&self, id: TaskId, error: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE scribe_tasks
            SET status = 'failed', error_message = ?,
                locked_until = NULL, locked_by = NULL, completed_at = datetime('now')
            WHERE id = ? AND status = 'locked'
            "#,
        )
        .bind(clip_error(error))
        .bind(id.0)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn expired_leases(&self) -> Result<Vec<Task>, StoreError> {
        let now = format_db_time(Utc::now());
        let query = format!(
            r#"
            SELECT {} FROM scribe_tasks
            WHERE status = 'locked' AND locked_until IS NOT NULL AND locked_until < ?
            ORDER BY locked_until ASC
            "#,
            TASK_COLUMNS
        );

        let rows = sqlx::query(&query)
            .bind(now)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(e.to_string()))?;

        rows.iter().map(task_from_row).collect()
    }

    async fn release_expired(&self, id: TaskId) -> Result<bool, StoreError> {
        let now = format_db_time(Utc::now());

        let result = sqlx::query(
            r#"
            UPDATE scribe_tasks
            SET status = 'pending', retry_count = retry_count + 1,
                locked_until = NULL, locked_by = NULL, error_message = NULL
            WHERE id = ? AND status = 'locked'
              AND locked_until IS NOT NULL AND locked_until < ?
            "#,
        )
        .bind(id.0)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn fail_expired(&self, id: TaskId, error: &str) -> Result<bool, StoreError> {
        let now = format_db_time(Utc::now());

        let result = sqlx::query(
            r#"
            UPDATE scribe_tasks
            SET status = 'failed', error_message = ?,
                locked_until = NULL, locked_by = NULL, completed_at = datetime('now')
            WHERE id = ? AND status = 'locked'
              AND locked_until IS NOT NULL AND locked_until < ?
            "#,
        )
        .bind(clip_error(error))
        .bind(id.0)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_siblings(
        &self,
        job_id: JobId,
        task_type: TaskType,
        parent_task_id: TaskId,
    ) -> Result<Vec<Task>, StoreError> {
        let query = format!(
            r#"
            SELECT {} FROM scribe_tasks
            WHERE job_id = ? AND task_type = ? AND parent_task_id = ?
            ORDER BY sequence_order ASC, id ASC
            "#,
            TASK_COLUMNS
        );

        let rows = sqlx::query(&query)
            .bind(job_id.0)
            .bind(task_type.as_str())
            .bind(parent_task_id.0)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(e.to_string()))?;

        rows.iter().map(task_from_row).collect()
    }

    async fn try_create_merge(
        &self,
        job_id: JobId,
        parent_task_id: TaskId,
        child_type: TaskType,
        merge_type: TaskType,
        priority: i64,
        max_retries: i64,
    ) -> Result<MergeOutcome, StoreError> {
        let siblings = self.list_siblings(job_id, child_type, parent_task_id).await?;

        if siblings.is_empty() || siblings.iter().any(|s| !s.status.is_terminal()) {
            return Ok(MergeOutcome::NotReady);
        }
        if siblings.iter().any(|s| s.status == TaskStatus::Failed) {
            return Ok(MergeOutcome::SiblingFailed);
        }

        // Terminal rows never change, so the outputs read above are final
        // even if another resolver races us to the insert below.
        let parts: Vec<serde_json::Value> = siblings
            .iter()
            .map(|s| s.output.clone().unwrap_or(serde_json::Value::Null))
            .collect();
        let input = serde_json::json!({ "parts": parts });
        let input_str = serde_json::to_string(&input)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        // The partial unique index on (parent_task_id, task_type) turns this
        // into a conditional insert: of any number of concurrent callers,
        // exactly one gets a row back.
        let created: Option<i64> = sqlx::query_scalar(
            r#"
            INSERT OR IGNORE INTO scribe_tasks
                (job_id, task_type, input, priority, max_retries, parent_task_id)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(job_id.0)
        .bind(merge_type.as_str())
        .bind(input_str)
        .bind(priority)
        .bind(max_retries)
        .bind(parent_task_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(e.to_string()))?;

        match created {
            Some(id) => Ok(MergeOutcome::Created(TaskId(id))),
            None => Ok(MergeOutcome::AlreadyExists),
        }
    }

    async fn get_task(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
        let query = format!("SELECT {} FROM scribe_tasks WHERE id = ?", TASK_COLUMNS);

        let row = sqlx::query(&query)
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(e.to_string()))?;

        row.as_ref().map(task_from_row).transpose()
    }

    async fn get_job(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        let query = format!("SELECT {} FROM scribe_jobs WHERE id = ?", JOB_COLUMNS);

        let row = sqlx::query(&query)
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(e.to_string()))?;

        row.as_ref().map(job_from_row).transpose()
    }

    async fn set_job_segments(&self, id: JobId, segments: i64) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE scribe_jobs
            SET segments_count = ?, updated_at = datetime('now')
            WHERE id = ?
            "#,
        )
        .bind(segments)
        .bind(id.0)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(e.to_string()))?;

        Ok(())
    }

    async fn set_job_result(&self, id: JobId, final_text: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE scribe_jobs
            SET final_result = ?, updated_at = datetime('now')
            WHERE id = ?
            "#,
        )
        .bind(final_text)
        .bind(id.0)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(e.to_string()))?;

        Ok(())
    }

    async fn recompute_job_status(&self, id: JobId) -> Result<JobStatus, StoreError> {
        let (total, terminal, failed, begun): (i64, i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT COUNT(*),
                   COALESCE(SUM(CASE WHEN status IN ('completed', 'failed') THEN 1 ELSE 0 END), 0),
                   COALESCE(SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END), 0),
                   COALESCE(SUM(CASE WHEN status != 'pending' THEN 1 ELSE 0 END), 0)
            FROM scribe_tasks
            WHERE job_id = ?
            "#,
        )
        .bind(id.0)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(e.to_string()))?;

        let status = if total == 0 {
            JobStatus::Pending
        } else if terminal == total {
            if failed > 0 {
                JobStatus::Failed
            } else {
                JobStatus::Completed
            }
        } else if begun > 0 {
            JobStatus::Processing
        } else {
            JobStatus::Pending
        };

        match status {
            JobStatus::Failed => {
                let error: Option<String> = sqlx::query_scalar::<_, Option<String>>(
                    r#"
                    SELECT error_message FROM scribe_tasks
                    WHERE job_id = ? AND status = 'failed'
                    ORDER BY id ASC
                    LIMIT 1
                    "#,
                )
                .bind(id.0)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StoreError::Storage(e.to_string()))?
                .flatten();

                sqlx::query(
                    r#"
                    UPDATE scribe_jobs
                    SET status = 'failed', error_message = ?,
                        completed_at = COALESCE(completed_at, datetime('now')),
                        updated_at = datetime('now')
                    WHERE id = ?
                    "#,
                )
                .bind(error.unwrap_or_else(|| "One or more tasks failed".to_string()))
                .bind(id.0)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::Storage(e.to_string()))?;
            }
            JobStatus::Completed => {
                sqlx::query(
                    r#"
                    UPDATE scribe_jobs
                    SET status = 'completed',
                        completed_at = COALESCE(completed_at, datetime('now')),
                        updated_at = datetime('now')
                    WHERE id = ?
                    "#,
                )
                .bind(id.0)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::Storage(e.to_string()))?;
            }
            other => {
                sqlx::query(
                    r#"
                    UPDATE scribe_jobs
                    SET status = ?, updated_at = datetime('now')
                    WHERE id = ?
                    "#,
                )
                .bind(other.as_str())
                .bind(id.0)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::Storage(e.to_string()))?;
            }
        }

        Ok(status)
    }

    async fn job_progress(&self, id: JobId) -> Result<Option<JobProgress>, StoreError> {
        let segments: Option<Option<i64>> =
            sqlx::query_scalar("SELECT segments_count FROM scribe_jobs WHERE id = ?")
                .bind(id.0)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StoreError::Storage(e.to_string()))?;

        let Some(total_segments) = segments else {
            return Ok(None);
        };

        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT task_type, status FROM scribe_tasks WHERE job_id = ?")
                .bind(id.0)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| StoreError::Storage(e.to_string()))?;

        let mut completed_transcriptions = 0;
        let mut completed_proofreads = 0;
        let mut current_phase: Option<TaskType> = None;

        for (ty_raw, status_raw) in rows {
            let ty = TaskType::parse(&ty_raw).ok_or_else(|| {
                StoreError::Deserialization(format!("unknown task type '{}'", ty_raw))
            })?;
            let status = TaskStatus::parse(&status_raw).ok_or_else(|| {
                StoreError::Deserialization(format!("unknown task status '{}'", status_raw))
            })?;

            if status == TaskStatus::Completed {
                match ty {
                    TaskType::Transcribe => completed_transcriptions += 1,
                    TaskType::Proofread => completed_proofreads += 1,
                    _ => {}
                }
            }

            if !status.is_terminal() {
                let earlier = match current_phase {
                    None => true,
                    Some(cur) => ty.stage() < cur.stage(),
                };
                if earlier {
                    current_phase = Some(ty);
                }
            }
        }

        Ok(Some(JobProgress {
            total_segments,
            completed_transcriptions,
            completed_proofreads,
            current_phase,
        }))
    }
}
