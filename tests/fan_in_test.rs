//! Fan-in resolution: the merge task is created exactly once, only when the
//! whole sibling group is terminal.

use std::sync::Arc;

use scribeflow::{
    JobStatus, MergeOutcome, NewJob, NewTask, SqliteTaskStore, TaskId, TaskStore, TaskType,
};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

async fn setup_store() -> (SqliteTaskStore, SqlitePool) {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect(":memory:")
        .await
        .unwrap();
    let store = SqliteTaskStore::new(pool.clone());
    store.run_migrations().await.unwrap();
    (store, pool)
}

async fn setup_fan_out(
    store: &SqliteTaskStore,
    children_count: usize,
) -> (scribeflow::JobId, TaskId, Vec<TaskId>) {
    let created = store
        .create_job(NewJob {
            original_filename: "a.mp3".to_string(),
            language: None,
            context: None,
            metadata: serde_json::json!({}),
            max_retries: 3,
        })
        .await
        .unwrap();

    let parent = store
        .create_task(NewTask {
            job_id: created.job_id,
            task_type: TaskType::SplitAudio,
            input: serde_json::json!({}),
            priority: 0,
            max_retries: 3,
            parent_task_id: None,
            sequence_order: None,
        })
        .await
        .unwrap();

    // Insert children out of order; parts assembly must follow
    // sequence_order, not insertion order.
    let mut children = vec![TaskId(0); children_count];
    let mut order: Vec<usize> = (0..children_count).collect();
    order.rotate_left(1.min(children_count.saturating_sub(1)));
    for index in order {
        let id = store
            .create_task(NewTask {
                job_id: created.job_id,
                task_type: TaskType::Transcribe,
                input: serde_json::json!({ "path": format!("seg-{}", index), "index": index }),
                priority: 0,
                max_retries: 3,
                parent_task_id: Some(parent),
                sequence_order: Some(index as i64),
            })
            .await
            .unwrap();
        children[index] = id;
    }

    (created.job_id, parent, children)
}

async fn force_completed(pool: &SqlitePool, task: TaskId, text: &str) {
    sqlx::query("UPDATE scribe_tasks SET status = 'completed', output = ? WHERE id = ?")
        .bind(serde_json::json!({ "text": text }).to_string())
        .bind(task.0)
        .execute(pool)
        .await
        .unwrap();
}

async fn force_failed(pool: &SqlitePool, task: TaskId, error: &str) {
    sqlx::query("UPDATE scribe_tasks SET status = 'failed', error_message = ? WHERE id = ?")
        .bind(error)
        .bind(task.0)
        .execute(pool)
        .await
        .unwrap();
}

async fn merge_count(pool: &SqlitePool, parent: TaskId) -> i64 {
    sqlx::query_scalar(
        "SELECT COUNT(*) FROM scribe_tasks
         WHERE parent_task_id = ? AND task_type = 'merge_transcriptions'",
    )
    .bind(parent.0)
    .fetch_one(pool)
    .await
    .unwrap()
}

#[tokio::test]
async fn test_merge_waits_for_every_sibling() {
    let (store, pool) = setup_store().await;
    let (job, parent, children) = setup_fan_out(&store, 3).await;

    force_completed(&pool, children[0], "zero ").await;
    force_completed(&pool, children[2], "two").await;

    let outcome = store
        .try_create_merge(job, parent, TaskType::Transcribe, TaskType::MergeTranscriptions, 0, 3)
        .await
        .unwrap();
    assert_eq!(outcome, MergeOutcome::NotReady);
    assert_eq!(merge_count(&pool, parent).await, 0);

    force_completed(&pool, children[1], "one ").await;

    let outcome = store
        .try_create_merge(job, parent, TaskType::Transcribe, TaskType::MergeTranscriptions, 0, 3)
        .await
        .unwrap();
    let MergeOutcome::Created(merge_id) = outcome else {
        panic!("expected Created, got {:?}", outcome);
    };

    // Parts are ordered by sequence_order even though children were inserted
    // rotated.
    let merge = store.get_task(merge_id).await.unwrap().unwrap();
    assert_eq!(merge.task_type, TaskType::MergeTranscriptions);
    assert_eq!(merge.parent_task_id, Some(parent));
    assert_eq!(
        merge.input["parts"],
        serde_json::json!([
            { "text": "zero " },
            { "text": "one " },
            { "text": "two" },
        ])
    );
}

#[tokio::test]
async fn test_second_resolution_sees_already_exists() {
    let (store, pool) = setup_store().await;
    let (job, parent, children) = setup_fan_out(&store, 2).await;

    force_completed(&pool, children[0], "a").await;
    force_completed(&pool, children[1], "b").await;

    let first = store
        .try_create_merge(job, parent, TaskType::Transcribe, TaskType::MergeTranscriptions, 0, 3)
        .await
        .unwrap();
    assert!(matches!(first, MergeOutcome::Created(_)));

    let second = store
        .try_create_merge(job, parent, TaskType::Transcribe, TaskType::MergeTranscriptions, 0, 3)
        .await
        .unwrap();
    assert_eq!(second, MergeOutcome::AlreadyExists);
    assert_eq!(merge_count(&pool, parent).await, 1);
}

#[tokio::test]
async fn test_concurrent_resolutions_create_one_merge() {
    let (store, pool) = setup_store().await;
    let store = Arc::new(store);
    let (job, parent, children) = setup_fan_out(&store, 3).await;

    for (i, child) in children.iter().enumerate() {
        force_completed(&pool, *child, &format!("part-{}", i)).await;
    }

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store
                .try_create_merge(
                    job,
                    parent,
                    TaskType::Transcribe,
                    TaskType::MergeTranscriptions,
                    0,
                    3,
                )
                .await
                .unwrap()
        }));
    }

    let mut created = 0;
    let mut already = 0;
    for handle in handles {
        match handle.await.unwrap() {
            MergeOutcome::Created(_) => created += 1,
            MergeOutcome::AlreadyExists => already += 1,
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    assert_eq!(created, 1);
    assert_eq!(already, 7);
    assert_eq!(merge_count(&pool, parent).await, 1);
}

#[tokio::test]
async fn test_failed_sibling_blocks_the_merge_and_dooms_the_job() {
    let (store, pool) = setup_store().await;
    let (job, parent, children) = setup_fan_out(&store, 2).await;

    force_completed(&pool, children[0], "a").await;
    force_failed(&pool, children[1], "Max retries exceeded").await;

    let outcome = store
        .try_create_merge(job, parent, TaskType::Transcribe, TaskType::MergeTranscriptions, 0, 3)
        .await
        .unwrap();
    assert_eq!(outcome, MergeOutcome::SiblingFailed);
    assert_eq!(merge_count(&pool, parent).await, 0);

    // Once the remaining tasks drain, the rollup fails the whole job.
    sqlx::query("UPDATE scribe_tasks SET status = 'completed' WHERE job_id = ? AND status != 'failed'")
        .bind(job.0)
        .execute(&pool)
        .await
        .unwrap();

    assert_eq!(store.recompute_job_status(job).await.unwrap(), JobStatus::Failed);
    let job = store.get_job(job).await.unwrap().unwrap();
    assert_eq!(job.error.as_deref(), Some("Max retries exceeded"));
}
