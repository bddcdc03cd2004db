//! Lease expiry: retry while the budget lasts, fail once it is spent.

use std::sync::Arc;
use std::time::Duration;

use scribeflow::{
    JobStatus, NewJob, ReapAction, Reaper, SqliteTaskStore, TaskStatus, TaskStore,
};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

const LEASE: Duration = Duration::from_secs(600);

async fn setup() -> (Arc<SqliteTaskStore>, SqlitePool, Reaper<SqliteTaskStore>) {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect(":memory:")
        .await
        .unwrap();
    let store = Arc::new(SqliteTaskStore::new(pool.clone()));
    store.run_migrations().await.unwrap();
    let reaper = Reaper::new(store.clone());
    (store, pool, reaper)
}

async fn create_claimed_task(store: &SqliteTaskStore, max_retries: i64) -> scribeflow::Task {
    store
        .create_job(NewJob {
            original_filename: "a.mp3".to_string(),
            language: None,
            context: None,
            metadata: serde_json::json!({}),
            max_retries,
        })
        .await
        .unwrap();
    store.claim_next("doomed-worker", LEASE).await.unwrap().unwrap()
}

async fn expire_lease(pool: &SqlitePool, task_id: i64) {
    sqlx::query("UPDATE scribe_tasks SET locked_until = datetime('now', '-5 minutes') WHERE id = ?")
        .bind(task_id)
        .execute(pool)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_live_lease_is_left_alone() {
    let (store, _pool, reaper) = setup().await;
    let task = create_claimed_task(&store, 3).await;

    let report = reaper.reap_once().await.unwrap();
    assert_eq!(report.processed, 0);
    assert!(report.results.is_empty());

    let task = store.get_task(task.id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Locked);
}

#[tokio::test]
async fn test_expired_lease_resets_for_retry() {
    let (store, pool, reaper) = setup().await;
    let task = create_claimed_task(&store, 3).await;
    expire_lease(&pool, task.id.0).await;

    let report = reaper.reap_once().await.unwrap();
    assert_eq!(report.processed, 1);
    assert_eq!(report.results[0].action, ReapAction::ResetForRetry);
    assert_eq!(report.results[0].retry_count, 1);

    let task = store.get_task(task.id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.retry_count, 1);
    assert!(task.locked_by.is_none());
    assert!(task.locked_until.is_none());
    assert!(task.error.is_none());
}

#[tokio::test]
async fn test_reset_task_is_claimable_again() {
    let (store, pool, reaper) = setup().await;
    let task = create_claimed_task(&store, 3).await;
    expire_lease(&pool, task.id.0).await;
    reaper.reap_once().await.unwrap();

    let retried = store.claim_next("second-worker", LEASE).await.unwrap().unwrap();
    assert_eq!(retried.id, task.id);
    assert_eq!(retried.retry_count, 1);
    assert_eq!(retried.locked_by.as_deref(), Some("second-worker"));
}

#[tokio::test]
async fn test_exhausted_budget_fails_task_and_job() {
    let (store, pool, reaper) = setup().await;
    let task = create_claimed_task(&store, 2).await;

    // Two earlier retries already burned the budget.
    sqlx::query("UPDATE scribe_tasks SET retry_count = 2 WHERE id = ?")
        .bind(task.id.0)
        .execute(&pool)
        .await
        .unwrap();
    expire_lease(&pool, task.id.0).await;

    let report = reaper.reap_once().await.unwrap();
    assert_eq!(report.processed, 1);
    assert_eq!(report.results[0].action, ReapAction::MarkedFailed);

    let task = store.get_task(task.id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.error.as_deref(), Some("Max retries exceeded"));

    // The reaper also rolls the job up.
    let job = store.get_job(task.job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error.as_deref(), Some("Max retries exceeded"));
}

#[tokio::test]
async fn test_final_retry_is_granted_then_budget_is_spent() {
    let (store, pool, reaper) = setup().await;
    let task = create_claimed_task(&store, 3).await;

    // One attempt left in the budget when this lease runs out.
    sqlx::query("UPDATE scribe_tasks SET retry_count = 2 WHERE id = ?")
        .bind(task.id.0)
        .execute(&pool)
        .await
        .unwrap();
    expire_lease(&pool, task.id.0).await;

    let report = reaper.reap_once().await.unwrap();
    assert_eq!(report.results[0].action, ReapAction::ResetForRetry);
    assert_eq!(report.results[0].retry_count, 3);

    let task = store.get_task(task.id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Pending);

    // The granted retry stalls as well. Now the count meets the cap.
    store.claim_next("last-chance", LEASE).await.unwrap().unwrap();
    expire_lease(&pool, task.id.0).await;

    let report = reaper.reap_once().await.unwrap();
    assert_eq!(report.results[0].action, ReapAction::MarkedFailed);

    let task = store.get_task(task.id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.retry_count, 3);
}

#[tokio::test]
async fn test_sweep_settles_each_task_once() {
    let (store, pool, reaper) = setup().await;
    let task = create_claimed_task(&store, 3).await;
    expire_lease(&pool, task.id.0).await;

    assert_eq!(reaper.reap_once().await.unwrap().processed, 1);
    // The lease is gone; a second sweep has nothing to do.
    assert_eq!(reaper.reap_once().await.unwrap().processed, 0);
}
