//! The poller drives a queued job to completion without external triggers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use scribeflow::{
    BlobStore, Dispatcher, HandlerRegistry, JobStatus, LocalBlobStore, NewJob, PipelineConfig,
    Poller, Proofreader, ProviderError, Reaper, SqliteTaskStore, TaskStore, Transcriber,
    Transcription,
};
use sqlx::sqlite::SqlitePoolOptions;

struct EchoTranscriber;

#[async_trait]
impl Transcriber for EchoTranscriber {
    async fn transcribe(
        &self,
        audio: &[u8],
        _language: Option<&str>,
    ) -> Result<Transcription, ProviderError> {
        Ok(Transcription {
            text: String::from_utf8_lossy(audio).into_owned(),
            language: None,
            segments: None,
        })
    }
}

struct PassthroughProofreader;

#[async_trait]
impl Proofreader for PassthroughProofreader {
    async fn proofread(
        &self,
        text: &str,
        _chunk_index: usize,
        _total_chunks: usize,
        _context: Option<&str>,
    ) -> Result<String, ProviderError> {
        Ok(text.to_string())
    }
}

#[tokio::test]
async fn test_poller_processes_a_job_in_the_background() {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect(":memory:")
        .await
        .unwrap();
    let store = Arc::new(SqliteTaskStore::new(pool));
    store.run_migrations().await.unwrap();

    let dir = tempfile::tempdir().unwrap();
    let blob = Arc::new(LocalBlobStore::new(dir.path()));

    let mut config = PipelineConfig::default();
    config.dispatch_interval = Duration::from_millis(50);

    let handlers = Arc::new(HandlerRegistry::standard(
        blob.clone(),
        Arc::new(EchoTranscriber),
        Arc::new(PassthroughProofreader),
        &config,
    ));
    let dispatcher = Arc::new(Dispatcher::new(store.clone(), handlers, config.clone()));
    let reaper = Arc::new(Reaper::new(store.clone()));
    let poller = Poller::new(dispatcher, reaper, &config);

    let created = store
        .create_job(NewJob {
            original_filename: "note.wav".to_string(),
            language: None,
            context: None,
            metadata: serde_json::json!({}),
            max_retries: 3,
        })
        .await
        .unwrap();
    blob.put(&created.storage_path, b"One note. Nothing more.")
        .await
        .unwrap();

    // Run poller in background
    let handle = tokio::spawn(async move { poller.run().await });

    // The whole chain drains within one tick; leave room for a few.
    tokio::time::sleep(Duration::from_millis(500)).await;

    let job = store.get_job(created.job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.final_result.as_deref(), Some("One note. Nothing more."));

    handle.abort();
}
