//! Basic usage example for the scribeflow pipeline.
//!
//! This example demonstrates:
//! - Wiring the SQLite task store, blob store, and handler registry
//! - Standing in for the external providers with local fakes
//! - Driving the queue one claim at a time, the way the trigger endpoint does
//! - Recovering a crashed attempt through the lease reaper
//! - Reading back job progress and the final document

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use scribeflow::{
    BlobStore, DispatchOutcome, Dispatcher, HandlerRegistry, LocalBlobStore, NewJob,
    PipelineConfig, Proofreader, ProviderError, Reaper, SqliteTaskStore, TaskStore, Transcriber,
    Transcription,
};
use sqlx::sqlite::SqlitePoolOptions;

/// Reads the "audio" bytes back as text, so the example needs no real
/// speech-to-text service.
struct EchoTranscriber;

#[async_trait]
impl Transcriber for EchoTranscriber {
    async fn transcribe(
        &self,
        audio: &[u8],
        language: Option<&str>,
    ) -> Result<Transcription, ProviderError> {
        println!("[transcribe] {} bytes (language {:?})", audio.len(), language);
        Ok(Transcription {
            text: String::from_utf8_lossy(audio).into_owned(),
            language: language.map(str::to_string),
            segments: None,
        })
    }
}

/// Upper-cases each chunk, so the proofreading pass is visible in the output.
struct ShoutingProofreader;

#[async_trait]
impl Proofreader for ShoutingProofreader {
    async fn proofread(
        &self,
        text: &str,
        chunk_index: usize,
        total_chunks: usize,
        _context: Option<&str>,
    ) -> Result<String, ProviderError> {
        println!("[proofread] chunk {} of {}", chunk_index + 1, total_chunks);
        Ok(text.to_uppercase())
    }
}

/// Claim and run tasks until the queue is empty, like a cron-driven worker
/// POSTing `/tasks/process` in a loop.
async fn drive(dispatcher: &Dispatcher<SqliteTaskStore>) -> anyhow::Result<usize> {
    let mut processed = 0;
    loop {
        match dispatcher.dispatch_once().await? {
            DispatchOutcome::Processed {
                task_type, created, ..
            } => {
                processed += 1;
                println!("[dispatch] {} done, created {} follow-up task(s)", task_type, created.len());
            }
            DispatchOutcome::Idle => return Ok(processed),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    println!("=== Scribeflow - Basic Example ===\n");

    // One connection keeps every query on the same in-memory database.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect(":memory:")
        .await?;
    let store = Arc::new(SqliteTaskStore::new(pool));
    store.run_migrations().await?;

    let dir = tempfile::tempdir()?;
    let blob = Arc::new(LocalBlobStore::new(dir.path()));

    // Tiny bounds so even a one-line recording fans out, and a one-second
    // lease so Example 2 does not have to wait ten minutes for the reaper.
    let config = PipelineConfig::default()
        .with_lease(Duration::from_secs(1))
        .with_segmenting(24, 0)
        .with_max_chunk_chars(32);

    let handlers = Arc::new(HandlerRegistry::standard(
        blob.clone(),
        Arc::new(EchoTranscriber),
        Arc::new(ShoutingProofreader),
        &config,
    ));
    let dispatcher = Dispatcher::new(store.clone(), handlers, config.clone());
    let reaper = Reaper::new(store.clone());

    // --- Example 1: a recording flows through the whole pipeline ---
    println!("--- Example 1: upload to final document ---");

    // Normally the upload endpoint does this; here we enqueue by hand.
    let created = store
        .create_job(NewJob {
            original_filename: "standup.wav".to_string(),
            language: Some("en".to_string()),
            context: Some("daily standup notes".to_string()),
            metadata: serde_json::json!({}),
            max_retries: config.default_max_retries,
        })
        .await?;
    blob.put(
        &created.storage_path,
        b"We shipped the importer. Reviews are up next. Nothing is blocked.",
    )
    .await?;
    println!("created job {} with first task {}\n", created.job_id, created.task_id);

    let processed = drive(&dispatcher).await?;

    let job = store
        .get_job(created.job_id)
        .await?
        .context("job vanished")?;
    let progress = store
        .job_progress(created.job_id)
        .await?
        .context("job vanished")?;

    println!("\n{} tasks processed, job status: {}", processed, job.status.as_str());
    println!(
        "segments: {:?}, transcriptions: {}, proofreads: {}",
        progress.total_segments, progress.completed_transcriptions, progress.completed_proofreads
    );
    println!("final document:\n  {}\n", job.final_result.as_deref().unwrap_or(""));

    // --- Example 2: a crashed attempt is retried after its lease expires ---
    println!("--- Example 2: lease expiry and retry ---");

    // The upload bytes never arrive, so the first attempt fails and the
    // task keeps its lease; nothing else may touch it until that expires.
    let broken = store
        .create_job(NewJob {
            original_filename: "dropped-call.wav".to_string(),
            language: None,
            context: None,
            metadata: serde_json::json!({}),
            max_retries: config.default_max_retries,
        })
        .await?;
    match dispatcher.dispatch_once().await {
        Ok(_) => println!("[dispatch] unexpected success"),
        Err(e) => println!("[dispatch] first attempt failed: {}", e),
    }

    println!("waiting out the lease...");
    tokio::time::sleep(Duration::from_secs(2)).await;

    let report = reaper.reap_once().await?;
    for settled in &report.results {
        println!(
            "[reaper] {} task {} -> {:?} (retry {})",
            settled.task_type, settled.task_id, settled.action, settled.retry_count
        );
    }

    // The missing bytes turn up, and the retried task runs clean.
    blob.put(&broken.storage_path, b"Short update. All clear.").await?;
    drive(&dispatcher).await?;

    let job = store.get_job(broken.job_id).await?.context("job vanished")?;
    println!("\njob status after retry: {}", job.status.as_str());
    println!("final document:\n  {}\n", job.final_result.as_deref().unwrap_or(""));

    println!("=== Example complete ===");
    Ok(())
}
