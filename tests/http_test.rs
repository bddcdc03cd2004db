//! Route-level tests against the router, no listener.

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::Router;
use scribeflow::{
    AppState, HandlerRegistry, LocalBlobStore, PipelineConfig, Proofreader, ProviderError,
    SqliteTaskStore, Transcriber, Transcription,
};
use serde_json::Value;
use sqlx::sqlite::SqlitePoolOptions;
use tower::ServiceExt;

const BOUNDARY: &str = "test-boundary-7d93b91c";

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

async fn setup() -> (Router, tempfile::TempDir) {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect(":memory:")
        .await
        .unwrap();
    let store = Arc::new(SqliteTaskStore::new(pool));
    store.run_migrations().await.unwrap();

    let dir = tempfile::tempdir().unwrap();
    let blob = Arc::new(LocalBlobStore::new(dir.path()));
    let config = PipelineConfig::default();
    let handlers = Arc::new(HandlerRegistry::standard(
        blob.clone(),
        Arc::new(EchoTranscriber),
        Arc::new(PassthroughProofreader),
        &config,
    ));
    let state = Arc::new(AppState::new(store, handlers, blob, config));
    (scribeflow::create_router(state), dir)
}

/// `(name, filename, content)` triples; a filename makes it a file part.
fn multipart_body(parts: &[(&str, Option<&str>, &[u8])]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, filename, content) in parts {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        match filename {
            Some(filename) => body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n\
                     Content-Type: application/octet-stream\r\n\r\n",
                    name, filename
                )
                .as_bytes(),
            ),
            None => body.extend_from_slice(
                format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name).as_bytes(),
            ),
        }
        body.extend_from_slice(content);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

fn upload_request(parts: &[(&str, Option<&str>, &[u8])]) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/upload")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(multipart_body(parts)))
        .unwrap()
}

fn post(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn json_body(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_upload_accepts_and_status_reports_pending() {
    let (app, _dir) = setup().await;

    let response = app
        .clone()
        .oneshot(upload_request(&[
            ("file", Some("standup.mp3"), b"pretend audio"),
            ("language", None, b"en"),
            ("context", None, b"weekly standup notes"),
        ]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = json_body(response).await;
    let job_id = body["job_id"].as_i64().unwrap();
    assert_eq!(body["status"], "accepted");
    assert!(body["task_id"].as_i64().is_some());

    let response = app
        .oneshot(get(&format!("/status/{}", job_id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "pending");
    assert_eq!(body["original_filename"], "standup.mp3");
    assert_eq!(body["progress"]["current_phase"], "save_file");
    assert!(body["progress"]["total_segments"].is_null());
    assert!(body["result"].is_null());
    assert!(body["completed_at"].is_null());
}

#[tokio::test]
async fn test_upload_without_a_file_is_rejected() {
    let (app, _dir) = setup().await;

    let response = app
        .oneshot(upload_request(&[("language", None, b"en")]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["error"], "missing file field");
}

#[tokio::test]
async fn test_upload_flattens_path_separators_in_filenames() {
    let (app, _dir) = setup().await;

    let response = app
        .clone()
        .oneshot(upload_request(&[(
            "file",
            Some("../../etc/passwd"),
            b"not audio",
        )]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = json_body(response).await;
    let job_id = body["job_id"].as_i64().unwrap();

    let response = app
        .oneshot(get(&format!("/status/{}", job_id)))
        .await
        .unwrap();
    let body = json_body(response).await;
    assert_eq!(body["original_filename"], ".._.._etc_passwd");
}

#[tokio::test]
async fn test_status_of_unknown_job_is_not_found() {
    let (app, _dir) = setup().await;

    let response = app.oneshot(get("/status/999")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = json_body(response).await;
    assert_eq!(body["error"], "job not found");
}

#[tokio::test]
async fn test_process_runs_one_task_per_call() {
    let (app, _dir) = setup().await;

    let response = app
        .clone()
        .oneshot(upload_request(&[("file", Some("talk.wav"), b"bytes")]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let response = app.clone().oneshot(post("/tasks/process")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["task_type"], "save_file");
    assert_eq!(body["created"].as_array().unwrap().len(), 1);

    let response = app.oneshot(post("/tasks/process")).await.unwrap();
    let body = json_body(response).await;
    assert_eq!(body["task_type"], "convert_audio");
}

#[tokio::test]
async fn test_process_reports_an_empty_queue() {
    let (app, _dir) = setup().await;

    let response = app.oneshot(post("/tasks/process")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["message"], "no pending tasks");
}

#[tokio::test]
async fn test_reap_reports_an_empty_sweep() {
    let (app, _dir) = setup().await;

    let response = app.oneshot(post("/tasks/reap")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["processed"], 0);
    assert_eq!(body["results"].as_array().unwrap().len(), 0);
}
