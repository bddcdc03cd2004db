//! HTTP surface: upload, trigger, status, reap.
//!
//! Every route is a thin shim over one engine call. Processing is driven by
//! whoever POSTs `/tasks/process`, which is what lets external cron replace a
//! resident worker.

use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde_json::{json, Value};
use tracing::{error, info};

use crate::blob::BlobStore;
use crate::config::PipelineConfig;
use crate::dispatcher::{DispatchError, DispatchOutcome, Dispatcher};
use crate::handlers::HandlerRegistry;
use crate::model::JobId;
use crate::reaper::Reaper;
use crate::store::{NewJob, TaskStore};

const MAX_UPLOAD_BYTES: usize = 250 * 1024 * 1024;

/// Shared state for the pipeline server.
pub struct AppState<S> {
    store: Arc<S>,
    dispatcher: Arc<Dispatcher<S>>,
    reaper: Arc<Reaper<S>>,
    blob: Arc<dyn BlobStore>,
    config: PipelineConfig,
}

impl<S: TaskStore> AppState<S> {
    pub fn new(
        store: Arc<S>,
        handlers: Arc<HandlerRegistry>,
        blob: Arc<dyn BlobStore>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            dispatcher: Arc::new(Dispatcher::new(store.clone(), handlers, config.clone())),
            reaper: Arc::new(Reaper::new(store.clone())),
            store,
            blob,
            config,
        }
    }

    /// For wiring a [`Poller`](crate::poller::Poller) next to the server.
    pub fn dispatcher(&self) -> Arc<Dispatcher<S>> {
        self.dispatcher.clone()
    }

    pub fn reaper(&self) -> Arc<Reaper<S>> {
        self.reaper.clone()
    }
}

/// Create the router for the pipeline server.
pub fn create_router<S: TaskStore + 'static>(state: Arc<AppState<S>>) -> Router {
    Router::new()
        .route("/upload", post(upload::<S>))
        .route("/tasks/process", post(process_task::<S>))
        .route("/tasks/reap", post(reap::<S>))
        .route("/status/:job_id", get(job_status::<S>))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
}

type ApiResponse = (StatusCode, Json<Value>);

fn error_body(message: impl Into<String>) -> Json<Value> {
    Json(json!({ "error": message.into() }))
}

/// Multipart filenames become a single blob key component.
fn sanitize_filename(raw: &str) -> String {
    let name: String = raw
        .chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect();
    if name.is_empty() {
        "upload.bin".to_string()
    } else {
        name
    }
}

async fn upload<S: TaskStore>(
    State(state): State<Arc<AppState<S>>>,
    mut multipart: Multipart,
) -> ApiResponse {
    let mut file: Option<(String, Vec<u8>)> = None;
    let mut language: Option<String> = None;
    let mut context: Option<String> = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                return (
                    StatusCode::BAD_REQUEST,
                    error_body(format!("malformed multipart body: {}", e)),
                )
            }
        };

        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "file" => {
                let filename = field
                    .file_name()
                    .map(sanitize_filename)
                    .unwrap_or_else(|| "upload.bin".to_string());
                match field.bytes().await {
                    Ok(bytes) => file = Some((filename, bytes.to_vec())),
                    Err(e) => {
                        return (
                            StatusCode::BAD_REQUEST,
                            error_body(format!("failed to read file field: {}", e)),
                        )
                    }
                }
            }
            "language" => match field.text().await {
                Ok(value) => language = Some(value),
                Err(e) => {
                    return (
                        StatusCode::BAD_REQUEST,
                        error_body(format!("failed to read language field: {}", e)),
                    )
                }
            },
            "context" => match field.text().await {
                Ok(value) => context = Some(value),
                Err(e) => {
                    return (
                        StatusCode::BAD_REQUEST,
                        error_body(format!("failed to read context field: {}", e)),
                    )
                }
            },
            _ => {}
        }
    }

    let Some((filename, bytes)) = file else {
        return (StatusCode::BAD_REQUEST, error_body("missing file field"));
    };

    let created = match state
        .store
        .create_job(NewJob {
            original_filename: filename,
            language,
            context,
            metadata: json!({ "size_bytes": bytes.len() }),
            max_retries: state.config.default_max_retries,
        })
        .await
    {
        Ok(created) => created,
        Err(e) => {
            error!(error = %e, "job creation failed");
            return (StatusCode::INTERNAL_SERVER_ERROR, error_body(e.to_string()));
        }
    };

    if let Err(e) = state.blob.put(&created.storage_path, &bytes).await {
        error!(job_id = %created.job_id, error = %e, "failed to store upload");
        return (StatusCode::INTERNAL_SERVER_ERROR, error_body(e.to_string()));
    }

    info!(job_id = %created.job_id, task_id = %created.task_id, size = bytes.len(),
        "upload accepted");
    (
        StatusCode::ACCEPTED,
        Json(json!({
            "job_id": created.job_id,
            "task_id": created.task_id,
            "status": "accepted",
        })),
    )
}

async fn process_task<S: TaskStore>(State(state): State<Arc<AppState<S>>>) -> ApiResponse {
    match state.dispatcher.dispatch_once().await {
        Ok(DispatchOutcome::Idle) => {
            (StatusCode::OK, Json(json!({ "message": "no pending tasks" })))
        }
        Ok(DispatchOutcome::Processed {
            task_id,
            task_type,
            job_id,
            output,
            created,
        }) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "task_id": task_id,
                "task_type": task_type,
                "job_id": job_id,
                "output": output,
                "created": created,
            })),
        ),
        Err(DispatchError::Handler {
            task_id,
            task_type,
            source,
        }) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "success": false,
                "task_id": task_id,
                "task_type": task_type,
                "error": source.to_string(),
            })),
        ),
        Err(e) => {
            error!(error = %e, "dispatch failed");
            (StatusCode::INTERNAL_SERVER_ERROR, error_body(e.to_string()))
        }
    }
}

async fn job_status<S: TaskStore>(
    State(state): State<Arc<AppState<S>>>,
    Path(job_id): Path<i64>,
) -> ApiResponse {
    let id = JobId(job_id);

    let job = match state.store.get_job(id).await {
        Ok(Some(job)) => job,
        Ok(None) => return (StatusCode::NOT_FOUND, error_body("job not found")),
        Err(e) => {
            error!(job_id, error = %e, "status lookup failed");
            return (StatusCode::INTERNAL_SERVER_ERROR, error_body(e.to_string()));
        }
    };

    let progress = match state.store.job_progress(id).await {
        Ok(progress) => progress,
        Err(e) => {
            error!(job_id, error = %e, "progress lookup failed");
            return (StatusCode::INTERNAL_SERVER_ERROR, error_body(e.to_string()));
        }
    };

    (
        StatusCode::OK,
        Json(json!({
            "job_id": job.id,
            "status": job.status,
            "original_filename": job.original_filename,
            "progress": progress,
            "result": job.final_result,
            "error": job.error,
            "created_at": job.created_at.to_rfc3339(),
            "completed_at": job.completed_at.map(|t| t.to_rfc3339()),
        })),
    )
}

async fn reap<S: TaskStore>(State(state): State<Arc<AppState<S>>>) -> Response {
    match state.reaper.reap_once().await {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(e) => {
            error!(error = %e, "reap sweep failed");
            (StatusCode::INTERNAL_SERVER_ERROR, error_body(e.to_string())).into_response()
        }
    }
}

/// Start the pipeline server.
pub async fn run_server<S: TaskStore + 'static>(
    state: Arc<AppState<S>>,
    port: u16,
) -> anyhow::Result<()> {
    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    info!(port, "pipeline server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
