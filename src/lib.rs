//! # Scribeflow
//!
//! A persistent task queue that turns one audio upload into a transcribed,
//! proofread document.
//!
//! The pipeline is a fixed DAG of typed tasks over a single SQLite table:
//!
//! ```text
//! save_file -> convert_audio -> split_audio -> transcribe (xN)
//!     -> merge_transcriptions -> split_text -> proofread (xN)
//!     -> merge_proofreads -> cleanup
//! ```
//!
//! - **One table, no broker** - tasks are rows; every racy state transition
//!   is a conditional update guarded on the expected current status
//! - **Lease-based claims** - a claim locks a task for a fixed lease; a
//!   reaper retries or fails whatever outlives it, so worker crashes need no
//!   detection beyond the clock
//! - **Fan-out / fan-in** - splitting creates N children and the last
//!   sibling to finish creates the merge task, exactly once
//! - **Driven from outside** - each `/tasks/process` call executes at most
//!   one task, so external cron is a valid worker pool
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use scribeflow::{
//!     AppState, HandlerRegistry, LocalBlobStore, PipelineConfig, SqliteTaskStore,
//! };
//!
//! let pool = sqlx::SqlitePool::connect("sqlite:scribeflow.db").await?;
//! let store = Arc::new(SqliteTaskStore::new(pool));
//! store.run_migrations().await?;
//!
//! let blob = Arc::new(LocalBlobStore::new("./data"));
//! let config = PipelineConfig::default();
//! let handlers = Arc::new(HandlerRegistry::standard(
//!     blob.clone(),
//!     transcriber, // your speech-to-text provider
//!     proofreader, // your LLM proofreader
//!     &config,
//! ));
//!
//! let state = Arc::new(AppState::new(store, handlers, blob, config));
//! scribeflow::run_server(state, 8080).await?;
//! ```
//!
//! Processing is pull-based: nothing runs until something POSTs
//! `/tasks/process`, or an in-process [`Poller`] is started.

pub mod blob;
pub mod config;
pub mod dispatcher;
pub mod flow;
pub mod handlers;
pub mod http;
pub mod model;
pub mod poller;
pub mod providers;
pub mod reaper;
pub mod store;

pub use blob::{BlobError, BlobStore, LocalBlobStore};
pub use config::PipelineConfig;
pub use dispatcher::{DispatchError, DispatchOutcome, Dispatcher};
pub use handlers::{HandlerError, HandlerRegistry, TaskHandler};
pub use http::{create_router, run_server, AppState};
pub use model::{Job, JobId, JobStatus, Task, TaskId, TaskStatus, TaskType};
pub use poller::Poller;
pub use providers::{Proofreader, ProviderError, Transcriber, Transcription};
pub use reaper::{ReapAction, ReapReport, ReapedTask, Reaper};
pub use store::{
    CreatedJob, JobProgress, MergeOutcome, NewJob, NewTask, SqliteTaskStore, StoreError, TaskStore,
};
