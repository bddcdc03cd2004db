//! Per-stage task handlers.
//!
//! A handler is a pure input-to-output function over JSON payloads; it never
//! touches task rows. The dispatcher owns claiming, completion, and successor
//! creation, so a handler that dies mid-flight leaves nothing to undo.

pub mod audio;
pub mod cleanup;
pub mod proofread;
pub mod text;
pub mod transcribe;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::blob::{BlobError, BlobStore};
use crate::config::PipelineConfig;
use crate::model::TaskType;
use crate::providers::{Proofreader, ProviderError, Transcriber};

pub use audio::{ConvertAudioHandler, SaveFileHandler, SplitAudioHandler};
pub use cleanup::CleanupHandler;
pub use proofread::ProofreadHandler;
pub use text::{MergeProofreadsHandler, MergeTranscriptionsHandler, SplitTextHandler};
pub use transcribe::TranscribeHandler;

/// Error returned by a handler.
///
/// Any of these leaves the task locked; the reaper decides between retry and
/// permanent failure once the lease expires.
#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("invalid input payload: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Blob(#[from] BlobError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("handler failed: {0}")]
    Failed(String),
}

/// One pipeline stage's work.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// The task type this handler serves.
    fn task_type(&self) -> TaskType;

    /// Do the work for one task.
    async fn execute(&self, input: Value) -> Result<Value, HandlerError>;
}

/// Parse a handler input payload.
pub(crate) fn decode<T: DeserializeOwned>(input: Value) -> Result<T, HandlerError> {
    serde_json::from_value(input).map_err(|e| HandlerError::InvalidInput(e.to_string()))
}

/// Serialize a handler output payload.
pub(crate) fn encode<T: Serialize>(output: &T) -> Result<Value, HandlerError> {
    serde_json::to_value(output).map_err(|e| HandlerError::Failed(e.to_string()))
}

/// Maps task types to their handlers.
pub struct HandlerRegistry {
    handlers: HashMap<TaskType, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler, replacing any previous one for the same type.
    pub fn register(mut self, handler: impl TaskHandler + 'static) -> Self {
        self.handlers.insert(handler.task_type(), Arc::new(handler));
        self
    }

    pub fn get(&self, ty: TaskType) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(&ty).cloned()
    }

    /// The full pipeline wired to the given storage and providers.
    pub fn standard(
        blob: Arc<dyn BlobStore>,
        transcriber: Arc<dyn Transcriber>,
        proofreader: Arc<dyn Proofreader>,
        config: &PipelineConfig,
    ) -> Self {
        Self::new()
            .register(SaveFileHandler::new(blob.clone()))
            .register(ConvertAudioHandler::new(blob.clone()))
            .register(SplitAudioHandler::new(blob.clone(), config))
            .register(TranscribeHandler::new(blob.clone(), transcriber))
            .register(MergeTranscriptionsHandler)
            .register(SplitTextHandler::new(config))
            .register(ProofreadHandler::new(proofreader))
            .register(MergeProofreadsHandler)
            .register(CleanupHandler::new(blob))
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
