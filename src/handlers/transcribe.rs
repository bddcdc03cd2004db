//! Transcription fan-out child handler.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::{decode, encode, HandlerError, TaskHandler};
use crate::blob::BlobStore;
use crate::model::TaskType;
use crate::providers::Transcriber;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscribeInput {
    pub path: String,
    pub index: usize,
    #[serde(default)]
    pub duration_secs: f64,
    #[serde(default)]
    pub language: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscribeOutput {
    pub text: String,
    #[serde(default)]
    pub language: Option<String>,
    /// Provider timing segments, passed through opaquely.
    #[serde(default)]
    pub segments: Option<Value>,
}

/// Sends one audio segment to the speech-to-text provider.
pub struct TranscribeHandler {
    blob: Arc<dyn BlobStore>,
    transcriber: Arc<dyn Transcriber>,
}

impl TranscribeHandler {
    pub fn new(blob: Arc<dyn BlobStore>, transcriber: Arc<dyn Transcriber>) -> Self {
        Self { blob, transcriber }
    }
}

#[async_trait]
impl TaskHandler for TranscribeHandler {
    fn task_type(&self) -> TaskType {
        TaskType::Transcribe
    }

    async fn execute(&self, input: Value) -> Result<Value, HandlerError> {
        let req: TranscribeInput = decode(input)?;
        let bytes = self.blob.get(&req.path).await?;

        let result = self
            .transcriber
            .transcribe(&bytes, req.language.as_deref())
            .await?;

        debug!(segment = req.index, chars = result.text.len(), "transcribed segment");
        encode(&TranscribeOutput {
            text: result.text,
            language: result.language,
            segments: result.segments,
        })
    }
}
