//! External provider interfaces.
//!
//! The speech-to-text and proofreading services are collaborators, not part
//! of this crate; callers supply implementations when wiring the pipeline.
//! Tests use in-crate fakes.

use async_trait::async_trait;
use thiserror::Error;

/// Error returned by a provider call.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// The provider could not be reached or timed out.
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    /// The provider rejected the request.
    #[error("provider rejected request: {0}")]
    Rejected(String),

    /// Anything else.
    #[error("provider error: {0}")]
    Other(#[from] anyhow::Error),
}

/// Result of transcribing one audio segment.
#[derive(Debug, Clone)]
pub struct Transcription {
    pub text: String,
    /// Language detected or confirmed by the provider.
    pub language: Option<String>,
    /// Provider-specific timing segments, passed through opaquely.
    pub segments: Option<serde_json::Value>,
}

/// Speech-to-text provider.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(
        &self,
        audio: &[u8],
        language: Option<&str>,
    ) -> Result<Transcription, ProviderError>;
}

/// LLM proofreading provider.
///
/// Receives one chunk, its position within the document, and optional domain
/// context from the upload.
#[async_trait]
pub trait Proofreader: Send + Sync {
    async fn proofread(
        &self,
        text: &str,
        chunk_index: usize,
        total_chunks: usize,
        context: Option<&str>,
    ) -> Result<String, ProviderError>;
}
