//! Audio-side handlers: save, convert, split.

use std::ops::Range;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use super::{decode, encode, HandlerError, TaskHandler};
use crate::blob::BlobStore;
use crate::config::PipelineConfig;
use crate::model::TaskType;

/// Payload carried by `save_file` and `convert_audio`: a blob key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredFile {
    pub storage_path: String,
}

/// One audio segment produced by `split_audio`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioSegment {
    pub path: String,
    pub index: usize,
    pub duration_secs: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitAudioOutput {
    pub segments: Vec<AudioSegment>,
}

/// Leading `{job_id}` component of a blob key.
fn key_prefix(path: &str) -> &str {
    path.split('/').next().unwrap_or("")
}

fn extension(path: &str) -> String {
    std::path::Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("bin")
        .to_ascii_lowercase()
}

/// Confirms the uploaded source object is readable and passes its key on.
///
/// The upload endpoint already wrote the bytes; this stage exists so a lost
/// or truncated upload fails the job at the very first task instead of deep
/// inside transcription.
pub struct SaveFileHandler {
    blob: Arc<dyn BlobStore>,
}

impl SaveFileHandler {
    pub fn new(blob: Arc<dyn BlobStore>) -> Self {
        Self { blob }
    }
}

#[async_trait]
impl TaskHandler for SaveFileHandler {
    fn task_type(&self) -> TaskType {
        TaskType::SaveFile
    }

    async fn execute(&self, input: Value) -> Result<Value, HandlerError> {
        let file: StoredFile = decode(input)?;
        let bytes = self.blob.get(&file.storage_path).await?;
        debug!(path = %file.storage_path, size = bytes.len(), "source object present");
        encode(&file)
    }
}

/// Re-homes the source bytes under the stable `converted/` key that every
/// later stage reads from. Transcoding is left to the transcription provider.
pub struct ConvertAudioHandler {
    blob: Arc<dyn BlobStore>,
}

impl ConvertAudioHandler {
    pub fn new(blob: Arc<dyn BlobStore>) -> Self {
        Self { blob }
    }
}

#[async_trait]
impl TaskHandler for ConvertAudioHandler {
    fn task_type(&self) -> TaskType {
        TaskType::ConvertAudio
    }

    async fn execute(&self, input: Value) -> Result<Value, HandlerError> {
        let file: StoredFile = decode(input)?;
        let bytes = self.blob.get(&file.storage_path).await?;

        let converted = format!(
            "{}/converted/audio.{}",
            key_prefix(&file.storage_path),
            extension(&file.storage_path)
        );
        self.blob.put(&converted, &bytes).await?;

        debug!(from = %file.storage_path, to = %converted, "staged converted audio");
        encode(&StoredFile {
            storage_path: converted,
        })
    }
}

/// Splits the converted audio into bounded segments for parallel
/// transcription.
pub struct SplitAudioHandler {
    blob: Arc<dyn BlobStore>,
    max_segment_bytes: usize,
    overlap_bytes: usize,
    estimated_bytes_per_sec: usize,
}

impl SplitAudioHandler {
    pub fn new(blob: Arc<dyn BlobStore>, config: &PipelineConfig) -> Self {
        Self {
            blob,
            max_segment_bytes: config.max_segment_bytes.max(1),
            overlap_bytes: config.overlap_bytes,
            estimated_bytes_per_sec: config.estimated_bytes_per_sec.max(1),
        }
    }
}

#[async_trait]
impl TaskHandler for SplitAudioHandler {
    fn task_type(&self) -> TaskType {
        TaskType::SplitAudio
    }

    async fn execute(&self, input: Value) -> Result<Value, HandlerError> {
        let file: StoredFile = decode(input)?;
        let bytes = self.blob.get(&file.storage_path).await?;

        let prefix = key_prefix(&file.storage_path).to_string();
        let ext = extension(&file.storage_path);

        let windows = split_windows(bytes.len(), self.max_segment_bytes, self.overlap_bytes);
        let mut segments = Vec::with_capacity(windows.len());
        for (index, window) in windows.into_iter().enumerate() {
            let path = format!("{}/segments/{:04}.{}", prefix, index, ext);
            let duration_secs = window.len() as f64 / self.estimated_bytes_per_sec as f64;
            self.blob.put(&path, &bytes[window]).await?;
            segments.push(AudioSegment {
                path,
                index,
                duration_secs,
            });
        }

        info!(source = %file.storage_path, segments = segments.len(), "split audio into segments");
        encode(&SplitAudioOutput { segments })
    }
}

/// Byte windows covering `len`, each at most `max` long, with consecutive
/// windows overlapping by `overlap` so a word straddling a cut appears in
/// both segments. An empty input still yields one empty window; the fan-out
/// downstream always has at least one child.
fn split_windows(len: usize, max: usize, overlap: usize) -> Vec<Range<usize>> {
    let max = max.max(1);
    let step = max.saturating_sub(overlap).max(1);

    let mut windows = Vec::new();
    let mut start = 0;
    loop {
        let end = (start + max).min(len);
        windows.push(start..end);
        if end >= len {
            break;
        }
        start += step;
    }
    windows
}
