//! Sentence-aware text splitting and the two merge handlers.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use super::{decode, encode, HandlerError, TaskHandler};
use crate::config::PipelineConfig;
use crate::model::TaskType;

/// Output of `merge_transcriptions`, input of `split_text`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergedTranscript {
    pub merged_text: String,
}

/// Output of `merge_proofreads`; becomes the job's final result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalTranscript {
    pub final_text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextChunk {
    pub text: String,
    pub index: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitTextOutput {
    pub chunks: Vec<TextChunk>,
}

/// Input of both merge handlers: the ordered outputs of their fan-out group.
#[derive(Debug, Clone, Deserialize)]
pub struct MergeParts {
    pub parts: Vec<Value>,
}

/// Split `text` into sentences. Each sentence is a contiguous substring, a
/// sentence keeps its trailing whitespace, and concatenating the result
/// reconstructs the input byte for byte.
pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut iter = text.char_indices().peekable();

    while let Some((i, c)) = iter.next() {
        if !matches!(c, '.' | '!' | '?') {
            continue;
        }

        // Absorb the rest of the terminator run ("...", "?!").
        let mut end = i + c.len_utf8();
        while let Some(&(j, d)) = iter.peek() {
            if matches!(d, '.' | '!' | '?') {
                end = j + d.len_utf8();
                iter.next();
            } else {
                break;
            }
        }

        // Only a boundary when whitespace follows; "3.5" stays whole.
        let mut saw_whitespace = false;
        while let Some(&(j, d)) = iter.peek() {
            if d.is_whitespace() {
                saw_whitespace = true;
                end = j + d.len_utf8();
                iter.next();
            } else {
                break;
            }
        }

        if saw_whitespace || iter.peek().is_none() {
            sentences.push(&text[start..end]);
            start = end;
        }
    }

    if start < text.len() {
        sentences.push(&text[start..]);
    }
    sentences
}

/// Greedily pack sentences into chunks of at most `max_chars` characters.
/// A single sentence longer than the bound becomes its own oversized chunk;
/// sentences are never cut.
pub fn pack_sentences(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_chars = 0;

    for sentence in split_sentences(text) {
        let sentence_chars = sentence.chars().count();
        if current_chars > 0 && current_chars + sentence_chars > max_chars {
            chunks.push(std::mem::take(&mut current));
            current_chars = 0;
        }
        current.push_str(sentence);
        current_chars += sentence_chars;
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Concatenate the `field` string of each ordered part, in order, with no
/// separator. Parts without the field contribute nothing.
fn concat_field(parts: &[Value], field: &str) -> String {
    let mut merged = String::new();
    for part in parts {
        if let Some(text) = part.get(field).and_then(Value::as_str) {
            merged.push_str(text);
        }
    }
    merged
}

/// Splits the merged transcript into proofreading chunks along sentence
/// boundaries.
pub struct SplitTextHandler {
    max_chunk_chars: usize,
}

impl SplitTextHandler {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            max_chunk_chars: config.max_chunk_chars.max(1),
        }
    }
}

#[async_trait]
impl TaskHandler for SplitTextHandler {
    fn task_type(&self) -> TaskType {
        TaskType::SplitText
    }

    async fn execute(&self, input: Value) -> Result<Value, HandlerError> {
        let transcript: MergedTranscript = decode(input)?;

        let mut chunks: Vec<TextChunk> = pack_sentences(&transcript.merged_text, self.max_chunk_chars)
            .into_iter()
            .enumerate()
            .map(|(index, text)| TextChunk { text, index })
            .collect();

        // An empty transcript still flows through one empty chunk; the
        // fan-in downstream always has a sibling group to wait on.
        if chunks.is_empty() {
            chunks.push(TextChunk {
                text: String::new(),
                index: 0,
            });
        }

        info!(chunks = chunks.len(), "split text into proofreading chunks");
        encode(&SplitTextOutput { chunks })
    }
}

/// Joins ordered transcription outputs into one transcript.
pub struct MergeTranscriptionsHandler;

#[async_trait]
impl TaskHandler for MergeTranscriptionsHandler {
    fn task_type(&self) -> TaskType {
        TaskType::MergeTranscriptions
    }

    async fn execute(&self, input: Value) -> Result<Value, HandlerError> {
        let parts: MergeParts = decode(input)?;
        let merged_text = concat_field(&parts.parts, "text");
        info!(parts = parts.parts.len(), chars = merged_text.len(), "merged transcriptions");
        encode(&MergedTranscript { merged_text })
    }
}

/// Joins ordered proofread outputs into the final document.
pub struct MergeProofreadsHandler;

#[async_trait]
impl TaskHandler for MergeProofreadsHandler {
    fn task_type(&self) -> TaskType {
        TaskType::MergeProofreads
    }

    async fn execute(&self, input: Value) -> Result<Value, HandlerError> {
        let parts: MergeParts = decode(input)?;
        let final_text = concat_field(&parts.parts, "text");
        info!(parts = parts.parts.len(), chars = final_text.len(), "merged proofread chunks");
        encode(&FinalTranscript { final_text })
    }
}
