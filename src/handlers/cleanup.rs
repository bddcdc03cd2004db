//! Terminal cleanup handler.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use super::{decode, encode, HandlerError, TaskHandler};
use crate::blob::BlobStore;
use crate::model::TaskType;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupInput {
    /// Blob prefix to remove, normally `"{job_id}/"`.
    pub prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupOutput {
    pub deleted: usize,
}

/// Removes a job's working objects once its result is recorded.
pub struct CleanupHandler {
    blob: Arc<dyn BlobStore>,
}

impl CleanupHandler {
    pub fn new(blob: Arc<dyn BlobStore>) -> Self {
        Self { blob }
    }
}

#[async_trait]
impl TaskHandler for CleanupHandler {
    fn task_type(&self) -> TaskType {
        TaskType::Cleanup
    }

    async fn execute(&self, input: Value) -> Result<Value, HandlerError> {
        let req: CleanupInput = decode(input)?;
        let deleted = self.blob.delete_prefix(&req.prefix).await?;
        info!(prefix = %req.prefix, deleted, "removed job working files");
        encode(&CleanupOutput { deleted })
    }
}
