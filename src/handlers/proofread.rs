//! Proofreading fan-out child handler.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::{decode, encode, HandlerError, TaskHandler};
use crate::model::TaskType;
use crate::providers::Proofreader;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProofreadInput {
    pub text: String,
    pub index: usize,
    pub total: usize,
    #[serde(default)]
    pub context: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProofreadOutput {
    pub text: String,
}

/// Sends one text chunk to the proofreading provider.
pub struct ProofreadHandler {
    proofreader: Arc<dyn Proofreader>,
}

impl ProofreadHandler {
    pub fn new(proofreader: Arc<dyn Proofreader>) -> Self {
        Self { proofreader }
    }
}

#[async_trait]
impl TaskHandler for ProofreadHandler {
    fn task_type(&self) -> TaskType {
        TaskType::Proofread
    }

    async fn execute(&self, input: Value) -> Result<Value, HandlerError> {
        let req: ProofreadInput = decode(input)?;

        let text = self
            .proofreader
            .proofread(&req.text, req.index, req.total, req.context.as_deref())
            .await?;

        debug!(chunk = req.index, of = req.total, "proofread chunk");
        encode(&ProofreadOutput { text })
    }
}
