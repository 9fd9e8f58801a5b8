use std::sync::Arc;

use tracing::{debug, warn};

use medrag_core::config::ModelConfig;
use medrag_core::error::{RagError, Result};
use medrag_core::traits::TextGenerator;
use medrag_core::types::{ScoredDocument, Turn};
use medrag_llm::complete_with_retry;

use crate::prompts::{generate_prompt, simple_generate_prompt};

/// Writes the answer from the graded documents.
pub struct Generator {
    llm: Arc<dyn TextGenerator>,
    config: ModelConfig,
}

impl Generator {
    pub fn new(llm: Arc<dyn TextGenerator>, config: ModelConfig) -> Self {
        Self { llm, config }
    }

    /// Generate a grounded answer.
    ///
    /// Provider errors are retried per the model retry policy. A blank or
    /// punctuation-only answer gets one more try with a reduced prompt.
    pub async fn generate(
        &self,
        question: &str,
        docs: &[ScoredDocument],
        history: &[Turn],
    ) -> Result<String> {
        if docs.is_empty() {
            return Err(RagError::InvalidInput(
                "generation requires at least one graded document".into(),
            ));
        }

        let prompt = generate_prompt(question, docs, history);
        let answer = self.complete(&prompt).await?;
        if !is_degenerate(&answer) {
            debug!(docs = docs.len(), chars = answer.len(), "Answer generated");
            return Ok(answer.trim().to_string());
        }

        warn!(reply = %answer, "Degenerate answer, retrying with reduced prompt");
        let answer = self.complete(&simple_generate_prompt(question, docs)).await?;
        if is_degenerate(&answer) {
            return Err(RagError::Generation("model returned an empty answer".into()));
        }
        Ok(answer.trim().to_string())
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        complete_with_retry(self.llm.as_ref(), prompt, self.config.timeout(), &self.config.retry)
            .await
            .map_err(|e| RagError::Generation(e.to_string()))
    }
}

/// Blank, or nothing but punctuation and whitespace.
pub(crate) fn is_degenerate(text: &str) -> bool {
    !text.chars().any(char::is_alphanumeric)
}
