use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, warn};

use medrag_core::config::ModelConfig;
use medrag_core::error::{RagError, Result};
use medrag_core::traits::TextGenerator;
use medrag_core::types::{QueryKind, Turn};
use medrag_llm::complete_with_retry;

use crate::prompts::{extract_json, rewrite_prompt};

/// Output of the rewrite step.
#[derive(Debug, Clone, PartialEq)]
pub struct Rewrite {
    pub query: String,
    pub kind: QueryKind,
}

#[derive(Deserialize)]
struct RewriteResponse {
    #[serde(default)]
    rephrased_question: String,
    #[serde(default)]
    tool_flag: bool,
}

/// Turns the raw utterance into a self-contained query, using prior turns to
/// resolve references.
pub struct Rewriter {
    llm: Arc<dyn TextGenerator>,
    config: ModelConfig,
}

impl Rewriter {
    pub fn new(llm: Arc<dyn TextGenerator>, config: ModelConfig) -> Self {
        Self { llm, config }
    }

    pub async fn rewrite(&self, raw_query: &str, history: &[Turn]) -> Result<Rewrite> {
        let raw = raw_query.trim();
        if raw.is_empty() {
            return Err(RagError::InvalidInput("query is empty".into()));
        }

        let prompt = rewrite_prompt(raw, history);
        let deadline = self.config.timeout();
        let response = complete_with_retry(self.llm.as_ref(), &prompt, deadline, &self.config.retry)
            .await
            .map_err(RagError::Rewrite)?;

        let rewrite = parse_rewrite(&response, raw);
        debug!(rewritten = %rewrite.query, kind = ?rewrite.kind, "Query rewritten");
        Ok(rewrite)
    }
}

/// Read the model's JSON reply. Non-JSON text is taken as the query itself;
/// an empty result falls back to the raw query.
fn parse_rewrite(response: &str, raw_query: &str) -> Rewrite {
    let (query, kind) = match serde_json::from_str::<RewriteResponse>(extract_json(response)) {
        Ok(parsed) => {
            let kind = if parsed.tool_flag {
                QueryKind::Analytical
            } else {
                QueryKind::Lookup
            };
            (parsed.rephrased_question.trim().to_string(), kind)
        }
        Err(e) => {
            warn!(error = %e, "Rewrite reply was not JSON, using it verbatim");
            (response.trim().to_string(), QueryKind::Lookup)
        }
    };

    if query.is_empty() {
        Rewrite {
            query: raw_query.to_string(),
            kind,
        }
    } else {
        Rewrite { query, kind }
    }
}
