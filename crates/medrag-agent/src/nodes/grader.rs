use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use medrag_core::config::{GraderConfig, RetryConfig};
use medrag_core::traits::TextGenerator;
use medrag_core::types::{RouteDecision, ScoredDocument};
use medrag_llm::complete_with_retry;

use crate::prompts::{extract_json, grade_prompt};

/// Documents kept by the grader and the route they imply.
#[derive(Debug, Clone, PartialEq)]
pub struct Grading {
    pub graded: Vec<ScoredDocument>,
    pub decision: RouteDecision,
}

impl Grading {
    fn from_kept(graded: Vec<ScoredDocument>) -> Self {
        let decision = if graded.is_empty() {
            RouteDecision::Fallback
        } else {
            RouteDecision::Continue
        };
        Self { graded, decision }
    }
}

/// Two-level relevance grader.
///
/// Level 0 drops candidates scoring under `relevance_floor` without any
/// external call. Level 1, when `llm_judge` is set, asks the model for a
/// yes/no verdict on each survivor. A verdict that fails or cannot be read
/// counts as "not relevant". Grading never fails the turn.
pub struct Grader {
    llm: Arc<dyn TextGenerator>,
    config: GraderConfig,
    deadline: Duration,
}

impl Grader {
    pub fn new(llm: Arc<dyn TextGenerator>, config: GraderConfig, deadline: Duration) -> Self {
        Self {
            llm,
            config,
            deadline,
        }
    }

    pub async fn grade(&self, question: &str, docs: &[ScoredDocument]) -> Grading {
        let candidates: Vec<&ScoredDocument> = docs
            .iter()
            .filter(|d| d.score >= self.config.relevance_floor)
            .collect();

        if !self.config.llm_judge || candidates.is_empty() {
            let grading = Grading::from_kept(candidates.into_iter().cloned().collect());
            debug!(
                retrieved = docs.len(),
                graded = grading.graded.len(),
                decision = grading.decision.as_str(),
                "Documents graded by score"
            );
            return grading;
        }

        let mut kept = Vec::with_capacity(candidates.len());
        let mut failures = 0usize;
        for doc in &candidates {
            match self.judge(question, doc).await {
                Some(true) => kept.push((*doc).clone()),
                Some(false) => {}
                None => failures += 1,
            }
        }

        if failures == candidates.len() {
            warn!(
                candidates = candidates.len(),
                "Every relevance judgment failed, falling back"
            );
        } else if failures > 0 {
            warn!(failures, "Some relevance judgments failed, documents dropped");
        }

        let grading = Grading::from_kept(kept);
        debug!(
            retrieved = docs.len(),
            candidates = candidates.len(),
            graded = grading.graded.len(),
            decision = grading.decision.as_str(),
            "Documents graded"
        );
        grading
    }

    /// One yes/no verdict. `None` when the call fails or the reply is unreadable.
    async fn judge(&self, question: &str, doc: &ScoredDocument) -> Option<bool> {
        let prompt = grade_prompt(question, &doc.text);
        let once = RetryConfig::no_retry();
        match complete_with_retry(self.llm.as_ref(), &prompt, self.deadline, &once).await {
            Ok(reply) => {
                let verdict = parse_verdict(&reply);
                if verdict.is_none() {
                    warn!(doc_id = %doc.doc_id, reply = %reply, "Unreadable relevance verdict");
                }
                verdict
            }
            Err(e) => {
                warn!(doc_id = %doc.doc_id, error = %e, "Relevance judgment failed");
                None
            }
        }
    }
}

#[derive(Deserialize)]
struct VerdictResponse {
    score: String,
}

/// Accepts a bare "yes"/"no" (any case, quoted or punctuated) or a JSON
/// object `{"score": "yes"}`.
fn parse_verdict(reply: &str) -> Option<bool> {
    if let Some(v) = yes_no(reply) {
        return Some(v);
    }
    serde_json::from_str::<VerdictResponse>(extract_json(reply))
        .ok()
        .and_then(|r| yes_no(&r.score))
}

fn yes_no(text: &str) -> Option<bool> {
    let word = text
        .trim()
        .trim_matches(|c: char| !c.is_alphanumeric())
        .to_lowercase();
    match word.as_str() {
        "yes" => Some(true),
        "no" => Some(false),
        _ => None,
    }
}
