use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use medrag_core::config::{FallbackConfig, RetryConfig};
use medrag_core::traits::TextGenerator;
use medrag_llm::complete_with_retry;

use super::generator::is_degenerate;
use crate::prompts::fallback_prompt;

/// Answers when no relevant context survived grading. Never fails.
pub struct Fallback {
    llm: Arc<dyn TextGenerator>,
    config: FallbackConfig,
    deadline: Duration,
}

impl Fallback {
    pub fn new(llm: Arc<dyn TextGenerator>, config: FallbackConfig, deadline: Duration) -> Self {
        Self {
            llm,
            config,
            deadline,
        }
    }

    pub async fn respond(&self, question: &str) -> String {
        if !self.config.attempt_generation {
            return self.config.message.clone();
        }

        let prompt = fallback_prompt(question);
        let once = RetryConfig::no_retry();
        match complete_with_retry(self.llm.as_ref(), &prompt, self.deadline, &once).await {
            Ok(reply) if !is_degenerate(&reply) => {
                debug!("Fallback reply generated");
                reply.trim().to_string()
            }
            Ok(_) => {
                warn!("Fallback generation was empty, using canned message");
                self.config.message.clone()
            }
            Err(e) => {
                warn!(error = %e, "Fallback generation failed, using canned message");
                self.config.message.clone()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use medrag_core::config::default_fallback_message;
    use medrag_core::error::ProviderError;
    use medrag_test_utils::{Reply, ScriptedGenerator};

    use crate::prompts::FALLBACK_HEADING;

    fn fallback(llm: Arc<ScriptedGenerator>, attempt_generation: bool) -> Fallback {
        Fallback::new(
            llm,
            FallbackConfig {
                message: default_fallback_message(),
                attempt_generation,
            },
            Duration::from_millis(200),
        )
    }

    #[tokio::test]
    async fn test_canned_message_by_default() {
        let llm = Arc::new(ScriptedGenerator::new());
        let reply = fallback(llm.clone(), false).respond("hello there").await;
        assert_eq!(reply, default_fallback_message());
        assert_eq!(llm.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_best_effort_generation() {
        let llm = Arc::new(ScriptedGenerator::new().on(
            FALLBACK_HEADING,
            Reply::text("No records mention that. Could you say which patient you mean?"),
        ));
        let reply = fallback(llm, true).respond("what about him").await;
        assert!(reply.starts_with("No records mention that."));
    }

    #[tokio::test]
    async fn test_generation_errors_are_swallowed() {
        for reply in [
            Reply::error(ProviderError::RateLimited("quota".into())),
            Reply::Stall,
            Reply::text("  "),
        ] {
            let llm = Arc::new(ScriptedGenerator::new().on(FALLBACK_HEADING, reply));
            let out = fallback(llm.clone(), true).respond("q").await;
            assert_eq!(out, default_fallback_message());
            assert_eq!(llm.total_calls(), 1);
        }
    }
}
