use std::time::Duration;

use tracing::warn;

use medrag_core::config::RetryConfig;
use medrag_core::error::ProviderError;
use medrag_core::traits::TextGenerator;

fn calculate_backoff(attempt: u32, config: &RetryConfig) -> Duration {
    let ms = config
        .initial_backoff_ms
        .saturating_mul(2u64.saturating_pow(attempt))
        .min(config.max_backoff_ms);
    // Add jitter: 0.8x to 1.2x
    let jitter = 0.8 + rand::random::<f64>() * 0.4;
    Duration::from_millis((ms as f64 * jitter) as u64)
}

/// Run one completion under `deadline`, retrying provider errors up to
/// `retry.max_retries` times with exponential backoff.
///
/// An elapsed deadline is reported as [`ProviderError::Timeout`] and retried
/// like any other provider error. The last error is returned once the
/// attempts are exhausted.
pub async fn complete_with_retry(
    llm: &dyn TextGenerator,
    prompt: &str,
    deadline: Duration,
    retry: &RetryConfig,
) -> Result<String, ProviderError> {
    let max_retries = retry.max_retries;
    let mut attempt = 0;

    loop {
        let outcome = match tokio::time::timeout(deadline, llm.complete(prompt)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout {
                secs: deadline.as_secs(),
            }),
        };

        match outcome {
            Ok(text) => return Ok(text),
            Err(e) if attempt < max_retries => {
                let backoff = calculate_backoff(attempt, retry);
                warn!(
                    attempt = attempt + 1,
                    max_retries,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "Retrying completion"
                );
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use medrag_test_utils::{Reply, ScriptedGenerator};

    fn fast_retry(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
        }
    }

    #[test]
    fn test_backoff_is_capped() {
        let config = RetryConfig {
            max_retries: 10,
            initial_backoff_ms: 1000,
            max_backoff_ms: 4000,
        };
        let first = calculate_backoff(0, &config);
        assert!(first >= Duration::from_millis(800) && first <= Duration::from_millis(1200));
        let late = calculate_backoff(8, &config);
        assert!(late <= Duration::from_millis(4800));
    }

    #[tokio::test]
    async fn test_succeeds_first_try() {
        let llm = ScriptedGenerator::new().fallback_reply(Reply::text("ok"));
        let out = complete_with_retry(&llm, "hi", Duration::from_secs(1), &fast_retry(1))
            .await
            .unwrap();
        assert_eq!(out, "ok");
        assert_eq!(llm.total_calls(), 1);
    }

    #[tokio::test]
    async fn test_retries_once_then_succeeds() {
        let llm = ScriptedGenerator::new().fallback_sequence(vec![
            Reply::error(ProviderError::RateLimited("429".into())),
            Reply::text("recovered"),
        ]);
        let out = complete_with_retry(&llm, "hi", Duration::from_secs(1), &fast_retry(1))
            .await
            .unwrap();
        assert_eq!(out, "recovered");
        assert_eq!(llm.total_calls(), 2);
    }

    #[tokio::test]
    async fn test_gives_up_after_retries() {
        let llm = ScriptedGenerator::new()
            .fallback_reply(Reply::error(ProviderError::Request("connection reset".into())));
        let err = complete_with_retry(&llm, "hi", Duration::from_secs(1), &fast_retry(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Request(_)));
        assert_eq!(llm.total_calls(), 2);
    }

    #[tokio::test]
    async fn test_deadline_counts_as_provider_error() {
        let llm = ScriptedGenerator::new().fallback_reply(Reply::Stall);
        let err = complete_with_retry(&llm, "hi", Duration::from_millis(20), &fast_retry(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Timeout { .. }));
        assert_eq!(llm.total_calls(), 2);
    }

    #[tokio::test]
    async fn test_no_retry_policy() {
        let llm = ScriptedGenerator::new()
            .fallback_reply(Reply::error(ProviderError::Malformed("bad json".into())));
        let err = complete_with_retry(&llm, "hi", Duration::from_secs(1), &RetryConfig::no_retry())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Malformed(_)));
        assert_eq!(llm.total_calls(), 1);
    }
}
