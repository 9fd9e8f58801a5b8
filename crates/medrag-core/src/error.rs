use thiserror::Error;

/// Failure reported by an external capability (text generation, embeddings).
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProviderError {
    #[error("deadline of {secs}s exceeded")]
    Timeout { secs: u64 },

    #[error("rate limited or quota exhausted: {0}")]
    RateLimited(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("malformed response: {0}")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum RagError {
    // Caller errors
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // Graph node errors (capability failures after local retry)
    #[error("Query rewrite failed: {0}")]
    Rewrite(ProviderError),

    #[error("Retrieval failed: {0}")]
    Retrieval(String),

    #[error("Answer generation failed: {0}")]
    Generation(String),

    // Storage errors
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("Database error: {0}")]
    Database(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RagError {
    /// Graph step that produced this error, if it came from one.
    pub fn node(&self) -> Option<&'static str> {
        match self {
            RagError::Rewrite(_) => Some("rewrite"),
            RagError::Retrieval(_) => Some("retrieve"),
            RagError::Generation(_) => Some("generate"),
            RagError::Checkpoint(_) => Some("checkpoint"),
            _ => None,
        }
    }

    /// Short machine-readable kind, used in API error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            RagError::InvalidInput(_) => "invalid_input",
            RagError::Rewrite(_) => "rewrite_error",
            RagError::Retrieval(_) => "retrieval_error",
            RagError::Generation(_) => "generation_error",
            RagError::Checkpoint(_) => "checkpoint_error",
            RagError::Database(_) => "database_error",
            RagError::Config(_) | RagError::ConfigNotFound(_) => "config_error",
            RagError::Io(_) | RagError::Json(_) => "internal_error",
        }
    }

    /// True when the caller sent something unusable; never retried.
    pub fn is_client_error(&self) -> bool {
        matches!(self, RagError::InvalidInput(_))
    }

    /// True when an external capability failed after its retries.
    pub fn is_capability_failure(&self) -> bool {
        matches!(
            self,
            RagError::Rewrite(_) | RagError::Retrieval(_) | RagError::Generation(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, RagError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_tags() {
        let err = RagError::Rewrite(ProviderError::Timeout { secs: 5 });
        assert_eq!(err.node(), Some("rewrite"));
        assert_eq!(err.kind(), "rewrite_error");
        assert!(err.is_capability_failure());
        assert!(!err.is_client_error());

        assert_eq!(RagError::InvalidInput("empty".into()).node(), None);
        assert_eq!(RagError::Generation("x".into()).node(), Some("generate"));
    }

    #[test]
    fn test_display_carries_reason() {
        let err = RagError::Rewrite(ProviderError::RateLimited("429".into()));
        assert_eq!(
            err.to_string(),
            "Query rewrite failed: rate limited or quota exhausted: 429"
        );
    }

    #[test]
    fn test_client_error() {
        assert!(RagError::InvalidInput("empty query".into()).is_client_error());
        assert!(!RagError::Checkpoint("locked".into()).is_client_error());
    }
}
