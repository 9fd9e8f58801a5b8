use std::sync::Arc;

use tracing::debug;

use medrag_core::config::RetrievalConfig;
use medrag_core::error::{RagError, Result};
use medrag_core::traits::VectorIndex;
use medrag_core::types::ScoredDocument;

/// Similarity search over the vector index, bounded by a deadline.
pub struct Retriever {
    index: Arc<dyn VectorIndex>,
    config: RetrievalConfig,
}

impl Retriever {
    pub fn new(index: Arc<dyn VectorIndex>, config: RetrievalConfig) -> Self {
        Self { index, config }
    }

    /// Up to `k` documents, most similar first. Documents under
    /// `min_similarity` are dropped; equal scores keep index order.
    pub async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<ScoredDocument>> {
        if query.trim().is_empty() {
            return Err(RagError::InvalidInput("retrieval query is empty".into()));
        }
        if k == 0 {
            return Err(RagError::InvalidInput("k must be positive".into()));
        }

        let deadline = self.config.timeout();
        let mut docs = match tokio::time::timeout(deadline, self.index.search(query, k)).await {
            Ok(Ok(docs)) => docs,
            Ok(Err(RagError::Retrieval(msg))) => return Err(RagError::Retrieval(msg)),
            Ok(Err(e)) => return Err(RagError::Retrieval(e.to_string())),
            Err(_) => {
                return Err(RagError::Retrieval(format!(
                    "deadline of {}s exceeded",
                    deadline.as_secs()
                )))
            }
        };

        let found = docs.len();
        docs.retain(|d| d.score >= self.config.min_similarity);
        docs.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        docs.truncate(k);

        debug!(k, found, kept = docs.len(), "Documents retrieved");
        Ok(docs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use medrag_test_utils::FixedIndex;

    fn config() -> RetrievalConfig {
        RetrievalConfig {
            top_k: 4,
            min_similarity: 0.2,
            timeout_secs: 1,
        }
    }

    #[tokio::test]
    async fn test_orders_and_filters() {
        let index = Arc::new(FixedIndex::from_scores(&[
            ("a", "low", 0.1),
            ("b", "mid", 0.5),
            ("c", "high", 0.9),
            ("d", "mid too", 0.5),
        ]));
        let retriever = Retriever::new(index, config());

        let docs = retriever.retrieve("query", 4).await.unwrap();
        let ids: Vec<&str> = docs.iter().map(|d| d.doc_id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b", "d"]);
    }

    #[tokio::test]
    async fn test_truncates_to_k() {
        let index = Arc::new(FixedIndex::from_scores(&[
            ("a", "x", 0.9),
            ("b", "y", 0.8),
            ("c", "z", 0.7),
        ]));
        let docs = Retriever::new(index, config()).retrieve("q", 2).await.unwrap();
        assert_eq!(docs.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_result_is_not_an_error() {
        let index = Arc::new(FixedIndex::new(vec![]));
        let docs = Retriever::new(index, config()).retrieve("q", 4).await.unwrap();
        assert!(docs.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_arguments() {
        let index = Arc::new(FixedIndex::new(vec![]));
        let retriever = Retriever::new(index.clone(), config());

        let err = retriever.retrieve("  ", 4).await.unwrap_err();
        assert!(matches!(err, RagError::InvalidInput(_)));
        let err = retriever.retrieve("q", 0).await.unwrap_err();
        assert!(matches!(err, RagError::InvalidInput(_)));
        assert_eq!(index.calls(), 0);
    }

    #[tokio::test]
    async fn test_unavailable_index_is_retrieval_error() {
        let index = Arc::new(FixedIndex::from_scores(&[("a", "x", 0.9)]));
        index.set_unavailable(true);
        let err = Retriever::new(index, config()).retrieve("q", 4).await.unwrap_err();
        assert!(matches!(err, RagError::Retrieval(_)));
        assert_eq!(err.node(), Some("retrieve"));
    }

    #[tokio::test]
    async fn test_deadline_is_retrieval_error() {
        let index = Arc::new(FixedIndex::from_scores(&[("a", "x", 0.9)]));
        index.set_delay(std::time::Duration::from_secs(5));
        let err = Retriever::new(index, config()).retrieve("q", 4).await.unwrap_err();
        assert!(matches!(err, RagError::Retrieval(msg) if msg.contains("deadline")));
    }
}
