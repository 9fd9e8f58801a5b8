use futures::future::BoxFuture;

use crate::error::{ProviderError, Result};
use crate::types::{ConversationId, ConversationState, ScoredDocument};

/// Text generation: prompt in, text out.
///
/// Implementations are shared across conversations and must be safe to call
/// concurrently.
pub trait TextGenerator: Send + Sync + 'static {
    fn complete(&self, prompt: &str) -> BoxFuture<'_, std::result::Result<String, ProviderError>>;
}

/// Read-only similarity search over an externally built vector index.
pub trait VectorIndex: Send + Sync + 'static {
    /// Up to `k` documents, most similar first. Ties keep index insertion
    /// order. An empty result is not an error.
    fn search(&self, query: &str, k: usize) -> BoxFuture<'_, Result<Vec<ScoredDocument>>>;
}

/// Durable key-value storage for conversation checkpoints.
pub trait CheckpointStore: Send + Sync + 'static {
    /// Load the last saved state, or `None` for an unknown conversation.
    fn load(&self, id: &ConversationId) -> BoxFuture<'_, Result<Option<ConversationState>>>;

    /// Atomically overwrite the state stored under `id`.
    fn save(&self, id: &ConversationId, state: &ConversationState) -> BoxFuture<'_, Result<()>>;
}
