pub mod embeddings;
pub mod store;

pub use embeddings::{cosine_similarity, EmbeddingProvider, HttpEmbeddingProvider};
pub use store::SqliteVectorIndex;
