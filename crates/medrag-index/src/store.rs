use std::path::Path;
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use rusqlite::{params, Connection};
use tracing::debug;

use medrag_core::error::{RagError, Result};
use medrag_core::traits::VectorIndex;
use medrag_core::types::ScoredDocument;

use crate::embeddings::{cosine_similarity, decode_embedding, encode_embedding, EmbeddingProvider};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS documents (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        doc_id TEXT NOT NULL UNIQUE,
        content TEXT NOT NULL,
        embedding BLOB NOT NULL
    );";

/// SQLite-backed vector index.
///
/// Documents keep their insertion id, which is the tie-breaker when two
/// documents score the same against a query.
pub struct SqliteVectorIndex {
    conn: Mutex<Connection>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl SqliteVectorIndex {
    /// Open or create an index database at the given path.
    pub fn open(path: &Path, embedder: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                RagError::Database(format!("Failed to create index directory: {}", e))
            })?;
        }

        let conn = Connection::open(path).map_err(|e| RagError::Database(e.to_string()))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| RagError::Database(e.to_string()))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| RagError::Database(e.to_string()))?;

        debug!(path = %path.display(), "Vector index opened");
        Ok(Self {
            conn: Mutex::new(conn),
            embedder,
        })
    }

    /// Open an in-memory index (for testing).
    pub fn in_memory(embedder: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| RagError::Database(e.to_string()))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| RagError::Database(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
            embedder,
        })
    }

    /// Embed and store a document.
    pub async fn add_document(&self, doc_id: &str, text: &str) -> Result<()> {
        let mut vectors = self
            .embedder
            .embed(&[text.to_string()])
            .await
            .map_err(|e| RagError::Database(e.to_string()))?;
        let embedding = vectors
            .pop()
            .ok_or_else(|| RagError::Database("Embedding provider returned nothing".into()))?;
        self.add_embedded(doc_id, text, &embedding)
    }

    /// Store a document with a precomputed embedding.
    pub fn add_embedded(&self, doc_id: &str, text: &str, embedding: &[f32]) -> Result<()> {
        let conn = self.conn.lock().map_err(|e| RagError::Database(e.to_string()))?;
        conn.execute(
            "INSERT INTO documents (doc_id, content, embedding) VALUES (?1, ?2, ?3)",
            params![doc_id, text, encode_embedding(embedding)],
        )
        .map_err(|e| RagError::Database(e.to_string()))?;
        Ok(())
    }

    /// Number of stored documents.
    pub fn len(&self) -> Result<usize> {
        let conn = self.conn.lock().map_err(|e| RagError::Database(e.to_string()))?;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))
            .map_err(|e| RagError::Database(e.to_string()))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Rank every stored document against `query_vec`.
    fn rank(&self, query_vec: &[f32], limit: usize) -> Result<Vec<ScoredDocument>> {
        let conn = self.conn.lock().map_err(|e| RagError::Database(e.to_string()))?;
        let mut stmt = conn
            .prepare("SELECT doc_id, content, embedding FROM documents ORDER BY id ASC")
            .map_err(|e| RagError::Database(e.to_string()))?;

        let rows = stmt
            .query_map([], |row| {
                let doc_id: String = row.get(0)?;
                let content: String = row.get(1)?;
                let blob: Vec<u8> = row.get(2)?;
                Ok((doc_id, content, blob))
            })
            .map_err(|e| RagError::Database(e.to_string()))?;

        let mut scored = Vec::new();
        for row in rows {
            let (doc_id, content, blob) = row.map_err(|e| RagError::Database(e.to_string()))?;
            let sim = cosine_similarity(query_vec, &decode_embedding(&blob));
            scored.push(ScoredDocument::new(doc_id, content, sim));
        }

        // Stable sort: equal scores stay in insertion order
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(limit);
        Ok(scored)
    }
}

impl VectorIndex for SqliteVectorIndex {
    fn search(&self, query: &str, k: usize) -> BoxFuture<'_, Result<Vec<ScoredDocument>>> {
        let query = query.to_string();
        Box::pin(async move {
            let mut vectors = self
                .embedder
                .embed(&[query])
                .await
                .map_err(|e| RagError::Retrieval(e.to_string()))?;
            let query_vec = vectors
                .pop()
                .ok_or_else(|| RagError::Retrieval("Embedding provider returned nothing".into()))?;

            let results = self.rank(&query_vec, k)?;
            debug!(k, found = results.len(), "Vector search complete");
            Ok(results)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use medrag_core::error::ProviderError;
    use std::collections::HashMap;

    /// Embeds known strings to fixed vectors; anything else fails.
    struct LookupEmbedder {
        table: HashMap<String, Vec<f32>>,
    }

    impl LookupEmbedder {
        fn new(entries: &[(&str, [f32; 2])]) -> Arc<Self> {
            Arc::new(Self {
                table: entries
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_vec()))
                    .collect(),
            })
        }
    }

    impl EmbeddingProvider for LookupEmbedder {
        fn embed(
            &self,
            texts: &[String],
        ) -> BoxFuture<'_, std::result::Result<Vec<Vec<f32>>, ProviderError>> {
            let out: std::result::Result<Vec<Vec<f32>>, ProviderError> = texts
                .iter()
                .map(|t| {
                    self.table
                        .get(t)
                        .cloned()
                        .ok_or_else(|| ProviderError::Request(format!("no embedding for {}", t)))
                })
                .collect();
            Box::pin(async move { out })
        }

        fn dimensions(&self) -> usize {
            2
        }
    }

    fn sample_index() -> SqliteVectorIndex {
        let embedder = LookupEmbedder::new(&[
            ("prescription", [1.0, 0.0]),
            ("Metformin 500mg twice daily", [1.0, 0.1]),
        ]);
        let index = SqliteVectorIndex::in_memory(embedder).unwrap();
        index.add_embedded("far", "Blood pressure 120/80", &[0.0, 1.0]).unwrap();
        index.add_embedded("near", "Metformin prescribed", &[1.0, 0.05]).unwrap();
        index.add_embedded("mid", "Follow-up in 2 weeks", &[1.0, 1.0]).unwrap();
        index
    }

    #[tokio::test]
    async fn test_search_orders_by_similarity() {
        let index = sample_index();
        let results = index.search("prescription", 10).await.unwrap();
        let ids: Vec<&str> = results.iter().map(|d| d.doc_id.as_str()).collect();
        assert_eq!(ids, vec!["near", "mid", "far"]);
        assert!(results[0].score > results[1].score);
    }

    #[tokio::test]
    async fn test_search_respects_k() {
        let index = sample_index();
        let results = index.search("prescription", 2).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].doc_id, "near");
    }

    #[tokio::test]
    async fn test_ties_keep_insertion_order() {
        let embedder = LookupEmbedder::new(&[("q", [1.0, 0.0])]);
        let index = SqliteVectorIndex::in_memory(embedder).unwrap();
        index.add_embedded("first", "a", &[1.0, 0.0]).unwrap();
        index.add_embedded("second", "b", &[2.0, 0.0]).unwrap();
        index.add_embedded("third", "c", &[3.0, 0.0]).unwrap();

        let results = index.search("q", 3).await.unwrap();
        let ids: Vec<&str> = results.iter().map(|d| d.doc_id.as_str()).collect();
        assert_eq!(ids, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_empty_index_returns_empty() {
        let embedder = LookupEmbedder::new(&[("q", [1.0, 0.0])]);
        let index = SqliteVectorIndex::in_memory(embedder).unwrap();
        assert!(index.is_empty().unwrap());
        assert!(index.search("q", 4).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_embedding_failure_is_retrieval_error() {
        let index = sample_index();
        let err = index.search("unknown query", 4).await.unwrap_err();
        assert!(matches!(err, RagError::Retrieval(_)));
    }

    #[tokio::test]
    async fn test_add_document_embeds_text() {
        let index = sample_index();
        index
            .add_document("rx-2", "Metformin 500mg twice daily")
            .await
            .unwrap();
        assert_eq!(index.len().unwrap(), 4);
    }

    #[test]
    fn test_duplicate_doc_id_rejected() {
        let index = sample_index();
        let err = index.add_embedded("near", "dup", &[0.0, 0.0]).unwrap_err();
        assert!(matches!(err, RagError::Database(_)));
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("index.db");
        let embedder = LookupEmbedder::new(&[("q", [0.0, 1.0])]);

        {
            let index = SqliteVectorIndex::open(&path, embedder.clone()).unwrap();
            index.add_embedded("d1", "kept", &[0.0, 1.0]).unwrap();
        }

        let index = SqliteVectorIndex::open(&path, embedder).unwrap();
        let results = index.search("q", 1).await.unwrap();
        assert_eq!(results[0].doc_id, "d1");
        assert_eq!(results[0].text, "kept");
    }
}
