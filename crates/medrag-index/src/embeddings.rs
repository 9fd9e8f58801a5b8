use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use medrag_core::config::EmbeddingConfig;
use medrag_core::error::ProviderError;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Turns text into vectors for similarity search.
pub trait EmbeddingProvider: Send + Sync + 'static {
    /// One vector per input text, in input order.
    fn embed(&self, texts: &[String]) -> BoxFuture<'_, Result<Vec<Vec<f32>>, ProviderError>>;

    fn dimensions(&self) -> usize;
}

/// Client for any OpenAI-compatible `/embeddings` endpoint (OpenAI, Ollama,
/// vLLM, ...).
pub struct HttpEmbeddingProvider {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    dims: usize,
    timeout_secs: u64,
}

impl HttpEmbeddingProvider {
    pub fn from_config(config: &EmbeddingConfig) -> Self {
        let base = config.base_url.as_deref().unwrap_or(OPENAI_BASE_URL);
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Failed to build embedding client with timeout, using defaults");
                reqwest::Client::new()
            });
        Self {
            http,
            endpoint: format!("{}/embeddings", base.trim_end_matches('/')),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            dims: config.dimensions,
            timeout_secs: config.timeout_secs,
        }
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

/// Decode a response body into vectors ordered like the request.
fn parse_embeddings(
    body: &str,
    expected: usize,
    dims: usize,
) -> Result<Vec<Vec<f32>>, ProviderError> {
    let mut parsed: EmbeddingResponse =
        serde_json::from_str(body).map_err(|e| ProviderError::Malformed(e.to_string()))?;

    if parsed.data.len() != expected {
        return Err(ProviderError::Malformed(format!(
            "expected {} embeddings, got {}",
            expected,
            parsed.data.len()
        )));
    }
    parsed.data.sort_by_key(|item| item.index);

    if let Some(bad) = parsed.data.iter().find(|item| item.embedding.len() != dims) {
        return Err(ProviderError::Malformed(format!(
            "embedding has {} dimensions, configured for {}",
            bad.embedding.len(),
            dims
        )));
    }
    Ok(parsed.data.into_iter().map(|item| item.embedding).collect())
}

impl EmbeddingProvider for HttpEmbeddingProvider {
    fn embed(&self, texts: &[String]) -> BoxFuture<'_, Result<Vec<Vec<f32>>, ProviderError>> {
        let texts = texts.to_vec();
        Box::pin(async move {
            let mut req = self.http.post(&self.endpoint).json(&EmbeddingRequest {
                model: &self.model,
                input: &texts,
            });
            if let Some(key) = &self.api_key {
                req = req.bearer_auth(key);
            }

            let resp = req.send().await.map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout {
                        secs: self.timeout_secs,
                    }
                } else {
                    ProviderError::Request(e.to_string())
                }
            })?;

            let status = resp.status();
            let body = resp
                .text()
                .await
                .map_err(|e| ProviderError::Malformed(e.to_string()))?;
            if status == StatusCode::TOO_MANY_REQUESTS {
                return Err(ProviderError::RateLimited(body));
            }
            if !status.is_success() {
                return Err(ProviderError::Request(format!("HTTP {}: {}", status, body)));
            }

            let vectors = parse_embeddings(&body, texts.len(), self.dims)?;
            debug!(model = %self.model, count = vectors.len(), "Embeddings received");
            Ok(vectors)
        })
    }

    fn dimensions(&self) -> usize {
        self.dims
    }
}

/// Cosine similarity in [-1, 1]. Mismatched, empty or zero vectors score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm = |v: &[f32]| v.iter().map(|x| x * x).sum::<f32>().sqrt();
    let denom = norm(a) * norm(b);
    if denom == 0.0 {
        0.0
    } else {
        dot / denom
    }
}

/// Little-endian f32 bytes, the BLOB layout of the `documents` table.
pub(crate) fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

pub(crate) fn decode_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}
