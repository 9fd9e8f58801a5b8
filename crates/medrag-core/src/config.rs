use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};

/// Top-level medrag configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub agent: AgentConfig,
    pub model: ModelConfig,
    #[serde(default)]
    pub embedding: Option<EmbeddingConfig>,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub grader: GraderConfig,
    #[serde(default)]
    pub fallback: FallbackConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub gateway: Option<GatewayConfig>,
}

/// Conversation memory settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Completed turns kept in the checkpoint (oldest evicted first).
    #[serde(default = "default_history_window")]
    pub history_window: usize,
    /// Prior turns included in rewrite and generation prompts.
    #[serde(default = "default_prompt_turns")]
    pub prompt_turns: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            history_window: default_history_window(),
            prompt_turns: default_prompt_turns(),
        }
    }
}

fn default_history_window() -> usize { 3 }
fn default_prompt_turns() -> usize { 3 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    pub model_id: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Deadline for a single completion call.
    #[serde(default = "default_model_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl ModelConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_provider() -> String { "openai".to_string() }
fn default_max_tokens() -> u32 { 1024 }
fn default_temperature() -> f32 { 0.0 }
fn default_model_timeout() -> u64 { 30 }

/// Retry configuration for capability calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

impl RetryConfig {
    /// A policy that makes exactly one attempt.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }
}

fn default_max_retries() -> u32 { 1 }
fn default_initial_backoff() -> u64 { 500 }
fn default_max_backoff() -> u64 { 8000 }

/// Embedding model used to vectorize queries against the index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Provider name: "openai", "ollama", or any OpenAI-compatible API.
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Model name (e.g., "text-embedding-3-small").
    #[serde(default = "default_embedding_model")]
    pub model: String,
    /// Base URL for the embedding API (e.g., "http://localhost:11434/v1").
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_embedding_dims")]
    pub dimensions: usize,
    /// Deadline for one embedding request.
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_embedding_model(),
            base_url: None,
            api_key: None,
            dimensions: default_embedding_dims(),
            timeout_secs: default_embedding_timeout(),
        }
    }
}

fn default_embedding_model() -> String { "text-embedding-3-small".to_string() }
fn default_embedding_dims() -> usize { 1536 }
fn default_embedding_timeout() -> u64 { 10 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Maximum documents requested per query.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Documents scoring below this are never returned.
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f32,
    #[serde(default = "default_retrieval_timeout")]
    pub timeout_secs: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            min_similarity: default_min_similarity(),
            timeout_secs: default_retrieval_timeout(),
        }
    }
}

impl RetrievalConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_top_k() -> usize { 4 }
fn default_min_similarity() -> f32 { 0.2 }
fn default_retrieval_timeout() -> u64 { 10 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraderConfig {
    /// Candidates scoring below this are dropped without an LLM call.
    #[serde(default = "default_relevance_floor")]
    pub relevance_floor: f32,
    /// Ask the model for a yes/no relevance verdict per candidate.
    #[serde(default = "default_llm_judge")]
    pub llm_judge: bool,
}

impl Default for GraderConfig {
    fn default() -> Self {
        Self {
            relevance_floor: default_relevance_floor(),
            llm_judge: default_llm_judge(),
        }
    }
}

fn default_relevance_floor() -> f32 { 0.5 }
fn default_llm_judge() -> bool { true }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackConfig {
    #[serde(default = "default_fallback_message")]
    pub message: String,
    /// Try one best-effort model call before using `message`.
    #[serde(default)]
    pub attempt_generation: bool,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            message: default_fallback_message(),
            attempt_generation: false,
        }
    }
}

pub fn default_fallback_message() -> String {
    "I'm sorry, I couldn't find any relevant information to answer your question. \
     Can you please provide more details."
        .to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_workspace")]
    pub workspace: String,
    /// Vector index database. Default: <workspace>/index.db
    #[serde(default)]
    pub index_path: Option<String>,
    /// Checkpoint database. Default: <workspace>/checkpoints.db
    #[serde(default)]
    pub checkpoint_path: Option<String>,
    /// Deadline for a checkpoint load or save.
    #[serde(default = "default_storage_timeout")]
    pub timeout_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            workspace: default_workspace(),
            index_path: None,
            checkpoint_path: None,
            timeout_secs: default_storage_timeout(),
        }
    }
}

impl StorageConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_workspace() -> String { "~/.medrag".to_string() }
fn default_storage_timeout() -> u64 { 5 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Bearer token required on every route except health.
    #[serde(default)]
    pub token: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            token: None,
        }
    }
}

fn default_bind() -> String { "127.0.0.1:18790".to_string() }

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| RagError::ConfigNotFound(path.display().to_string()))?;

        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(&content);

        let config: Self =
            toml::from_str(&expanded).map_err(|e| RagError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Minimal config for a given model, all other sections defaulted.
    pub fn for_model(model_id: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            agent: AgentConfig::default(),
            model: ModelConfig {
                provider: default_provider(),
                model_id: model_id.into(),
                api_key,
                base_url: None,
                max_tokens: default_max_tokens(),
                temperature: default_temperature(),
                timeout_secs: default_model_timeout(),
                retry: RetryConfig::default(),
            },
            embedding: None,
            retrieval: RetrievalConfig::default(),
            grader: GraderConfig::default(),
            fallback: FallbackConfig::default(),
            storage: StorageConfig::default(),
            gateway: None,
        }
    }

    /// Reject values the graph cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.retrieval.top_k == 0 {
            return Err(RagError::Config("retrieval.top_k must be positive".into()));
        }
        if self.agent.history_window == 0 {
            return Err(RagError::Config(
                "agent.history_window must be positive".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.grader.relevance_floor) {
            return Err(RagError::Config(
                "grader.relevance_floor must be within [0, 1]".into(),
            ));
        }
        if !(-1.0..=1.0).contains(&self.retrieval.min_similarity) {
            return Err(RagError::Config(
                "retrieval.min_similarity must be within [-1, 1]".into(),
            ));
        }
        if self.model.timeout_secs == 0
            || self.retrieval.timeout_secs == 0
            || self.storage.timeout_secs == 0
        {
            return Err(RagError::Config("timeouts must be positive".into()));
        }
        Ok(())
    }

    /// Resolve the workspace directory (expand ~).
    pub fn workspace_dir(&self) -> PathBuf {
        expand_home(&self.storage.workspace)
    }

    pub fn index_path(&self) -> PathBuf {
        self.storage
            .index_path
            .as_deref()
            .map(expand_home)
            .unwrap_or_else(|| self.workspace_dir().join("index.db"))
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        self.storage
            .checkpoint_path
            .as_deref()
            .map(expand_home)
            .unwrap_or_else(|| self.workspace_dir().join("checkpoints.db"))
    }
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs_home() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                // Unset variables stay as written
                Err(_) => result.push_str(&format!("${{{}}}", var_name)),
            }
        } else {
            result.push(c);
        }
    }
    result
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("TEST_MEDRAG_VAR", "hello");
        let result = expand_env_vars("key = \"${TEST_MEDRAG_VAR}\"");
        assert_eq!(result, "key = \"hello\"");
        std::env::remove_var("TEST_MEDRAG_VAR");
    }

    #[test]
    fn test_expand_env_vars_missing() {
        let result = expand_env_vars("key = \"${NONEXISTENT_MEDRAG_VAR}\"");
        assert_eq!(result, "key = \"${NONEXISTENT_MEDRAG_VAR}\"");
    }

    #[test]
    fn test_defaults_from_minimal_toml() {
        let toml_str = r#"
[model]
model_id = "gpt-4o-mini"
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.model.provider, "openai");
        assert_eq!(config.model.retry.max_retries, 1);
        assert_eq!(config.agent.history_window, 3);
        assert_eq!(config.retrieval.top_k, 4);
        assert!((config.grader.relevance_floor - 0.5).abs() < f32::EPSILON);
        assert!(config.grader.llm_judge);
        assert!(!config.fallback.attempt_generation);
        assert!(config.fallback.message.starts_with("I'm sorry"));
        assert!(config.gateway.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_top_k() {
        let mut config = AppConfig::for_model("m", None);
        config.retrieval.top_k = 0;
        assert!(matches!(config.validate(), Err(RagError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_floor_out_of_range() {
        let mut config = AppConfig::for_model("m", None);
        config.grader.relevance_floor = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_storage_paths() {
        let mut config = AppConfig::for_model("m", None);
        config.storage.workspace = "/tmp/medrag-ws".into();
        assert_eq!(config.index_path(), PathBuf::from("/tmp/medrag-ws/index.db"));
        assert_eq!(
            config.checkpoint_path(),
            PathBuf::from("/tmp/medrag-ws/checkpoints.db")
        );

        config.storage.checkpoint_path = Some("/var/lib/medrag/cp.db".into());
        assert_eq!(config.checkpoint_path(), PathBuf::from("/var/lib/medrag/cp.db"));
    }
}
