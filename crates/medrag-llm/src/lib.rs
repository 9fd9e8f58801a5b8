pub mod providers;
pub mod retry;

use tracing::debug;

use medrag_core::config::ModelConfig;
use medrag_core::traits::TextGenerator;

pub use providers::openai::OpenAiClient;
pub use retry::complete_with_retry;

/// Create a text generator for the configured provider.
pub fn create_client(config: &ModelConfig) -> Box<dyn TextGenerator> {
    // Ollama, vLLM, Groq and most proxies speak the OpenAI protocol
    if config.provider != "openai" {
        debug!(provider = %config.provider, "Using OpenAI-compatible client");
    }
    Box::new(OpenAiClient::new(config.clone()))
}
