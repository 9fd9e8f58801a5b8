use futures::future::BoxFuture;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use medrag_core::config::ModelConfig;
use medrag_core::error::ProviderError;
use medrag_core::traits::TextGenerator;

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// OpenAI-compatible client. Works with OpenAI, Ollama, vLLM, Groq, OpenRouter, etc.
pub struct OpenAiClient {
    http: Client,
    config: ModelConfig,
}

impl OpenAiClient {
    pub fn new(config: ModelConfig) -> Self {
        let http = Client::builder()
            .timeout(config.timeout())
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Failed to build HTTP client with timeout, using defaults");
                Client::new()
            });
        Self { http, config }
    }

    fn endpoint(&self) -> String {
        match self.config.base_url.as_deref() {
            Some(base) if base.ends_with("/chat/completions") => base.to_string(),
            Some(base) => format!("{}/chat/completions", base.trim_end_matches('/')),
            None => OPENAI_API_URL.to_string(),
        }
    }

    fn request_body<'a>(&'a self, prompt: &'a str) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.config.model_id,
            messages: vec![OaiMessage {
                role: "user",
                content: prompt,
            }],
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            stream: false,
        }
    }
}

// Request types
#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<OaiMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Serialize)]
struct OaiMessage<'a> {
    role: &'a str,
    content: &'a str,
}

// Response types
#[derive(Deserialize, Debug)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize, Debug)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize, Debug)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Map an HTTP failure status to a provider error.
pub(crate) fn classify_status(status: StatusCode, body: &str) -> ProviderError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited(body.to_string()),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
            ProviderError::Request(format!("HTTP {}: upstream timeout", status))
        }
        _ => ProviderError::Request(format!("HTTP {}: {}", status, body)),
    }
}

/// Pull the first choice's text out of a completion response body.
pub(crate) fn parse_completion(body: &str) -> Result<String, ProviderError> {
    let parsed: ChatResponse =
        serde_json::from_str(body).map_err(|e| ProviderError::Malformed(e.to_string()))?;
    let choice = parsed
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::Malformed("response has no choices".into()))?;
    Ok(choice.message.content.unwrap_or_default())
}

impl TextGenerator for OpenAiClient {
    fn complete(&self, prompt: &str) -> BoxFuture<'_, Result<String, ProviderError>> {
        let prompt = prompt.to_string();

        Box::pin(async move {
            let body = self.request_body(&prompt);
            let mut req = self.http.post(self.endpoint()).json(&body);
            if let Some(api_key) = &self.config.api_key {
                req = req.bearer_auth(api_key);
            }

            let response = req.send().await.map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout {
                        secs: self.config.timeout_secs,
                    }
                } else {
                    ProviderError::Request(e.to_string())
                }
            })?;

            let status = response.status();
            let text = response
                .text()
                .await
                .map_err(|e| ProviderError::Malformed(e.to_string()))?;

            if !status.is_success() {
                return Err(classify_status(status, &text));
            }

            let content = parse_completion(&text)?;
            debug!(
                model = %self.config.model_id,
                chars = content.len(),
                "Completion received"
            );
            Ok(content)
        })
    }
}
