use std::time::Duration;

use chunkwise_core::{ChunkwiseError, LlmConfig};
use serde::{Deserialize, Serialize};

/// A message in a chat conversation.
///
/// # Examples
///
/// ```
/// use chunkwise_rag::llm::{ChatMessage, Role};
///
/// let msg = ChatMessage::user("Where is the config loaded?");
/// assert_eq!(msg.role, Role::User);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Role in the chat conversation.
///
/// # Examples
///
/// ```
/// use chunkwise_rag::llm::Role;
///
/// assert_eq!(serde_json::to_string(&Role::System).unwrap(), "\"system\"");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

/// Client for OpenAI-compatible `/v1/chat/completions` endpoints.
///
/// Ollama serves the same route, so one client covers both providers.
///
/// # Examples
///
/// ```
/// use chunkwise_core::LlmConfig;
/// use chunkwise_rag::llm::LlmClient;
///
/// let client = LlmClient::new(&LlmConfig::default()).unwrap();
/// assert_eq!(client.model(), "llama3.2");
/// assert_eq!(client.base_url(), "http://localhost:11434");
/// ```
pub struct LlmClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl std::fmt::Debug for LlmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmClient")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl LlmClient {
    /// Create a client from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ChunkwiseError::AnswerService`] if the HTTP client cannot be built.
    pub fn new(config: &LlmConfig) -> Result<Self, ChunkwiseError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ChunkwiseError::AnswerService(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.resolved_base_url(),
            model: config.model.clone(),
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
        })
    }

    /// Use `model` instead of the configured one.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Send a chat completion request and return the reply text.
    ///
    /// # Errors
    ///
    /// Returns [`ChunkwiseError::AnswerService`] on transport errors,
    /// non-success statuses and unexpected response bodies.
    pub async fn chat(&self, messages: &[ChatMessage]) -> Result<String, ChunkwiseError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": 0.1,
            "stream": false,
        });

        let mut request = self.client.post(&url);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request
            .json(&body)
            .send()
            .await
            .map_err(|e| ChunkwiseError::AnswerService(format!("request to {url} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(ChunkwiseError::AnswerService(format!(
                "chat API error {status}: {body_text}"
            )));
        }

        let response_body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ChunkwiseError::AnswerService(format!("failed to parse response: {e}")))?;

        let content = response_body
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .ok_or_else(|| {
                ChunkwiseError::AnswerService(format!(
                    "unexpected response structure: {response_body}"
                ))
            })?;

        tracing::debug!(model = %self.model, chars = content.len(), "chat completion received");
        Ok(content.to_string())
    }
}
