//! Client for the embedding service.
//!
//! Two wire formats are supported: Ollama's native `/api/embed` and the
//! OpenAI-compatible `/v1/embeddings`. Texts are sent in batches; the number
//! of requests in flight is bounded by a semaphore shared by every caller of
//! one client, so concurrent indexing workers cannot flood the service.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chunkwise_core::{ChunkwiseError, EmbeddingConfig};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use crate::retry::{self, AttemptError};

const PROBE_TEXT: &str = "fn probe() {}";
const HEALTH_TIMEOUT_SECS: u64 = 2;
const PULL_TIMEOUT_SECS: u64 = 1800;

/// Wire format spoken by the embedding endpoint.
///
/// # Examples
///
/// ```
/// use chunkwise_index::embedding::Provider;
///
/// let provider: Provider = "OpenAI".parse().unwrap();
/// assert_eq!(provider, Provider::OpenAi);
/// assert!("cohere".parse::<Provider>().is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    /// `POST /api/embed` returning `{embeddings}`.
    Ollama,
    /// `POST /v1/embeddings` returning `{data: [{embedding}]}`.
    OpenAi,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Ollama => "ollama",
            Provider::OpenAi => "openai",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = ChunkwiseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ollama" => Ok(Provider::Ollama),
            "openai" => Ok(Provider::OpenAi),
            other => Err(ChunkwiseError::Config(format!(
                "unknown embedding provider '{other}' (expected 'ollama' or 'openai')"
            ))),
        }
    }
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Deserialize)]
struct OpenAiEmbedResponse {
    data: Vec<EmbedDataItem>,
}

#[derive(Deserialize)]
struct EmbedDataItem {
    embedding: Vec<f32>,
    #[serde(default)]
    index: Option<usize>,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Deserialize)]
struct ModelTag {
    name: String,
}

#[derive(Serialize)]
struct PullRequest<'a> {
    model: &'a str,
    stream: bool,
}

/// Per-text results of [`EmbeddingClient::embed_batch`], in input order.
#[derive(Debug, Default)]
pub struct EmbedOutcome {
    results: Vec<Result<Vec<f32>, ChunkwiseError>>,
}

impl EmbedOutcome {
    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Number of texts that got a vector.
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.is_ok()).count()
    }

    /// Number of texts that were skipped.
    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }

    pub fn into_results(self) -> Vec<Result<Vec<f32>, ChunkwiseError>> {
        self.results
    }
}

/// Embedding service client.
///
/// # Examples
///
/// ```
/// use chunkwise_core::EmbeddingConfig;
/// use chunkwise_index::embedding::{EmbeddingClient, Provider};
///
/// let client = EmbeddingClient::with_config(&EmbeddingConfig::default()).unwrap();
/// assert_eq!(client.provider(), Provider::Ollama);
/// assert_eq!(client.model(), "mxbai-embed-large");
/// assert_eq!(client.dimensions(), 1024);
/// ```
pub struct EmbeddingClient {
    client: reqwest::Client,
    provider: Provider,
    base_url: String,
    api_key: Option<String>,
    model: String,
    dimensions: usize,
    batch_size: usize,
    max_in_flight: usize,
    max_retries: u32,
    retry_backoff_ms: u64,
    permits: Arc<Semaphore>,
}

impl fmt::Debug for EmbeddingClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmbeddingClient")
            .field("provider", &self.provider)
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("dimensions", &self.dimensions)
            .finish_non_exhaustive()
    }
}

impl EmbeddingClient {
    /// Create a client from an [`EmbeddingConfig`].
    ///
    /// # Errors
    ///
    /// Returns [`ChunkwiseError::Config`] for an unknown provider or if the
    /// HTTP client cannot be built.
    pub fn with_config(config: &EmbeddingConfig) -> Result<Self, ChunkwiseError> {
        let provider: Provider = config.provider.parse()?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ChunkwiseError::Config(format!("failed to build HTTP client: {e}")))?;
        let max_in_flight = config.max_in_flight.max(1);

        Ok(Self {
            client,
            provider,
            base_url: config.resolved_base_url(),
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
            model: config.model.clone(),
            dimensions: config.dimensions,
            batch_size: config.batch_size.max(1),
            max_in_flight,
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
            permits: Arc::new(Semaphore::new(max_in_flight)),
        })
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Configured vector length.
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Embed many texts.
    ///
    /// Never fails as a whole: a batch that keeps failing is retried text by
    /// text, and texts that still fail carry their error in the outcome.
    pub async fn embed_batch(&self, texts: &[String]) -> EmbedOutcome {
        if texts.is_empty() {
            return EmbedOutcome::default();
        }

        let groups: Vec<Vec<Result<Vec<f32>, ChunkwiseError>>> =
            stream::iter(texts.chunks(self.batch_size))
                .map(|batch| self.embed_group(batch))
                .buffered(self.max_in_flight)
                .collect()
                .await;

        let outcome = EmbedOutcome {
            results: groups.into_iter().flatten().collect(),
        };
        if outcome.failed() > 0 {
            tracing::warn!(
                failed = outcome.failed(),
                total = outcome.len(),
                "some texts could not be embedded"
            );
        }
        outcome
    }

    /// Embed a search query.
    ///
    /// # Errors
    ///
    /// Returns [`ChunkwiseError::Embedding`] if the request fails after
    /// retries or the vector has the wrong length.
    pub async fn embed_query(&self, query: &str) -> Result<Vec<f32>, ChunkwiseError> {
        let input = [query.to_string()];
        let mut vectors = self
            .request_with_retry(&input)
            .await
            .map_err(|e| ChunkwiseError::Embedding(e.to_string()))?;
        let vector = vectors
            .pop()
            .ok_or_else(|| ChunkwiseError::Embedding("empty embedding response".into()))?;
        self.check_dimensions(vector)
    }

    /// Embed a short text and compare the model's dimensionality with the
    /// configured one. Returns the observed dimensionality.
    ///
    /// # Errors
    ///
    /// Returns [`ChunkwiseError::Config`] on a dimensionality mismatch and
    /// [`ChunkwiseError::Embedding`] if the service cannot be reached.
    pub async fn probe(&self) -> Result<usize, ChunkwiseError> {
        let input = [PROBE_TEXT.to_string()];
        let vectors = self
            .request_with_retry(&input)
            .await
            .map_err(|e| ChunkwiseError::Embedding(e.to_string()))?;
        let actual = vectors.first().map_or(0, Vec::len);
        if actual != self.dimensions {
            return Err(ChunkwiseError::Config(format!(
                "embedding model '{}' produces {actual}-dimensional vectors but embedding.dimensions is {}",
                self.model, self.dimensions
            )));
        }
        tracing::debug!(model = %self.model, dimensions = actual, "embedding model probed");
        Ok(actual)
    }

    /// Check that the service answers.
    ///
    /// # Errors
    ///
    /// Returns [`ChunkwiseError::Embedding`] if it is unreachable or unhealthy.
    pub async fn health(&self) -> Result<(), ChunkwiseError> {
        let url = match self.provider {
            Provider::Ollama => format!("{}/api/tags", self.base_url),
            Provider::OpenAi => format!("{}/v1/models", self.base_url),
        };
        let response = self
            .authorized(self.client.get(&url))
            .timeout(Duration::from_secs(HEALTH_TIMEOUT_SECS))
            .send()
            .await
            .map_err(|e| ChunkwiseError::Embedding(format!("{url} is unreachable: {e}")))?;
        if !response.status().is_success() {
            return Err(ChunkwiseError::Embedding(format!(
                "{url} returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    /// Names of the models the Ollama server has pulled.
    ///
    /// # Errors
    ///
    /// Returns [`ChunkwiseError::Config`] for non-Ollama providers and
    /// [`ChunkwiseError::Embedding`] if the request fails.
    pub async fn list_models(&self) -> Result<Vec<String>, ChunkwiseError> {
        self.require_ollama("listing models")?;
        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ChunkwiseError::Embedding(format!("{url} is unreachable: {e}")))?;
        if !response.status().is_success() {
            return Err(ChunkwiseError::Embedding(format!(
                "{url} returned {}",
                response.status()
            )));
        }
        let tags: TagsResponse = response
            .json()
            .await
            .map_err(|e| ChunkwiseError::Embedding(format!("failed to parse model list: {e}")))?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    /// Ask the Ollama server to download `model`. Blocks until the pull ends.
    ///
    /// # Errors
    ///
    /// Returns [`ChunkwiseError::Config`] for non-Ollama providers and
    /// [`ChunkwiseError::Embedding`] if the pull fails.
    pub async fn pull_model(&self, model: &str) -> Result<(), ChunkwiseError> {
        self.require_ollama("pulling models")?;
        let url = format!("{}/api/pull", self.base_url);
        tracing::info!(model, "pulling model");
        let response = self
            .client
            .post(&url)
            .timeout(Duration::from_secs(PULL_TIMEOUT_SECS))
            .json(&PullRequest {
                model,
                stream: false,
            })
            .send()
            .await
            .map_err(|e| ChunkwiseError::Embedding(format!("pull of '{model}' failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unable to read response body".into());
            return Err(ChunkwiseError::Embedding(format!(
                "pull of '{model}' returned {status}: {body}"
            )));
        }
        Ok(())
    }

    fn require_ollama(&self, what: &str) -> Result<(), ChunkwiseError> {
        if self.provider == Provider::Ollama {
            Ok(())
        } else {
            Err(ChunkwiseError::Config(format!(
                "{what} is only supported by the ollama provider"
            )))
        }
    }

    async fn embed_group(&self, batch: &[String]) -> Vec<Result<Vec<f32>, ChunkwiseError>> {
        match self.request_with_retry(batch).await {
            Ok(vectors) => vectors
                .into_iter()
                .map(|v| self.check_dimensions(v))
                .collect(),
            Err(err) if batch.len() > 1 => {
                tracing::warn!(
                    batch = batch.len(),
                    error = %err,
                    "batch embedding failed, retrying texts one at a time"
                );
                let mut results = Vec::with_capacity(batch.len());
                for text in batch {
                    let single = std::slice::from_ref(text);
                    let result = match self.request_with_retry(single).await {
                        Ok(mut vectors) => match vectors.pop() {
                            Some(vector) => self.check_dimensions(vector),
                            None => Err(ChunkwiseError::Embedding("empty embedding response".into())),
                        },
                        Err(err) => Err(ChunkwiseError::Embedding(err.to_string())),
                    };
                    results.push(result);
                }
                results
            }
            Err(err) => vec![Err(ChunkwiseError::Embedding(err.to_string()))],
        }
    }

    async fn request_with_retry(&self, batch: &[String]) -> Result<Vec<Vec<f32>>, AttemptError> {
        retry::with_retry(
            self.provider.as_str(),
            self.max_retries,
            self.retry_backoff_ms,
            || self.request_once(batch),
        )
        .await
    }

    async fn request_once(&self, batch: &[String]) -> Result<Vec<Vec<f32>>, AttemptError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| AttemptError::Fatal("embedding client is shutting down".into()))?;

        let url = match self.provider {
            Provider::Ollama => format!("{}/api/embed", self.base_url),
            Provider::OpenAi => format!("{}/v1/embeddings", self.base_url),
        };
        let request = EmbedRequest {
            model: &self.model,
            input: batch,
        };

        let response = self
            .authorized(self.client.post(&url))
            .json(&request)
            .send()
            .await
            .map_err(|e| AttemptError::from_transport(self.provider.as_str(), &e))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = retry::retry_after(response.headers());
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unable to read response body".into());
            return Err(AttemptError::from_status(
                self.provider.as_str(),
                status,
                &body,
                retry_after,
            ));
        }

        let vectors = match self.provider {
            Provider::Ollama => response
                .json::<OllamaEmbedResponse>()
                .await
                .map(|r| r.embeddings),
            Provider::OpenAi => response.json::<OpenAiEmbedResponse>().await.map(|r| {
                let mut data = r.data;
                data.sort_by_key(|item| item.index.unwrap_or(0));
                data.into_iter().map(|item| item.embedding).collect()
            }),
        }
        .map_err(|e| AttemptError::Fatal(format!("failed to parse embedding response: {e}")))?;

        if vectors.len() != batch.len() {
            return Err(AttemptError::Fatal(format!(
                "embedding service returned {} vectors for {} texts",
                vectors.len(),
                batch.len()
            )));
        }
        Ok(vectors)
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    fn check_dimensions(&self, vector: Vec<f32>) -> Result<Vec<f32>, ChunkwiseError> {
        if vector.len() == self.dimensions {
            Ok(vector)
        } else {
            Err(ChunkwiseError::Embedding(format!(
                "expected a {}-dimensional vector, got {}",
                self.dimensions,
                vector.len()
            )))
        }
    }
}
