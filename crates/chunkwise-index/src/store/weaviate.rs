//! Weaviate backend over its REST and GraphQL APIs.
//!
//! Objects are stored with `vectorizer: none`; vectors always come from the
//! embedding client. The chunk id doubles as the Weaviate object id.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use chunkwise_core::{
    Chunk, ChunkType, ChunkwiseError, IndexedChunk, SearchFilter, SearchResult, StoreConfig,
    StoreStats,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{rank_results, BoxFuture, VectorStore};
use crate::retry::{self, AttemptError};

const UPSERT_BATCH: usize = 100;
const HEALTH_TIMEOUT_SECS: u64 = 2;
/// Weaviate's default cap on objects matched by one batch delete.
const DELETE_LIMIT: u64 = 10_000;

const RESULT_FIELDS: &str = "chunk_type file_path start_line end_line parent_name content \
                             language signature sequence metadata";

/// [`VectorStore`] backed by a Weaviate collection.
///
/// # Examples
///
/// ```
/// use chunkwise_core::StoreConfig;
/// use chunkwise_index::store::WeaviateStore;
///
/// let config = StoreConfig { collection: "codeChunks".into(), ..StoreConfig::default() };
/// let store = WeaviateStore::with_config(&config).unwrap();
/// assert_eq!(store.collection(), "CodeChunks");
/// ```
pub struct WeaviateStore {
    client: reqwest::Client,
    base_url: String,
    class: String,
    api_key: Option<String>,
    max_retries: u32,
    retry_backoff_ms: u64,
}

impl std::fmt::Debug for WeaviateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeaviateStore")
            .field("base_url", &self.base_url)
            .field("class", &self.class)
            .finish_non_exhaustive()
    }
}

#[derive(Serialize)]
struct ObjectProperties<'a> {
    chunk_type: &'a str,
    file_path: &'a str,
    start_line: u32,
    end_line: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    parent_name: Option<&'a str>,
    content: &'a str,
    language: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    signature: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sequence: Option<u32>,
    metadata: String,
    indexed_at: String,
}

#[derive(Serialize)]
struct BatchObject<'a> {
    class: &'a str,
    id: &'a str,
    vector: &'a [f32],
    properties: ObjectProperties<'a>,
}

#[derive(Deserialize)]
struct BatchObjectResult {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    result: Option<BatchResultStatus>,
}

#[derive(Deserialize)]
struct BatchResultStatus {
    #[serde(default)]
    errors: Option<BatchErrors>,
}

#[derive(Deserialize)]
struct BatchErrors {
    #[serde(default)]
    error: Vec<BatchErrorMessage>,
}

#[derive(Deserialize)]
struct BatchErrorMessage {
    message: String,
}

#[derive(Deserialize)]
struct DeleteResponse {
    results: DeleteResults,
}

#[derive(Deserialize)]
struct DeleteResults {
    #[serde(default)]
    matches: u64,
    #[serde(default)]
    successful: u64,
    #[serde(default)]
    failed: u64,
    #[serde(default)]
    limit: Option<u64>,
}

#[derive(Deserialize)]
struct StoredObject {
    chunk_type: String,
    file_path: String,
    start_line: u32,
    end_line: u32,
    #[serde(default)]
    parent_name: Option<String>,
    content: String,
    language: String,
    #[serde(default)]
    signature: Option<String>,
    #[serde(default)]
    sequence: Option<u32>,
    #[serde(default)]
    metadata: Option<String>,
    #[serde(rename = "_additional")]
    additional: Additional,
}

#[derive(Deserialize)]
struct Additional {
    id: String,
    #[serde(default)]
    distance: Option<f64>,
}

#[derive(Deserialize)]
struct VectorOnly {
    #[serde(rename = "_additional")]
    additional: VectorAdditional,
}

#[derive(Deserialize)]
struct VectorAdditional {
    #[serde(default)]
    vector: Vec<f32>,
}

#[derive(Deserialize)]
struct TypeGroup {
    meta: GroupMeta,
    #[serde(rename = "groupedBy")]
    grouped_by: GroupedBy,
}

#[derive(Deserialize)]
struct GroupMeta {
    count: usize,
}

#[derive(Deserialize)]
struct GroupedBy {
    value: String,
}

fn store_err(context: &str, e: impl std::fmt::Display) -> ChunkwiseError {
    ChunkwiseError::IndexStore(format!("{context}: {e}"))
}

/// Only requests that never got an answer are worth repeating. Error
/// statuses are handled by the caller and never retried.
fn transport_failure(context: &str, err: &reqwest::Error) -> AttemptError {
    let message = format!("{context}: {err}");
    if err.is_timeout() || err.is_connect() {
        AttemptError::Transient {
            message,
            retry_after: None,
        }
    } else {
        AttemptError::Fatal(message)
    }
}

/// Quote a string as a GraphQL literal. JSON escaping is a valid subset.
fn quote(s: &str) -> String {
    Value::String(s.to_string()).to_string()
}

/// Weaviate class names always start with an uppercase letter.
fn class_name(collection: &str) -> String {
    let mut chars = collection.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// GraphQL `where` argument for a filter, or `None` when nothing is filtered.
fn where_clause(filter: &SearchFilter) -> Option<String> {
    let mut operands = Vec::new();

    let mut types: Vec<String> = filter
        .chunk_types
        .iter()
        .map(|t| {
            format!(
                "{{path: [\"chunk_type\"], operator: Equal, valueText: {}}}",
                quote(t.as_str())
            )
        })
        .collect();
    match types.len() {
        0 => {}
        1 => operands.push(types.remove(0)),
        _ => operands.push(format!("{{operator: Or, operands: [{}]}}", types.join(", "))),
    }

    if let Some(prefix) = &filter.path_prefix {
        operands.push(format!(
            "{{path: [\"file_path\"], operator: Like, valueText: {}}}",
            quote(&format!("{prefix}*"))
        ));
    }

    match operands.len() {
        0 => None,
        1 => operands.pop(),
        _ => Some(format!(
            "{{operator: And, operands: [{}]}}",
            operands.join(", ")
        )),
    }
}

impl WeaviateStore {
    /// Create a store for `config.url` / `config.collection`.
    ///
    /// # Errors
    ///
    /// Returns [`ChunkwiseError::Config`] for an empty collection name or if
    /// the HTTP client cannot be built.
    pub fn with_config(config: &StoreConfig) -> Result<Self, ChunkwiseError> {
        let class = class_name(config.collection.trim());
        if class.is_empty() {
            return Err(ChunkwiseError::Config("store.collection must not be empty".into()));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ChunkwiseError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            class,
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
        })
    }

    /// The Weaviate class holding the chunks.
    pub fn collection(&self) -> &str {
        &self.class
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    /// Send the request produced by `build`, repeating it on timeouts and
    /// refused connections.
    async fn send<F>(&self, context: &str, build: F) -> Result<reqwest::Response, ChunkwiseError>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        retry::with_retry("weaviate", self.max_retries, self.retry_backoff_ms, || {
            let request = self.authorized(build());
            async move {
                request
                    .send()
                    .await
                    .map_err(|e| transport_failure(context, &e))
            }
        })
        .await
        .map_err(|e| ChunkwiseError::IndexStore(e.to_string()))
    }

    fn class_definition(&self) -> Value {
        let text = |name: &str, tokenization: &str| {
            json!({"name": name, "dataType": ["text"], "tokenization": tokenization})
        };
        let int = |name: &str| json!({"name": name, "dataType": ["int"]});
        json!({
            "class": self.class,
            "description": "Source code chunks",
            "vectorizer": "none",
            "vectorIndexConfig": {"distance": "cosine"},
            "properties": [
                text("chunk_type", "field"),
                text("file_path", "field"),
                int("start_line"),
                int("end_line"),
                text("parent_name", "field"),
                text("content", "word"),
                text("language", "field"),
                text("signature", "word"),
                int("sequence"),
                text("metadata", "field"),
                {"name": "indexed_at", "dataType": ["date"]},
            ],
        })
    }

    async fn graphql(&self, query: String) -> Result<Value, ChunkwiseError> {
        let url = format!("{}/v1/graphql", self.base_url);
        let payload = json!({ "query": query });
        let response = self
            .send("GraphQL request failed", || self.client.post(&url).json(&payload))
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unable to read response body".into());
            return Err(ChunkwiseError::IndexStore(format!(
                "GraphQL endpoint returned {status}: {body}"
            )));
        }
        let mut body: Value = response
            .json()
            .await
            .map_err(|e| store_err("failed to parse GraphQL response", e))?;

        if let Some(errors) = body.get("errors").and_then(Value::as_array) {
            if !errors.is_empty() {
                let messages: Vec<&str> = errors
                    .iter()
                    .filter_map(|e| e.get("message").and_then(Value::as_str))
                    .collect();
                return Err(ChunkwiseError::IndexStore(format!(
                    "GraphQL query failed: {}",
                    messages.join("; ")
                )));
            }
        }
        Ok(body.get_mut("data").map(Value::take).unwrap_or(Value::Null))
    }

    /// Objects under `data.{section}.{class}`.
    fn section<T: serde::de::DeserializeOwned>(
        &self,
        mut data: Value,
        section: &str,
    ) -> Result<Vec<T>, ChunkwiseError> {
        let items = data
            .get_mut(section)
            .and_then(|s| s.get_mut(&self.class))
            .map(Value::take)
            .unwrap_or(Value::Array(Vec::new()));
        if items.is_null() {
            return Ok(Vec::new());
        }
        serde_json::from_value(items).map_err(|e| store_err("unexpected GraphQL result shape", e))
    }

    async fn stored_dimensions(&self) -> Result<Option<usize>, ChunkwiseError> {
        let query = format!(
            "{{ Get {{ {}(limit: 1) {{ _additional {{ vector }} }} }} }}",
            self.class
        );
        let data = self.graphql(query).await?;
        let sample: Vec<VectorOnly> = self.section(data, "Get")?;
        Ok(sample
            .first()
            .map(|o| o.additional.vector.len())
            .filter(|len| *len > 0))
    }

    async fn ensure_schema_impl(&self, dimensions: usize) -> Result<(), ChunkwiseError> {
        let url = format!("{}/v1/schema/{}", self.base_url, self.class);
        let response = self
            .send("schema request failed", || self.client.get(&url))
            .await?;

        match response.status() {
            status if status.is_success() => {
                if let Some(stored) = self.stored_dimensions().await? {
                    if stored != dimensions {
                        return Err(ChunkwiseError::IndexStore(format!(
                            "collection {} holds {stored}-dimensional vectors but the embedding model produces {dimensions}",
                            self.class
                        )));
                    }
                }
                tracing::debug!(class = %self.class, "collection already exists");
                Ok(())
            }
            reqwest::StatusCode::NOT_FOUND => {
                let schema_url = format!("{}/v1/schema", self.base_url);
                let definition = self.class_definition();
                let create = self
                    .send("schema creation failed", || {
                        self.client.post(&schema_url).json(&definition)
                    })
                    .await?;
                let status = create.status();
                if !status.is_success() {
                    let body = create
                        .text()
                        .await
                        .unwrap_or_else(|_| "unable to read response body".into());
                    return Err(ChunkwiseError::IndexStore(format!(
                        "creating collection {} returned {status}: {body}",
                        self.class
                    )));
                }
                tracing::info!(class = %self.class, "created collection");
                Ok(())
            }
            status => Err(ChunkwiseError::IndexStore(format!(
                "schema lookup for {} returned {status}",
                self.class
            ))),
        }
    }

    async fn upsert_impl(&self, chunks: Vec<IndexedChunk>) -> Result<usize, ChunkwiseError> {
        let mut written = 0;
        match self.upsert_batches(&chunks, &mut written).await {
            Ok(()) => {
                tracing::debug!(class = %self.class, count = written, "upserted chunks");
                Ok(written)
            }
            Err(ChunkwiseError::IndexStore(message)) if written > 0 => {
                let files: BTreeSet<&str> =
                    chunks.iter().map(|c| c.chunk.file_path.as_str()).collect();
                tracing::warn!(
                    class = %self.class,
                    files = ?files,
                    written,
                    total = chunks.len(),
                    error = %message,
                    "upsert stopped part-way, files are partially indexed"
                );
                Err(ChunkwiseError::IndexStore(format!(
                    "{message} ({written} of {} chunks were already written)",
                    chunks.len()
                )))
            }
            Err(err) => Err(err),
        }
    }

    async fn upsert_batches(
        &self,
        chunks: &[IndexedChunk],
        written: &mut usize,
    ) -> Result<(), ChunkwiseError> {
        let url = format!("{}/v1/batch/objects", self.base_url);

        for batch in chunks.chunks(UPSERT_BATCH) {
            let mut objects = Vec::with_capacity(batch.len());
            for indexed in batch {
                let chunk = &indexed.chunk;
                objects.push(BatchObject {
                    class: &self.class,
                    id: &chunk.id,
                    vector: &indexed.vector,
                    properties: ObjectProperties {
                        chunk_type: chunk.chunk_type.as_str(),
                        file_path: &chunk.file_path,
                        start_line: chunk.start_line,
                        end_line: chunk.end_line,
                        parent_name: chunk.parent_name.as_deref(),
                        content: &chunk.content,
                        language: &chunk.language,
                        signature: chunk.signature.as_deref(),
                        sequence: chunk.sequence,
                        metadata: serde_json::to_string(&chunk.metadata)?,
                        indexed_at: indexed.indexed_at.to_rfc3339(),
                    },
                });
            }

            let payload = json!({ "objects": objects });
            let response = self
                .send("batch upsert failed", || self.client.post(&url).json(&payload))
                .await?;
            let status = response.status();
            if !status.is_success() {
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "unable to read response body".into());
                return Err(ChunkwiseError::IndexStore(format!(
                    "batch upsert returned {status}: {body}"
                )));
            }

            let results: Vec<BatchObjectResult> = response
                .json()
                .await
                .map_err(|e| store_err("failed to parse batch response", e))?;
            let failures: Vec<String> = results
                .iter()
                .filter_map(|r| {
                    let errors = r.result.as_ref()?.errors.as_ref()?;
                    let first = errors.error.first()?;
                    Some(format!(
                        "{}: {}",
                        r.id.as_deref().unwrap_or("?"),
                        first.message
                    ))
                })
                .collect();
            if !failures.is_empty() {
                return Err(ChunkwiseError::IndexStore(format!(
                    "{} of {} objects were rejected: {}",
                    failures.len(),
                    batch.len(),
                    failures[0]
                )));
            }
            *written += batch.len();
        }
        Ok(())
    }

    async fn search_impl(
        &self,
        vector: Vec<f32>,
        limit: usize,
        filter: SearchFilter,
    ) -> Result<Vec<SearchResult>, ChunkwiseError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let where_arg = where_clause(&filter)
            .map(|w| format!(", where: {w}"))
            .unwrap_or_default();
        let query = format!(
            "{{ Get {{ {class}(nearVector: {{vector: {vector}}}, limit: {limit}{where_arg}) {{ {RESULT_FIELDS} _additional {{ id distance }} }} }} }}",
            class = self.class,
            vector = Value::from(vector),
        );

        let data = self.graphql(query).await?;
        let objects: Vec<StoredObject> = self.section(data, "Get")?;

        let mut results = Vec::with_capacity(objects.len());
        for object in objects {
            let score = object.additional.distance.map_or(0.0, |d| 1.0 - d);
            let chunk = object.into_chunk()?;
            let matched = filter.matched_metadata(&chunk);
            results.push(SearchResult {
                chunk,
                score,
                matched,
            });
        }
        rank_results(&mut results);
        Ok(results)
    }

    async fn delete_file_impl(&self, file_path: &str) -> Result<usize, ChunkwiseError> {
        let url = format!("{}/v1/batch/objects", self.base_url);
        let body = json!({
            "match": {
                "class": self.class,
                "where": {
                    "path": ["file_path"],
                    "operator": "Equal",
                    "valueText": file_path,
                },
            },
            "output": "minimal",
        });

        let mut removed = 0u64;
        loop {
            let response = self
                .send("batch delete failed", || self.client.delete(&url).json(&body))
                .await?;
            let status = response.status();
            if !status.is_success() {
                let text = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "unable to read response body".into());
                return Err(ChunkwiseError::IndexStore(format!(
                    "batch delete returned {status}: {text}"
                )));
            }
            let parsed: DeleteResponse = response
                .json()
                .await
                .map_err(|e| store_err("failed to parse delete response", e))?;
            let results = parsed.results;
            if results.failed > 0 {
                return Err(ChunkwiseError::IndexStore(format!(
                    "failed to delete {} chunks of {file_path}",
                    results.failed
                )));
            }
            removed += results.successful;
            if results.successful == 0 || results.matches < results.limit.unwrap_or(DELETE_LIMIT) {
                break;
            }
        }

        tracing::debug!(file = file_path, removed, "deleted chunks");
        Ok(usize::try_from(removed).unwrap_or(usize::MAX))
    }

    async fn stats_impl(&self) -> Result<StoreStats, ChunkwiseError> {
        let query = format!(
            "{{ Aggregate {{ {}(groupBy: [\"chunk_type\"]) {{ meta {{ count }} groupedBy {{ value }} }} }} }}",
            self.class
        );
        let data = self.graphql(query).await?;
        let groups: Vec<TypeGroup> = self.section(data, "Aggregate")?;

        let by_type: BTreeMap<String, usize> = groups
            .into_iter()
            .filter(|g| g.meta.count > 0)
            .map(|g| (g.grouped_by.value, g.meta.count))
            .collect();
        Ok(StoreStats {
            backend: "weaviate".into(),
            collection: self.class.clone(),
            total_chunks: by_type.values().sum(),
            total_files: None,
            by_type,
        })
    }

    async fn health_impl(&self) -> Result<(), ChunkwiseError> {
        let url = format!("{}/v1/.well-known/ready", self.base_url);
        let response = self
            .authorized(self.client.get(&url))
            .timeout(Duration::from_secs(HEALTH_TIMEOUT_SECS))
            .send()
            .await
            .map_err(|e| store_err(&format!("{url} is unreachable"), e))?;
        if !response.status().is_success() {
            return Err(ChunkwiseError::IndexStore(format!(
                "{url} returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

impl StoredObject {
    fn into_chunk(self) -> Result<Chunk, ChunkwiseError> {
        let chunk_type: ChunkType = self
            .chunk_type
            .parse()
            .map_err(ChunkwiseError::IndexStore)?;
        let metadata = match self.metadata.as_deref() {
            Some(raw) if !raw.is_empty() => serde_json::from_str(raw)?,
            _ => BTreeMap::new(),
        };
        Ok(Chunk {
            id: self.additional.id,
            chunk_type,
            content: self.content,
            start_line: self.start_line,
            end_line: self.end_line,
            file_path: self.file_path,
            language: self.language,
            parent_name: self.parent_name,
            signature: self.signature,
            sequence: self.sequence,
            metadata,
        })
    }
}

impl VectorStore for WeaviateStore {
    fn backend(&self) -> &'static str {
        "weaviate"
    }

    fn ensure_schema(&self, dimensions: usize) -> BoxFuture<'_, Result<(), ChunkwiseError>> {
        Box::pin(self.ensure_schema_impl(dimensions))
    }

    fn upsert(&self, chunks: Vec<IndexedChunk>) -> BoxFuture<'_, Result<usize, ChunkwiseError>> {
        Box::pin(self.upsert_impl(chunks))
    }

    fn search(
        &self,
        vector: Vec<f32>,
        limit: usize,
        filter: SearchFilter,
    ) -> BoxFuture<'_, Result<Vec<SearchResult>, ChunkwiseError>> {
        Box::pin(self.search_impl(vector, limit, filter))
    }

    fn delete_file<'a>(
        &'a self,
        file_path: &'a str,
    ) -> BoxFuture<'a, Result<usize, ChunkwiseError>> {
        Box::pin(self.delete_file_impl(file_path))
    }

    fn stats(&self) -> BoxFuture<'_, Result<StoreStats, ChunkwiseError>> {
        Box::pin(self.stats_impl())
    }

    fn health(&self) -> BoxFuture<'_, Result<(), ChunkwiseError>> {
        Box::pin(self.health_impl())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_names_are_capitalized() {
        assert_eq!(class_name("codeChunks"), "CodeChunks");
        assert_eq!(class_name("CodeChunks"), "CodeChunks");
        assert_eq!(class_name(""), "");
    }

    #[test]
    fn where_clause_combines_types_and_prefix() {
        assert_eq!(where_clause(&SearchFilter::default()), None);

        let single = SearchFilter {
            chunk_types: vec![ChunkType::Function],
            path_prefix: None,
        };
        assert_eq!(
            where_clause(&single).unwrap(),
            r#"{path: ["chunk_type"], operator: Equal, valueText: "function"}"#
        );

        let both = SearchFilter {
            chunk_types: vec![ChunkType::Class, ChunkType::Method],
            path_prefix: Some("src/\"x".into()),
        };
        let clause = where_clause(&both).unwrap();
        assert!(clause.starts_with("{operator: And, operands: [{operator: Or"));
        assert!(clause.contains(r#"valueText: "method""#));
        assert!(clause.contains(r#"operator: Like, valueText: "src/\"x*""#));
    }

    #[test]
    fn stored_object_converts_to_chunk() {
        let raw = json!({
            "chunk_type": "method",
            "file_path": "a.py",
            "start_line": 3,
            "end_line": 5,
            "parent_name": "Greeter",
            "content": "def hi(self):\n    pass",
            "language": "python",
            "signature": "def hi(self)",
            "sequence": null,
            "metadata": "{\"name\":\"hi\"}",
            "_additional": {"id": "0000-1", "distance": 0.25}
        });
        let object: StoredObject = serde_json::from_value(raw).unwrap();
        assert_eq!(object.additional.distance, Some(0.25));
        let chunk = object.into_chunk().unwrap();
        assert_eq!(chunk.chunk_type, ChunkType::Method);
        assert_eq!(chunk.parent_name.as_deref(), Some("Greeter"));
        assert_eq!(chunk.metadata["name"], "hi");
        assert_eq!(chunk.id, "0000-1");
    }

    #[test]
    fn class_definition_disables_vectorizer() {
        let store = WeaviateStore::with_config(&StoreConfig::default()).unwrap();
        let def = store.class_definition();
        assert_eq!(def["class"], "CodeChunks");
        assert_eq!(def["vectorizer"], "none");
        assert!(def["properties"]
            .as_array()
            .unwrap()
            .iter()
            .any(|p| p["name"] == "file_path"));
    }
}
