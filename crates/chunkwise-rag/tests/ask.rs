use std::sync::Arc;

use chunkwise_core::{
    Chunk, ChunkType, ChunkwiseError, EmbeddingConfig, IndexedChunk, LlmConfig, RetrievalConfig,
    SearchFilter,
};
use chunkwise_index::{EmbeddingClient, SqliteStore, VectorStore};
use chunkwise_rag::prompt::NO_CONTEXT;
use chunkwise_rag::{CodeAssistant, LlmClient, Retriever, Synthesizer};
use serde_json::json;
use wiremock::matchers::{body_partial_json, body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mount_embeddings(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "embeddings": [[1.0, 0.0, 0.0]] })))
        .mount(server)
        .await;
}

fn chat_reply(text: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "id": "chatcmpl-1",
        "object": "chat.completion",
        "choices": [{"index": 0, "message": {"role": "assistant", "content": text}, "finish_reason": "stop"}]
    }))
}

async fn seeded_store() -> Arc<SqliteStore> {
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let chunk = |path: &str, start: u32, content: &str| {
        Chunk::new(path, "python", ChunkType::Function, content, start, start + 1)
    };
    store
        .upsert(vec![
            IndexedChunk::new(chunk("src/auth.py", 1, "def login(user):\n    return check(user)"), vec![1.0, 0.0, 0.0]),
            IndexedChunk::new(chunk("src/db.py", 5, "def connect():\n    return pool()"), vec![0.6, 0.8, 0.0]),
            IndexedChunk::new(chunk("src/ui.py", 9, "def render():\n    return html()"), vec![0.0, 0.0, 1.0]),
        ])
        .await
        .unwrap();
    store
}

fn assistant(server: &MockServer, store: Arc<SqliteStore>, context_size: usize) -> CodeAssistant {
    let embedder = EmbeddingClient::with_config(&EmbeddingConfig {
        base_url: Some(server.uri()),
        dimensions: 3,
        max_retries: 0,
        ..EmbeddingConfig::default()
    })
    .unwrap();
    let retriever = Retriever::new(Arc::new(embedder), store, &RetrievalConfig::default())
        .with_context_size(context_size);
    let llm = LlmClient::new(&LlmConfig {
        base_url: Some(server.uri()),
        ..LlmConfig::default()
    })
    .unwrap();
    CodeAssistant::new(retriever, Synthesizer::new(llm))
}

#[tokio::test]
async fn answer_cites_retrieved_chunks_in_rank_order() {
    let server = MockServer::start().await;
    mount_embeddings(&server).await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({ "model": "llama3.2" })))
        .and(body_string_contains("File: src/auth.py"))
        .respond_with(chat_reply("  Login is handled by `login` in src/auth.py.\n"))
        .expect(1)
        .mount(&server)
        .await;

    let answer = assistant(&server, seeded_store().await, 2)
        .ask("how does login work?", SearchFilter::default())
        .await
        .unwrap();

    assert_eq!(answer.text, "Login is handled by `login` in src/auth.py.");
    assert_eq!(answer.model, "llama3.2");
    let cited: Vec<String> = answer.citations.iter().map(ToString::to_string).collect();
    assert_eq!(cited, vec!["src/auth.py:1-2", "src/db.py:5-6"]);
    assert!(!answer.context_truncated);
}

#[tokio::test]
async fn chat_failure_is_reported_once_and_leaves_index_alone() {
    let server = MockServer::start().await;
    mount_embeddings(&server).await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("model crashed"))
        .expect(1)
        .mount(&server)
        .await;

    let store = seeded_store().await;
    let err = assistant(&server, Arc::clone(&store), 3)
        .ask("anything", SearchFilter::default())
        .await
        .unwrap_err();

    assert!(matches!(err, ChunkwiseError::AnswerService(_)));
    assert!(err.to_string().contains("model crashed"));
    assert_eq!(store.stats().await.unwrap().total_chunks, 3);
}

#[tokio::test]
async fn empty_index_still_asks_with_no_context_notice() {
    let server = MockServer::start().await;
    mount_embeddings(&server).await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_string_contains(NO_CONTEXT))
        .respond_with(chat_reply("I could not find that in the code."))
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let answer = assistant(&server, store, 5)
        .ask("where is the cache?", SearchFilter::default())
        .await
        .unwrap();
    assert!(answer.citations.is_empty());
}

#[tokio::test]
async fn search_applies_filters_and_limit() {
    let server = MockServer::start().await;
    mount_embeddings(&server).await;

    let store = seeded_store().await;
    let assistant = assistant(&server, store, 5);
    let filter = SearchFilter {
        chunk_types: vec![ChunkType::Function],
        path_prefix: Some("src/d".into()),
    };
    let hits = assistant.retriever().search("db", 5, filter).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].chunk.file_path, "src/db.py");
    assert!((hits[0].score - 0.6).abs() < 1e-6);

    let none = assistant
        .retriever()
        .search("db", 0, SearchFilter::default())
        .await
        .unwrap();
    assert!(none.is_empty());
}
