use std::time::Duration;

use chunkwise_core::{Chunk, ChunkType, ChunkwiseError, IndexedChunk, SearchFilter, StoreConfig};
use chunkwise_index::{VectorStore, WeaviateStore};
use serde_json::json;
use wiremock::matchers::{body_partial_json, body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn store(server: &MockServer) -> WeaviateStore {
    WeaviateStore::with_config(&StoreConfig {
        url: server.uri(),
        ..StoreConfig::default()
    })
    .unwrap()
}

#[tokio::test]
async fn missing_collection_is_created() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/schema/CodeChunks"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/schema"))
        .and(body_partial_json(json!({ "class": "CodeChunks", "vectorizer": "none" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "class": "CodeChunks" })))
        .expect(1)
        .mount(&server)
        .await;

    store(&server).ensure_schema(3).await.unwrap();
}

#[tokio::test]
async fn existing_collection_with_other_dimensions_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/schema/CodeChunks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "class": "CodeChunks" })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/graphql"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"Get": {"CodeChunks": [{"_additional": {"vector": [0.1, 0.2]}}]}}
        })))
        .mount(&server)
        .await;

    let store = store(&server);
    store.ensure_schema(2).await.unwrap();
    let err = store.ensure_schema(3).await.unwrap_err();
    assert!(matches!(err, ChunkwiseError::IndexStore(_)), "{err}");
}

#[tokio::test]
async fn search_converts_distance_to_score() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/graphql"))
        .and(body_string_contains("nearVector"))
        .and(body_string_contains("valueText: \\\"function\\\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"Get": {"CodeChunks": [
                {
                    "chunk_type": "function", "file_path": "b.py", "start_line": 1, "end_line": 2,
                    "content": "def b():\n    pass", "language": "python",
                    "metadata": "{\"name\":\"b\"}",
                    "_additional": {"id": "00000000-0000-0000-0000-00000000000b", "distance": 0.3}
                },
                {
                    "chunk_type": "function", "file_path": "a.py", "start_line": 4, "end_line": 5,
                    "content": "def a():\n    pass", "language": "python",
                    "_additional": {"id": "00000000-0000-0000-0000-00000000000a", "distance": 0.1}
                }
            ]}}
        })))
        .mount(&server)
        .await;

    let filter = SearchFilter {
        chunk_types: vec![ChunkType::Function],
        path_prefix: None,
    };
    let hits = store(&server).search(vec![0.1, 0.2, 0.3], 5, filter).await.unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].chunk.file_path, "a.py");
    assert!((hits[0].score - 0.9).abs() < 1e-9);
    assert!((hits[1].score - 0.7).abs() < 1e-9);
    assert_eq!(hits[1].chunk.metadata["name"], "b");
    assert_eq!(hits[0].matched["chunk_type"], "function");
}

#[tokio::test]
async fn graphql_errors_surface_as_store_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/graphql"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "errors": [{"message": "Cannot query field \"CodeChunks\" on type \"GetObjectsObj\"."}]
        })))
        .mount(&server)
        .await;

    let err = store(&server).stats().await.unwrap_err();
    assert!(matches!(err, ChunkwiseError::IndexStore(_)));
    assert!(err.to_string().contains("Cannot query field"));
}

#[tokio::test]
async fn upsert_reports_rejected_objects() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/batch/objects"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": "x", "result": {"errors": {"error": [{"message": "vector lengths don't match"}]}}}
        ])))
        .mount(&server)
        .await;

    let chunk = Chunk::new("a.py", "python", ChunkType::Function, "def a(): pass", 1, 1);
    let err = store(&server)
        .upsert(vec![IndexedChunk::new(chunk, vec![0.1, 0.2])])
        .await
        .unwrap_err();
    assert!(err.to_string().contains("vector lengths"));
}

#[tokio::test]
async fn upsert_sends_chunk_properties() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/batch/objects"))
        .and(body_partial_json(json!({
            "objects": [{"class": "CodeChunks", "properties": {"file_path": "a.py", "chunk_type": "function"}}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": "x", "result": {}}])))
        .expect(1)
        .mount(&server)
        .await;

    let chunk = Chunk::new("a.py", "python", ChunkType::Function, "def a(): pass", 1, 1);
    let written = store(&server)
        .upsert(vec![IndexedChunk::new(chunk, vec![0.1, 0.2])])
        .await
        .unwrap();
    assert_eq!(written, 1);
}

#[tokio::test]
async fn delete_file_returns_removed_count() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/v1/batch/objects"))
        .and(body_partial_json(json!({
            "match": {"class": "CodeChunks", "where": {"valueText": "src/a.py"}}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": {"matches": 4, "successful": 4, "failed": 0, "limit": 10000}
        })))
        .expect(1)
        .mount(&server)
        .await;

    assert_eq!(store(&server).delete_file("src/a.py").await.unwrap(), 4);
}

fn impatient_store(server: &MockServer) -> WeaviateStore {
    WeaviateStore::with_config(&StoreConfig {
        url: server.uri(),
        timeout_secs: 1,
        max_retries: 2,
        retry_backoff_ms: 10,
        ..StoreConfig::default()
    })
    .unwrap()
}

#[tokio::test]
async fn timed_out_delete_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/v1/batch/objects"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/v1/batch/objects"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": {"matches": 2, "successful": 2, "failed": 0, "limit": 10000}
        })))
        .expect(1)
        .mount(&server)
        .await;

    assert_eq!(impatient_store(&server).delete_file("src/a.py").await.unwrap(), 2);
}

#[tokio::test]
async fn error_statuses_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/v1/batch/objects"))
        .respond_with(ResponseTemplate::new(422).set_body_string("bad where filter"))
        .expect(1)
        .mount(&server)
        .await;

    let err = impatient_store(&server).delete_file("src/a.py").await.unwrap_err();
    assert!(matches!(err, ChunkwiseError::IndexStore(_)));
    assert!(err.to_string().contains("bad where filter"));
}

#[tokio::test]
async fn failed_later_batch_reports_partial_write() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/batch/objects"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/batch/objects"))
        .respond_with(ResponseTemplate::new(500).set_body_string("shard unavailable"))
        .expect(1)
        .mount(&server)
        .await;

    let chunks: Vec<IndexedChunk> = (1..=101)
        .map(|line| {
            let chunk = Chunk::new("big.py", "python", ChunkType::Global, "x = 1", line, line);
            IndexedChunk::new(chunk, vec![0.1, 0.2])
        })
        .collect();
    let err = impatient_store(&server).upsert(chunks).await.unwrap_err();
    let message = err.to_string();
    assert!(message.contains("shard unavailable"), "{message}");
    assert!(message.contains("100 of 101 chunks were already written"), "{message}");
}

#[tokio::test]
async fn stats_group_by_type() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/graphql"))
        .and(body_string_contains("Aggregate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"Aggregate": {"CodeChunks": [
                {"meta": {"count": 5}, "groupedBy": {"path": ["chunk_type"], "value": "function"}},
                {"meta": {"count": 2}, "groupedBy": {"path": ["chunk_type"], "value": "import"}}
            ]}}
        })))
        .mount(&server)
        .await;

    let stats = store(&server).stats().await.unwrap();
    assert_eq!(stats.total_chunks, 7);
    assert_eq!(stats.by_type["function"], 5);
    assert_eq!(stats.collection, "CodeChunks");
    assert_eq!(stats.total_files, None);
}

#[tokio::test]
async fn health_uses_ready_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/.well-known/ready"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    store(&server).health().await.unwrap();

    let down = WeaviateStore::with_config(&StoreConfig {
        url: "http://127.0.0.1:9".into(),
        ..StoreConfig::default()
    })
    .unwrap();
    assert!(matches!(
        down.health().await,
        Err(ChunkwiseError::IndexStore(_))
    ));
}
