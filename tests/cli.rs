use std::path::Path;
use std::process::{Command, Output};

use chunkwise_core::ChunkwiseConfig;
use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

const SERVICE_VARS: [&str; 5] = [
    "WEAVIATE_URL",
    "WEAVIATE_COLLECTION",
    "OLLAMA_URL",
    "OLLAMA_EMBED_MODEL",
    "OLLAMA_CHAT_MODEL",
];

fn chunkwise(dir: &Path, args: &[&str]) -> Output {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_chunkwise"));
    cmd.args(args).current_dir(dir).env_remove("RUST_LOG");
    for var in SERVICE_VARS {
        cmd.env_remove(var);
    }
    cmd.output().unwrap()
}

fn stdout_json(output: &Output) -> Value {
    serde_json::from_slice(&output.stdout).unwrap_or_else(|e| {
        panic!(
            "invalid JSON ({e}): {}\nstderr: {}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        )
    })
}

#[test]
fn init_creates_valid_toml() {
    let dir = tempfile::tempdir().unwrap();
    let output = chunkwise(dir.path(), &["init"]);
    assert!(
        output.status.success(),
        "chunkwise init failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let config_path = dir.path().join(".chunkwise.toml");
    let content = std::fs::read_to_string(&config_path).unwrap();
    assert!(content.contains("[chunker]"));
    assert!(content.contains("[embedding]"));

    let config = ChunkwiseConfig::from_file(&config_path).unwrap();
    assert_eq!(config.store.collection, "CodeChunks");
}

#[test]
fn init_refuses_if_exists() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join(".chunkwise.toml"), "# existing").unwrap();
    let output = chunkwise(dir.path(), &["init"]);
    assert!(!output.status.success());
}

#[test]
fn preview_chunks_prints_json_and_writes_output_file() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("app.py"),
        "import os\n\ndef run():\n    return os.name\n",
    )
    .unwrap();

    let output = chunkwise(
        dir.path(),
        &["--format", "json", "preview-chunks", "app.py", "-o", "chunks.json"],
    );
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let chunks = stdout_json(&output);
    let spans: Vec<(String, u64, u64)> = chunks
        .as_array()
        .unwrap()
        .iter()
        .map(|c| {
            (
                c["chunkType"].as_str().unwrap().to_string(),
                c["startLine"].as_u64().unwrap(),
                c["endLine"].as_u64().unwrap(),
            )
        })
        .collect();
    assert_eq!(
        spans,
        vec![("import".to_string(), 1, 1), ("function".to_string(), 3, 4)]
    );

    let saved: Value =
        serde_json::from_str(&std::fs::read_to_string(dir.path().join("chunks.json")).unwrap())
            .unwrap();
    assert_eq!(saved, chunks);
}

#[test]
fn preview_chunks_of_missing_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    let output = chunkwise(dir.path(), &["preview-chunks", "nope.py"]);
    assert!(!output.status.success());
}

#[test]
fn check_services_exits_non_zero_when_services_are_down() {
    let dir = tempfile::tempdir().unwrap();
    let output = chunkwise(
        dir.path(),
        &[
            "--format",
            "json",
            "--store-url",
            "http://127.0.0.1:9",
            "--embedding-url",
            "http://127.0.0.1:9",
            "check-services",
        ],
    );
    assert!(!output.status.success());

    let report = stdout_json(&output);
    let statuses: Vec<&str> = report["checks"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["status"].as_str().unwrap())
        .collect();
    assert_eq!(statuses, vec!["fail", "fail"]);
}

fn embeddings(request: &Request) -> ResponseTemplate {
    let body: Value = serde_json::from_slice(&request.body).unwrap();
    let vectors: Vec<Vec<f32>> = body["input"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| vec![1.0, t.as_str().unwrap().len() as f32 / 100.0, 0.0])
        .collect();
    ResponseTemplate::new(200).set_body_json(json!({ "embeddings": vectors }))
}

#[tokio::test(flavor = "multi_thread")]
async fn index_directory_then_stats_against_sqlite() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(embeddings)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_path_buf();
    std::fs::create_dir_all(root.join("src")).unwrap();
    std::fs::write(
        root.join("src/a.py"),
        "import os\n\ndef first():\n    return os.sep\n\ndef second():\n    return 2\n",
    )
    .unwrap();
    std::fs::write(root.join("src/b.py"), "def only():\n    return 1\n").unwrap();
    std::fs::write(
        root.join(".chunkwise.toml"),
        format!(
            "[embedding]\nbase_url = \"{}\"\ndimensions = 3\nmax_retries = 0\n\n[store]\nbackend = \"sqlite\"\npath = \"{}\"\n",
            server.uri(),
            root.join("index.db").display()
        ),
    )
    .unwrap();

    let index_root = root.clone();
    let indexed = tokio::task::spawn_blocking(move || {
        chunkwise(&index_root, &["--format", "json", "index-directory", "src", "-e", "py"])
    })
    .await
    .unwrap();
    assert!(indexed.status.success(), "{}", String::from_utf8_lossy(&indexed.stderr));
    let report = stdout_json(&indexed);
    assert_eq!(report["filesIndexed"], 2);
    assert_eq!(report["chunksIndexed"], 4);
    assert_eq!(report["aborted"], false);

    let stats_root = root.clone();
    let stats = tokio::task::spawn_blocking(move || chunkwise(&stats_root, &["--format", "json", "stats"]))
        .await
        .unwrap();
    assert!(stats.status.success(), "{}", String::from_utf8_lossy(&stats.stderr));
    let stats = stdout_json(&stats);
    assert_eq!(stats["totalChunks"], 4);
    assert_eq!(stats["totalFiles"], 2);
    assert_eq!(stats["byType"]["function"], 3);
}
