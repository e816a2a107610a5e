use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use miette::{IntoDiagnostic, Result};
use tokio_util::sync::CancellationToken;

use chunkwise_chunker::{count_by_type, Chunker};
use chunkwise_core::{
    ChunkType, ChunkwiseConfig, EmbeddingConfig, OutputFormat, SearchFilter, CONFIG_FILE_NAME,
};
use chunkwise_index::indexer::store_path;
use chunkwise_index::{AnyStore, EmbeddingClient, FileReport, IndexReport, Indexer, Provider, VectorStore};
use chunkwise_rag::{CodeAssistant, LlmClient, Retriever, Synthesizer};

#[derive(Parser)]
#[command(
    name = "chunkwise",
    version,
    about = "Syntax-aware code chunking and question answering over your codebase",
    long_about = "Chunkwise splits source files into syntax-aware chunks (functions, classes,\n\
                   methods, imports), embeds them, stores them in a vector index, and answers\n\
                   questions about the code using the most relevant chunks as context.\n\n\
                   Examples:\n  \
                     chunkwise check-services                 Verify the store and embedding service\n  \
                     chunkwise index-directory src -e py      Index every Python file under src/\n  \
                     chunkwise search 'config loading' -t function\n  \
                     chunkwise ask 'how are retries handled?'\n  \
                     chunkwise preview-chunks src/app.py      Show chunks without indexing"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Path to configuration file (default: .chunkwise.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Enable debug logging on stderr
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Vector store URL (overrides WEAVIATE_URL and the config file)
    #[arg(long, global = true)]
    store_url: Option<String>,

    /// Embedding service URL (overrides OLLAMA_URL and the config file)
    #[arg(long, global = true)]
    embedding_url: Option<String>,

    /// Embedding model (overrides OLLAMA_EMBED_MODEL and the config file)
    #[arg(long, global = true)]
    embedding_model: Option<String>,

    /// Collection holding the chunks (overrides WEAVIATE_COLLECTION)
    #[arg(long, global = true)]
    collection: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Chunk, embed and store a single file
    IndexFile {
        /// File to index
        path: PathBuf,
    },
    /// Index every matching file under a directory
    #[command(long_about = "Index every matching file under a directory.\n\n\
        Honors .gitignore and skips binary files and files over 1 MiB. Files are\n\
        indexed concurrently; Ctrl-C stops dispatching new files and lets the\n\
        files in flight finish.\n\n\
        Examples:\n  chunkwise index-directory .\n  chunkwise index-directory src -e py -e rs --workers 8")]
    IndexDirectory {
        /// Directory to walk
        path: PathBuf,

        /// File extensions to index (repeatable; default: every supported language)
        #[arg(short = 'e', long = "extension")]
        extensions: Vec<String>,

        /// Files indexed at the same time (default: from config)
        #[arg(long)]
        workers: Option<usize>,
    },
    /// Find chunks semantically similar to a query
    Search {
        /// Natural-language query
        query: String,

        /// Maximum results to return
        #[arg(short, long, default_value = "5")]
        limit: usize,

        /// Only return chunks of this type (repeatable)
        #[arg(short = 't', long = "chunk-type")]
        chunk_types: Vec<ChunkType>,

        /// Only return chunks whose file path starts with this prefix
        #[arg(long)]
        path_prefix: Option<String>,
    },
    /// Answer a question using retrieved code as context
    Ask {
        /// Question about the codebase
        question: String,

        /// Chat model (overrides OLLAMA_CHAT_MODEL and the config file)
        #[arg(short, long)]
        model: Option<String>,

        /// Chunks to retrieve as context (default: from config)
        #[arg(short = 'c', long = "context-size")]
        context_size: Option<usize>,

        /// Only use chunks of this type (repeatable)
        #[arg(short = 't', long = "chunk-type")]
        chunk_types: Vec<ChunkType>,

        /// Only use chunks whose file path starts with this prefix
        #[arg(long)]
        path_prefix: Option<String>,
    },
    /// Show how a file would be chunked, without indexing it
    PreviewChunks {
        /// File to chunk
        path: PathBuf,

        /// Also write the chunks as JSON to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Show what the index contains
    Stats,
    /// Connect to the store and embedding service and report what they hold
    TestConnection,
    /// Create the collection for the configured embedding model
    InitSchema,
    /// Download the embedding and chat models into Ollama
    InitModels,
    /// Check whether the required services are running
    CheckServices,
    /// Create a default .chunkwise.toml in the current directory
    Init,
}

#[derive(serde::Serialize)]
struct CheckResult {
    name: &'static str,
    status: &'static str,
    detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    hint: Option<String>,
}

impl CheckResult {
    fn pass(name: &'static str, detail: impl Into<String>) -> Self {
        Self {
            name,
            status: "pass",
            detail: detail.into(),
            hint: None,
        }
    }

    fn fail(name: &'static str, detail: impl Into<String>, hint: impl Into<String>) -> Self {
        Self {
            name,
            status: "fail",
            detail: detail.into(),
            hint: Some(hint.into()),
        }
    }

    fn info(name: &'static str, detail: impl Into<String>) -> Self {
        Self {
            name,
            status: "info",
            detail: detail.into(),
            hint: None,
        }
    }

    fn symbol(&self) -> &'static str {
        match self.status {
            "pass" => "\u{2713}",
            "fail" => "\u{2717}",
            _ => "~",
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "chunkwise=debug,chunkwise_core=debug,chunkwise_chunker=debug,chunkwise_index=debug,chunkwise_rag=debug"
    } else {
        "warn"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// File, then environment, then command-line overrides.
fn load_config(cli: &Cli) -> Result<ChunkwiseConfig> {
    let mut config = match &cli.config {
        Some(path) => ChunkwiseConfig::from_file(path)?,
        None => {
            let default_path = Path::new(CONFIG_FILE_NAME);
            if default_path.exists() {
                ChunkwiseConfig::from_file(default_path)?
            } else {
                ChunkwiseConfig::default()
            }
        }
    };
    config.apply_env();

    if let Some(url) = &cli.store_url {
        config.store.url = url.clone();
    }
    if let Some(collection) = &cli.collection {
        config.store.collection = collection.clone();
    }
    if let Some(url) = &cli.embedding_url {
        config.embedding.base_url = Some(url.clone());
        if config.llm.provider == "ollama" && config.llm.base_url.is_none() {
            config.llm.base_url = Some(url.clone());
        }
    }
    if let Some(model) = &cli.embedding_model {
        config.embedding.model = model.clone();
    }

    config.validate()?;
    Ok(config)
}

fn write_default_config() -> Result<()> {
    let path = Path::new(CONFIG_FILE_NAME);
    if path.exists() {
        miette::bail!("{CONFIG_FILE_NAME} already exists");
    }
    let body = ChunkwiseConfig::default().to_toml()?;
    let content = format!(
        "# chunkwise configuration\n# Environment variables and command-line flags override these values.\n\n{body}"
    );
    std::fs::write(path, content).into_diagnostic()?;
    println!("Created {CONFIG_FILE_NAME} with default configuration");
    Ok(())
}

fn spinner(message: &str) -> Option<ProgressBar> {
    if !std::io::stderr().is_terminal() {
        return None;
    }
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg} ({elapsed})") {
        pb.set_style(style);
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(120));
    Some(pb)
}

fn finish(spinner: Option<ProgressBar>) {
    if let Some(pb) = spinner {
        pb.finish_and_clear();
    }
}

fn open_store(config: &ChunkwiseConfig) -> Result<Arc<AnyStore>> {
    Ok(Arc::new(AnyStore::from_config(&config.store)?))
}

fn open_embedder(config: &ChunkwiseConfig) -> Result<Arc<EmbeddingClient>> {
    Ok(Arc::new(EmbeddingClient::with_config(&config.embedding)?))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value).into_diagnostic()?);
    Ok(())
}

fn filter_from(chunk_types: Vec<ChunkType>, path_prefix: Option<String>) -> SearchFilter {
    SearchFilter {
        chunk_types,
        path_prefix,
    }
}

fn normalize_extensions(extensions: &[String]) -> Vec<String> {
    extensions
        .iter()
        .map(|e| e.trim().trim_start_matches('.').to_lowercase())
        .filter(|e| !e.is_empty())
        .collect()
}

fn preview(text: &str, max_chars: usize) -> String {
    let flat = text.replace('\n', " ");
    let mut out: String = flat.chars().take(max_chars).collect();
    if flat.chars().count() > max_chars {
        out.push_str("...");
    }
    out
}

fn print_file_report(report: &FileReport) {
    match &report.error {
        Some(err) => println!("  \u{2717} {}  failed: {err}", report.file_path),
        None => {
            let fallback = report
                .fallback
                .as_deref()
                .map(|r| format!("  (line windows: {r})"))
                .unwrap_or_default();
            println!(
                "  \u{2713} {}  {} indexed, {} skipped, {} replaced{fallback}",
                report.file_path, report.indexed, report.skipped, report.removed
            );
        }
    }
}

fn print_index_summary(report: &IndexReport) {
    println!(
        "\n{} files indexed, {} failed, {} not attempted; {} chunks indexed, {} skipped ({:.1}s)",
        report.files_indexed,
        report.files_failed,
        report.files_not_attempted(),
        report.chunks_indexed,
        report.chunks_skipped,
        report.duration_ms as f64 / 1000.0
    );
    if report.aborted {
        println!("Run aborted: the vector store rejected a write.");
    } else if report.cancelled {
        println!("Run cancelled before every file was dispatched.");
    }
}

fn print_checks(title: &str, checks: &[CheckResult], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "checks": checks,
        })),
        OutputFormat::Text => {
            println!("{title}\n");
            for check in checks {
                let label = check.name.replace('_', " ");
                println!("  {} {label:<20} {}", check.symbol(), check.detail);
                if let Some(hint) = &check.hint {
                    println!("    hint: {hint}");
                }
            }
            let passed = checks.iter().filter(|c| c.status == "pass").count();
            let failed = checks.iter().filter(|c| c.status == "fail").count();
            println!("\n{passed} checks passed, {failed} failed");
            Ok(())
        }
    }
}

async fn service_checks(config: &ChunkwiseConfig) -> Result<Vec<CheckResult>> {
    let store = open_store(config)?;
    let embedder = open_embedder(config)?;
    let mut checks = Vec::new();

    match store.health().await {
        Ok(()) => checks.push(CheckResult::pass(
            "vector_store",
            format!("{} ready ({})", store.backend(), config.store.url),
        )),
        Err(e) => checks.push(CheckResult::fail(
            "vector_store",
            e.to_string(),
            "start the vector store or point --store-url / WEAVIATE_URL at it",
        )),
    }
    match embedder.health().await {
        Ok(()) => checks.push(CheckResult::pass(
            "embedding_service",
            format!("{} ready ({})", embedder.provider(), embedder.base_url()),
        )),
        Err(e) => checks.push(CheckResult::fail(
            "embedding_service",
            e.to_string(),
            "start the embedding service or point --embedding-url / OLLAMA_URL at it",
        )),
    }
    Ok(checks)
}

#[tokio::main]
async fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .build(),
        )
    }))
    .into_diagnostic()?;
    human_panic::setup_panic!();

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = match cli.command {
        Command::Init => ChunkwiseConfig::default(),
        _ => load_config(&cli)?,
    };
    let format = cli.format;

    match cli.command {
        Command::Init => write_default_config()?,
        Command::PreviewChunks { path, output } => {
            let chunker = Chunker::new(config.chunker.clone());
            let chunked = chunker.chunk_file(&path, &store_path(&path))?;

            if let Some(out) = &output {
                let json = serde_json::to_string_pretty(&chunked.chunks).into_diagnostic()?;
                std::fs::write(out, json).into_diagnostic()?;
            }

            match format {
                OutputFormat::Json => print_json(&chunked.chunks)?,
                OutputFormat::Text => {
                    println!("File: {} ({})", path.display(), chunked.language);
                    if let Some(reason) = chunked.fallback {
                        println!("Chunked by line windows: {reason}");
                    }
                    println!("Generated {} chunks:\n", chunked.chunks.len());
                    for (i, chunk) in chunked.chunks.iter().enumerate() {
                        println!(
                            "[{}] {} (lines {}-{})",
                            i + 1,
                            chunk.chunk_type.to_string().to_uppercase(),
                            chunk.start_line,
                            chunk.end_line
                        );
                        if let Some(parent) = &chunk.parent_name {
                            println!("    Parent: {parent}");
                        }
                        for (key, value) in &chunk.metadata {
                            println!("    {key}: {value}");
                        }
                        println!("    Preview: {}\n", preview(&chunk.content, 150));
                    }
                    let counts: Vec<String> = count_by_type(&chunked.chunks)
                        .iter()
                        .map(|(ty, n)| format!("{n} {ty}"))
                        .collect();
                    if !counts.is_empty() {
                        println!("Summary: {}", counts.join(", "));
                    }
                    if let Some(out) = &output {
                        println!("Chunks saved to {}", out.display());
                    }
                }
            }
        }
        Command::IndexFile { path } => {
            let store: Arc<dyn VectorStore> = open_store(&config)?;
            let indexer = Indexer::new(
                Chunker::new(config.chunker.clone()),
                open_embedder(&config)?,
                store,
                1,
            );
            indexer.prepare().await?;

            let pb = spinner(&format!("Indexing {}", path.display()));
            let result = indexer.index_file(&path).await;
            finish(pb);

            let (report, failed) = match result {
                Ok(report) => (report, false),
                Err(e) if e.is_fatal_for_run() => return Err(e.into()),
                Err(e) => (
                    FileReport {
                        file_path: store_path(&path),
                        error: Some(e.to_string()),
                        ..FileReport::default()
                    },
                    true,
                ),
            };

            match format {
                OutputFormat::Json => print_json(&report)?,
                OutputFormat::Text => {
                    print_file_report(&report);
                    println!(
                        "\n{} chunks indexed, {} skipped, {} failed",
                        report.indexed,
                        report.skipped,
                        usize::from(failed)
                    );
                }
            }
            if failed {
                std::process::exit(1);
            }
        }
        Command::IndexDirectory {
            path,
            extensions,
            workers,
        } => {
            let extensions = if extensions.is_empty() {
                normalize_extensions(&config.index.extensions)
            } else {
                normalize_extensions(&extensions)
            };
            let store: Arc<dyn VectorStore> = open_store(&config)?;

            let bar = if std::io::stderr().is_terminal() {
                let pb = ProgressBar::new(0);
                if let Ok(style) = ProgressStyle::with_template(
                    "{spinner:.cyan} [{bar:30.cyan/blue}] {pos}/{len} {wide_msg} ({elapsed})",
                ) {
                    pb.set_style(style.progress_chars("=> "));
                }
                pb.enable_steady_tick(Duration::from_millis(120));
                pb
            } else {
                ProgressBar::hidden()
            };
            let progress_bar = bar.clone();

            let indexer = Indexer::new(
                Chunker::new(config.chunker.clone()),
                open_embedder(&config)?,
                store,
                workers.unwrap_or(config.index.workers),
            )
            .with_progress(Box::new(move |done, total, report| {
                progress_bar.set_length(total as u64);
                progress_bar.set_position(done as u64);
                progress_bar.set_message(report.file_path.clone());
            }));
            indexer.prepare().await?;

            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("interrupt received, finishing files in flight");
                    on_signal.cancel();
                }
            });

            let report = indexer.index_directory(&path, &extensions, &cancel).await?;
            bar.finish_and_clear();

            match format {
                OutputFormat::Json => print_json(&report)?,
                OutputFormat::Text => {
                    println!("Indexed {}:", path.display());
                    for file in &report.files {
                        print_file_report(file);
                    }
                    print_index_summary(&report);
                }
            }
            if report.aborted {
                std::process::exit(1);
            }
            if report.cancelled {
                std::process::exit(130);
            }
        }
        Command::Search {
            query,
            limit,
            chunk_types,
            path_prefix,
        } => {
            let retriever = Retriever::new(open_embedder(&config)?, open_store(&config)?, &config.retrieval);
            let pb = spinner("Searching...");
            let results = retriever
                .search(&query, limit, filter_from(chunk_types, path_prefix))
                .await;
            finish(pb);
            let results = results?;

            match format {
                OutputFormat::Json => print_json(&results)?,
                OutputFormat::Text => {
                    if results.is_empty() {
                        println!("No results found");
                    } else {
                        println!("Found {} results for: '{query}'\n", results.len());
                    }
                    for (i, result) in results.iter().enumerate() {
                        let chunk = &result.chunk;
                        let parent = chunk
                            .parent_name
                            .as_deref()
                            .map(|p| format!(" (in {p})"))
                            .unwrap_or_default();
                        println!(
                            "[{}] {} - {}{parent}  score {:.3}",
                            i + 1,
                            chunk.chunk_type.to_string().to_uppercase(),
                            chunk.file_path,
                            result.score
                        );
                        println!("    Lines {}-{}", chunk.start_line, chunk.end_line);
                        let body: String = chunk.content.chars().take(300).collect();
                        for line in body.lines() {
                            println!("    | {line}");
                        }
                        if chunk.content.chars().count() > 300 {
                            println!("    | ...");
                        }
                        println!();
                    }
                }
            }
        }
        Command::Ask {
            question,
            model,
            context_size,
            chunk_types,
            path_prefix,
        } => {
            let mut retriever = Retriever::new(open_embedder(&config)?, open_store(&config)?, &config.retrieval);
            if let Some(n) = context_size {
                retriever = retriever.with_context_size(n);
            }
            let mut llm = LlmClient::new(&config.llm)?;
            if let Some(model) = model {
                llm = llm.with_model(model);
            }
            let assistant = CodeAssistant::new(retriever, Synthesizer::new(llm));

            let pb = spinner("Generating answer...");
            let answer = assistant
                .ask(&question, filter_from(chunk_types, path_prefix))
                .await;
            finish(pb);
            let answer = answer?;

            match format {
                OutputFormat::Json => print_json(&answer)?,
                OutputFormat::Text => {
                    println!("Question: {question}\n");
                    println!("{}\n", answer.text);
                    if answer.citations.is_empty() {
                        println!("Sources: none (no relevant code was found)");
                    } else {
                        println!("Sources:");
                        for citation in &answer.citations {
                            println!("  - {citation} ({})", citation.chunk_type);
                        }
                    }
                    if answer.context_truncated {
                        println!("(context was shortened to fit the model's input budget)");
                    }
                    println!("\nModel: {}", answer.model);
                }
            }
        }
        Command::Stats => {
            let store = open_store(&config)?;
            let stats = store.stats().await?;
            match format {
                OutputFormat::Json => print_json(&stats)?,
                OutputFormat::Text => {
                    println!("Code index statistics\n");
                    println!("  {:<16} {}", "Backend", stats.backend);
                    println!("  {:<16} {}", "Collection", stats.collection);
                    println!("  {:<16} {}", "Total chunks", stats.total_chunks);
                    if let Some(files) = stats.total_files {
                        println!("  {:<16} {files}", "Files");
                    }
                    for (chunk_type, count) in &stats.by_type {
                        println!("    {chunk_type:<14} {count}");
                    }
                }
            }
        }
        Command::TestConnection => {
            let mut checks = service_checks(&config).await?;
            let failed = checks.iter().any(|c| c.status == "fail");

            if !failed {
                let store = open_store(&config)?;
                let embedder = open_embedder(&config)?;
                match store.stats().await {
                    Ok(stats) => checks.push(CheckResult::info(
                        "collection",
                        format!("{} holds {} chunks", stats.collection, stats.total_chunks),
                    )),
                    Err(e) => checks.push(CheckResult::info("collection", e.to_string())),
                }
                if embedder.provider() == Provider::Ollama {
                    match embedder.list_models().await {
                        Ok(models) => checks.push(CheckResult::info(
                            "available_models",
                            if models.is_empty() {
                                "none (run 'chunkwise init-models')".to_string()
                            } else {
                                models.join(", ")
                            },
                        )),
                        Err(e) => checks.push(CheckResult::info("available_models", e.to_string())),
                    }
                }
                match embedder.probe().await {
                    Ok(dims) => checks.push(CheckResult::pass(
                        "embedding_model",
                        format!("{} produces {dims}-dimensional vectors", embedder.model()),
                    )),
                    Err(e) => checks.push(CheckResult::fail(
                        "embedding_model",
                        e.to_string(),
                        "run 'chunkwise init-models' or set embedding.dimensions to match the model",
                    )),
                }
            }

            print_checks("Connection test", &checks, format)?;
            if checks.iter().any(|c| c.status == "fail") {
                std::process::exit(1);
            }
        }
        Command::CheckServices => {
            let checks = service_checks(&config).await?;
            print_checks("Service check", &checks, format)?;
            if checks.iter().any(|c| c.status == "fail") {
                std::process::exit(1);
            }
        }
        Command::InitSchema => {
            let store = open_store(&config)?;
            let embedder = open_embedder(&config)?;
            let dims = embedder.probe().await?;
            store.ensure_schema(dims).await?;
            match format {
                OutputFormat::Json => print_json(&serde_json::json!({
                    "backend": store.backend(),
                    "collection": config.store.collection,
                    "dimensions": dims,
                }))?,
                OutputFormat::Text => println!(
                    "Schema ready: {} collection '{}' ({dims} dimensions)",
                    store.backend(),
                    config.store.collection
                ),
            }
        }
        Command::InitModels => {
            let embedder = open_embedder(&config)?;
            if embedder.provider() != Provider::Ollama {
                miette::bail!(miette::miette!(
                    help = "init-models only pulls into Ollama; set embedding.provider = \"ollama\"",
                    "embedding provider '{}' does not support model downloads",
                    embedder.provider()
                ));
            }

            let pb = spinner(&format!("Pulling {}...", embedder.model()));
            let pulled = embedder.pull_model(embedder.model()).await;
            finish(pb);
            pulled?;
            println!("Pulled embedding model {}", embedder.model());

            if config.llm.provider == "ollama" {
                let chat_host = EmbeddingClient::with_config(&EmbeddingConfig {
                    base_url: Some(config.llm.resolved_base_url()),
                    ..config.embedding.clone()
                })?;
                let pb = spinner(&format!("Pulling {}...", config.llm.model));
                let pulled = chat_host.pull_model(&config.llm.model).await;
                finish(pb);
                pulled?;
                println!("Pulled chat model {}", config.llm.model);
            }
        }
    }

    Ok(())
}
