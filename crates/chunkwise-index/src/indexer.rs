//! File and directory indexing.
//!
//! One file goes read → chunk → embed → (delete old chunks, upsert new ones).
//! The store writes for a path run under a per-path lock so two runs over
//! the same file never interleave their delete and upsert.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use chunkwise_chunker::walker::{to_slash, walk_sources};
use chunkwise_chunker::Chunker;
use chunkwise_core::{Chunk, ChunkwiseError, IndexedChunk};
use futures::future;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::embedding::EmbeddingClient;
use crate::store::VectorStore;

/// What happened to one file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileReport {
    /// Path the chunks are stored under.
    pub file_path: String,
    /// Chunks produced by the chunker.
    pub chunks: usize,
    /// Chunks written to the store.
    pub indexed: usize,
    /// Chunks dropped because they could not be embedded.
    pub skipped: usize,
    /// Previously stored chunks removed before writing.
    pub removed: usize,
    /// Why line-window chunking was used, if it was.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback: Option<String>,
    /// Set when the file could not be indexed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Summary of a directory run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexReport {
    /// Per-file reports, sorted by path.
    pub files: Vec<FileReport>,
    /// Files selected by the walk.
    pub total_files: usize,
    pub files_indexed: usize,
    pub files_failed: usize,
    pub chunks_indexed: usize,
    pub chunks_skipped: usize,
    /// Dispatch stopped because of cancellation.
    pub cancelled: bool,
    /// Dispatch stopped because the store failed.
    pub aborted: bool,
    pub duration_ms: u64,
}

impl IndexReport {
    /// Files never dispatched because the run stopped early.
    pub fn files_not_attempted(&self) -> usize {
        self.total_files.saturating_sub(self.files.len())
    }
}

/// Called after each file of a directory run with `(done, total, report)`.
pub type ProgressFn = Box<dyn Fn(usize, usize, &FileReport) + Send + Sync>;

/// Per-path async locks.
#[derive(Default)]
struct PathLocks {
    inner: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl PathLocks {
    fn lock_for(&self, path: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        map.retain(|_, lock| Arc::strong_count(lock) > 1);
        Arc::clone(map.entry(path.to_string()).or_default())
    }
}

/// Drives chunking, embedding and storage.
pub struct Indexer {
    chunker: Chunker,
    embedder: Arc<EmbeddingClient>,
    store: Arc<dyn VectorStore>,
    workers: usize,
    locks: PathLocks,
    progress: Option<ProgressFn>,
}

impl std::fmt::Debug for Indexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Indexer")
            .field("embedder", &self.embedder)
            .field("store", &self.store.backend())
            .field("workers", &self.workers)
            .finish_non_exhaustive()
    }
}

impl Indexer {
    pub fn new(
        chunker: Chunker,
        embedder: Arc<EmbeddingClient>,
        store: Arc<dyn VectorStore>,
        workers: usize,
    ) -> Self {
        Self {
            chunker,
            embedder,
            store,
            workers: workers.max(1),
            locks: PathLocks::default(),
            progress: None,
        }
    }

    /// Report each finished file of a directory run.
    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Check the embedding model and create the collection if needed.
    ///
    /// # Errors
    ///
    /// Returns [`ChunkwiseError::Config`] on a dimensionality mismatch and
    /// propagates embedding and store failures.
    pub async fn prepare(&self) -> Result<usize, ChunkwiseError> {
        let dimensions = self.embedder.probe().await?;
        self.store.ensure_schema(dimensions).await?;
        Ok(dimensions)
    }

    /// Index one file, replacing whatever was stored for it.
    ///
    /// Chunks that cannot be embedded are skipped and counted. If none of a
    /// file's chunks can be embedded the store is left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`ChunkwiseError::FileNotFound`] or [`ChunkwiseError::Io`] if
    /// the file cannot be read, [`ChunkwiseError::Embedding`] if no chunk
    /// could be embedded, and [`ChunkwiseError::IndexStore`] if the store
    /// rejects the write.
    pub async fn index_file(&self, path: &Path) -> Result<FileReport, ChunkwiseError> {
        let file_path = store_path(path);
        let chunked = self.chunker.chunk_file(path, &file_path)?;
        let total = chunked.chunks.len();

        let texts: Vec<String> = chunked.chunks.iter().map(Chunk::embedding_text).collect();
        let outcome = self.embedder.embed_batch(&texts).await;

        let mut indexed = Vec::with_capacity(total);
        let mut skipped = 0;
        for (chunk, result) in chunked.chunks.into_iter().zip(outcome.into_results()) {
            match result {
                Ok(vector) => indexed.push(IndexedChunk::new(chunk, vector)),
                Err(err) => {
                    skipped += 1;
                    tracing::warn!(
                        file = %file_path,
                        start_line = chunk.start_line,
                        chunk_type = %chunk.chunk_type,
                        error = %err,
                        "skipping chunk that could not be embedded"
                    );
                }
            }
        }
        if total > 0 && indexed.is_empty() {
            return Err(ChunkwiseError::Embedding(format!(
                "none of the {total} chunks of {file_path} could be embedded"
            )));
        }

        let lock = self.locks.lock_for(&file_path);
        let _guard = lock.lock().await;
        let removed = self.store.delete_file(&file_path).await?;
        let written = if indexed.is_empty() {
            0
        } else {
            self.store.upsert(indexed).await?
        };

        tracing::info!(
            file = %file_path,
            chunks = total,
            indexed = written,
            skipped,
            removed,
            "indexed file"
        );

        Ok(FileReport {
            file_path,
            chunks: total,
            indexed: written,
            skipped,
            removed,
            fallback: chunked.fallback.map(|r| r.to_string()),
            error: None,
        })
    }

    /// Index every matching file under `root`, at most `workers` at a time.
    ///
    /// A failing file is recorded and the run continues. A store failure, or
    /// `cancel` firing, stops dispatch of new files; files already in flight
    /// finish.
    ///
    /// # Errors
    ///
    /// Returns [`ChunkwiseError::FileNotFound`] if `root` does not exist.
    pub async fn index_directory(
        &self,
        root: &Path,
        extensions: &[String],
        cancel: &CancellationToken,
    ) -> Result<IndexReport, ChunkwiseError> {
        let started = Instant::now();
        let sources = walk_sources(root, extensions)?;
        let total_files = sources.len();
        tracing::info!(root = %root.display(), files = total_files, "indexing directory");

        let aborted = AtomicBool::new(false);
        let mut done = 0;
        let mut files = Vec::with_capacity(total_files);

        let mut results = stream::iter(sources.iter())
            .take_while(|_| future::ready(!cancel.is_cancelled() && !aborted.load(Ordering::SeqCst)))
            .map(|source| self.index_tracked(&source.path, &aborted))
            .buffer_unordered(self.workers);

        while let Some(report) = results.next().await {
            done += 1;
            if let Some(progress) = &self.progress {
                progress(done, total_files, &report);
            }
            files.push(report);
        }
        drop(results);

        files.sort_by(|a, b| a.file_path.cmp(&b.file_path));
        let cancelled = cancel.is_cancelled() && files.len() < total_files;
        let aborted = aborted.load(Ordering::SeqCst);

        let report = IndexReport {
            total_files,
            files_indexed: files.iter().filter(|f| f.error.is_none()).count(),
            files_failed: files.iter().filter(|f| f.error.is_some()).count(),
            chunks_indexed: files.iter().map(|f| f.indexed).sum(),
            chunks_skipped: files.iter().map(|f| f.skipped).sum(),
            files,
            cancelled,
            aborted,
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        };

        if report.aborted {
            tracing::error!(
                not_attempted = report.files_not_attempted(),
                "store failure stopped the run"
            );
        } else if report.cancelled {
            tracing::warn!(
                not_attempted = report.files_not_attempted(),
                "run cancelled"
            );
        }
        Ok(report)
    }

    async fn index_tracked(&self, path: &Path, aborted: &AtomicBool) -> FileReport {
        match self.index_file(path).await {
            Ok(report) => report,
            Err(err) => {
                if err.is_fatal_for_run() {
                    aborted.store(true, Ordering::SeqCst);
                }
                tracing::warn!(file = %path.display(), error = %err, "failed to index file");
                FileReport {
                    file_path: store_path(path),
                    error: Some(err.to_string()),
                    ..FileReport::default()
                }
            }
        }
    }
}

/// The key a file's chunks are stored under: the path as given, with `/`
/// separators and without `.` components.
pub fn store_path(path: &Path) -> String {
    to_slash(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_path_drops_current_dir_components() {
        assert_eq!(store_path(Path::new("./src/./a.py")), "src/a.py");
        assert_eq!(store_path(Path::new("src/a.py")), "src/a.py");
    }

    #[test]
    fn not_attempted_counts_missing_reports() {
        let report = IndexReport {
            total_files: 5,
            files: vec![FileReport::default(), FileReport::default()],
            ..IndexReport::default()
        };
        assert_eq!(report.files_not_attempted(), 3);
    }

    #[tokio::test]
    async fn path_locks_serialize_same_path() {
        let locks = PathLocks::default();
        let first = locks.lock_for("a.py");
        let guard = first.lock().await;

        let second = locks.lock_for("a.py");
        assert!(Arc::ptr_eq(&first, &second));
        assert!(second.try_lock().is_err());

        let other = locks.lock_for("b.py");
        assert!(other.try_lock().is_ok());

        drop(guard);
        assert!(second.try_lock().is_ok());
    }

    #[test]
    fn idle_locks_are_pruned() {
        let locks = PathLocks::default();
        drop(locks.lock_for("a.py"));
        let _held = locks.lock_for("b.py");
        let map = locks.inner.lock().unwrap();
        assert!(!map.contains_key("a.py"));
        assert!(map.contains_key("b.py"));
    }
}
