//! Vector store adapters.
//!
//! [`VectorStore`] is object-safe so the indexer and retrieval layers can
//! hold an `Arc<dyn VectorStore>`. [`AnyStore`] picks a backend from
//! configuration.

mod sqlite;
mod weaviate;

use std::cmp::Ordering;
use std::future::Future;
use std::pin::Pin;

use chunkwise_core::{ChunkwiseError, IndexedChunk, SearchFilter, SearchResult, StoreConfig, StoreStats};

pub use sqlite::SqliteStore;
pub use weaviate::WeaviateStore;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Persistent chunk and vector storage.
///
/// Every operation reports failures as [`ChunkwiseError::IndexStore`] (or
/// `Config` for bad settings).
pub trait VectorStore: Send + Sync {
    /// Backend name, as shown in stats.
    fn backend(&self) -> &'static str;

    /// Create the collection if missing. Fails if it already holds vectors
    /// of a different dimensionality.
    fn ensure_schema(&self, dimensions: usize) -> BoxFuture<'_, Result<(), ChunkwiseError>>;

    /// Insert or replace chunks by id. Returns the number written.
    fn upsert(&self, chunks: Vec<IndexedChunk>) -> BoxFuture<'_, Result<usize, ChunkwiseError>>;

    /// Up to `limit` chunks nearest to `vector`, best first.
    fn search(
        &self,
        vector: Vec<f32>,
        limit: usize,
        filter: SearchFilter,
    ) -> BoxFuture<'_, Result<Vec<SearchResult>, ChunkwiseError>>;

    /// Remove every chunk stored for `file_path`. Returns the number removed.
    fn delete_file<'a>(&'a self, file_path: &'a str)
        -> BoxFuture<'a, Result<usize, ChunkwiseError>>;

    fn stats(&self) -> BoxFuture<'_, Result<StoreStats, ChunkwiseError>>;

    /// Connectivity probe.
    fn health(&self) -> BoxFuture<'_, Result<(), ChunkwiseError>>;
}

macro_rules! delegate_store {
    ($self:expr, |$s:ident| $expr:expr) => {
        match $self {
            AnyStore::Weaviate($s) => $expr,
            AnyStore::Sqlite($s) => $expr,
        }
    };
}

/// A store chosen at runtime from [`StoreConfig::backend`].
#[derive(Debug)]
pub enum AnyStore {
    Weaviate(WeaviateStore),
    Sqlite(SqliteStore),
}

impl AnyStore {
    /// Build the configured backend.
    ///
    /// # Errors
    ///
    /// Returns [`ChunkwiseError::Config`] for an unknown backend name and
    /// [`ChunkwiseError::IndexStore`] if a SQLite database cannot be opened.
    ///
    /// # Examples
    ///
    /// ```
    /// use chunkwise_core::StoreConfig;
    /// use chunkwise_index::store::{AnyStore, VectorStore};
    ///
    /// let store = AnyStore::from_config(&StoreConfig::default()).unwrap();
    /// assert_eq!(store.backend(), "weaviate");
    /// ```
    pub fn from_config(config: &StoreConfig) -> Result<Self, ChunkwiseError> {
        match config.backend.to_lowercase().as_str() {
            "weaviate" => Ok(AnyStore::Weaviate(WeaviateStore::with_config(config)?)),
            "sqlite" => Ok(AnyStore::Sqlite(SqliteStore::open(&config.path)?)),
            other => Err(ChunkwiseError::Config(format!(
                "unknown store backend '{other}' (expected 'weaviate' or 'sqlite')"
            ))),
        }
    }
}

impl VectorStore for AnyStore {
    fn backend(&self) -> &'static str {
        delegate_store!(self, |s| s.backend())
    }

    fn ensure_schema(&self, dimensions: usize) -> BoxFuture<'_, Result<(), ChunkwiseError>> {
        delegate_store!(self, |s| s.ensure_schema(dimensions))
    }

    fn upsert(&self, chunks: Vec<IndexedChunk>) -> BoxFuture<'_, Result<usize, ChunkwiseError>> {
        delegate_store!(self, |s| s.upsert(chunks))
    }

    fn search(
        &self,
        vector: Vec<f32>,
        limit: usize,
        filter: SearchFilter,
    ) -> BoxFuture<'_, Result<Vec<SearchResult>, ChunkwiseError>> {
        delegate_store!(self, |s| s.search(vector, limit, filter))
    }

    fn delete_file<'a>(
        &'a self,
        file_path: &'a str,
    ) -> BoxFuture<'a, Result<usize, ChunkwiseError>> {
        delegate_store!(self, |s| s.delete_file(file_path))
    }

    fn stats(&self) -> BoxFuture<'_, Result<StoreStats, ChunkwiseError>> {
        delegate_store!(self, |s| s.stats())
    }

    fn health(&self) -> BoxFuture<'_, Result<(), ChunkwiseError>> {
        delegate_store!(self, |s| s.health())
    }
}

/// Best score first; ties by file path, then start line.
pub fn rank_results(results: &mut [SearchResult]) {
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.chunk.file_path.cmp(&b.chunk.file_path))
            .then_with(|| a.chunk.start_line.cmp(&b.chunk.start_line))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chunkwise_core::{Chunk, ChunkType};

    fn result(path: &str, line: u32, score: f64) -> SearchResult {
        SearchResult {
            chunk: Chunk::new(path, "python", ChunkType::Function, "pass", line, line),
            score,
            matched: Default::default(),
        }
    }

    #[test]
    fn ranking_breaks_ties_by_path_then_line() {
        let mut results = vec![
            result("b.py", 1, 0.5),
            result("a.py", 9, 0.5),
            result("a.py", 2, 0.5),
            result("z.py", 1, 0.9),
        ];
        rank_results(&mut results);
        let order: Vec<(&str, u32)> = results
            .iter()
            .map(|r| (r.chunk.file_path.as_str(), r.chunk.start_line))
            .collect();
        assert_eq!(order, vec![("z.py", 1), ("a.py", 2), ("a.py", 9), ("b.py", 1)]);
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let config = StoreConfig {
            backend: "pinecone".into(),
            ..StoreConfig::default()
        };
        assert!(matches!(
            AnyStore::from_config(&config),
            Err(ChunkwiseError::Config(_))
        ));
    }

    #[tokio::test]
    async fn sqlite_backend_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig {
            backend: "sqlite".into(),
            path: dir.path().join("nested/index.db"),
            ..StoreConfig::default()
        };
        let store = AnyStore::from_config(&config).unwrap();
        assert_eq!(store.backend(), "sqlite");
        store.health().await.unwrap();
        assert!(dir.path().join("nested/index.db").exists());
    }
}
