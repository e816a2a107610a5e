//! Embedded SQLite backend.
//!
//! Chunks live in one table with their vectors stored as little-endian `f32`
//! BLOBs. Search loads every candidate row and ranks by cosine similarity in
//! Rust, which is fine for a local index of a single repository.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use chunkwise_core::{
    Chunk, ChunkType, ChunkwiseError, IndexedChunk, SearchFilter, SearchResult, StoreStats,
};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{rank_results, BoxFuture, VectorStore};

const DIMENSIONS_KEY: &str = "embedding_dimensions";

const CHUNK_COLUMNS: &str = "id, chunk_type, content, start_line, end_line, file_path, language,
     parent_name, signature, sequence, metadata, embedding";

/// SQLite-backed [`VectorStore`].
///
/// # Examples
///
/// ```
/// use chunkwise_index::store::SqliteStore;
///
/// let store = SqliteStore::in_memory().unwrap();
/// assert_eq!(store.dimensions().unwrap(), None);
/// ```
pub struct SqliteStore {
    conn: Mutex<Connection>,
    location: String,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("location", &self.location)
            .finish_non_exhaustive()
    }
}

fn store_err(context: &str, e: impl std::fmt::Display) -> ChunkwiseError {
    ChunkwiseError::IndexStore(format!("{context}: {e}"))
}

impl SqliteStore {
    /// Open or create a database at `path`, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns [`ChunkwiseError::IndexStore`] if the database cannot be opened.
    pub fn open(path: &Path) -> Result<Self, ChunkwiseError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| store_err("failed to create index directory", e))?;
        }
        let conn = Connection::open(path).map_err(|e| store_err("failed to open database", e))?;
        Self::from_connection(conn, path.display().to_string())
    }

    /// Create a throwaway in-memory store.
    ///
    /// # Errors
    ///
    /// Returns [`ChunkwiseError::IndexStore`] if schema creation fails.
    pub fn in_memory() -> Result<Self, ChunkwiseError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| store_err("failed to create in-memory database", e))?;
        Self::from_connection(conn, ":memory:".into())
    }

    fn from_connection(conn: Connection, location: String) -> Result<Self, ChunkwiseError> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS metadata (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS chunks (
                id TEXT PRIMARY KEY,
                chunk_type TEXT NOT NULL,
                content TEXT NOT NULL,
                start_line INTEGER NOT NULL,
                end_line INTEGER NOT NULL,
                file_path TEXT NOT NULL,
                language TEXT NOT NULL,
                parent_name TEXT,
                signature TEXT,
                sequence INTEGER,
                metadata TEXT NOT NULL,
                embedding BLOB NOT NULL,
                indexed_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS chunks_file_path ON chunks(file_path);
            ",
        )
        .map_err(|e| store_err("failed to create schema", e))?;

        Ok(Self {
            conn: Mutex::new(conn),
            location,
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, ChunkwiseError> {
        self.conn
            .lock()
            .map_err(|_| ChunkwiseError::IndexStore("sqlite connection lock poisoned".into()))
    }

    /// Vector length recorded for this database, if any chunk or schema
    /// call has fixed it.
    ///
    /// # Errors
    ///
    /// Returns [`ChunkwiseError::IndexStore`] on query failure or corrupt metadata.
    pub fn dimensions(&self) -> Result<Option<usize>, ChunkwiseError> {
        let conn = self.conn()?;
        stored_dimensions(&conn)
    }

    fn ensure_schema_sync(&self, dimensions: usize) -> Result<(), ChunkwiseError> {
        let conn = self.conn()?;
        match stored_dimensions(&conn)? {
            Some(stored) if stored != dimensions => Err(ChunkwiseError::IndexStore(format!(
                "index at {} holds {stored}-dimensional vectors but the embedding model produces {dimensions}; \
                 delete it or point store.path elsewhere to rebuild",
                self.location
            ))),
            Some(_) => Ok(()),
            None => {
                conn.execute(
                    "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
                    params![DIMENSIONS_KEY, dimensions.to_string()],
                )
                .map_err(|e| store_err("failed to record dimensions", e))?;
                Ok(())
            }
        }
    }

    fn upsert_sync(&self, chunks: Vec<IndexedChunk>) -> Result<usize, ChunkwiseError> {
        let Some(first) = chunks.first() else {
            return Ok(0);
        };
        let expected = match self.dimensions()? {
            Some(dims) => dims,
            None => {
                let dims = first.vector.len();
                self.ensure_schema_sync(dims)?;
                dims
            }
        };
        if let Some(bad) = chunks.iter().find(|c| c.vector.len() != expected) {
            return Err(ChunkwiseError::IndexStore(format!(
                "chunk {} has a {}-dimensional vector, index expects {expected}",
                bad.chunk.id,
                bad.vector.len()
            )));
        }

        let mut conn = self.conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| store_err("failed to begin transaction", e))?;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT OR REPLACE INTO chunks
                     (id, chunk_type, content, start_line, end_line, file_path, language,
                      parent_name, signature, sequence, metadata, embedding, indexed_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                )
                .map_err(|e| store_err("failed to prepare insert", e))?;

            for indexed in &chunks {
                let chunk = &indexed.chunk;
                let metadata = serde_json::to_string(&chunk.metadata)?;
                stmt.execute(params![
                    chunk.id,
                    chunk.chunk_type.as_str(),
                    chunk.content,
                    chunk.start_line,
                    chunk.end_line,
                    chunk.file_path,
                    chunk.language,
                    chunk.parent_name,
                    chunk.signature,
                    chunk.sequence,
                    metadata,
                    floats_to_bytes(&indexed.vector),
                    indexed.indexed_at.to_rfc3339(),
                ])
                .map_err(|e| store_err("failed to insert chunk", e))?;
            }
        }
        tx.commit()
            .map_err(|e| store_err("failed to commit chunks", e))?;
        Ok(chunks.len())
    }

    fn search_sync(
        &self,
        vector: &[f32],
        limit: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<SearchResult>, ChunkwiseError> {
        if let Some(dims) = self.dimensions()? {
            if dims != vector.len() {
                return Err(ChunkwiseError::IndexStore(format!(
                    "query vector has {} dimensions, index expects {dims}",
                    vector.len()
                )));
            }
        }

        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!("SELECT {CHUNK_COLUMNS} FROM chunks"))
            .map_err(|e| store_err("failed to prepare query", e))?;
        let rows = stmt
            .query_map([], read_row)
            .map_err(|e| store_err("failed to query chunks", e))?;

        let mut results = Vec::new();
        for row in rows {
            let (chunk, embedding) = row.map_err(|e| store_err("failed to read row", e))?;
            if !filter.matches(&chunk) {
                continue;
            }
            let score = cosine_similarity(vector, &bytes_to_floats(&embedding));
            let matched = filter.matched_metadata(&chunk);
            results.push(SearchResult {
                chunk,
                score,
                matched,
            });
        }

        rank_results(&mut results);
        results.truncate(limit);
        Ok(results)
    }

    fn delete_file_sync(&self, file_path: &str) -> Result<usize, ChunkwiseError> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM chunks WHERE file_path = ?1", params![file_path])
            .map_err(|e| store_err("failed to delete chunks", e))
    }

    fn stats_sync(&self) -> Result<StoreStats, ChunkwiseError> {
        let conn = self.conn()?;
        let total_chunks: i64 = conn
            .query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))
            .map_err(|e| store_err("failed to count chunks", e))?;
        let total_files: i64 = conn
            .query_row("SELECT COUNT(DISTINCT file_path) FROM chunks", [], |row| {
                row.get(0)
            })
            .map_err(|e| store_err("failed to count files", e))?;

        let mut stmt = conn
            .prepare("SELECT chunk_type, COUNT(*) FROM chunks GROUP BY chunk_type")
            .map_err(|e| store_err("failed to prepare query", e))?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
            .map_err(|e| store_err("failed to group chunks", e))?;
        let mut by_type = BTreeMap::new();
        for row in rows {
            let (chunk_type, count) = row.map_err(|e| store_err("failed to read row", e))?;
            by_type.insert(chunk_type, count as usize);
        }

        Ok(StoreStats {
            backend: "sqlite".into(),
            collection: self.location.clone(),
            total_chunks: total_chunks as usize,
            total_files: Some(total_files as usize),
            by_type,
        })
    }

    /// Timestamp at which `id` was written, if stored.
    ///
    /// # Errors
    ///
    /// Returns [`ChunkwiseError::IndexStore`] on query failure.
    pub fn indexed_at(&self, id: &str) -> Result<Option<DateTime<Utc>>, ChunkwiseError> {
        let conn = self.conn()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT indexed_at FROM chunks WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| store_err("failed to read chunk", e))?;
        raw.map(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| store_err("corrupt timestamp", e))
        })
        .transpose()
    }
}

impl VectorStore for SqliteStore {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    fn ensure_schema(&self, dimensions: usize) -> BoxFuture<'_, Result<(), ChunkwiseError>> {
        Box::pin(async move { self.ensure_schema_sync(dimensions) })
    }

    fn upsert(&self, chunks: Vec<IndexedChunk>) -> BoxFuture<'_, Result<usize, ChunkwiseError>> {
        Box::pin(async move {
            let count = self.upsert_sync(chunks)?;
            tracing::debug!(count, "upserted chunks into sqlite");
            Ok(count)
        })
    }

    fn search(
        &self,
        vector: Vec<f32>,
        limit: usize,
        filter: SearchFilter,
    ) -> BoxFuture<'_, Result<Vec<SearchResult>, ChunkwiseError>> {
        Box::pin(async move { self.search_sync(&vector, limit, &filter) })
    }

    fn delete_file<'a>(
        &'a self,
        file_path: &'a str,
    ) -> BoxFuture<'a, Result<usize, ChunkwiseError>> {
        Box::pin(async move { self.delete_file_sync(file_path) })
    }

    fn stats(&self) -> BoxFuture<'_, Result<StoreStats, ChunkwiseError>> {
        Box::pin(async move { self.stats_sync() })
    }

    fn health(&self) -> BoxFuture<'_, Result<(), ChunkwiseError>> {
        Box::pin(async move {
            let conn = self.conn()?;
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                .map_err(|e| store_err("sqlite health check failed", e))?;
            Ok(())
        })
    }
}

fn stored_dimensions(conn: &Connection) -> Result<Option<usize>, ChunkwiseError> {
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM metadata WHERE key = ?1",
            params![DIMENSIONS_KEY],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| store_err("failed to read metadata", e))?;
    value
        .map(|v| {
            v.parse::<usize>().map_err(|_| {
                ChunkwiseError::IndexStore(format!("corrupted dimension metadata in index: '{v}'"))
            })
        })
        .transpose()
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<(Chunk, Vec<u8>)> {
    let chunk_type: String = row.get(1)?;
    let chunk_type: ChunkType = chunk_type
        .parse()
        .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, e.into()))?;
    let metadata: String = row.get(10)?;
    let metadata: BTreeMap<String, String> = serde_json::from_str(&metadata)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(10, Type::Text, Box::new(e)))?;

    let chunk = Chunk {
        id: row.get(0)?,
        chunk_type,
        content: row.get(2)?,
        start_line: row.get(3)?,
        end_line: row.get(4)?,
        file_path: row.get(5)?,
        language: row.get(6)?,
        parent_name: row.get(7)?,
        signature: row.get(8)?,
        sequence: row.get(9)?,
        metadata,
    };
    Ok((chunk, row.get(11)?))
}

fn floats_to_bytes(floats: &[f32]) -> Vec<u8> {
    floats.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn bytes_to_floats(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let (dot, norm_a, norm_b) = a.iter().zip(b).fold((0.0f64, 0.0f64, 0.0f64), |acc, (x, y)| {
        let (x, y) = (f64::from(*x), f64::from(*y));
        (acc.0 + x * y, acc.1 + x * x, acc.2 + y * y)
    });

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        return 0.0;
    }
    dot / denom
}
