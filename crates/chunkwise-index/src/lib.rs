//! Embedding, vector storage and indexing for chunkwise.
//!
//! - [`embedding::EmbeddingClient`] turns chunk text into vectors
//! - [`store::VectorStore`] persists and searches them (Weaviate or SQLite)
//! - [`indexer::Indexer`] runs files and directories through the pipeline

pub mod embedding;
pub mod indexer;
pub mod retry;
pub mod store;

pub use embedding::{EmbedOutcome, EmbeddingClient, Provider};
pub use indexer::{FileReport, IndexReport, Indexer};
pub use store::{AnyStore, SqliteStore, VectorStore, WeaviateStore};
