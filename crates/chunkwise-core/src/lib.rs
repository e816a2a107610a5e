//! Core types, configuration, and error handling for chunkwise.
//!
//! This crate provides the shared foundation used by all other chunkwise crates:
//! - [`ChunkwiseError`]: unified error type using `thiserror`
//! - [`ChunkwiseConfig`]: configuration loaded from `.chunkwise.toml`
//! - Shared types: [`Chunk`], [`ChunkType`], [`IndexedChunk`], [`SearchResult`],
//!   [`SearchFilter`], [`StoreStats`], [`OutputFormat`]

mod config;
mod error;
mod types;

pub use config::{
    ChunkerConfig, ChunkwiseConfig, EmbeddingConfig, IndexConfig, LlmConfig, RetrievalConfig,
    StoreConfig, CONFIG_FILE_NAME,
};
pub use error::ChunkwiseError;
pub use types::{
    chunk_id, Chunk, ChunkType, IndexedChunk, OutputFormat, SearchFilter, SearchResult, StoreStats,
};

/// A convenience `Result` type for chunkwise operations.
pub type Result<T> = std::result::Result<T, ChunkwiseError>;
