//! Syntax-aware chunking of source files.
//!
//! The pipeline for one file is:
//! - [`parser::parse`] resolves the language through the [`languages`]
//!   registry and returns a tree or a [`parser::ParseFailure`]
//! - on success, [`extractor::extract`] emits class, method, function,
//!   import, global and docstring chunks
//! - on failure, [`fallback::line_windows`] cuts fixed-size line windows
//! - [`splitter::split_chunk`] enforces the size budget on every chunk

pub mod extractor;
pub mod fallback;
pub mod languages;
pub mod parser;
pub mod splitter;
mod text;
pub mod walker;

use std::path::Path;

use chunkwise_core::{Chunk, ChunkType, ChunkerConfig, ChunkwiseError};

use crate::fallback::FallbackReason;
use crate::parser::ParseFailure;

/// Chunks produced for one file.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkedFile {
    /// Final chunks, ascending by start line.
    pub chunks: Vec<Chunk>,
    /// Language tag used (the extension when no grammar matched).
    pub language: String,
    /// Set when structural extraction was skipped.
    pub fallback: Option<FallbackReason>,
}

/// Turns source text into size-bounded chunks.
///
/// # Examples
///
/// ```
/// use chunkwise_chunker::Chunker;
/// use chunkwise_core::{ChunkType, ChunkerConfig};
///
/// let chunker = Chunker::new(ChunkerConfig::default());
/// let file = chunker.chunk_source("app.py", "import os\n\ndef run():\n    return os.name\n", None);
/// assert_eq!(file.chunks.len(), 2);
/// assert_eq!(file.chunks[1].chunk_type, ChunkType::Function);
/// assert!(file.fallback.is_none());
/// ```
#[derive(Debug, Clone, Default)]
pub struct Chunker {
    config: ChunkerConfig,
}

impl Chunker {
    /// Create a chunker with the given budgets.
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    /// Budgets in use.
    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Chunk in-memory source.
    ///
    /// The language comes from `language_hint` when given, otherwise from the
    /// extension of `file_path`. Never fails: unparsable or unsupported input
    /// is chunked by line windows instead.
    pub fn chunk_source(
        &self,
        file_path: &str,
        content: &str,
        language_hint: Option<&str>,
    ) -> ChunkedFile {
        let tag = language_hint
            .map(str::to_string)
            .or_else(|| {
                Path::new(file_path)
                    .extension()
                    .and_then(|e| e.to_str())
                    .map(str::to_lowercase)
            })
            .unwrap_or_else(|| "text".to_string());

        if content.trim().is_empty() {
            return ChunkedFile {
                chunks: Vec::new(),
                language: tag,
                fallback: None,
            };
        }

        let (extracted, language, fallback) = match parser::parse(content, &tag) {
            Ok(tree) => {
                let language = tree.language().name.to_string();
                let extracted = extractor::extract(&tree, content, file_path);
                if extracted.is_empty() {
                    let reason = FallbackReason::NoStructure;
                    let windows =
                        fallback::line_windows(file_path, &language, content, reason, &self.config);
                    (windows, language, Some(reason))
                } else {
                    (extracted, language, None)
                }
            }
            Err(failure) => {
                let reason = match &failure {
                    ParseFailure::UnsupportedLanguage(_) => FallbackReason::UnsupportedLanguage,
                    ParseFailure::Syntax { .. } => FallbackReason::ParseError,
                };
                tracing::debug!(file = file_path, %failure, "using line-window chunking");
                let windows = fallback::line_windows(file_path, &tag, content, reason, &self.config);
                (windows, tag, Some(reason))
            }
        };

        let chunks = extracted
            .into_iter()
            .flat_map(|e| splitter::split_chunk(e, self.config.max_chunk_size))
            .collect();

        ChunkedFile {
            chunks,
            language,
            fallback,
        }
    }

    /// Read and chunk a file from disk, recording it under `display_path`.
    ///
    /// # Errors
    ///
    /// Returns [`ChunkwiseError::FileNotFound`] if `path` does not exist, or
    /// [`ChunkwiseError::Io`] if it cannot be read as UTF-8 text.
    pub fn chunk_file(&self, path: &Path, display_path: &str) -> Result<ChunkedFile, ChunkwiseError> {
        if !path.exists() {
            return Err(ChunkwiseError::FileNotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        Ok(self.chunk_source(display_path, &content, None))
    }
}

/// Count chunks by type, in [`ChunkType::ALL`] order, omitting zero counts.
pub fn count_by_type(chunks: &[Chunk]) -> Vec<(ChunkType, usize)> {
    ChunkType::ALL
        .iter()
        .map(|ty| (*ty, chunks.iter().filter(|c| c.chunk_type == *ty).count()))
        .filter(|(_, n)| *n > 0)
        .collect()
}
