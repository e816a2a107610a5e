use std::path::PathBuf;

/// Errors that can occur across the chunkwise pipeline.
///
/// Each variant wraps a specific error domain. Library crates use this type
/// directly; the binary renders it through `miette` at the boundary.
///
/// Parse failures inside the chunker are not errors: they are returned as
/// values and routed to fallback chunking.
///
/// # Examples
///
/// ```
/// use chunkwise_core::ChunkwiseError;
///
/// let err = ChunkwiseError::Config("missing model".into());
/// assert!(err.to_string().contains("missing model"));
/// ```
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum ChunkwiseError {
    /// Filesystem I/O failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid or missing configuration, including an embedding model whose
    /// dimensionality disagrees with the configured one.
    #[error("configuration error: {0}")]
    #[diagnostic(help("check .chunkwise.toml and the WEAVIATE_*/OLLAMA_* environment variables"))]
    Config(String),

    /// Embedding service failure that survived retries.
    #[error("embedding error: {0}")]
    Embedding(String),

    /// Vector store connection, schema, or write failure.
    #[error("index store error: {0}")]
    #[diagnostic(help("run `chunkwise check-services` to verify the vector store is reachable"))]
    IndexStore(String),

    /// Chat completion failure while answering a question.
    #[error("answer service error: {0}")]
    AnswerService(String),

    /// JSON serialization / deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML deserialization failure.
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// A required file was not found.
    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),
}

impl ChunkwiseError {
    /// Whether this error must stop a directory-wide run instead of being
    /// recorded against a single file.
    pub fn is_fatal_for_run(&self) -> bool {
        matches!(self, ChunkwiseError::IndexStore(_) | ChunkwiseError::Config(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_converts() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: ChunkwiseError = io_err.into();
        assert!(err.to_string().contains("gone"));
    }

    #[test]
    fn config_error_displays_message() {
        let err = ChunkwiseError::Config("bad value".into());
        assert_eq!(err.to_string(), "configuration error: bad value");
    }

    #[test]
    fn file_not_found_shows_path() {
        let err = ChunkwiseError::FileNotFound(PathBuf::from("/tmp/missing.rs"));
        assert!(err.to_string().contains("/tmp/missing.rs"));
    }

    #[test]
    fn store_errors_are_fatal_for_run() {
        assert!(ChunkwiseError::IndexStore("down".into()).is_fatal_for_run());
        assert!(!ChunkwiseError::Embedding("timeout".into()).is_fatal_for_run());
        assert!(!ChunkwiseError::AnswerService("refused".into()).is_fatal_for_run());
    }
}
