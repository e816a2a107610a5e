use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Kind of source construct a [`Chunk`] was cut from.
///
/// # Examples
///
/// ```
/// use chunkwise_core::ChunkType;
///
/// let ty: ChunkType = "function".parse().unwrap();
/// assert_eq!(ty, ChunkType::Function);
/// assert_eq!(ty.to_string(), "function");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkType {
    /// Class-like construct, with method bodies elided.
    Class,
    /// Method owned by a class.
    Method,
    /// Top-level function.
    Function,
    /// Group of contiguous import statements.
    Import,
    /// Group of contiguous module-level statements.
    Global,
    /// Module-level documentation.
    Docstring,
    /// Fixed-size line window used when structure is unavailable.
    Fallback,
}

impl ChunkType {
    /// All chunk types, in display order.
    pub const ALL: [ChunkType; 7] = [
        ChunkType::Class,
        ChunkType::Method,
        ChunkType::Function,
        ChunkType::Import,
        ChunkType::Global,
        ChunkType::Docstring,
        ChunkType::Fallback,
    ];

    /// Lowercase name used in storage and filters.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkType::Class => "class",
            ChunkType::Method => "method",
            ChunkType::Function => "function",
            ChunkType::Import => "import",
            ChunkType::Global => "global",
            ChunkType::Docstring => "docstring",
            ChunkType::Fallback => "fallback",
        }
    }
}

impl fmt::Display for ChunkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChunkType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "class" => Ok(ChunkType::Class),
            "method" => Ok(ChunkType::Method),
            "function" => Ok(ChunkType::Function),
            "import" | "imports" => Ok(ChunkType::Import),
            "global" | "globals" => Ok(ChunkType::Global),
            "docstring" | "module_docstring" => Ok(ChunkType::Docstring),
            "fallback" | "code_block" => Ok(ChunkType::Fallback),
            other => Err(format!("unknown chunk type: {other}")),
        }
    }
}

/// A self-contained unit of source text extracted for independent retrieval.
///
/// Identity is derived from location and content (see [`chunk_id`]), so
/// re-chunking an unchanged file yields the same ids.
///
/// # Examples
///
/// ```
/// use chunkwise_core::{Chunk, ChunkType};
///
/// let chunk = Chunk::new("src/lib.rs", "rust", ChunkType::Function, "fn a() {}", 3, 3);
/// let again = Chunk::new("src/lib.rs", "rust", ChunkType::Function, "fn a() {}", 3, 3);
/// assert_eq!(chunk.id, again.id);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    /// Deterministic id in UUID layout.
    pub id: String,
    /// Construct kind.
    pub chunk_type: ChunkType,
    /// Source text of the chunk.
    pub content: String,
    /// First line (1-indexed, inclusive).
    pub start_line: u32,
    /// Last line (1-indexed, inclusive).
    pub end_line: u32,
    /// Path of the source file, relative to the indexed root when known.
    pub file_path: String,
    /// Language tag of the source file.
    pub language: String,
    /// Owning class, for methods and nested classes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_name: Option<String>,
    /// Declaration header, without the body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    /// Piece index when an oversize chunk was split.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u32>,
    /// Free-form annotations (`name`, `oversized`, `fallback_reason`, ...).
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Chunk {
    /// Create a chunk and derive its id.
    pub fn new(
        file_path: impl Into<String>,
        language: impl Into<String>,
        chunk_type: ChunkType,
        content: impl Into<String>,
        start_line: u32,
        end_line: u32,
    ) -> Self {
        let mut chunk = Self {
            id: String::new(),
            chunk_type,
            content: content.into(),
            start_line,
            end_line,
            file_path: file_path.into(),
            language: language.into(),
            parent_name: None,
            signature: None,
            sequence: None,
            metadata: BTreeMap::new(),
        };
        chunk.refresh_id();
        chunk
    }

    /// Recompute [`Chunk::id`] after content, location or sequence changed.
    pub fn refresh_id(&mut self) {
        self.id = chunk_id(
            &self.file_path,
            self.start_line,
            self.end_line,
            &self.content,
            self.sequence,
        );
    }

    /// Entity name recorded in metadata, if any.
    pub fn name(&self) -> Option<&str> {
        self.metadata.get("name").map(String::as_str)
    }

    /// Whether the chunk exceeded the size budget and could not be split.
    pub fn is_oversized(&self) -> bool {
        self.metadata.get("oversized").map(String::as_str) == Some("true")
    }

    /// Text sent to the embedding model: a short provenance header followed
    /// by the chunk content.
    ///
    /// # Examples
    ///
    /// ```
    /// use chunkwise_core::{Chunk, ChunkType};
    ///
    /// let chunk = Chunk::new("a.py", "python", ChunkType::Import, "import os", 1, 1);
    /// let text = chunk.embedding_text();
    /// assert!(text.starts_with("# File: a.py\n# Type: import\n"));
    /// assert!(text.ends_with("import os"));
    /// ```
    pub fn embedding_text(&self) -> String {
        let mut header = format!("# File: {}\n# Type: {}\n", self.file_path, self.chunk_type);
        if let Some(name) = self.name() {
            header.push_str(&format!("# Name: {name}\n"));
        }
        if let Some(parent) = &self.parent_name {
            header.push_str(&format!("# Scope: {parent}\n"));
        }
        if let Some(sig) = &self.signature {
            header.push_str(&format!("# Signature: {sig}\n"));
        }
        format!("{header}\n{}", self.content)
    }
}

/// Derive a chunk id from its file path, line range, content and piece index.
///
/// The SHA-256 digest is truncated to 128 bits and laid out as
/// `8-4-4-4-12` hex so vector stores that demand UUID object ids accept it.
///
/// # Examples
///
/// ```
/// use chunkwise_core::chunk_id;
///
/// let id = chunk_id("a.rs", 1, 2, "fn a() {}", None);
/// assert_eq!(id.len(), 36);
/// assert_ne!(id, chunk_id("a.rs", 1, 3, "fn a() {}", None));
/// ```
pub fn chunk_id(
    file_path: &str,
    start_line: u32,
    end_line: u32,
    content: &str,
    sequence: Option<u32>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(file_path.as_bytes());
    hasher.update([0]);
    hasher.update(start_line.to_le_bytes());
    hasher.update(end_line.to_le_bytes());
    if let Some(seq) = sequence {
        hasher.update(b"#");
        hasher.update(seq.to_le_bytes());
    }
    hasher.update([0]);
    hasher.update(content.as_bytes());
    let digest = hasher.finalize();
    let hex: String = digest[..16].iter().map(|b| format!("{b:02x}")).collect();
    format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    )
}

/// A chunk together with its embedding, as persisted in the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexedChunk {
    /// The chunk itself.
    pub chunk: Chunk,
    /// Embedding vector; its length is the model's dimensionality.
    pub vector: Vec<f32>,
    /// When the chunk was written to the index.
    pub indexed_at: DateTime<Utc>,
}

impl IndexedChunk {
    /// Pair a chunk with its vector, stamped with the current time.
    pub fn new(chunk: Chunk, vector: Vec<f32>) -> Self {
        Self {
            chunk,
            vector,
            indexed_at: Utc::now(),
        }
    }
}

/// Restrictions applied to a similarity search.
///
/// # Examples
///
/// ```
/// use chunkwise_core::{Chunk, ChunkType, SearchFilter};
///
/// let filter = SearchFilter {
///     chunk_types: vec![ChunkType::Function],
///     path_prefix: Some("src/".into()),
/// };
/// let chunk = Chunk::new("src/a.rs", "rust", ChunkType::Function, "fn a() {}", 1, 1);
/// assert!(filter.matches(&chunk));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchFilter {
    /// Accepted chunk types; empty accepts any.
    #[serde(default)]
    pub chunk_types: Vec<ChunkType>,
    /// Required file path prefix.
    #[serde(default)]
    pub path_prefix: Option<String>,
}

impl SearchFilter {
    /// Whether the filter restricts anything at all.
    pub fn is_empty(&self) -> bool {
        self.chunk_types.is_empty() && self.path_prefix.is_none()
    }

    /// Whether `chunk` passes the filter.
    pub fn matches(&self, chunk: &Chunk) -> bool {
        let type_ok = self.chunk_types.is_empty() || self.chunk_types.contains(&chunk.chunk_type);
        let path_ok = self
            .path_prefix
            .as_deref()
            .map_or(true, |prefix| chunk.file_path.starts_with(prefix));
        type_ok && path_ok
    }

    /// The filter conditions a matching chunk satisfied, for reporting.
    pub fn matched_metadata(&self, chunk: &Chunk) -> BTreeMap<String, String> {
        let mut matched = BTreeMap::new();
        if !self.chunk_types.is_empty() {
            matched.insert("chunk_type".to_string(), chunk.chunk_type.to_string());
        }
        if let Some(prefix) = &self.path_prefix {
            matched.insert("path_prefix".to_string(), prefix.clone());
        }
        matched
    }
}

/// A ranked hit from the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    /// The stored chunk.
    pub chunk: Chunk,
    /// Cosine similarity to the query (higher is closer).
    pub score: f64,
    /// Filter conditions the chunk matched.
    #[serde(default)]
    pub matched: BTreeMap<String, String>,
}

/// Index contents summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    /// Backend name (`weaviate`, `sqlite`).
    pub backend: String,
    /// Collection or database the stats describe.
    pub collection: String,
    /// Number of stored chunks.
    pub total_chunks: usize,
    /// Number of distinct file paths, when the backend can count them.
    pub total_files: Option<usize>,
    /// Chunk counts keyed by chunk type name.
    pub by_type: BTreeMap<String, usize>,
}

/// Output format for CLI subcommands.
///
/// # Examples
///
/// ```
/// use chunkwise_core::OutputFormat;
///
/// let fmt: OutputFormat = "json".parse().unwrap();
/// assert_eq!(fmt, OutputFormat::Json);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable summaries.
    #[default]
    Text,
    /// Machine-readable JSON with camelCase keys.
    Json,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            other => Err(format!("unknown output format: {other}")),
        }
    }
}
