//! Question → ranked chunks → bounded context text.

use std::fmt::Write as _;
use std::sync::Arc;

use chunkwise_core::{ChunkwiseError, RetrievalConfig, SearchFilter, SearchResult};
use chunkwise_index::store::rank_results;
use chunkwise_index::{EmbeddingClient, VectorStore};
use serde::Serialize;

/// Rough characters-per-token ratio used for context budgets.
pub const CHARS_PER_TOKEN: usize = 4;

const CONTEXT_HEADER: &str = "Here are the relevant code sections:\n";

/// A source location cited by an answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Citation {
    pub file_path: String,
    pub start_line: u32,
    pub end_line: u32,
    pub chunk_type: String,
    pub score: f64,
}

impl std::fmt::Display for Citation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}-{}", self.file_path, self.start_line, self.end_line)
    }
}

/// Context assembled for one question.
#[derive(Debug, Clone, Default)]
pub struct RetrievedContext {
    /// Chunks that made it into `text`, best first.
    pub results: Vec<SearchResult>,
    /// Rendered context; empty when nothing was retrieved.
    pub text: String,
    /// The best chunk was cut short to fit the budget.
    pub truncated: bool,
    /// Lower-ranked chunks left out to fit the budget.
    pub dropped: usize,
}

impl RetrievedContext {
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Locations of the included chunks, in context order.
    pub fn citations(&self) -> Vec<Citation> {
        self.results
            .iter()
            .map(|r| Citation {
                file_path: r.chunk.file_path.clone(),
                start_line: r.chunk.start_line,
                end_line: r.chunk.end_line,
                chunk_type: r.chunk.chunk_type.to_string(),
                score: r.score,
            })
            .collect()
    }
}

/// Provenance block for the chunk at 1-based `position`.
fn render_section(position: usize, result: &SearchResult, content: &str) -> String {
    let chunk = &result.chunk;
    let mut out = String::new();
    let _ = writeln!(out, "\n--- Code Chunk {position} ---");
    let _ = writeln!(out, "File: {}", chunk.file_path);
    let _ = writeln!(out, "Type: {}", chunk.chunk_type);
    if let Some(parent) = &chunk.parent_name {
        let _ = writeln!(out, "Context: {parent}");
    }
    let _ = writeln!(out, "Location: Lines {}-{}", chunk.start_line, chunk.end_line);
    let _ = writeln!(out, "\n```{}", chunk.language);
    let _ = writeln!(out, "{content}");
    out.push_str("```\n");
    out
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Rank `results` and render them into a context of at most
/// `max_tokens` tokens.
///
/// Lowest-scoring chunks are dropped first. If the best chunk alone does
/// not fit, its content is cut at a character boundary and the context is
/// marked truncated. The text never exceeds the budget, even when that
/// leaves no room for the chunk's provenance lines.
///
/// # Examples
///
/// ```
/// use chunkwise_rag::retrieval::compose;
///
/// let context = compose(Vec::new(), 1024);
/// assert!(context.is_empty());
/// assert!(context.text.is_empty());
/// ```
pub fn compose(mut results: Vec<SearchResult>, max_tokens: usize) -> RetrievedContext {
    if results.is_empty() {
        return RetrievedContext::default();
    }
    rank_results(&mut results);

    let budget = max_tokens.saturating_mul(CHARS_PER_TOKEN);
    let sections: Vec<String> = results
        .iter()
        .enumerate()
        .map(|(i, r)| render_section(i + 1, r, &r.chunk.content))
        .collect();

    let mut used = char_len(CONTEXT_HEADER);
    let mut keep = 0;
    for section in &sections {
        let len = char_len(section);
        if keep > 0 && used + len > budget {
            break;
        }
        used += len;
        keep += 1;
    }
    let dropped = results.len() - keep;
    results.truncate(keep);

    let mut text = String::from(CONTEXT_HEADER);
    let mut truncated = false;
    if used > budget {
        // Only the best chunk is left and it is still too large.
        let best = &results[0];
        let overhead = char_len(CONTEXT_HEADER) + char_len(&render_section(1, best, ""));
        let allowed = budget.saturating_sub(overhead);
        let cut: String = best.chunk.content.chars().take(allowed).collect();
        text.push_str(&render_section(1, best, &cut));
        if char_len(&text) > budget {
            // The budget cannot even hold the provenance lines.
            text = text.chars().take(budget).collect();
        }
        truncated = true;
    } else {
        for section in sections.iter().take(keep) {
            text.push_str(section);
        }
    }

    if dropped > 0 || truncated {
        tracing::debug!(kept = keep, dropped, truncated, budget, "context trimmed to budget");
    }

    RetrievedContext {
        results,
        text,
        truncated,
        dropped,
    }
}

/// Embeds questions and pulls the nearest chunks from the store.
pub struct Retriever {
    embedder: Arc<EmbeddingClient>,
    store: Arc<dyn VectorStore>,
    context_size: usize,
    max_context_tokens: usize,
}

impl std::fmt::Debug for Retriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retriever")
            .field("store", &self.store.backend())
            .field("context_size", &self.context_size)
            .field("max_context_tokens", &self.max_context_tokens)
            .finish_non_exhaustive()
    }
}

impl Retriever {
    pub fn new(
        embedder: Arc<EmbeddingClient>,
        store: Arc<dyn VectorStore>,
        config: &RetrievalConfig,
    ) -> Self {
        Self {
            embedder,
            store,
            context_size: config.context_size,
            max_context_tokens: config.max_context_tokens,
        }
    }

    /// Retrieve `context_size` chunks per question instead of the configured number.
    pub fn with_context_size(mut self, context_size: usize) -> Self {
        self.context_size = context_size;
        self
    }

    pub fn context_size(&self) -> usize {
        self.context_size
    }

    /// Nearest chunks to `query`, best first.
    ///
    /// # Errors
    ///
    /// Returns [`ChunkwiseError::Embedding`] if the query cannot be embedded
    /// and [`ChunkwiseError::IndexStore`] if the search fails.
    pub async fn search(
        &self,
        query: &str,
        limit: usize,
        filter: SearchFilter,
    ) -> Result<Vec<SearchResult>, ChunkwiseError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let vector = self.embedder.embed_query(query).await?;
        let mut results = self.store.search(vector, limit, filter).await?;
        rank_results(&mut results);
        results.truncate(limit);
        tracing::debug!(query, hits = results.len(), "search finished");
        Ok(results)
    }

    /// Retrieve and compose the context for `question`.
    ///
    /// # Errors
    ///
    /// Same as [`Retriever::search`].
    pub async fn retrieve(
        &self,
        question: &str,
        filter: SearchFilter,
    ) -> Result<RetrievedContext, ChunkwiseError> {
        let results = self.search(question, self.context_size, filter).await?;
        Ok(compose(results, self.max_context_tokens))
    }
}
