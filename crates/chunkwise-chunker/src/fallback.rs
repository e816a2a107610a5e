//! Line-window chunking for files without usable structure.

use std::fmt;

use chunkwise_core::{Chunk, ChunkType, ChunkerConfig};

use crate::extractor::Extracted;
use crate::text::SourceText;

/// Why structural extraction was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackReason {
    /// The grammar rejected the file.
    ParseError,
    /// No grammar is registered for the file's language.
    UnsupportedLanguage,
    /// The file parsed but produced no constructs.
    NoStructure,
}

impl FallbackReason {
    /// Value stored under the `fallback_reason` metadata key.
    pub fn as_str(&self) -> &'static str {
        match self {
            FallbackReason::ParseError => "parse_error",
            FallbackReason::UnsupportedLanguage => "unsupported_language",
            FallbackReason::NoStructure => "no_structure",
        }
    }
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cut `content` into overlapping windows of `config.fallback_lines` lines.
///
/// Windows advance by `fallback_lines - fallback_overlap` lines, so together
/// they cover every line. Windows holding only whitespace are dropped; an
/// empty or blank file yields nothing.
///
/// # Examples
///
/// ```
/// use chunkwise_chunker::fallback::{line_windows, FallbackReason};
/// use chunkwise_core::{ChunkType, ChunkerConfig};
///
/// let text: String = (1..=120).map(|i| format!("line {i}\n")).collect();
/// let windows = line_windows("notes.txt", "text", &text, FallbackReason::UnsupportedLanguage, &ChunkerConfig::default());
/// assert_eq!(windows.len(), 3);
/// assert_eq!(windows[1].chunk.start_line, 46);
/// assert!(windows.iter().all(|w| w.chunk.chunk_type == ChunkType::Fallback));
/// ```
pub fn line_windows(
    file_path: &str,
    language: &str,
    content: &str,
    reason: FallbackReason,
    config: &ChunkerConfig,
) -> Vec<Extracted> {
    let src = SourceText::new(content);
    let total = src.line_count();
    let size = config.fallback_lines.max(1);
    let step = size.saturating_sub(config.fallback_overlap).max(1);

    let mut windows = Vec::new();
    let mut start = 0;
    while start < total {
        let end = (start + size).min(total) - 1;
        let text = src.span(start, end);
        if !text.trim().is_empty() {
            let mut chunk = Chunk::new(
                file_path,
                language,
                ChunkType::Fallback,
                text,
                u32::try_from(start + 1).unwrap_or(u32::MAX),
                u32::try_from(end + 1).unwrap_or(u32::MAX),
            );
            chunk
                .metadata
                .insert("fallback_reason".into(), reason.as_str().into());
            chunk.metadata.insert("language".into(), language.into());
            windows.push(Extracted {
                chunk,
                boundaries: Vec::new(),
            });
        }
        if end + 1 >= total {
            break;
        }
        start += step;
    }
    windows
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered(n: usize) -> String {
        (1..=n).map(|i| format!("line {i}\n")).collect()
    }

    #[test]
    fn windows_overlap_and_cover_every_line() {
        let config = ChunkerConfig {
            fallback_lines: 10,
            fallback_overlap: 2,
            ..ChunkerConfig::default()
        };
        let text = numbered(25);
        let windows = line_windows("a.txt", "text", &text, FallbackReason::ParseError, &config);
        let ranges: Vec<(u32, u32)> = windows
            .iter()
            .map(|w| (w.chunk.start_line, w.chunk.end_line))
            .collect();
        assert_eq!(ranges, vec![(1, 10), (9, 18), (17, 25)]);
        assert_eq!(windows[0].chunk.metadata["fallback_reason"], "parse_error");
    }

    #[test]
    fn short_file_is_one_window() {
        let windows = line_windows(
            "a.txt",
            "text",
            "only line",
            FallbackReason::UnsupportedLanguage,
            &ChunkerConfig::default(),
        );
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].chunk.content, "only line");
        assert_eq!((windows[0].chunk.start_line, windows[0].chunk.end_line), (1, 1));
    }

    #[test]
    fn blank_input_yields_nothing() {
        let config = ChunkerConfig::default();
        assert!(line_windows("a", "text", "", FallbackReason::ParseError, &config).is_empty());
        assert!(line_windows("a", "text", "\n\n  \n", FallbackReason::ParseError, &config).is_empty());
    }
}
