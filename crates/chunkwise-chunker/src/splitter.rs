//! Oversize splitting.
//!
//! A chunk whose content exceeds the character budget is cut into pieces.
//! Cut points are tried from coarse to fine: the structural boundaries the
//! extractor recorded, then blank lines, then single lines. Units are packed
//! greedily up to the budget. A single line longer than the budget cannot be
//! cut and becomes its own piece, flagged `oversized`. Blank lines are never
//! a piece of their own; they stay with the piece above, which is flagged if
//! that pushes it over the budget.
//!
//! Pieces are contiguous slices of the original content, so joining them in
//! sequence order gives back the input exactly.

use std::ops::Range;

use chunkwise_core::Chunk;

use crate::extractor::Extracted;

/// A planned slice of a chunk's content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Piece {
    /// Byte range into the content.
    pub range: Range<usize>,
    /// The piece exceeds the budget and has no internal cut point.
    pub oversized: bool,
}

/// Enforce `max_chars` on an extracted chunk.
///
/// Returns the chunk untouched when it fits. Otherwise every piece keeps the
/// chunk's type, parent, signature and metadata, and gains a `sequence`
/// index plus a `parts` count.
///
/// # Examples
///
/// ```
/// use chunkwise_chunker::extractor::Extracted;
/// use chunkwise_chunker::splitter::split_chunk;
/// use chunkwise_core::{Chunk, ChunkType};
///
/// let content = "a = 1\nb = 2\nc = 3";
/// let chunk = Chunk::new("g.py", "python", ChunkType::Global, content, 1, 3);
/// let pieces = split_chunk(Extracted { chunk, boundaries: vec![6, 12] }, 12);
/// assert_eq!(pieces.len(), 2);
/// let joined: String = pieces.iter().map(|p| p.content.as_str()).collect();
/// assert_eq!(joined, content);
/// ```
pub fn split_chunk(extracted: Extracted, max_chars: usize) -> Vec<Chunk> {
    let Extracted {
        chunk: mut base,
        boundaries,
    } = extracted;
    let pieces = plan_pieces(&base.content, &boundaries, max_chars);

    if let [only] = pieces.as_slice() {
        if only.oversized {
            base.metadata.insert("oversized".into(), "true".into());
        }
        return vec![base];
    }

    let parts = pieces.len();
    // Summaries do not map line-for-line onto the file.
    let verbatim = base.metadata.get("summary").map(String::as_str) != Some("true");
    tracing::debug!(
        file = %base.file_path,
        chunk_type = %base.chunk_type,
        start_line = base.start_line,
        parts,
        "splitting oversize chunk"
    );

    pieces
        .into_iter()
        .enumerate()
        .map(|(index, piece)| {
            let mut chunk = base.clone();
            chunk.content = base.content[piece.range.clone()].to_string();
            if verbatim {
                let before = newlines(&base.content[..piece.range.start]);
                let inside = newlines(chunk.content.trim_end_matches('\n'));
                chunk.start_line = base.start_line + before;
                chunk.end_line = (chunk.start_line + inside).min(base.end_line);
            }
            chunk.sequence = Some(u32::try_from(index).unwrap_or(u32::MAX));
            chunk.metadata.insert("parts".into(), parts.to_string());
            if piece.oversized {
                chunk.metadata.insert("oversized".into(), "true".into());
            }
            chunk.refresh_id();
            chunk
        })
        .collect()
}

/// Plan how to cut `content` so no piece exceeds `max_chars` characters
/// unless it is a single uncuttable line.
///
/// `boundaries` are byte offsets of preferred cut points; offsets that are
/// out of range or not on a character boundary are ignored.
pub fn plan_pieces(content: &str, boundaries: &[usize], max_chars: usize) -> Vec<Piece> {
    let whole = 0..content.len();
    if char_len(content, &whole) <= max_chars {
        return vec![Piece {
            range: whole,
            oversized: false,
        }];
    }

    let mut cuts: Vec<usize> = boundaries
        .iter()
        .copied()
        .filter(|&b| b > 0 && b < content.len() && content.is_char_boundary(b))
        .collect();
    cuts.sort_unstable();
    cuts.dedup();

    let mut units = Vec::new();
    for segment in segments(whole, &cuts) {
        refine(content, segment, max_chars, &mut units);
    }
    pack(content, units, max_chars)
}

/// Break a structural segment into units no larger than the budget where possible.
fn refine(content: &str, segment: Range<usize>, max_chars: usize, units: &mut Vec<Range<usize>>) {
    if char_len(content, &segment) <= max_chars {
        units.push(segment);
        return;
    }
    for paragraph in paragraphs(content, segment) {
        if char_len(content, &paragraph) <= max_chars {
            units.push(paragraph);
        } else {
            units.extend(lines(content, paragraph));
        }
    }
}

fn pack(content: &str, units: Vec<Range<usize>>, max_chars: usize) -> Vec<Piece> {
    let mut pieces = Vec::new();
    let mut current: Option<(Range<usize>, usize)> = None;

    for unit in units {
        let len = char_len(content, &unit);
        if len > max_chars {
            let mut range = unit;
            if let Some((open, _)) = current.take() {
                if let Some(leading) = close(content, &mut pieces, open, max_chars) {
                    range.start = leading.start;
                }
            }
            pieces.push(Piece {
                range,
                oversized: true,
            });
            continue;
        }
        current = match current.take() {
            Some((open, used)) if used + len <= max_chars => Some((open.start..unit.end, used + len)),
            Some((open, _)) => match close(content, &mut pieces, open, max_chars) {
                Some(leading) => {
                    let range = leading.start..unit.end;
                    let used = char_len(content, &range);
                    Some((range, used))
                }
                None => Some((unit, len)),
            },
            None => Some((unit, len)),
        };
    }
    if let Some((open, _)) = current {
        if let Some(rest) = close(content, &mut pieces, open, max_chars) {
            // Whitespace-only content with nothing to attach to.
            pieces.push(Piece {
                range: rest,
                oversized: false,
            });
        }
    }
    pieces
}

/// Finish the open range. Whitespace never stands alone: it is appended to
/// the previous piece, or handed back to lead the next one when there is no
/// previous piece. A piece that grows past the budget this way is flagged.
fn close(
    content: &str,
    pieces: &mut Vec<Piece>,
    open: Range<usize>,
    max_chars: usize,
) -> Option<Range<usize>> {
    if !content[open.clone()].trim().is_empty() {
        let oversized = char_len(content, &open) > max_chars;
        pieces.push(Piece {
            range: open,
            oversized,
        });
        return None;
    }
    match pieces.last_mut() {
        Some(last) => {
            last.range.end = open.end;
            last.oversized = char_len(content, &last.range) > max_chars;
            None
        }
        None => Some(open),
    }
}

fn segments(whole: Range<usize>, cuts: &[usize]) -> Vec<Range<usize>> {
    let mut out = Vec::with_capacity(cuts.len() + 1);
    let mut start = whole.start;
    for &cut in cuts {
        out.push(start..cut);
        start = cut;
    }
    out.push(start..whole.end);
    out
}

/// Line ranges within `range`, each including its trailing newline.
fn lines(content: &str, range: Range<usize>) -> Vec<Range<usize>> {
    let mut out = Vec::new();
    let mut start = range.start;
    for (offset, _) in content[range.clone()].match_indices('\n') {
        let end = range.start + offset + 1;
        out.push(start..end);
        start = end;
    }
    if start < range.end {
        out.push(start..range.end);
    }
    out
}

/// Runs of lines separated by blank lines; blank lines stay with the run above.
fn paragraphs(content: &str, range: Range<usize>) -> Vec<Range<usize>> {
    let mut out = Vec::new();
    let mut start = range.start;
    let mut previous_blank = false;
    for line in lines(content, range.clone()) {
        let blank = content[line.clone()].trim().is_empty();
        if previous_blank && !blank && line.start > start {
            out.push(start..line.start);
            start = line.start;
        }
        previous_blank = blank;
    }
    if start < range.end {
        out.push(start..range.end);
    }
    out
}

fn char_len(content: &str, range: &Range<usize>) -> usize {
    content[range.clone()].chars().count()
}

fn newlines(text: &str) -> u32 {
    u32::try_from(text.matches('\n').count()).unwrap_or(u32::MAX)
}
