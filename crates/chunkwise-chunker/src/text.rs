/// Line index over a source string. Rows are 0-indexed like tree-sitter's.
pub(crate) struct SourceText<'a> {
    text: &'a str,
    line_starts: Vec<usize>,
}

impl<'a> SourceText<'a> {
    pub(crate) fn new(text: &'a str) -> Self {
        let mut line_starts = vec![0];
        line_starts.extend(text.match_indices('\n').map(|(i, _)| i + 1));
        Self { text, line_starts }
    }

    pub(crate) fn text(&self) -> &'a str {
        self.text
    }

    /// Number of lines, not counting the empty remainder after a final newline.
    pub(crate) fn line_count(&self) -> usize {
        match self.line_starts.last() {
            Some(&last) if last == self.text.len() => self.line_starts.len() - 1,
            _ => self.line_starts.len(),
        }
    }

    pub(crate) fn line_start(&self, row: usize) -> usize {
        self.line_starts
            .get(row)
            .copied()
            .unwrap_or(self.text.len())
    }

    /// Byte offset of the end of `row`, excluding its newline.
    pub(crate) fn line_end(&self, row: usize) -> usize {
        match self.line_starts.get(row + 1) {
            Some(&next) => next - 1,
            None => self.text.len(),
        }
    }

    /// Exact text of rows `start..=end`.
    pub(crate) fn span(&self, start: usize, end: usize) -> &'a str {
        &self.text[self.line_start(start)..self.line_end(end).max(self.line_start(start))]
    }
}

/// Row range of a node, ignoring a trailing newline the node swallowed.
pub(crate) fn node_rows(node: &tree_sitter::Node) -> (usize, usize) {
    let start = node.start_position().row;
    let end = node.end_position();
    let end_row = if end.column == 0 && end.row > start {
        end.row - 1
    } else {
        end.row
    };
    (start, end_row)
}
