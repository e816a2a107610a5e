//! Structural parsing with tree-sitter.
//!
//! [`parse`] never panics on bad input: an unknown language and a grammar
//! that rejects the source are both returned as [`ParseFailure`] values for
//! the caller to branch on.

use tree_sitter::{Node, Parser, Tree};

use crate::languages::{self, LanguageSpec};

/// A successfully parsed source file.
pub struct SyntaxTree {
    tree: Tree,
    language: &'static LanguageSpec,
}

impl SyntaxTree {
    /// Root node of the tree.
    pub fn root(&self) -> Node<'_> {
        self.tree.root_node()
    }

    /// Language the tree was parsed with.
    pub fn language(&self) -> &'static LanguageSpec {
        self.language
    }
}

impl std::fmt::Debug for SyntaxTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyntaxTree")
            .field("language", &self.language.name)
            .field("root", &self.tree.root_node().kind())
            .finish()
    }
}

/// Why a file could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseFailure {
    /// No grammar is registered for the language tag or extension.
    #[error("no parser registered for `{0}`")]
    UnsupportedLanguage(String),

    /// The grammar rejected the input.
    #[error("{language} source does not parse (first error at line {line})")]
    Syntax {
        /// Language whose grammar failed.
        language: &'static str,
        /// First line containing an error node (1-indexed).
        line: usize,
    },
}

/// Parse `content` using the language named by `hint` (a tag or extension).
///
/// # Examples
///
/// ```
/// use chunkwise_chunker::parser::{parse, ParseFailure};
///
/// let tree = parse("def f():\n    return 1\n", "py").unwrap();
/// assert_eq!(tree.root().kind(), "module");
///
/// let err = parse("anything", "cobol").unwrap_err();
/// assert_eq!(err, ParseFailure::UnsupportedLanguage("cobol".into()));
/// ```
pub fn parse(content: &str, hint: &str) -> Result<SyntaxTree, ParseFailure> {
    let language = languages::lookup(hint)
        .ok_or_else(|| ParseFailure::UnsupportedLanguage(hint.to_string()))?;
    parse_with(language, content)
}

/// Parse `content` with an already-resolved language.
pub fn parse_with(
    language: &'static LanguageSpec,
    content: &str,
) -> Result<SyntaxTree, ParseFailure> {
    let mut parser = Parser::new();
    if parser.set_language(&language.grammar()).is_err() {
        // Grammar ABI mismatch: the language is effectively unavailable.
        return Err(ParseFailure::UnsupportedLanguage(language.name.to_string()));
    }

    let Some(tree) = parser.parse(content, None) else {
        return Err(ParseFailure::Syntax {
            language: language.name,
            line: 1,
        });
    };

    let root = tree.root_node();
    if root.has_error() {
        return Err(ParseFailure::Syntax {
            language: language.name,
            line: first_error_line(root),
        });
    }

    Ok(SyntaxTree { tree, language })
}

/// Line (1-indexed) of the first ERROR or MISSING node under `node`.
fn first_error_line(node: Node) -> usize {
    if node.is_error() || node.is_missing() {
        return node.start_position().row + 1;
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.has_error() {
            return first_error_line(child);
        }
    }
    node.start_position().row + 1
}
