//! Chunk extraction from a syntax tree.
//!
//! Top-level nodes are visited in source order and folded into units:
//! a leading module docstring, groups of contiguous imports or globals, and
//! single constructs (classes, functions, receiver methods). Comments and
//! attributes are held back and attached to the next unit. Classes then
//! expand into a summary chunk plus one chunk per method.
//!
//! Every chunk carries the byte offsets of its finer structural units, which
//! the splitter uses as preferred cut points.

use chunkwise_core::{Chunk, ChunkType};
use tree_sitter::Node;

use crate::languages::LanguageSpec;
use crate::parser::SyntaxTree;
use crate::text::{node_rows, SourceText};

/// A chunk fresh out of extraction, with its preferred split points.
#[derive(Debug, Clone, PartialEq)]
pub struct Extracted {
    /// The chunk.
    pub chunk: Chunk,
    /// Byte offsets into `chunk.content` where finer units start.
    pub boundaries: Vec<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Category {
    Trivia,
    Import,
    Global,
    Function,
    Class,
    Method,
}

enum UnitKind<'t> {
    Docstring,
    Group {
        chunk_type: ChunkType,
        statement_rows: Vec<usize>,
    },
    Construct {
        category: Category,
        decl: Node<'t>,
    },
}

struct Unit<'t> {
    start: usize,
    end: usize,
    kind: UnitKind<'t>,
}

/// Extract chunks from a parsed file, in ascending `start_line` order.
///
/// # Examples
///
/// ```
/// use chunkwise_chunker::extractor::extract;
/// use chunkwise_chunker::parser::parse;
/// use chunkwise_core::ChunkType;
///
/// let source = "import os\n\ndef main():\n    print(os.getcwd())\n";
/// let tree = parse(source, "py").unwrap();
/// let chunks = extract(&tree, source, "main.py");
/// let types: Vec<ChunkType> = chunks.iter().map(|e| e.chunk.chunk_type).collect();
/// assert_eq!(types, vec![ChunkType::Import, ChunkType::Function]);
/// ```
pub fn extract(tree: &SyntaxTree, content: &str, file_path: &str) -> Vec<Extracted> {
    let extractor = Extractor {
        spec: tree.language(),
        src: SourceText::new(content),
        file_path,
    };
    let units = extractor.collect_units(tree.root());

    let mut out = Vec::new();
    for unit in units {
        extractor.materialize(unit, &mut out);
    }
    out.sort_by_key(|e| e.chunk.start_line);
    out
}

struct Extractor<'a> {
    spec: &'static LanguageSpec,
    src: SourceText<'a>,
    file_path: &'a str,
}

impl<'a> Extractor<'a> {
    fn collect_units<'t>(&self, root: Node<'t>) -> Vec<Unit<'t>> {
        let mut cursor = root.walk();
        let nodes: Vec<Node<'t>> = root.named_children(&mut cursor).collect();
        let mut units: Vec<Unit<'t>> = Vec::new();

        let mut rest = &nodes[..];
        if let Some(consumed) = self.leading_docstring(&nodes) {
            let start = node_rows(&nodes[0]).0;
            let end = node_rows(&nodes[consumed - 1]).1;
            units.push(Unit {
                start,
                end,
                kind: UnitKind::Docstring,
            });
            rest = &nodes[consumed..];
        }

        let mut pending: Option<(usize, usize)> = None;
        let mut last_end = units.last().map(|u| u.end);

        for &node in rest {
            let (start, end) = node_rows(&node);

            // Shares a line with the previous unit: fold it in.
            if pending.is_none() {
                if let (Some(prev_end), Some(last)) = (last_end, units.last_mut()) {
                    if start <= prev_end {
                        last.end = last.end.max(end);
                        last_end = Some(last.end);
                        continue;
                    }
                }
            }

            let (category, decl) = self.classify(node);
            match category {
                Category::Trivia => {
                    pending = Some(match pending {
                        Some((first, _)) => (first, end),
                        None => (start, end),
                    });
                    continue;
                }
                Category::Import | Category::Global => {
                    let chunk_type = if category == Category::Import {
                        ChunkType::Import
                    } else {
                        ChunkType::Global
                    };
                    let unit_start = pending.take().map_or(start, |(first, _)| first);
                    let extends = match units.last() {
                        Some(Unit {
                            kind: UnitKind::Group { chunk_type: ty, .. },
                            end: group_end,
                            ..
                        }) => {
                            *ty == chunk_type
                                && (chunk_type == ChunkType::Global || unit_start <= group_end + 1)
                        }
                        _ => false,
                    };
                    match units.last_mut() {
                        Some(Unit {
                            kind: UnitKind::Group { statement_rows, .. },
                            end: group_end,
                            ..
                        }) if extends => {
                            statement_rows.push(unit_start);
                            *group_end = end;
                        }
                        _ => units.push(Unit {
                            start: unit_start,
                            end,
                            kind: UnitKind::Group {
                                chunk_type,
                                statement_rows: vec![unit_start],
                            },
                        }),
                    }
                }
                Category::Function | Category::Class | Category::Method => {
                    let unit_start = pending.take().map_or(start, |(first, _)| first);
                    units.push(Unit {
                        start: unit_start,
                        end,
                        kind: UnitKind::Construct { category, decl },
                    });
                }
            }
            last_end = Some(end);
        }

        // Comments trailing the last construct belong to it.
        if let Some((first, end)) = pending {
            match units.last_mut() {
                Some(last) => last.end = last.end.max(end),
                None => units.push(Unit {
                    start: first,
                    end,
                    kind: UnitKind::Docstring,
                }),
            }
        }

        units
    }

    /// Number of leading nodes that form the module docstring, if any.
    fn leading_docstring(&self, nodes: &[Node]) -> Option<usize> {
        let comment_run = nodes
            .iter()
            .take_while(|n| self.spec.is_comment(n.kind()))
            .count();
        let next = nodes.get(comment_run);

        if self.spec.string_docstrings && next.is_some_and(|n| is_string_statement(n)) {
            return Some(comment_run + 1);
        }
        if comment_run == 0 {
            return None;
        }

        let run_end = node_rows(&nodes[comment_run - 1]).1;
        if let (Some(package), Some(n)) = (self.spec.package_clause, next) {
            if n.kind() == package && node_rows(n).0 == run_end + 1 {
                return Some(comment_run);
            }
        }

        let marked = nodes[..comment_run].iter().any(|n| {
            let text = self.node_text(n);
            self.spec
                .doc_comment_prefixes
                .iter()
                .any(|prefix| text.starts_with(prefix))
        });
        let separated = next.map_or(true, |n| node_rows(n).0 > run_end + 1);
        (marked || separated).then_some(comment_run)
    }

    /// Decide what a top-level node is, unwrapping decorators and exports.
    fn classify<'t>(&self, node: Node<'t>) -> (Category, Node<'t>) {
        let kind = node.kind();
        if self.spec.is_trivia(kind) {
            return (Category::Trivia, node);
        }
        if let Some(field) = self.spec.wrapper_field(kind) {
            return match node.child_by_field_name(field) {
                Some(inner) => match self.classify(inner) {
                    (Category::Trivia, _) => (Category::Global, node),
                    classified => classified,
                },
                None if node.child_by_field_name("source").is_some() => (Category::Import, node),
                None => (Category::Global, node),
            };
        }
        if kind == "mod_item" && node.child_by_field_name("body").is_none() {
            return (Category::Import, node);
        }
        if self.spec.imports.contains(&kind) {
            (Category::Import, node)
        } else if self.spec.classes.contains(&kind) {
            (Category::Class, node)
        } else if self.spec.functions.contains(&kind) {
            (Category::Function, node)
        } else if self.spec.receiver_methods.contains(&kind) {
            (Category::Method, node)
        } else if self.spec.declarations.contains(&kind) && function_value(node).is_some() {
            (Category::Function, node)
        } else {
            (Category::Global, node)
        }
    }

    fn materialize(&self, unit: Unit, out: &mut Vec<Extracted>) {
        match unit.kind {
            UnitKind::Docstring => {
                let chunk = self.chunk(ChunkType::Docstring, unit.start, unit.end);
                out.push(Extracted {
                    chunk,
                    boundaries: Vec::new(),
                });
            }
            UnitKind::Group {
                chunk_type,
                statement_rows,
            } => {
                let mut chunk = self.chunk(chunk_type, unit.start, unit.end);
                chunk
                    .metadata
                    .insert("statements".into(), statement_rows.len().to_string());
                let boundaries = self.row_offsets(unit.start, statement_rows);
                out.push(Extracted { chunk, boundaries });
            }
            UnitKind::Construct {
                category: Category::Class,
                decl,
            } => self.emit_class(decl, unit.start, unit.end, None, out),
            UnitKind::Construct {
                category: Category::Method,
                decl,
            } => {
                let parent = self.receiver_type(decl);
                out.push(self.callable(ChunkType::Method, decl, unit.start, unit.end, parent));
            }
            UnitKind::Construct { decl, .. } => {
                out.push(self.callable(ChunkType::Function, decl, unit.start, unit.end, None));
            }
        }
    }

    /// Emit a class summary chunk, then its methods and nested classes.
    fn emit_class(
        &self,
        decl: Node,
        start: usize,
        end: usize,
        parent: Option<String>,
        out: &mut Vec<Extracted>,
    ) {
        let name = self
            .decl_name(decl)
            .unwrap_or_else(|| "anonymous".to_string());

        let members = decl
            .child_by_field_name("body")
            .map(|body| self.class_members(body))
            .unwrap_or_default();

        let mut elisions = Vec::new();
        let mut member_starts = Vec::new();
        let mut methods = Vec::new();
        let mut nested = Vec::new();

        for member in members {
            if self.spec.is_trivia(member.kind()) {
                continue;
            }
            let inner = self.unwrap(member);
            let member_start = self.leading_trivia_start(member);
            let member_end = node_rows(&member).1;
            member_starts.push(self.src.line_start(member_start));

            if self.spec.methods.contains(&inner.kind()) {
                if let Some(body) = inner.child_by_field_name("body") {
                    elisions.push((body.start_byte(), body.end_byte()));
                    methods.push((inner, member_start, member_end));
                }
            } else if self.spec.classes.contains(&inner.kind()) {
                if let Some(body) = inner.child_by_field_name("body") {
                    elisions.push((body.start_byte(), body.end_byte()));
                }
                nested.push((inner, member_start, member_end));
            }
        }

        let span_start = self.src.line_start(start);
        let span_end = self.src.line_end(end).max(span_start);
        let (content, boundaries) = if elisions.is_empty() {
            let offsets = member_starts
                .iter()
                .map(|&b| b - span_start)
                .filter(|&b| b > 0)
                .collect();
            (self.src.span(start, end).to_string(), offsets)
        } else {
            elide(
                self.src.text(),
                span_start..span_end,
                &elisions,
                self.spec.elided_body,
                &member_starts,
            )
        };

        let mut chunk = Chunk::new(
            self.file_path,
            self.spec.name,
            ChunkType::Class,
            content,
            row_to_line(start),
            row_to_line(end),
        );
        chunk.parent_name = parent;
        chunk.signature = Some(self.signature(decl));
        chunk.metadata.insert("name".into(), name.clone());
        chunk.metadata.insert("language".into(), self.spec.name.into());
        chunk
            .metadata
            .insert("methods".into(), methods.len().to_string());
        if !elisions.is_empty() {
            chunk.metadata.insert("summary".into(), "true".into());
        }
        if let Some(trait_node) = decl.child_by_field_name("trait") {
            chunk
                .metadata
                .insert("trait".into(), self.node_text(&trait_node).to_string());
        }
        out.push(Extracted { chunk, boundaries });

        for (method, m_start, m_end) in methods {
            out.push(self.callable(
                ChunkType::Method,
                method,
                m_start,
                m_end,
                Some(name.clone()),
            ));
        }
        for (class, c_start, c_end) in nested {
            self.emit_class(class, c_start, c_end, Some(name.clone()), out);
        }
    }

    /// A function or method chunk with its full source.
    fn callable(
        &self,
        chunk_type: ChunkType,
        decl: Node,
        start: usize,
        end: usize,
        parent: Option<String>,
    ) -> Extracted {
        let mut chunk = self.chunk(chunk_type, start, end);
        chunk.parent_name = parent;
        chunk.signature = Some(self.signature(decl));
        if let Some(name) = self.decl_name(decl) {
            chunk.metadata.insert("name".into(), name);
        }

        let rows = self
            .decl_body(decl)
            .map(|body| {
                let mut cursor = body.walk();
                body.named_children(&mut cursor)
                    .map(|child| child.start_position().row)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        let boundaries = self.row_offsets(start, rows);
        Extracted { chunk, boundaries }
    }

    fn chunk(&self, chunk_type: ChunkType, start: usize, end: usize) -> Chunk {
        let mut chunk = Chunk::new(
            self.file_path,
            self.spec.name,
            chunk_type,
            self.src.span(start, end),
            row_to_line(start),
            row_to_line(end),
        );
        chunk.metadata.insert("language".into(), self.spec.name.into());
        chunk
    }

    /// Byte offsets of `rows` relative to the start of row `base`.
    fn row_offsets(&self, base: usize, rows: Vec<usize>) -> Vec<usize> {
        let origin = self.src.line_start(base);
        let mut offsets: Vec<usize> = rows
            .into_iter()
            .filter(|&row| row > base)
            .map(|row| self.src.line_start(row) - origin)
            .collect();
        offsets.dedup();
        offsets
    }

    /// Direct members of a class body, flattening member groups.
    fn class_members<'t>(&self, body: Node<'t>) -> Vec<Node<'t>> {
        let mut cursor = body.walk();
        let mut members = Vec::new();
        for child in body.named_children(&mut cursor) {
            if self.spec.member_groups.contains(&child.kind()) {
                let mut inner = child.walk();
                members.extend(child.named_children(&mut inner));
            } else {
                members.push(child);
            }
        }
        members
    }

    fn unwrap<'t>(&self, node: Node<'t>) -> Node<'t> {
        self.spec
            .wrapper_field(node.kind())
            .and_then(|field| node.child_by_field_name(field))
            .unwrap_or(node)
    }

    /// First row of `node` including directly preceding comments and attributes.
    fn leading_trivia_start(&self, node: Node) -> usize {
        let mut start = node_rows(&node).0;
        let mut prev = node.prev_named_sibling();
        while let Some(p) = prev {
            if !self.spec.is_trivia(p.kind()) {
                break;
            }
            let (p_start, p_end) = node_rows(&p);
            if p_end + 1 < start {
                break;
            }
            let before = p.prev_named_sibling();
            if before.is_some_and(|b| !self.spec.is_trivia(b.kind()) && node_rows(&b).1 >= p_start)
            {
                // Trailing comment of the previous member.
                break;
            }
            start = p_start;
            prev = before;
        }
        start
    }

    fn decl_name(&self, decl: Node) -> Option<String> {
        let name_node = match decl.kind() {
            "impl_item" => decl.child_by_field_name("type"),
            "type_declaration" => {
                let mut cursor = decl.walk();
                let spec = decl
                    .named_children(&mut cursor)
                    .find(|c| c.kind() == "type_spec" || c.kind() == "type_alias");
                spec.and_then(|s| s.child_by_field_name("name"))
            }
            "lexical_declaration" | "variable_declaration" => {
                let mut cursor = decl.walk();
                let declarator = decl
                    .named_children(&mut cursor)
                    .find(|c| c.kind() == "variable_declarator");
                declarator.and_then(|d| d.child_by_field_name("name"))
            }
            _ => decl.child_by_field_name("name"),
        }?;
        let text = self.node_text(&name_node);
        (!text.is_empty()).then(|| text.to_string())
    }

    fn decl_body<'t>(&self, decl: Node<'t>) -> Option<Node<'t>> {
        if self.spec.declarations.contains(&decl.kind()) {
            return function_value(decl).and_then(|v| v.child_by_field_name("body"));
        }
        decl.child_by_field_name("body")
    }

    /// Declaration header up to the body, whitespace collapsed.
    fn signature(&self, decl: Node) -> String {
        let text = self.src.text();
        let raw = match self.decl_body(decl) {
            Some(body) => &text[decl.start_byte()..body.start_byte()],
            None => {
                let full = self.node_text(&decl);
                full.lines().next().unwrap_or(full)
            }
        };
        let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
        collapsed
            .trim_end_matches(|c: char| c == '{' || c == ':' || c == ';' || c.is_whitespace())
            .to_string()
    }

    /// Type a Go method is declared on.
    fn receiver_type(&self, decl: Node) -> Option<String> {
        let receiver = decl.child_by_field_name("receiver")?;
        find_descendant(receiver, "type_identifier").map(|n| self.node_text(&n).to_string())
    }

    fn node_text(&self, node: &Node) -> &'a str {
        let text = self.src.text();
        text.get(node.start_byte()..node.end_byte()).unwrap_or("")
    }
}

fn row_to_line(row: usize) -> u32 {
    u32::try_from(row + 1).unwrap_or(u32::MAX)
}

fn is_string_statement(node: &Node) -> bool {
    node.kind() == "expression_statement"
        && node.named_child_count() == 1
        && node.named_child(0).is_some_and(|c| c.kind() == "string")
}

/// The function value bound by a single-declarator variable declaration.
fn function_value(decl: Node) -> Option<Node> {
    let mut cursor = decl.walk();
    let declarators: Vec<Node> = decl
        .named_children(&mut cursor)
        .filter(|c| c.kind() == "variable_declarator")
        .collect();
    let [declarator] = declarators.as_slice() else {
        return None;
    };
    let value = declarator.child_by_field_name("value")?;
    matches!(
        value.kind(),
        "arrow_function" | "function_expression" | "function" | "generator_function"
    )
    .then_some(value)
}

fn find_descendant<'t>(node: Node<'t>, kind: &str) -> Option<Node<'t>> {
    if node.kind() == kind {
        return Some(node);
    }
    let mut cursor = node.walk();
    let children: Vec<Node<'t>> = node.named_children(&mut cursor).collect();
    children
        .into_iter()
        .find_map(|child| find_descendant(child, kind))
}

/// Copy `span` of `text`, replacing each elided range with `placeholder`.
///
/// Returns the new text and the positions of `marks` (absolute offsets into
/// `text`) within it. Marks inside elided ranges are dropped.
fn elide(
    text: &str,
    span: std::ops::Range<usize>,
    elisions: &[(usize, usize)],
    placeholder: &str,
    marks: &[usize],
) -> (String, Vec<usize>) {
    let mut ranges: Vec<(usize, usize)> = elisions
        .iter()
        .copied()
        .filter(|&(s, e)| s >= span.start && e <= span.end && s < e)
        .collect();
    ranges.sort_unstable();

    let mut out = String::with_capacity(span.len());
    let mut mapped = Vec::new();
    let mut pos = span.start;
    let map_marks = |from: usize, to: usize, out_len: usize, mapped: &mut Vec<usize>| {
        for &mark in marks.iter().filter(|&&m| m >= from && m < to) {
            mapped.push(out_len + (mark - from));
        }
    };

    for (start, end) in ranges {
        if start < pos {
            continue;
        }
        map_marks(pos, start, out.len(), &mut mapped);
        out.push_str(&text[pos..start]);
        out.push_str(placeholder);
        pos = end;
    }
    map_marks(pos, span.end, out.len(), &mut mapped);
    out.push_str(&text[pos..span.end]);

    mapped.retain(|&m| m > 0 && m < out.len());
    mapped.sort_unstable();
    mapped.dedup();
    (out, mapped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn chunks_of(source: &str, ext: &str) -> Vec<Chunk> {
        let tree = parse(source, ext).unwrap();
        extract(&tree, source, &format!("sample.{ext}"))
            .into_iter()
            .map(|e| e.chunk)
            .collect()
    }

    fn types(chunks: &[Chunk]) -> Vec<ChunkType> {
        chunks.iter().map(|c| c.chunk_type).collect()
    }

    #[test]
    fn python_class_summary_elides_method_bodies() {
        let source = r#"class Greeter:
    """Says hello."""

    def __init__(self, name):
        self.name = name

    def greet(self):
        return f"hello {self.name}"
"#;
        let chunks = chunks_of(source, "py");
        assert_eq!(
            types(&chunks),
            vec![ChunkType::Class, ChunkType::Method, ChunkType::Method]
        );

        let class = &chunks[0];
        assert_eq!(class.name(), Some("Greeter"));
        assert_eq!(class.metadata["methods"], "2");
        assert_eq!(class.metadata["summary"], "true");
        assert!(class.content.contains("def greet(self):"));
        assert!(class.content.contains("\"\"\"Says hello.\"\"\""));
        assert!(!class.content.contains("return f\"hello"));
        assert!(class.content.contains("..."));
        assert_eq!((class.start_line, class.end_line), (1, 8));

        let greet = &chunks[2];
        assert_eq!(greet.parent_name.as_deref(), Some("Greeter"));
        assert_eq!(greet.signature.as_deref(), Some("def greet(self)"));
        assert!(greet.content.contains("return f\"hello {self.name}\""));
        assert_eq!((greet.start_line, greet.end_line), (7, 8));
    }

    #[test]
    fn python_decorators_belong_to_the_function() {
        let source = "@cache\n@trace\ndef load():\n    return 1\n";
        let chunks = chunks_of(source, "py");
        assert_eq!(types(&chunks), vec![ChunkType::Function]);
        assert_eq!(chunks[0].start_line, 1);
        assert!(chunks[0].content.starts_with("@cache"));
        assert_eq!(chunks[0].signature.as_deref(), Some("def load()"));
    }

    #[test]
    fn python_module_docstring_is_first_chunk() {
        let source = "\"\"\"Utilities.\"\"\"\n\nimport os\n";
        let chunks = chunks_of(source, "py");
        assert_eq!(types(&chunks), vec![ChunkType::Docstring, ChunkType::Import]);
        assert_eq!(chunks[0].content, "\"\"\"Utilities.\"\"\"");
    }

    #[test]
    fn imports_split_on_blank_lines_and_globals_group() {
        let source = "import os\nimport sys\n\nimport requests\n\nA = 1\nB = 2\n\nC = 3\n";
        let chunks = chunks_of(source, "py");
        assert_eq!(
            types(&chunks),
            vec![ChunkType::Import, ChunkType::Import, ChunkType::Global]
        );
        assert_eq!(chunks[0].metadata["statements"], "2");
        assert_eq!(chunks[2].content, "A = 1\nB = 2\n\nC = 3");
        assert_eq!(chunks[2].metadata["statements"], "3");
    }

    #[test]
    fn comments_attach_to_the_next_construct() {
        let source = "import os\n\n# Entry point.\ndef main():\n    pass\n";
        let chunks = chunks_of(source, "py");
        assert_eq!(types(&chunks), vec![ChunkType::Import, ChunkType::Function]);
        assert_eq!(chunks[1].start_line, 3);
        assert!(chunks[1].content.starts_with("# Entry point."));
    }

    #[test]
    fn rust_impl_methods_have_parent() {
        let source = r#"use std::fmt;

/// A point.
#[derive(Debug)]
pub struct Point {
    x: i32,
    y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn norm(&self) -> i32 {
        self.x * self.x + self.y * self.y
    }
}
"#;
        let chunks = chunks_of(source, "rs");
        assert_eq!(
            types(&chunks),
            vec![
                ChunkType::Import,
                ChunkType::Class,
                ChunkType::Class,
                ChunkType::Method,
                ChunkType::Method,
            ]
        );
        let point = &chunks[1];
        assert_eq!(point.start_line, 3);
        assert!(point.content.starts_with("/// A point.\n#[derive(Debug)]"));
        assert_eq!(point.metadata["methods"], "0");
        assert!(!point.metadata.contains_key("summary"));

        let imp = &chunks[2];
        assert_eq!(imp.name(), Some("Point"));
        assert!(imp.content.contains("pub fn norm(&self) -> i32 { ... }"));
        assert_eq!(chunks[4].parent_name.as_deref(), Some("Point"));
        assert_eq!(
            chunks[4].signature.as_deref(),
            Some("pub fn norm(&self) -> i32")
        );
    }

    #[test]
    fn rust_inner_doc_comments_form_docstring() {
        let source = "//! Crate docs.\n//! More.\nuse std::io;\n\nfn run() {}\n";
        let chunks = chunks_of(source, "rs");
        assert_eq!(
            types(&chunks),
            vec![ChunkType::Docstring, ChunkType::Import, ChunkType::Function]
        );
        assert_eq!(chunks[0].content, "//! Crate docs.\n//! More.");
    }

    #[test]
    fn rust_mod_declarations_are_imports() {
        let source = "mod config;\nmod error;\n\nfn main() {}\n";
        let chunks = chunks_of(source, "rs");
        assert_eq!(types(&chunks), vec![ChunkType::Import, ChunkType::Function]);
        assert_eq!(chunks[0].metadata["statements"], "2");
    }

    #[test]
    fn javascript_arrow_constants_are_functions() {
        let source = "import fs from 'fs';\n\nconst read = (p) => {\n  return fs.readFileSync(p);\n};\n\nconst LIMIT = 10;\n";
        let chunks = chunks_of(source, "js");
        assert_eq!(
            types(&chunks),
            vec![ChunkType::Import, ChunkType::Function, ChunkType::Global]
        );
        assert_eq!(chunks[1].name(), Some("read"));
    }

    #[test]
    fn typescript_exported_class_and_interface() {
        let source = r#"export interface Shape {
  area(): number;
}

export class Square implements Shape {
  constructor(private side: number) {}

  area(): number {
    return this.side * this.side;
  }
}
"#;
        let chunks = chunks_of(source, "ts");
        assert_eq!(
            types(&chunks),
            vec![
                ChunkType::Class,
                ChunkType::Class,
                ChunkType::Method,
                ChunkType::Method,
            ]
        );
        assert_eq!(chunks[0].name(), Some("Shape"));
        assert_eq!(chunks[0].metadata["methods"], "0");
        assert_eq!(chunks[1].name(), Some("Square"));
        assert_eq!(chunks[3].parent_name.as_deref(), Some("Square"));
        assert!(chunks[1].content.starts_with("export class Square"));
    }

    #[test]
    fn go_methods_use_receiver_type_as_parent() {
        let source = r#"// Package shapes draws things.
package shapes

import "math"

type Circle struct {
	R float64
}

func (c *Circle) Area() float64 {
	return math.Pi * c.R * c.R
}

func New(r float64) *Circle {
	return &Circle{R: r}
}
"#;
        let chunks = chunks_of(source, "go");
        assert_eq!(
            types(&chunks),
            vec![
                ChunkType::Docstring,
                ChunkType::Import,
                ChunkType::Import,
                ChunkType::Class,
                ChunkType::Method,
                ChunkType::Function,
            ]
        );
        assert_eq!(chunks[0].content, "// Package shapes draws things.");
        assert_eq!(chunks[1].content, "package shapes");
        assert_eq!(chunks[3].name(), Some("Circle"));
        assert_eq!(chunks[3].signature.as_deref(), Some("type Circle struct"));
        assert_eq!(chunks[4].parent_name.as_deref(), Some("Circle"));
        assert_eq!(chunks[4].name(), Some("Area"));
    }

    #[test]
    fn java_class_with_constructor_and_methods() {
        let source = r#"package com.example;

import java.util.List;

public class Repo {
    private final List<String> items;

    public Repo(List<String> items) {
        this.items = items;
    }

    public int size() {
        return items.size();
    }
}
"#;
        let chunks = chunks_of(source, "java");
        assert_eq!(
            types(&chunks),
            vec![
                ChunkType::Import,
                ChunkType::Import,
                ChunkType::Class,
                ChunkType::Method,
                ChunkType::Method,
            ]
        );
        assert_eq!(chunks[2].metadata["methods"], "2");
        assert!(chunks[2].content.contains("private final List<String> items;"));
        assert!(chunks[2].content.contains("public int size() { ... }"));
        assert_eq!(chunks[3].name(), Some("Repo"));
        assert_eq!(chunks[4].name(), Some("size"));
        assert_eq!(chunks[4].parent_name.as_deref(), Some("Repo"));
    }

    #[test]
    fn nested_classes_get_their_own_chunk() {
        let source = "class Outer:\n    class Inner:\n        def run(self):\n            return 1\n\n    def go(self):\n        return 2\n";
        let chunks = chunks_of(source, "py");
        let inner = chunks
            .iter()
            .find(|c| c.chunk_type == ChunkType::Class && c.name() == Some("Inner"))
            .unwrap();
        assert_eq!(inner.parent_name.as_deref(), Some("Outer"));
        let run = chunks.iter().find(|c| c.name() == Some("run")).unwrap();
        assert_eq!(run.parent_name.as_deref(), Some("Inner"));
        let outer = &chunks[0];
        assert_eq!(outer.name(), Some("Outer"));
        assert!(!outer.content.contains("return 1"));
    }

    #[test]
    fn boundaries_point_at_line_starts() {
        let source = "def f():\n    a = 1\n    b = 2\n    return a + b\n";
        let tree = parse(source, "py").unwrap();
        let extracted = extract(&tree, source, "f.py");
        let f = &extracted[0];
        for &b in &f.boundaries {
            assert!(b > 0 && b < f.chunk.content.len());
            assert_eq!(&f.chunk.content[b - 1..b], "\n");
        }
        assert_eq!(f.boundaries.len(), 3);
    }

    #[test]
    fn elide_maps_marks_through_replacements() {
        let text = "head{body}mid{more}tail";
        let (out, marks) = elide(text, 0..text.len(), &[(4, 10), (13, 19)], "{}", &[10, 19]);
        assert_eq!(out, "head{}mid{}tail");
        assert_eq!(marks, vec![6, 11]);
    }
}
