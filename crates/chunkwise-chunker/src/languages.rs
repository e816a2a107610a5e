//! Registry of recognized languages.
//!
//! Each [`LanguageSpec`] pairs a tree-sitter grammar with the node-kind
//! tables the extractor needs. Supporting a new language means adding one
//! entry to [`LANGUAGES`]; the extraction logic never matches on language
//! names.

use tree_sitter::Language;

/// Grammar and node-kind tables for one language.
#[derive(Debug)]
pub struct LanguageSpec {
    /// Canonical language tag (`"python"`, `"rust"`, ...).
    pub name: &'static str,
    /// File extensions, without the dot.
    pub extensions: &'static [&'static str],
    grammar: fn() -> Language,
    /// Top-level import-like statements.
    pub(crate) imports: &'static [&'static str],
    /// Class-like constructs whose bodies hold methods.
    pub(crate) classes: &'static [&'static str],
    /// Top-level function definitions.
    pub(crate) functions: &'static [&'static str],
    /// Method definitions inside a class body.
    pub(crate) methods: &'static [&'static str],
    /// Top-level definitions bound to a type through a receiver (Go).
    pub(crate) receiver_methods: &'static [&'static str],
    /// Variable declarations that count as functions when they bind a
    /// function value (`const f = () => {}`).
    pub(crate) declarations: &'static [&'static str],
    pub(crate) comments: &'static [&'static str],
    /// Attributes that attach to the following item.
    pub(crate) attributes: &'static [&'static str],
    /// Wrapper kinds and the field holding the wrapped declaration.
    pub(crate) wrappers: &'static [(&'static str, &'static str)],
    /// Nodes inside a class body that hold further members.
    pub(crate) member_groups: &'static [&'static str],
    /// Comment prefixes that mark module documentation.
    pub(crate) doc_comment_prefixes: &'static [&'static str],
    /// A leading string expression is the module docstring.
    pub(crate) string_docstrings: bool,
    /// A comment directly above this statement documents the module.
    pub(crate) package_clause: Option<&'static str>,
    /// Replacement text for elided method bodies.
    pub(crate) elided_body: &'static str,
}

impl LanguageSpec {
    /// Tree-sitter grammar for this language.
    pub fn grammar(&self) -> Language {
        (self.grammar)()
    }

    pub(crate) fn is_comment(&self, kind: &str) -> bool {
        self.comments.contains(&kind)
    }

    pub(crate) fn is_trivia(&self, kind: &str) -> bool {
        self.comments.contains(&kind) || self.attributes.contains(&kind)
    }

    pub(crate) fn wrapper_field(&self, kind: &str) -> Option<&'static str> {
        self.wrappers
            .iter()
            .find(|(wrapper, _)| *wrapper == kind)
            .map(|(_, field)| *field)
    }
}

fn python_grammar() -> Language {
    tree_sitter_python::LANGUAGE.into()
}

fn rust_grammar() -> Language {
    tree_sitter_rust::LANGUAGE.into()
}

fn javascript_grammar() -> Language {
    tree_sitter_javascript::LANGUAGE.into()
}

fn typescript_grammar() -> Language {
    tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()
}

fn tsx_grammar() -> Language {
    tree_sitter_typescript::LANGUAGE_TSX.into()
}

fn go_grammar() -> Language {
    tree_sitter_go::LANGUAGE.into()
}

fn java_grammar() -> Language {
    tree_sitter_java::LANGUAGE.into()
}

const JS_IMPORTS: &[&str] = &["import_statement"];
const JS_FUNCTIONS: &[&str] = &["function_declaration", "generator_function_declaration"];
const JS_DECLARATIONS: &[&str] = &["lexical_declaration", "variable_declaration"];
const JS_WRAPPERS: &[(&str, &str)] = &[("export_statement", "declaration")];
const TS_CLASSES: &[&str] = &[
    "class_declaration",
    "abstract_class_declaration",
    "interface_declaration",
    "enum_declaration",
];

/// Every recognized language.
pub static LANGUAGES: &[LanguageSpec] = &[
    LanguageSpec {
        name: "python",
        extensions: &["py", "pyi"],
        grammar: python_grammar,
        imports: &[
            "import_statement",
            "import_from_statement",
            "future_import_statement",
        ],
        classes: &["class_definition"],
        functions: &["function_definition"],
        methods: &["function_definition"],
        receiver_methods: &[],
        declarations: &[],
        comments: &["comment"],
        attributes: &[],
        wrappers: &[("decorated_definition", "definition")],
        member_groups: &[],
        doc_comment_prefixes: &[],
        string_docstrings: true,
        package_clause: None,
        elided_body: "...",
    },
    LanguageSpec {
        name: "rust",
        extensions: &["rs"],
        grammar: rust_grammar,
        imports: &["use_declaration", "extern_crate_declaration"],
        classes: &[
            "struct_item",
            "enum_item",
            "union_item",
            "trait_item",
            "impl_item",
            "mod_item",
        ],
        functions: &["function_item"],
        methods: &["function_item"],
        receiver_methods: &[],
        declarations: &[],
        comments: &["line_comment", "block_comment"],
        attributes: &["attribute_item"],
        wrappers: &[],
        member_groups: &[],
        doc_comment_prefixes: &["//!", "/*!"],
        string_docstrings: false,
        package_clause: None,
        elided_body: "{ ... }",
    },
    LanguageSpec {
        name: "javascript",
        extensions: &["js", "jsx", "mjs", "cjs"],
        grammar: javascript_grammar,
        imports: JS_IMPORTS,
        classes: &["class_declaration"],
        functions: JS_FUNCTIONS,
        methods: &["method_definition"],
        receiver_methods: &[],
        declarations: JS_DECLARATIONS,
        comments: &["comment"],
        attributes: &[],
        wrappers: JS_WRAPPERS,
        member_groups: &[],
        doc_comment_prefixes: &[],
        string_docstrings: false,
        package_clause: None,
        elided_body: "{ ... }",
    },
    LanguageSpec {
        name: "typescript",
        extensions: &["ts", "mts", "cts"],
        grammar: typescript_grammar,
        imports: JS_IMPORTS,
        classes: TS_CLASSES,
        functions: JS_FUNCTIONS,
        methods: &["method_definition"],
        receiver_methods: &[],
        declarations: JS_DECLARATIONS,
        comments: &["comment"],
        attributes: &[],
        wrappers: JS_WRAPPERS,
        member_groups: &[],
        doc_comment_prefixes: &[],
        string_docstrings: false,
        package_clause: None,
        elided_body: "{ ... }",
    },
    LanguageSpec {
        name: "tsx",
        extensions: &["tsx"],
        grammar: tsx_grammar,
        imports: JS_IMPORTS,
        classes: TS_CLASSES,
        functions: JS_FUNCTIONS,
        methods: &["method_definition"],
        receiver_methods: &[],
        declarations: JS_DECLARATIONS,
        comments: &["comment"],
        attributes: &[],
        wrappers: JS_WRAPPERS,
        member_groups: &[],
        doc_comment_prefixes: &[],
        string_docstrings: false,
        package_clause: None,
        elided_body: "{ ... }",
    },
    LanguageSpec {
        name: "go",
        extensions: &["go"],
        grammar: go_grammar,
        imports: &["package_clause", "import_declaration"],
        classes: &["type_declaration"],
        functions: &["function_declaration"],
        methods: &[],
        receiver_methods: &["method_declaration"],
        declarations: &[],
        comments: &["comment"],
        attributes: &[],
        wrappers: &[],
        member_groups: &[],
        doc_comment_prefixes: &[],
        string_docstrings: false,
        package_clause: Some("package_clause"),
        elided_body: "{ ... }",
    },
    LanguageSpec {
        name: "java",
        extensions: &["java"],
        grammar: java_grammar,
        imports: &["package_declaration", "import_declaration"],
        classes: &[
            "class_declaration",
            "interface_declaration",
            "enum_declaration",
            "record_declaration",
            "annotation_type_declaration",
        ],
        functions: &[],
        methods: &[
            "method_declaration",
            "constructor_declaration",
            "compact_constructor_declaration",
        ],
        receiver_methods: &[],
        declarations: &[],
        comments: &["line_comment", "block_comment"],
        attributes: &[],
        wrappers: &[],
        member_groups: &["enum_body_declarations"],
        doc_comment_prefixes: &[],
        string_docstrings: false,
        package_clause: None,
        elided_body: "{ ... }",
    },
];

/// Look up a language by tag (`"python"`) or extension (`"py"`, `".py"`).
///
/// # Examples
///
/// ```
/// use chunkwise_chunker::languages::lookup;
///
/// assert_eq!(lookup("py").unwrap().name, "python");
/// assert_eq!(lookup("Rust").unwrap().name, "rust");
/// assert!(lookup("cobol").is_none());
/// ```
pub fn lookup(tag: &str) -> Option<&'static LanguageSpec> {
    let tag = tag.trim().trim_start_matches('.').to_lowercase();
    LANGUAGES
        .iter()
        .find(|spec| spec.name == tag)
        .or_else(|| for_extension(&tag))
}

/// Look up a language by file extension only.
pub fn for_extension(ext: &str) -> Option<&'static LanguageSpec> {
    LANGUAGES
        .iter()
        .find(|spec| spec.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
}

/// Every registered extension, in registry order.
pub fn supported_extensions() -> Vec<&'static str> {
    LANGUAGES
        .iter()
        .flat_map(|spec| spec.extensions.iter().copied())
        .collect()
}
