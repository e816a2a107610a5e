use std::io::Read;
use std::path::{Component, Path, PathBuf};

use chunkwise_core::ChunkwiseError;

use crate::languages;

/// Maximum file size to index (1 MB).
const MAX_FILE_SIZE: u64 = 1_048_576;

/// Number of bytes to check for binary detection.
const BINARY_CHECK_SIZE: usize = 8192;

/// A file selected for indexing. Content is read later, per file.
///
/// # Examples
///
/// ```
/// use std::path::PathBuf;
/// use chunkwise_chunker::walker::SourceFile;
///
/// let file = SourceFile {
///     path: PathBuf::from("/repo/src/main.rs"),
///     relative_path: "src/main.rs".into(),
///     extension: "rs".into(),
/// };
/// assert_eq!(file.relative_path, "src/main.rs");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// Path on disk.
    pub path: PathBuf,
    /// Path relative to the walked root, with `/` separators.
    pub relative_path: String,
    /// Lowercased extension without the dot.
    pub extension: String,
}

/// Walk `root`, respecting `.gitignore`, returning files to index.
///
/// Only files whose extension is in `extensions` are kept; an empty list
/// selects every extension the language registry knows. Binary files and
/// files larger than 1 MB are skipped. Results are sorted by relative path.
///
/// # Errors
///
/// Returns [`ChunkwiseError::FileNotFound`] if `root` does not exist.
///
/// # Examples
///
/// ```no_run
/// use std::path::Path;
/// use chunkwise_chunker::walker::walk_sources;
///
/// let files = walk_sources(Path::new("."), &["py".to_string()]).unwrap();
/// for f in &files {
///     println!("{}", f.relative_path);
/// }
/// ```
pub fn walk_sources(root: &Path, extensions: &[String]) -> Result<Vec<SourceFile>, ChunkwiseError> {
    if !root.exists() {
        return Err(ChunkwiseError::FileNotFound(root.to_path_buf()));
    }

    let wanted: Vec<String> = if extensions.is_empty() {
        languages::supported_extensions()
            .into_iter()
            .map(str::to_string)
            .collect()
    } else {
        extensions
            .iter()
            .map(|e| e.trim().trim_start_matches('.').to_lowercase())
            .filter(|e| !e.is_empty())
            .collect()
    };

    let walker = ignore::WalkBuilder::new(root).build();
    let mut files = Vec::new();

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(err) => {
                tracing::debug!(error = %err, "skipping unreadable entry");
                continue;
            }
        };

        let Some(file_type) = entry.file_type() else {
            continue;
        };
        if !file_type.is_file() {
            continue;
        }

        let path = entry.path();

        let Some(extension) = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
        else {
            continue;
        };
        if !wanted.contains(&extension) {
            continue;
        }

        let metadata = match std::fs::metadata(path) {
            Ok(m) => m,
            Err(_) => continue,
        };
        if metadata.len() > MAX_FILE_SIZE {
            tracing::debug!(path = %path.display(), size = metadata.len(), "skipping large file");
            continue;
        }

        if looks_binary(path) {
            tracing::debug!(path = %path.display(), "skipping binary file");
            continue;
        }

        let relative = path.strip_prefix(root).unwrap_or(path);
        files.push(SourceFile {
            path: path.to_path_buf(),
            relative_path: to_slash(relative),
            extension,
        });
    }

    files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(files)
}

/// Null bytes in the first 8KB mark a file as binary.
fn looks_binary(path: &Path) -> bool {
    let Ok(file) = std::fs::File::open(path) else {
        return true;
    };
    let mut head = Vec::with_capacity(BINARY_CHECK_SIZE);
    if file
        .take(BINARY_CHECK_SIZE as u64)
        .read_to_end(&mut head)
        .is_err()
    {
        return true;
    }
    head.contains(&0)
}

/// Render a path with `/` separators on every platform, dropping `.`
/// components.
pub fn to_slash(path: &Path) -> String {
    let mut out = String::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::RootDir => out.push('/'),
            other => {
                if !out.is_empty() && !out.ends_with('/') {
                    out.push('/');
                }
                out.push_str(&other.as_os_str().to_string_lossy());
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn make_temp_repo() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();

        fs::create_dir_all(root.join("src")).unwrap();
        fs::write(root.join("src/main.rs"), "fn main() {}").unwrap();
        fs::write(root.join("src/lib.py"), "def hello(): pass").unwrap();
        fs::write(root.join("src/app.ts"), "function run() {}").unwrap();
        fs::write(root.join("src/util.js"), "const x = 1;").unwrap();
        fs::write(root.join("src/main.go"), "package main").unwrap();
        fs::write(
            root.join("src/Main.java"),
            "public class Main { public static void main(String[] args) {} }",
        )
        .unwrap();

        fs::write(root.join("README.md"), "# Hello").unwrap();
        fs::write(root.join("notes.txt"), "plain notes").unwrap();

        dir
    }

    #[test]
    fn walk_finds_registered_extensions_by_default() {
        let dir = make_temp_repo();
        let files = walk_sources(dir.path(), &[]).unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.relative_path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "src/Main.java",
                "src/app.ts",
                "src/lib.py",
                "src/main.go",
                "src/main.rs",
                "src/util.js",
            ]
        );
    }

    #[test]
    fn walk_honours_extension_filter() {
        let dir = make_temp_repo();
        let files = walk_sources(dir.path(), &[".PY".into(), "txt".into()]).unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.relative_path.as_str()).collect();
        assert_eq!(paths, vec!["notes.txt", "src/lib.py"]);
    }

    #[test]
    fn walk_respects_gitignore() {
        let dir = make_temp_repo();
        let root = dir.path();

        // The ignore crate needs a .git dir to recognize .gitignore files
        fs::create_dir_all(root.join(".git")).unwrap();
        fs::create_dir_all(root.join("build")).unwrap();
        fs::write(root.join("build/output.rs"), "fn ignored() {}").unwrap();
        fs::write(root.join(".gitignore"), "build/\n").unwrap();

        let files = walk_sources(root, &[]).unwrap();
        assert!(files.iter().all(|f| !f.relative_path.starts_with("build")));
    }

    #[test]
    fn walk_skips_binary_and_large_files() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();

        let mut binary_content = b"fn main() { ".to_vec();
        binary_content.push(0);
        binary_content.extend_from_slice(b" }");
        fs::write(root.join("binary.rs"), &binary_content).unwrap();
        fs::write(root.join("huge.rs"), "x".repeat(1_048_577)).unwrap();
        fs::write(root.join("ok.rs"), "fn ok() {}").unwrap();

        let files = walk_sources(root, &[]).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].relative_path, "ok.rs");
        assert_eq!(files[0].extension, "rs");
    }

    #[test]
    fn to_slash_normalizes_separators_and_dots() {
        assert_eq!(to_slash(Path::new("./src/lib.rs")), "src/lib.rs");
        assert_eq!(to_slash(Path::new("/repo/src/lib.rs")), "/repo/src/lib.rs");
        assert_eq!(to_slash(Path::new("a/../b.py")), "a/../b.py");
    }

    #[test]
    fn missing_root_is_an_error() {
        let err = walk_sources(Path::new("/definitely/not/here"), &[]).unwrap_err();
        assert!(matches!(err, ChunkwiseError::FileNotFound(_)));
    }
}
