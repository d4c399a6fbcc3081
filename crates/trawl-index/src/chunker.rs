//! Line-window chunking of source files.
//!
//! Files are cut into overlapping windows of whole lines. A window prefers
//! to end on a blank line in its last quarter so chunks tend to follow the
//! paragraph structure of the code.

use std::path::Path;

use trawl_core::{Chunk, ChunkingConfig};

/// Source language, detected from the file extension.
///
/// # Examples
///
/// ```
/// use trawl_index::chunker::Language;
///
/// assert_eq!(Language::from_extension("rs"), Language::Rust);
/// assert_eq!(Language::from_extension("tsx").as_str(), "typescript");
/// assert_eq!(Language::from_extension("weird"), Language::Unknown);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    Rust,
    Python,
    TypeScript,
    JavaScript,
    Go,
    Java,
    C,
    Cpp,
    Ruby,
    Php,
    Kotlin,
    Swift,
    Markdown,
    Toml,
    Unknown,
}

impl Language {
    /// Detect language from a file extension string (without the dot).
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "rs" => Language::Rust,
            "py" => Language::Python,
            "ts" | "tsx" => Language::TypeScript,
            "js" | "jsx" | "mjs" | "cjs" => Language::JavaScript,
            "go" => Language::Go,
            "java" => Language::Java,
            "c" | "h" => Language::C,
            "cpp" | "cc" | "cxx" | "hpp" | "hxx" | "hh" => Language::Cpp,
            "rb" => Language::Ruby,
            "php" => Language::Php,
            "kt" | "kts" => Language::Kotlin,
            "swift" => Language::Swift,
            "md" | "markdown" => Language::Markdown,
            "toml" => Language::Toml,
            _ => Language::Unknown,
        }
    }

    /// Detect language from a path's extension.
    pub fn from_path(path: &Path) -> Self {
        path.extension()
            .and_then(|e| e.to_str())
            .map_or(Language::Unknown, Language::from_extension)
    }

    /// Lowercase name stored on chunks.
    pub fn as_str(self) -> &'static str {
        match self {
            Language::Rust => "rust",
            Language::Python => "python",
            Language::TypeScript => "typescript",
            Language::JavaScript => "javascript",
            Language::Go => "go",
            Language::Java => "java",
            Language::C => "c",
            Language::Cpp => "cpp",
            Language::Ruby => "ruby",
            Language::Php => "php",
            Language::Kotlin => "kotlin",
            Language::Swift => "swift",
            Language::Markdown => "markdown",
            Language::Toml => "toml",
            Language::Unknown => "text",
        }
    }
}

/// Cut `content` into line windows.
///
/// Windows hold at most `config.max_lines` lines and consecutive windows
/// share `config.overlap` lines. Whitespace-only windows are skipped.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use trawl_core::ChunkingConfig;
/// use trawl_index::chunker::chunk_file;
///
/// let source = (1..=100).map(|i| format!("let x{i} = {i};")).collect::<Vec<_>>().join("\n");
/// let chunks = chunk_file(Path::new("src/big.rs"), &source, &ChunkingConfig::default());
///
/// assert_eq!(chunks[0].start_line, 1);
/// assert_eq!(chunks[0].end_line, 40);
/// assert_eq!(chunks[1].start_line, 36);
/// assert_eq!(chunks.last().unwrap().end_line, 100);
/// assert!(chunks.iter().all(|c| c.language == "rust"));
/// ```
pub fn chunk_file(path: &Path, content: &str, config: &ChunkingConfig) -> Vec<Chunk> {
    let lines: Vec<&str> = content.lines().collect();
    let language = Language::from_path(path).as_str();
    let max_lines = config.max_lines.max(1);
    let overlap = config.overlap.min(max_lines - 1);

    let mut chunks = Vec::new();
    let mut start = 0usize;
    while start < lines.len() {
        let mut end = (start + max_lines).min(lines.len());
        if end < lines.len() {
            let earliest = start + max_lines - max_lines / 4;
            if let Some(blank) = (earliest..end).rev().find(|&i| lines[i].trim().is_empty()) {
                end = blank + 1;
            }
        }

        let window = &lines[start..end];
        if window.iter().any(|l| !l.trim().is_empty()) {
            chunks.push(Chunk::new(
                path.to_path_buf(),
                (start + 1) as u32,
                end as u32,
                language,
                window.join("\n"),
            ));
        }

        if end == lines.len() {
            break;
        }
        start = end.saturating_sub(overlap).max(start + 1);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_lines: usize, overlap: usize) -> ChunkingConfig {
        ChunkingConfig { max_lines, overlap }
    }

    #[test]
    fn short_file_is_one_chunk() {
        let chunks = chunk_file(Path::new("a.py"), "def f():\n    return 1\n", &config(40, 5));
        assert_eq!(chunks.len(), 1);
        assert_eq!((chunks[0].start_line, chunks[0].end_line), (1, 2));
        assert_eq!(chunks[0].content, "def f():\n    return 1");
        assert_eq!(chunks[0].language, "python");
    }

    #[test]
    fn empty_and_blank_files_have_no_chunks() {
        assert!(chunk_file(Path::new("a.rs"), "", &config(40, 5)).is_empty());
        assert!(chunk_file(Path::new("a.rs"), "\n\n   \n", &config(40, 5)).is_empty());
    }

    #[test]
    fn prefers_blank_line_near_window_end() {
        let mut lines: Vec<String> = (1..=20).map(|i| format!("line {i}")).collect();
        lines[8] = String::new();
        let chunks = chunk_file(Path::new("a.rs"), &lines.join("\n"), &config(10, 2));
        assert_eq!(chunks[0].end_line, 9);
        assert_eq!(chunks[1].start_line, 8);
    }

    #[test]
    fn ignores_blank_line_early_in_window() {
        let mut lines: Vec<String> = (1..=20).map(|i| format!("line {i}")).collect();
        lines[2] = String::new();
        let chunks = chunk_file(Path::new("a.rs"), &lines.join("\n"), &config(10, 2));
        assert_eq!(chunks[0].end_line, 10);
    }

    #[test]
    fn windows_cover_every_line() {
        let source: String = (1..=97).map(|i| format!("x{i}\n")).collect();
        let chunks = chunk_file(Path::new("a.go"), &source, &config(10, 3));
        assert_eq!(chunks[0].start_line, 1);
        for pair in chunks.windows(2) {
            assert!(pair[1].start_line <= pair[0].end_line + 1);
            assert!(pair[1].start_line > pair[0].start_line);
        }
        assert_eq!(chunks.last().unwrap().end_line, 97);
    }

    #[test]
    fn unchanged_ranges_keep_their_ids() {
        let a = chunk_file(Path::new("a.rs"), "one\ntwo\nthree", &config(40, 5));
        let b = chunk_file(Path::new("a.rs"), "uno\ndos\ntres", &config(40, 5));
        assert_eq!(a[0].id, b[0].id);
        assert_ne!(a[0].content_hash, b[0].content_hash);
    }

    #[test]
    fn language_detection() {
        assert_eq!(Language::from_path(Path::new("x/y.RS")), Language::Rust);
        assert_eq!(Language::from_path(Path::new("Makefile")), Language::Unknown);
        assert_eq!(Language::Unknown.as_str(), "text");
    }
}
