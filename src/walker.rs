use std::path::Path;

use tracing::{debug, warn};
use trawl_core::{SourceFile, TrawlError};
use trawl_index::chunker::Language;

/// Maximum file size to index (1 MB).
const MAX_FILE_SIZE: u64 = 1_048_576;

/// Number of bytes to check for binary detection.
const BINARY_CHECK_SIZE: usize = 8192;

/// Walk a repository, respecting `.gitignore`, returning indexable files.
///
/// Skips hidden entries (including the index directory), binary files,
/// files larger than 1 MB and files of unknown language. Returned paths are
/// relative to `root` and sorted.
///
/// # Errors
///
/// Returns [`TrawlError::Io`] if `root` is not a directory.
pub fn walk_repo(root: &Path) -> Result<Vec<SourceFile>, TrawlError> {
    if !root.is_dir() {
        return Err(TrawlError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{} is not a directory", root.display()),
        )));
    }

    let mut files = Vec::new();
    for entry in ignore::WalkBuilder::new(root).build() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "skipping unreadable directory entry");
                continue;
            }
        };
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }

        let path = entry.path();
        let metadata = match std::fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping file without metadata");
                continue;
            }
        };
        if metadata.len() > MAX_FILE_SIZE {
            debug!(path = %path.display(), size = metadata.len(), "skipping large file");
            continue;
        }
        if Language::from_path(path) == Language::Unknown {
            continue;
        }

        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                debug!(path = %path.display(), "skipping non UTF-8 file");
                continue;
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping unreadable file");
                continue;
            }
        };
        let check_len = content.len().min(BINARY_CHECK_SIZE);
        if content.as_bytes()[..check_len].contains(&0) {
            debug!(path = %path.display(), "skipping binary file");
            continue;
        }

        let relative = path.strip_prefix(root).unwrap_or(path).to_path_buf();
        files.push(SourceFile::new(relative, content));
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;

    fn make_temp_repo() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();

        fs::create_dir_all(root.join("src")).unwrap();
        fs::write(root.join("src/main.rs"), "fn main() {}").unwrap();
        fs::write(root.join("src/lib.py"), "def hello(): pass").unwrap();
        fs::write(root.join("README.md"), "# Hello").unwrap();
        fs::write(root.join("data.csv"), "a,b,c").unwrap();

        fs::create_dir_all(root.join(".trawl")).unwrap();
        fs::write(root.join(".trawl/notes.md"), "# hidden").unwrap();
        dir
    }

    #[test]
    fn finds_known_languages_only() {
        let dir = make_temp_repo();
        let files = walk_repo(dir.path()).unwrap();
        let paths: Vec<PathBuf> = files.iter().map(|f| f.path.clone()).collect();
        assert_eq!(
            paths,
            vec![
                PathBuf::from("README.md"),
                PathBuf::from("src/lib.py"),
                PathBuf::from("src/main.rs"),
            ]
        );
    }

    #[test]
    fn hashes_file_content() {
        let dir = make_temp_repo();
        let files = walk_repo(dir.path()).unwrap();
        let main = files.iter().find(|f| f.path.ends_with("main.rs")).unwrap();
        assert_eq!(main.content_hash, trawl_core::fingerprint("fn main() {}"));
    }

    #[test]
    fn skips_binary_and_large_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("bin.rs"), b"fn a() {}\0\0").unwrap();
        fs::write(dir.path().join("big.rs"), vec![b'a'; (MAX_FILE_SIZE + 1) as usize]).unwrap();
        assert!(walk_repo(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn skips_non_utf8_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("latin1.rs"), b"// caf\xe9\nfn a() {}\n").unwrap();
        fs::write(dir.path().join("ok.rs"), "fn b() {}").unwrap();
        let files = walk_repo(dir.path()).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, PathBuf::from("ok.rs"));
    }

    #[test]
    fn respects_gitignore() {
        let dir = make_temp_repo();
        fs::create_dir_all(dir.path().join(".git")).unwrap();
        fs::write(dir.path().join(".gitignore"), "src/lib.py\n").unwrap();
        let files = walk_repo(dir.path()).unwrap();
        assert!(files.iter().all(|f| !f.path.ends_with("lib.py")));
    }

    #[test]
    fn missing_root_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(walk_repo(&dir.path().join("nope")).is_err());
    }
}
