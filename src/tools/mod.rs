//! Sandboxed Tool API
//!
//! The only file-system surface available to model-written code. Every
//! operation takes a path relative to the [`MemoryRoot`], returns a value,
//! and either fully succeeds or leaves the memory directory untouched.
//!
//! # Operations
//!
//! | Snippet function         | Method                |
//! |--------------------------|-----------------------|
//! | `list_files(path)`       | [`ToolApi::list`]     |
//! | `read_file(path)`        | [`ToolApi::read`]     |
//! | `create_file(path, c)`   | [`ToolApi::create`]   |
//! | `update_file(path, o, n)`| [`ToolApi::update`]   |
//! | `delete_file(path)`      | [`ToolApi::delete`]   |
//! | `exists(path)`           | [`ToolApi::exists`]   |
//! | `create_dir(path)`       | [`ToolApi::create_dir`] |
//! | `check_if_file_exists`   | [`ToolApi::is_file`]  |
//! | `check_if_dir_exists`    | [`ToolApi::is_dir`]   |
//! | `go_to_link(link)`       | [`ToolApi::follow_link`] |
//! | `get_size(path)`         | [`ToolApi::size`]     |

pub mod limits;
pub mod paths;

use std::fmt::Display;
use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use limits::{tree_size, LimitScope, SizeLimits};
pub use paths::MemoryRoot;

/// Prefix of the temporary files used for atomic writes.
const TEMP_PREFIX: &str = ".recall-tmp-";

/// Errors raised by Tool API operations.
///
/// Serializable because they are raised inside the sandbox worker and
/// reported back to the host over the worker protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToolError {
    #[error("PathEscape: '{path}' is outside the memory directory")]
    PathEscape { path: String },

    #[error("NotFound: {detail}")]
    NotFound { detail: String },

    #[error("SizeExceeded: {scope} limit is {limit} bytes, write would reach {attempted} bytes")]
    SizeExceeded {
        scope: LimitScope,
        limit: u64,
        attempted: u64,
    },

    #[error("NotAFile: '{path}' is not a file")]
    NotAFile { path: String },

    #[error("NotADirectory: '{path}' is not a directory")]
    NotADirectory { path: String },

    #[error("IoError: {operation} '{path}': {message}")]
    Io {
        operation: String,
        path: String,
        message: String,
    },
}

impl ToolError {
    pub(crate) fn io(operation: &str, path: impl Display, err: io::Error) -> Self {
        ToolError::Io {
            operation: operation.to_string(),
            path: path.to_string(),
            message: err.to_string(),
        }
    }

    fn not_found(path: &str) -> Self {
        ToolError::NotFound {
            detail: format!("'{}' does not exist", path),
        }
    }

    /// Short label used for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            ToolError::PathEscape { .. } => "path_escape",
            ToolError::NotFound { .. } => "not_found",
            ToolError::SizeExceeded { .. } => "size_exceeded",
            ToolError::NotAFile { .. } => "not_a_file",
            ToolError::NotADirectory { .. } => "not_a_directory",
            ToolError::Io { .. } => "io",
        }
    }
}

/// File operations confined to one memory root.
#[derive(Debug, Clone)]
pub struct ToolApi {
    root: MemoryRoot,
    limits: SizeLimits,
}

impl ToolApi {
    pub fn new(root: MemoryRoot, limits: SizeLimits) -> Self {
        Self { root, limits }
    }

    /// Render the directory tree below `path`, rooted at `./`.
    pub fn list(&self, path: &str) -> Result<String, ToolError> {
        let dir = self.root.resolve(path)?;
        if !dir.exists() {
            return Err(ToolError::not_found(path));
        }
        if !dir.is_dir() {
            return Err(ToolError::NotADirectory { path: path.to_string() });
        }

        let label = match self.root.relative_display(&dir).as_str() {
            "." => "./".to_string(),
            rel => format!("{}/", rel),
        };

        let mut out = label;
        out.push('\n');
        render_tree(&dir, "", &mut out).map_err(|e| ToolError::io("list", path, e))?;
        Ok(out)
    }

    /// Read a file's full contents.
    pub fn read(&self, path: &str) -> Result<String, ToolError> {
        let file = self.root.resolve(path)?;
        if !file.exists() {
            return Err(ToolError::not_found(path));
        }
        if !file.is_file() {
            return Err(ToolError::NotAFile { path: path.to_string() });
        }
        fs::read_to_string(&file).map_err(|e| ToolError::io("read", path, e))
    }

    /// Create (or overwrite) a file, creating parent directories as needed.
    pub fn create(&self, path: &str, content: &str) -> Result<bool, ToolError> {
        let file = self.root.resolve(path)?;
        if file.is_dir() {
            return Err(ToolError::NotAFile { path: path.to_string() });
        }
        self.write_checked(path, &file, content)?;
        Ok(true)
    }

    /// Create a directory (and its parents). Succeeds if it already exists.
    pub fn create_dir(&self, path: &str) -> Result<bool, ToolError> {
        let dir = self.root.resolve(path)?;
        if dir.is_file() {
            return Err(ToolError::NotADirectory { path: path.to_string() });
        }
        fs::create_dir_all(&dir).map_err(|e| ToolError::io("create_dir", path, e))?;
        Ok(true)
    }

    /// Replace the single occurrence of `old` with `new`.
    ///
    /// Fails with [`ToolError::NotFound`] when `old` is absent or occurs more
    /// than once (overlapping occurrences included).
    pub fn update(&self, path: &str, old: &str, new: &str) -> Result<bool, ToolError> {
        let current = self.read(path)?;

        if old.is_empty() {
            return Err(ToolError::NotFound {
                detail: "old content must not be empty".to_string(),
            });
        }

        let Some(first) = current.find(old) else {
            return Err(ToolError::NotFound {
                detail: format!("old content does not occur in '{}'", path),
            });
        };

        let step = old.chars().next().map_or(1, char::len_utf8);
        if current[first + step..].contains(old) {
            return Err(ToolError::NotFound {
                detail: format!(
                    "old content occurs more than once in '{}'; include more surrounding text",
                    path
                ),
            });
        }

        let mut updated = String::with_capacity(current.len() + new.len());
        updated.push_str(&current[..first]);
        updated.push_str(new);
        updated.push_str(&current[first + old.len()..]);

        let file = self.root.resolve(path)?;
        self.write_checked(path, &file, &updated)?;
        Ok(true)
    }

    /// Delete a file.
    pub fn delete(&self, path: &str) -> Result<bool, ToolError> {
        let file = self.root.resolve(path)?;
        if !file.exists() {
            return Err(ToolError::not_found(path));
        }
        if !file.is_file() {
            return Err(ToolError::NotAFile { path: path.to_string() });
        }
        fs::remove_file(&file).map_err(|e| ToolError::io("delete", path, e))?;
        Ok(true)
    }

    /// Whether a file or directory exists at `path`.
    pub fn exists(&self, path: &str) -> Result<bool, ToolError> {
        Ok(self.root.resolve(path)?.exists())
    }

    pub fn is_file(&self, path: &str) -> Result<bool, ToolError> {
        Ok(self.root.resolve(path)?.is_file())
    }

    pub fn is_dir(&self, path: &str) -> Result<bool, ToolError> {
        Ok(self.root.resolve(path)?.is_dir())
    }

    /// Read the file a `[[wiki/link]]` points at; `.md` is appended when missing.
    pub fn follow_link(&self, link: &str) -> Result<String, ToolError> {
        let trimmed = link.trim();
        let inner = trimmed
            .strip_prefix("[[")
            .and_then(|s| s.strip_suffix("]]"))
            .unwrap_or(trimmed)
            .trim();

        if inner.ends_with(".md") {
            self.read(inner)
        } else {
            self.read(&format!("{}.md", inner))
        }
    }

    /// Size in bytes of a file, or of all files below a directory.
    pub fn size(&self, path: &str) -> Result<u64, ToolError> {
        let target = self.root.resolve(path)?;
        if !target.exists() {
            return Err(ToolError::not_found(path));
        }
        Ok(tree_size(&target))
    }

    /// Check limits, then write via a temp file and rename so that a failed
    /// write never leaves partial content behind.
    fn write_checked(&self, path: &str, file: &Path, content: &str) -> Result<(), ToolError> {
        self.limits
            .check_write(self.root.path(), file, content.len() as u64)?;

        let parent = file.parent().unwrap_or(self.root.path());
        fs::create_dir_all(parent).map_err(|e| ToolError::io("create_dir", path, e))?;

        let temp = parent.join(format!("{}{}", TEMP_PREFIX, Uuid::now_v7().simple()));
        if let Err(e) = fs::write(&temp, content) {
            let _ = fs::remove_file(&temp);
            return Err(ToolError::io("write", path, e));
        }
        if let Err(e) = fs::rename(&temp, file) {
            let _ = fs::remove_file(&temp);
            return Err(ToolError::io("write", path, e));
        }
        Ok(())
    }
}

fn render_tree(dir: &Path, prefix: &str, out: &mut String) -> io::Result<()> {
    let mut entries: Vec<_> = fs::read_dir(dir)?
        .filter_map(Result::ok)
        .filter(|e| !e.file_name().to_string_lossy().starts_with(TEMP_PREFIX))
        .collect();
    entries.sort_by_key(|e| e.file_name());

    let count = entries.len();
    for (i, entry) in entries.into_iter().enumerate() {
        let last = i + 1 == count;
        let name = entry.file_name().to_string_lossy().to_string();
        let file_type = entry.file_type()?;
        let branch = if last { "└── " } else { "├── " };

        if file_type.is_dir() {
            out.push_str(&format!("{}{}{}/\n", prefix, branch, name));
            let child_prefix = format!("{}{}", prefix, if last { "    " } else { "│   " });
            render_tree(&entry.path(), &child_prefix, out)?;
        } else {
            out.push_str(&format!("{}{}{}\n", prefix, branch, name));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api() -> (tempfile::TempDir, ToolApi) {
        let dir = tempfile::tempdir().unwrap();
        let root = MemoryRoot::open(dir.path()).unwrap();
        (dir, ToolApi::new(root, SizeLimits::default()))
    }

    #[test]
    fn test_create_then_read() {
        let (_dir, api) = api();
        assert!(api.create("entities/x.md", "hello").unwrap());
        assert_eq!(api.read("entities/x.md").unwrap(), "hello");
    }

    #[test]
    fn test_create_overwrites() {
        let (_dir, api) = api();
        api.create("note.md", "original").unwrap();
        api.create("note.md", "updated").unwrap();
        assert_eq!(api.read("note.md").unwrap(), "updated");
    }

    #[test]
    fn test_read_missing_and_directory() {
        let (_dir, api) = api();
        api.create_dir("entities").unwrap();
        assert!(matches!(api.read("ghost.md"), Err(ToolError::NotFound { .. })));
        assert!(matches!(api.read("entities"), Err(ToolError::NotAFile { .. })));
    }

    #[test]
    fn test_update_replaces_single_occurrence() {
        let (_dir, api) = api();
        api.create("user.md", "Hello World").unwrap();
        assert!(api.update("user.md", "World", "Recall").unwrap());
        assert_eq!(api.read("user.md").unwrap(), "Hello Recall");
    }

    #[test]
    fn test_update_rejects_ambiguous_match() {
        let (_dir, api) = api();
        api.create("user.md", "old text and old text").unwrap();
        assert!(matches!(
            api.update("user.md", "old text", "new text"),
            Err(ToolError::NotFound { .. })
        ));
        assert_eq!(api.read("user.md").unwrap(), "old text and old text");
    }

    #[test]
    fn test_update_rejects_overlapping_match() {
        let (_dir, api) = api();
        api.create("n.md", "aaa").unwrap();
        assert!(api.update("n.md", "aa", "b").is_err());
    }

    #[test]
    fn test_update_missing_text() {
        let (_dir, api) = api();
        api.create("n.md", "Hello").unwrap();
        assert!(matches!(
            api.update("n.md", "Nope", "x"),
            Err(ToolError::NotFound { .. })
        ));
    }

    #[test]
    fn test_multiline_update() {
        let (_dir, api) = api();
        api.create("n.md", "line1\nline2\nline3").unwrap();
        api.update("n.md", "line2\nline3", "new_line2\nnew_line3").unwrap();
        assert_eq!(api.read("n.md").unwrap(), "line1\nnew_line2\nnew_line3");
    }

    #[test]
    fn test_delete() {
        let (_dir, api) = api();
        api.create("bye.md", "bye").unwrap();
        assert!(api.delete("bye.md").unwrap());
        assert!(!api.exists("bye.md").unwrap());
        assert!(matches!(api.delete("bye.md"), Err(ToolError::NotFound { .. })));
    }

    #[test]
    fn test_existence_checks() {
        let (_dir, api) = api();
        api.create("entities/alice.md", "# Alice").unwrap();
        assert!(api.is_file("entities/alice.md").unwrap());
        assert!(!api.is_dir("entities/alice.md").unwrap());
        assert!(api.is_dir("entities").unwrap());
        assert!(!api.is_file("entities").unwrap());
        assert!(api.exists("entities").unwrap());
        assert!(!api.exists("nope.md").unwrap());
    }

    #[test]
    fn test_follow_link() {
        let (_dir, api) = api();
        api.create("entities/alice.md", "# Alice\n- company: Acme Corp").unwrap();
        assert!(api.follow_link("[[entities/alice]]").unwrap().contains("Acme Corp"));
        assert!(api.follow_link("[[entities/alice.md]]").unwrap().contains("Alice"));
        assert!(matches!(
            api.follow_link("[[entities/nobody]]"),
            Err(ToolError::NotFound { .. })
        ));
    }

    #[test]
    fn test_size() {
        let (_dir, api) = api();
        api.create("a.md", "aaa").unwrap();
        api.create("sub/b.md", "bbbb").unwrap();
        assert_eq!(api.size("a.md").unwrap(), 3);
        assert_eq!(api.size(".").unwrap(), 7);
        assert!(matches!(api.size("ghost"), Err(ToolError::NotFound { .. })));
    }

    #[test]
    fn test_list_renders_tree() {
        let (_dir, api) = api();
        api.create("user.md", "x").unwrap();
        api.create("entities/alice.md", "y").unwrap();
        let tree = api.list(".").unwrap();
        assert!(tree.starts_with("./\n"));
        assert!(tree.contains("entities/"));
        assert!(tree.contains("alice.md"));
        assert!(tree.contains("user.md"));
    }

    #[test]
    fn test_list_empty_root() {
        let (_dir, api) = api();
        assert_eq!(api.list(".").unwrap(), "./\n");
    }

    #[test]
    fn test_oversized_write_leaves_file_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let root = MemoryRoot::open(dir.path()).unwrap();
        let api = ToolApi::new(root, SizeLimits { per_file: 8, per_dir: 1024, total: 1024 });

        api.create("n.md", "short").unwrap();
        let err = api.create("n.md", "much too long").unwrap_err();
        assert!(matches!(err, ToolError::SizeExceeded { scope: LimitScope::File, .. }));
        assert_eq!(api.read("n.md").unwrap(), "short");
    }

    #[test]
    fn test_error_labels() {
        let err = ToolError::PathEscape { path: "../x".into() };
        assert_eq!(err.label(), "path_escape");
        assert!(err.to_string().contains("PathEscape"));
    }
}
