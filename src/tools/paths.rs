//! Memory root confinement
//!
//! Every path handed to the Tool API is relative to the memory root. Paths are
//! rejected lexically first (absolute paths, `..` components) and then walked
//! component by component so that a symlink anywhere along the way cannot lead
//! outside the canonical root.
//!
//! ```text
//! "entities/alice.md"
//!      │
//!      ▼  lexical check: no root, no "..", no NUL
//! <root>/entities/alice.md
//!      │
//!      ▼  walk: every existing component that is a symlink is canonicalized
//!         and must still be a descendant of <root>
//! resolved path
//! ```

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use super::ToolError;

/// Canonical, absolute directory that bounds every file operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryRoot {
    path: PathBuf,
}

impl MemoryRoot {
    /// Open an existing directory as the memory root.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ToolError> {
        let path = path.as_ref();
        let canonical = fs::canonicalize(path)
            .map_err(|e| ToolError::io("open memory root", path.display(), e))?;

        if !canonical.is_dir() {
            return Err(ToolError::NotADirectory {
                path: path.display().to_string(),
            });
        }

        Ok(Self { path: canonical })
    }

    /// Open the memory root, creating the directory first when it is missing.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, ToolError> {
        let path = path.as_ref();
        fs::create_dir_all(path)
            .map_err(|e| ToolError::io("create memory root", path.display(), e))?;
        Self::open(path)
    }

    /// The canonical absolute path of the root.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Resolve a root-relative path to an absolute path inside the root.
    ///
    /// The returned path may not exist yet (for `create`), but every component
    /// of it that does exist has been checked against the root.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf, ToolError> {
        let escape = || ToolError::PathEscape {
            path: relative.to_string(),
        };

        if relative.contains('\0') {
            return Err(escape());
        }

        let mut parts = Vec::new();
        for component in Path::new(relative).components() {
            match component {
                Component::Normal(part) => parts.push(part.to_owned()),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(escape());
                }
            }
        }

        let mut current = self.path.clone();
        let mut on_disk = true;

        for part in parts {
            let next = current.join(&part);

            if !on_disk {
                current = next;
                continue;
            }

            match fs::symlink_metadata(&next) {
                Ok(meta) if meta.file_type().is_symlink() => {
                    // Dangling links cannot be proven to stay inside the root.
                    let target = fs::canonicalize(&next).map_err(|_| escape())?;
                    if !target.starts_with(&self.path) {
                        return Err(escape());
                    }
                    current = target;
                }
                Ok(_) => current = next,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    on_disk = false;
                    current = next;
                }
                Err(e) => return Err(ToolError::io("resolve", relative, e)),
            }
        }

        Ok(current)
    }

    /// Render an absolute path inside the root as a root-relative string.
    pub fn relative_display(&self, absolute: &Path) -> String {
        match absolute.strip_prefix(&self.path) {
            Ok(rel) if rel.as_os_str().is_empty() => ".".to_string(),
            Ok(rel) => rel.display().to_string(),
            Err(_) => absolute.display().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root() -> (tempfile::TempDir, MemoryRoot) {
        let dir = tempfile::tempdir().unwrap();
        let root = MemoryRoot::open(dir.path()).unwrap();
        (dir, root)
    }

    #[test]
    fn test_resolves_relative_paths_inside_root() {
        let (_dir, root) = root();
        let resolved = root.resolve("entities/alice.md").unwrap();
        assert!(resolved.starts_with(root.path()));
        assert!(resolved.ends_with("entities/alice.md"));
    }

    #[test]
    fn test_current_dir_resolves_to_root() {
        let (_dir, root) = root();
        assert_eq!(root.resolve(".").unwrap(), root.path());
        assert_eq!(root.resolve("").unwrap(), root.path());
    }

    #[test]
    fn test_rejects_parent_traversal() {
        let (_dir, root) = root();
        for path in ["../secret", "../../etc/passwd", "entities/../../x", "a/.."] {
            assert!(
                matches!(root.resolve(path), Err(ToolError::PathEscape { .. })),
                "{path} should be rejected"
            );
        }
    }

    #[test]
    fn test_rejects_absolute_paths() {
        let (_dir, root) = root();
        assert!(matches!(
            root.resolve("/etc/passwd"),
            Err(ToolError::PathEscape { .. })
        ));
    }

    #[test]
    fn test_rejects_symlink_leaving_root() {
        let outside = tempfile::tempdir().unwrap();
        let (dir, root) = root();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).unwrap();

        assert!(matches!(
            root.resolve("link/file.md"),
            Err(ToolError::PathEscape { .. })
        ));
    }

    #[test]
    fn test_allows_symlink_within_root() {
        let (dir, root) = root();
        fs::create_dir(dir.path().join("entities")).unwrap();
        std::os::unix::fs::symlink(dir.path().join("entities"), dir.path().join("people")).unwrap();

        let resolved = root.resolve("people/bob.md").unwrap();
        assert!(resolved.starts_with(root.path().join("entities")));
    }

    #[test]
    fn test_create_makes_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("memory").join("nested");
        let root = MemoryRoot::create(&target).unwrap();
        assert!(root.path().is_dir());
    }

    #[test]
    fn test_relative_display() {
        let (_dir, root) = root();
        let abs = root.path().join("entities").join("a.md");
        assert_eq!(root.relative_display(&abs), "entities/a.md");
        assert_eq!(root.relative_display(root.path()), ".");
    }
}
