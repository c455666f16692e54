//! Size limits for the memory directory

use std::fmt;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use super::ToolError;

/// Byte budgets enforced on every write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeLimits {
    /// Maximum size of a single file
    pub per_file: u64,
    /// Maximum size of the directory containing the written file
    pub per_dir: u64,
    /// Maximum size of the whole memory root
    pub total: u64,
}

impl Default for SizeLimits {
    fn default() -> Self {
        Self {
            per_file: 1024 * 1024,        // 1 MB
            per_dir: 10 * 1024 * 1024,    // 10 MB
            total: 100 * 1024 * 1024,     // 100 MB
        }
    }
}

/// Which budget a write would have exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitScope {
    File,
    Directory,
    Total,
}

impl fmt::Display for LimitScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimitScope::File => write!(f, "file"),
            LimitScope::Directory => write!(f, "directory"),
            LimitScope::Total => write!(f, "memory"),
        }
    }
}

impl SizeLimits {
    /// Check that replacing `target` with `new_len` bytes keeps every budget.
    ///
    /// `root` is the canonical memory root; `target` an absolute path inside it.
    pub fn check_write(&self, root: &Path, target: &Path, new_len: u64) -> Result<(), ToolError> {
        if new_len > self.per_file {
            return Err(ToolError::SizeExceeded {
                scope: LimitScope::File,
                limit: self.per_file,
                attempted: new_len,
            });
        }

        let existing = fs::metadata(target)
            .ok()
            .filter(|m| m.is_file())
            .map(|m| m.len())
            .unwrap_or(0);

        let dir = target.parent().unwrap_or(root);
        let projected_dir = tree_size(dir).saturating_sub(existing) + new_len;
        if projected_dir > self.per_dir {
            return Err(ToolError::SizeExceeded {
                scope: LimitScope::Directory,
                limit: self.per_dir,
                attempted: projected_dir,
            });
        }

        let projected_total = tree_size(root).saturating_sub(existing) + new_len;
        if projected_total > self.total {
            return Err(ToolError::SizeExceeded {
                scope: LimitScope::Total,
                limit: self.total,
                attempted: projected_total,
            });
        }

        Ok(())
    }
}

/// Total bytes of regular files below `path` (the file's own size for a file).
///
/// Missing directories count as empty; symlinks are not followed.
pub fn tree_size(path: &Path) -> u64 {
    WalkDir::new(path)
        .follow_links(false)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok())
        .map(|meta| meta.len())
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let limits = SizeLimits::default();
        assert_eq!(limits.per_file, 1024 * 1024);
        assert_eq!(limits.per_dir, 10 * 1024 * 1024);
        assert_eq!(limits.total, 100 * 1024 * 1024);
    }

    #[test]
    fn test_tree_size_sums_nested_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.md"), "aaa").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub").join("b.md"), "bbbb").unwrap();
        assert_eq!(tree_size(dir.path()), 7);
    }

    #[test]
    fn test_file_limit() {
        let dir = tempfile::tempdir().unwrap();
        let limits = SizeLimits { per_file: 4, per_dir: 100, total: 100 };
        let err = limits
            .check_write(dir.path(), &dir.path().join("x.md"), 5)
            .unwrap_err();
        assert!(matches!(
            err,
            ToolError::SizeExceeded { scope: LimitScope::File, limit: 4, attempted: 5 }
        ));
    }

    #[test]
    fn test_directory_limit_counts_siblings() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.md"), "123456").unwrap();
        let limits = SizeLimits { per_file: 100, per_dir: 10, total: 100 };
        let err = limits
            .check_write(dir.path(), &dir.path().join("b.md"), 5)
            .unwrap_err();
        assert!(matches!(err, ToolError::SizeExceeded { scope: LimitScope::Directory, .. }));
    }

    #[test]
    fn test_overwrite_does_not_double_count() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.md"), "123456").unwrap();
        let limits = SizeLimits { per_file: 100, per_dir: 10, total: 10 };
        assert!(limits
            .check_write(dir.path(), &dir.path().join("a.md"), 9)
            .is_ok());
    }

    #[test]
    fn test_total_limit() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("one")).unwrap();
        fs::write(dir.path().join("one").join("a.md"), "12345678").unwrap();
        fs::create_dir(dir.path().join("two")).unwrap();
        let limits = SizeLimits { per_file: 100, per_dir: 100, total: 10 };
        let err = limits
            .check_write(dir.path(), &dir.path().join("two").join("b.md"), 5)
            .unwrap_err();
        assert!(matches!(err, ToolError::SizeExceeded { scope: LimitScope::Total, .. }));
    }
}
