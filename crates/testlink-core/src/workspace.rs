//! Source tree: the set of files a run scans and edits.
//!
//! Files are discovered under the configured production and test
//! directories, filtered by extension and exclude globs, and held in memory
//! keyed by their root-relative path (always forward slashes). A tree built
//! with [`SourceTree::in_memory`] has no root and never touches the disk,
//! which is how planning is exercised in unit tests.

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::PathsConfig;
use crate::error::TestlinkError;
use crate::patch::ContentHash;

/// Directories never descended into.
const DEFAULT_EXCLUDE_DIRS: &[&str] = &[".git", ".hg", ".svn", "node_modules", "vendor"];

// ============================================================================
// Source Files
// ============================================================================

/// Which side of the link graph a file belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileRole {
    Production,
    Test,
}

/// One file as read at scan time.
#[derive(Debug, Clone)]
pub struct SourceFile {
    /// Relative path from the root (forward slashes).
    pub path: String,
    pub role: FileRole,
    pub text: String,
    /// SHA-256 of the text as read.
    pub hash: ContentHash,
}

impl SourceFile {
    pub fn new(path: impl Into<String>, role: FileRole, text: impl Into<String>) -> Self {
        let text = text.into();
        SourceFile {
            path: path.into(),
            role,
            hash: ContentHash::compute(text.as_bytes()),
            text,
        }
    }
}

// ============================================================================
// SourceTree
// ============================================================================

/// Files of one invocation, sorted by path.
#[derive(Debug, Clone, Default)]
pub struct SourceTree {
    root: Option<PathBuf>,
    files: BTreeMap<String, SourceFile>,
    /// Files that were found but could not be read.
    pub warnings: Vec<String>,
}

impl SourceTree {
    /// Discover and read every source file under the configured directories.
    ///
    /// Unreadable files are skipped with a warning rather than failing the
    /// run; a missing root is an error.
    pub fn load(root: &Path, paths: &PathsConfig) -> Result<Self, TestlinkError> {
        if !root.is_dir() {
            return Err(TestlinkError::file_not_found(root.display().to_string()));
        }
        let excludes = build_exclude_set(&paths.exclude)?;
        let mut tree = SourceTree {
            root: Some(root.to_path_buf()),
            ..Default::default()
        };

        let sections = [
            (FileRole::Production, &paths.production),
            (FileRole::Test, &paths.tests),
        ];
        for (role, dirs) in sections {
            for dir in dirs {
                let base = root.join(dir);
                if !base.is_dir() {
                    tracing::debug!(dir = %base.display(), "source directory does not exist");
                    continue;
                }
                tree.collect_dir(root, &base, role, paths, &excludes);
            }
        }

        tracing::debug!(
            files = tree.files.len(),
            warnings = tree.warnings.len(),
            "loaded source tree"
        );
        Ok(tree)
    }

    fn collect_dir(
        &mut self,
        root: &Path,
        base: &Path,
        role: FileRole,
        paths: &PathsConfig,
        excludes: &GlobSet,
    ) {
        let walker = WalkDir::new(base)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| !is_default_excluded(e.path(), base));
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    tracing::warn!(error = %err, "skipping unreadable directory entry");
                    self.warnings.push(err.to_string());
                    continue;
                }
            };
            if !entry.file_type().is_file() || !has_extension(entry.path(), &paths.extensions) {
                continue;
            }
            let Some(relative) = relative_path(root, entry.path()) else {
                continue;
            };
            if excludes.is_match(&relative) || self.files.contains_key(&relative) {
                continue;
            }
            match fs::read_to_string(entry.path()) {
                Ok(text) => {
                    self.files
                        .insert(relative.clone(), SourceFile::new(relative, role, text));
                }
                Err(err) => {
                    tracing::warn!(path = %relative, error = %err, "skipping unreadable file");
                    self.warnings.push(format!("{relative}: {err}"));
                }
            }
        }
    }

    /// Build a tree from in-memory sources. Roles come from the configured
    /// directories: a path under a test directory is a test file.
    pub fn in_memory<P, T>(paths: &PathsConfig, sources: impl IntoIterator<Item = (P, T)>) -> Self
    where
        P: Into<String>,
        T: Into<String>,
    {
        let files = sources
            .into_iter()
            .map(|(path, text)| {
                let path: String = path.into();
                let role = role_for(&path, paths);
                (path.clone(), SourceFile::new(path, role, text))
            })
            .collect();
        SourceTree {
            root: None,
            files,
            warnings: Vec::new(),
        }
    }

    /// Root directory, when the tree is backed by disk.
    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    pub fn get(&self, path: &str) -> Option<&SourceFile> {
        self.files.get(path)
    }

    /// Text of `path` as scanned.
    pub fn text(&self, path: &str) -> Option<&str> {
        self.files.get(path).map(|f| f.text.as_str())
    }

    /// All files, sorted by path.
    pub fn files(&self) -> impl Iterator<Item = &SourceFile> {
        self.files.values()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Current text of `path`: re-read from disk for rooted trees.
    pub fn read_current(&self, path: &str) -> Result<String, TestlinkError> {
        match &self.root {
            Some(root) => {
                fs::read_to_string(root.join(path)).map_err(|e| TestlinkError::io(path, e))
            }
            None => self
                .text(path)
                .map(str::to_string)
                .ok_or_else(|| TestlinkError::file_not_found(path)),
        }
    }

    /// Replace the contents of `path`.
    ///
    /// On disk the new text is written to a temporary file in the same
    /// directory and persisted over the original, so a failed write leaves
    /// the original untouched.
    pub fn write(&mut self, path: &str, text: &str) -> Result<(), TestlinkError> {
        if let Some(root) = &self.root {
            let full = root.join(path);
            let dir = full
                .parent()
                .ok_or_else(|| TestlinkError::internal(format!("{path} has no parent directory")))?;
            let mut tmp =
                tempfile::NamedTempFile::new_in(dir).map_err(|e| TestlinkError::io(path, e))?;
            tmp.write_all(text.as_bytes())
                .map_err(|e| TestlinkError::io(path, e))?;
            tmp.persist(&full)
                .map_err(|e| TestlinkError::io(path, e.error))?;
        }
        let role = self
            .files
            .get(path)
            .map_or(FileRole::Production, |f| f.role);
        self.files
            .insert(path.to_string(), SourceFile::new(path, role, text));
        Ok(())
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn build_exclude_set(patterns: &[String]) -> Result<GlobSet, TestlinkError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| TestlinkError::Config {
            path: "paths.exclude".to_string(),
            message: format!("invalid glob '{pattern}': {e}"),
        })?;
        builder.add(glob);
    }
    builder.build().map_err(|e| TestlinkError::Config {
        path: "paths.exclude".to_string(),
        message: e.to_string(),
    })
}

fn is_default_excluded(path: &Path, base: &Path) -> bool {
    let Ok(relative) = path.strip_prefix(base) else {
        return false;
    };
    relative.components().any(|c| match c {
        std::path::Component::Normal(name) => {
            let name = name.to_string_lossy();
            DEFAULT_EXCLUDE_DIRS.iter().any(|d| *d == name)
        }
        _ => false,
    })
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| extensions.iter().any(|x| x == ext))
}

fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    Some(
        relative
            .to_string_lossy()
            .replace(std::path::MAIN_SEPARATOR, "/"),
    )
}

fn role_for(path: &str, paths: &PathsConfig) -> FileRole {
    let under = |dir: &String| {
        let dir = dir.trim_end_matches('/');
        path == dir || path.starts_with(&format!("{dir}/"))
    };
    if paths.tests.iter().any(under) {
        FileRole::Test
    } else {
        FileRole::Production
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &Path, path: &str, text: &str) {
        let full = root.join(path);
        fs::create_dir_all(full.parent().unwrap()).unwrap();
        fs::write(full, text).unwrap();
    }

    #[test]
    fn load_discovers_by_role_and_extension() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "src/User.php", "<?php\n");
        write(dir.path(), "src/readme.md", "# x\n");
        write(dir.path(), "tests/UserTest.php", "<?php\n");
        write(dir.path(), "src/vendor/lib/X.php", "<?php\n");

        let tree = SourceTree::load(dir.path(), &PathsConfig::default()).unwrap();
        let paths: Vec<_> = tree.files().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["src/User.php", "tests/UserTest.php"]);
        assert_eq!(tree.get("src/User.php").unwrap().role, FileRole::Production);
        assert_eq!(tree.get("tests/UserTest.php").unwrap().role, FileRole::Test);
    }

    #[test]
    fn exclude_globs_apply_to_relative_paths() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "src/User.php", "<?php\n");
        write(dir.path(), "src/Generated/Proxy.php", "<?php\n");
        let paths = PathsConfig {
            exclude: vec!["src/Generated/**".to_string()],
            ..Default::default()
        };
        let tree = SourceTree::load(dir.path(), &paths).unwrap();
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn missing_root_is_error() {
        let err = SourceTree::load(Path::new("/nonexistent/testlink"), &PathsConfig::default())
            .unwrap_err();
        assert!(matches!(err, TestlinkError::FileNotFound { .. }));
    }

    #[test]
    fn write_replaces_file_and_memory() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "src/User.php", "<?php\n");
        let mut tree = SourceTree::load(dir.path(), &PathsConfig::default()).unwrap();
        tree.write("src/User.php", "<?php\n// edited\n").unwrap();
        assert_eq!(
            fs::read_to_string(dir.path().join("src/User.php")).unwrap(),
            "<?php\n// edited\n"
        );
        assert_eq!(tree.read_current("src/User.php").unwrap(), "<?php\n// edited\n");
        assert_eq!(tree.text("src/User.php"), Some("<?php\n// edited\n"));
    }

    #[test]
    fn in_memory_roles() {
        let tree = SourceTree::in_memory(
            &PathsConfig::default(),
            [("src/A.php", "<?php\n"), ("tests/ATest.php", "<?php\n")],
        );
        assert!(tree.root().is_none());
        assert_eq!(tree.get("tests/ATest.php").unwrap().role, FileRole::Test);
        assert_eq!(tree.read_current("src/A.php").unwrap(), "<?php\n");
        assert!(tree.read_current("src/B.php").is_err());
    }
}
