//! Glob expansion for backup jobs.
//!
//! Patterns are expanded in the order given. Within one pattern the matches come
//! back in lexicographic order, so a run always resolves to the same list.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{ConfsyncError, Result};

/// Expands `patterns` to the absolute paths of the regular files they match.
///
/// Directories, symlinks and special files are skipped silently, and directories
/// that cannot be read are skipped with a warning. A pattern that matches nothing
/// contributes nothing. A file matched by two patterns appears twice.
pub fn resolve<S: AsRef<str>>(patterns: &[S]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for pattern in patterns {
        let pattern = pattern.as_ref();
        tracing::debug!(pattern, "processing glob pattern");
        let matches = glob::glob(pattern).map_err(|source| ConfsyncError::Glob {
            pattern: pattern.to_string(),
            source,
        })?;
        let mut found = Vec::new();
        for entry in matches {
            let path = match entry {
                Ok(path) => path,
                Err(e) => {
                    tracing::warn!(
                        path = %e.path().display(),
                        "skipping unreadable path: {}",
                        e.error()
                    );
                    continue;
                }
            };
            let path = absolute(&path)?;
            let meta = fs::symlink_metadata(&path).map_err(|e| ConfsyncError::io(&path, e))?;
            if meta.file_type().is_file() {
                found.push(path);
            }
        }
        found.sort();
        files.extend(found);
    }
    Ok(files)
}

/// Makes `path` absolute against the current directory without resolving symlinks.
fn absolute(path: &Path) -> Result<PathBuf> {
    std::path::absolute(path).map_err(|e| ConfsyncError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, b"x").unwrap();
    }

    fn pat(dir: &Path, tail: &str) -> String {
        format!("{}/{}", dir.display(), tail)
    }

    #[test]
    fn recursive_pattern_finds_nested_files_only() {
        let dir = tempdir().unwrap();
        touch(&dir.path().join("a.conf"));
        touch(&dir.path().join("sub/b.conf"));
        touch(&dir.path().join("sub/deeper/c.conf"));
        touch(&dir.path().join("sub/ignored.txt"));

        let files = resolve(&[pat(dir.path(), "**/*.conf")]).unwrap();
        assert_eq!(
            files,
            vec![
                dir.path().join("a.conf"),
                dir.path().join("sub/b.conf"),
                dir.path().join("sub/deeper/c.conf"),
            ]
        );
    }

    #[test]
    fn directories_are_skipped() {
        let dir = tempdir().unwrap();
        touch(&dir.path().join("sub/file"));
        let files = resolve(&[pat(dir.path(), "*")]).unwrap();
        assert!(files.is_empty(), "got {files:?}");
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_are_skipped() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("real");
        touch(&target);
        std::os::unix::fs::symlink(&target, dir.path().join("link")).unwrap();

        let files = resolve(&[pat(dir.path(), "*")]).unwrap();
        assert_eq!(files, vec![target]);
    }

    #[cfg(unix)]
    #[test]
    fn unreadable_directory_is_skipped() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        touch(&dir.path().join("ok/a.conf"));
        let locked = dir.path().join("locked");
        touch(&locked.join("hidden.conf"));
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

        // Root reads through mode 000, so there is nothing to test.
        if fs::read_dir(&locked).is_ok() {
            fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
            return;
        }

        let files = resolve(&[pat(dir.path(), "**/*.conf")]);
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
        assert_eq!(files.unwrap(), vec![dir.path().join("ok/a.conf")]);
    }

    #[test]
    fn no_match_is_not_an_error() {
        let dir = tempdir().unwrap();
        let files = resolve(&[pat(dir.path(), "nothing-*")]).unwrap();
        assert!(files.is_empty());
    }

    #[test]
    fn malformed_pattern_is_a_glob_error() {
        let err = resolve(&["/tmp/[unterminated"]).unwrap_err();
        assert!(matches!(err, ConfsyncError::Glob { .. }), "got {err:?}");
    }

    #[test]
    fn patterns_keep_caller_order_and_duplicates() {
        let dir = tempdir().unwrap();
        touch(&dir.path().join("a"));
        touch(&dir.path().join("b"));
        let files = resolve(&[pat(dir.path(), "b"), pat(dir.path(), "*")]).unwrap();
        assert_eq!(
            files,
            vec![dir.path().join("b"), dir.path().join("a"), dir.path().join("b")]
        );
    }

    #[test]
    fn relative_matches_become_absolute() {
        // Cargo runs tests from the package root, which holds Cargo.toml.
        let files = resolve(&["Cargo.toml"]).unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].is_absolute());
        assert!(files[0].ends_with("Cargo.toml"));
    }
}
