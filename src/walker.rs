use std::path::{Path, PathBuf};

use globset::GlobMatcher;

use crate::error::{Error, Result};

/// An archive found below a corpus root.
#[derive(Debug, Clone)]
pub struct DiscoveredArchive {
    /// Path relative to the corpus root.
    pub relative_path: PathBuf,
    /// Fully resolved absolute path.
    pub absolute_path: PathBuf,
    /// File size in bytes.
    pub size: u64,
}

const ARCHIVE_EXTENSION: &str = "zip";

/// Recursively find all `.zip` archives below `root`.
///
/// Hidden files and directories are skipped. When `only` is given, an
/// archive is kept only if its relative path matches the glob. Results are
/// sorted by relative path so every run enumerates archives in the same
/// order. A missing or unreadable root is an error.
pub fn discover_archives(
    root: &Path,
    only: Option<&GlobMatcher>,
) -> Result<Vec<DiscoveredArchive>> {
    let canonical_root = root.canonicalize().map_err(|e| {
        Error::Config(format!(
            "cannot read corpus directory {}: {e}",
            root.display()
        ))
    })?;
    if !canonical_root.is_dir() {
        return Err(Error::Config(format!(
            "corpus path is not a directory: {}",
            root.display()
        )));
    }

    let mut results = Vec::new();
    walk_dir(&canonical_root, &canonical_root, &mut results)?;
    if let Some(glob) = only {
        results.retain(|a| glob.is_match(&a.relative_path));
    }
    results.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(results)
}

fn walk_dir(
    root: &Path,
    current: &Path,
    results: &mut Vec<DiscoveredArchive>,
) -> Result<()> {
    for entry in std::fs::read_dir(current)? {
        let entry = entry?;
        let file_name = entry.file_name();
        if file_name.to_string_lossy().starts_with('.') {
            continue;
        }

        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            walk_dir(root, &entry.path(), results)?;
        } else if file_type.is_symlink() {
            let Ok(resolved) = entry.path().canonicalize() else {
                continue; // broken symlink
            };
            // Directory links back into the tree would loop.
            if resolved.starts_with(root) && resolved.is_dir() {
                continue;
            }
            if resolved.is_file() && is_archive(&resolved) {
                results.push(make_discovered(root, &entry.path(), &resolved)?);
            }
        } else if file_type.is_file() && is_archive(&entry.path()) {
            let abs = entry.path().canonicalize()?;
            results.push(make_discovered(root, &entry.path(), &abs)?);
        }
    }
    Ok(())
}

fn is_archive(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(ARCHIVE_EXTENSION))
}

fn make_discovered(
    root: &Path,
    original_path: &Path,
    absolute_path: &Path,
) -> Result<DiscoveredArchive> {
    let relative_path = original_path
        .strip_prefix(root)
        .unwrap_or(original_path)
        .to_path_buf();
    let size = std::fs::metadata(absolute_path)?.len();

    Ok(DiscoveredArchive {
        relative_path,
        absolute_path: absolute_path.to_path_buf(),
        size,
    })
}

/// Compile an `--only` glob.
pub fn compile_filter(pattern: &str) -> Result<GlobMatcher> {
    Ok(globset::Glob::new(pattern)
        .map_err(|e| Error::Config(format!("invalid glob pattern: {e}")))?
        .compile_matcher())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(archives: &[DiscoveredArchive]) -> Vec<String> {
        archives
            .iter()
            .map(|a| a.relative_path.to_string_lossy().to_string())
            .collect()
    }

    #[test]
    fn discovers_zips_only() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("1.zip"), "z").unwrap();
        std::fs::write(tmp.path().join("2.ZIP"), "z").unwrap();
        std::fs::write(tmp.path().join("notes.txt"), "t").unwrap();

        let found = discover_archives(tmp.path(), None).unwrap();
        assert_eq!(names(&found), vec!["1.zip", "2.ZIP"]);
        assert_eq!(found[0].size, 1);
    }

    #[test]
    fn recurses_and_sorts() {
        let tmp = tempfile::tempdir().unwrap();
        let user = tmp.path().join("2016-05-09");
        std::fs::create_dir(&user).unwrap();
        std::fs::write(user.join("b.zip"), "z").unwrap();
        std::fs::write(user.join("a.zip"), "z").unwrap();
        std::fs::write(tmp.path().join("top.zip"), "z").unwrap();

        let found = discover_archives(tmp.path(), None).unwrap();
        assert_eq!(
            names(&found),
            vec!["2016-05-09/a.zip", "2016-05-09/b.zip", "top.zip"]
        );
    }

    #[test]
    fn skips_hidden_entries() {
        let tmp = tempfile::tempdir().unwrap();
        let hidden = tmp.path().join(".cache");
        std::fs::create_dir(&hidden).unwrap();
        std::fs::write(hidden.join("x.zip"), "z").unwrap();
        std::fs::write(tmp.path().join(".y.zip"), "z").unwrap();
        std::fs::write(tmp.path().join("z.zip"), "z").unwrap();

        let found = discover_archives(tmp.path(), None).unwrap();
        assert_eq!(names(&found), vec!["z.zip"]);
    }

    #[test]
    fn glob_filter_applies_to_relative_paths() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("1200-1299");
        std::fs::create_dir(&dir).unwrap();
        std::fs::write(dir.join("1274.zip"), "z").unwrap();
        std::fs::write(dir.join("1275.zip"), "z").unwrap();

        let only = compile_filter("**/1274.zip").unwrap();
        let found = discover_archives(tmp.path(), Some(&only)).unwrap();
        assert_eq!(names(&found), vec!["1200-1299/1274.zip"]);
    }

    #[test]
    fn missing_root_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let missing = tmp.path().join("nope");
        assert!(discover_archives(&missing, None).is_err());
    }

    #[test]
    fn invalid_glob_is_rejected() {
        assert!(compile_filter("a[").is_err());
    }
}
