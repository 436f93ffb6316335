use std::{
    path::{Path, PathBuf},
    time::SystemTime,
};

use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::warn;

use crate::error::{Error, Result};

/// A file found under a sync root.
#[derive(Debug, Clone)]
pub struct DiscoveredFile {
    /// Path relative to the sync root.
    pub relative_path: PathBuf,
    /// Fully resolved absolute path.
    pub absolute_path: PathBuf,
    /// Last modification time as seconds since the Unix epoch.
    pub mtime: u64,
    pub size: u64,
}

/// An entry under the sync root that could not be read.
#[derive(Debug)]
pub struct SkippedPath {
    pub path: PathBuf,
    pub error: Error,
}

/// Everything a walk found, plus what it had to skip.
#[derive(Debug, Default)]
pub struct Discovery {
    pub files: Vec<DiscoveredFile>,
    pub skipped: Vec<SkippedPath>,
}

impl Discovery {
    fn skip(&mut self, path: &Path, error: impl Into<Error>) {
        let error = error.into();
        warn!(path = %path.display(), %error, "skipping unreadable entry");
        self.skipped.push(SkippedPath {
            path: path.to_path_buf(),
            error,
        });
    }
}

/// Compile include patterns into one matcher. An empty list matches
/// everything.
pub fn include_set(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    let patterns: Vec<&str> = if patterns.is_empty() {
        vec!["**"]
    } else {
        patterns.iter().map(String::as_str).collect()
    };
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| Error::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
        builder.add(glob);
    }
    builder.build().map_err(|e| Error::InvalidPattern {
        pattern: "include".to_string(),
        reason: e.to_string(),
    })
}

/// Recursively walk `root` and return every file matching `include`.
///
/// Hidden files and directories (names starting with `.`) are skipped, as
/// are symlinked directories pointing back inside the root. Entries that
/// cannot be read are logged and listed in [`Discovery::skipped`]; only an
/// unreadable root fails the walk.
pub fn discover_files(root: &Path, include: &GlobSet) -> Result<Discovery> {
    let canonical_root = root.canonicalize()?;
    // The root itself must be listable.
    std::fs::read_dir(&canonical_root)?;

    let mut found = Discovery::default();
    walk_dir(&canonical_root, &canonical_root, include, &mut found);
    found.files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(found)
}

fn walk_dir(root: &Path, current: &Path, include: &GlobSet, found: &mut Discovery) {
    let entries = match std::fs::read_dir(current) {
        Ok(entries) => entries,
        Err(err) => {
            found.skip(current, err);
            return;
        }
    };

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                found.skip(current, err);
                continue;
            }
        };
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }

        let path = entry.path();
        let file_type = match entry.file_type() {
            Ok(file_type) => file_type,
            Err(err) => {
                found.skip(&path, err);
                continue;
            }
        };

        if file_type.is_dir() {
            walk_dir(root, &path, include, found);
            continue;
        }

        let resolved = if file_type.is_symlink() {
            // Broken links are skipped.
            let Ok(resolved) = path.canonicalize() else {
                continue;
            };
            if !resolved.is_file() {
                continue;
            }
            resolved
        } else if file_type.is_file() {
            match path.canonicalize() {
                Ok(resolved) => resolved,
                Err(err) => {
                    found.skip(&path, err);
                    continue;
                }
            }
        } else {
            continue;
        };

        let relative_path = path.strip_prefix(root).unwrap_or(&path).to_path_buf();
        if include.is_match(&relative_path) {
            match discovered(relative_path, resolved) {
                Ok(file) => found.files.push(file),
                Err(err) => found.skip(&path, err),
            }
        }
    }
}

fn discovered(relative_path: PathBuf, absolute_path: PathBuf) -> Result<DiscoveredFile> {
    let meta = std::fs::metadata(&absolute_path)?;
    let mtime = meta
        .modified()
        .unwrap_or(SystemTime::UNIX_EPOCH)
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();

    Ok(DiscoveredFile {
        relative_path,
        absolute_path,
        mtime,
        size: meta.len(),
    })
}
