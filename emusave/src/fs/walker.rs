//! Directory traversal for directory artifacts and tree hashing.
//!
//! Entries are returned sorted by their `/`-separated relative path so that
//! archive layout and tree digests do not depend on enumeration order.

use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// Options for directory walking
#[derive(Debug, Clone)]
pub struct WalkOptions {
    /// File or directory names to skip (exact, case-insensitive)
    pub exclude_names: Vec<String>,
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self {
            exclude_names: vec![
                ".DS_Store".to_string(),
                "Thumbs.db".to_string(),
                "desktop.ini".to_string(),
            ],
        }
    }
}

/// Information about a file discovered during walking
#[derive(Debug, Clone)]
pub struct FileInfo {
    /// Full path to the file
    pub path: PathBuf,

    /// Relative path from the root, `/`-separated
    pub relative: String,

    /// File size in bytes
    pub size: u64,
}

impl FileInfo {
    /// Create FileInfo from a DirEntry.
    /// Symlinks are resolved to their target; links to directories and
    /// broken links yield None.
    fn from_entry(entry: &DirEntry, root: &Path) -> std::io::Result<Option<Self>> {
        let path = entry.path().to_path_buf();
        let metadata = if entry.path_is_symlink() {
            match std::fs::metadata(&path) {
                Ok(resolved) if resolved.is_file() => resolved,
                _ => return Ok(None),
            }
        } else {
            entry.metadata().map_err(std::io::Error::other)?
        };

        if !metadata.is_file() {
            return Ok(None);
        }

        Ok(Some(Self {
            relative: relative_slash_path(&path, root),
            path,
            size: metadata.len(),
        }))
    }
}

/// Walk a directory tree and collect all files, sorted by relative path.
pub fn walk_directory(root: &Path, options: &WalkOptions) -> std::io::Result<Vec<FileInfo>> {
    let mut files = Vec::new();

    let walker = WalkDir::new(root);
    let excluded = |entry: &DirEntry| should_exclude(entry, &options.exclude_names);
    for entry in walker.into_iter().filter_entry(|e| e.depth() == 0 || !excluded(e)) {
        let entry = entry.map_err(std::io::Error::other)?;

        if entry.file_type().is_dir() {
            continue;
        }

        if let Some(file_info) = FileInfo::from_entry(&entry, root)? {
            files.push(file_info);
        }
    }

    files.sort_by(|a, b| a.relative.cmp(&b.relative));
    Ok(files)
}

/// `/`-separated path of `path` relative to `root`.
pub fn relative_slash_path(path: &Path, root: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn should_exclude(entry: &DirEntry, names: &[String]) -> bool {
    let file_name = entry.file_name().to_string_lossy();
    names.iter().any(|n| n.eq_ignore_ascii_case(&file_name))
}
