//! File timestamps and atomic file replacement.
//!
//! Copies into the archive tree and the sync folder go through a temporary
//! sibling and a rename, so readers never observe a half-written file, and
//! carry the source modification time along.

use chrono::{DateTime, Local};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use super::walker::{walk_directory, WalkOptions};

/// Modification time of a file or directory entry.
pub fn modified_time(path: &Path) -> io::Result<DateTime<Local>> {
    let modified = fs::metadata(path)?.modified()?;
    Ok(DateTime::<Local>::from(modified))
}

/// Newest modification time of any file below `dir`.
pub fn tree_modified_time(dir: &Path) -> Option<DateTime<Local>> {
    walk_directory(dir, &WalkOptions::default())
        .ok()?
        .iter()
        .filter_map(|f| modified_time(&f.path).ok())
        .max()
}

/// Modification time of a file, or the newest one inside a directory.
pub fn path_modified_time(path: &Path) -> Option<DateTime<Local>> {
    if path.is_dir() {
        tree_modified_time(path)
    } else {
        modified_time(path).ok()
    }
}

/// Set the modification time of an existing file.
pub fn set_modified_time(path: &Path, time: SystemTime) -> io::Result<()> {
    let file = fs::OpenOptions::new().write(true).open(path)?;
    file.set_modified(time)
}

/// Temporary sibling used while replacing `path`.
pub fn partial_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".partial");
    path.with_file_name(name)
}

/// Copy `src` over `dst` via a temporary file, keeping the source mtime.
pub fn copy_file_atomic(src: &Path, dst: &Path) -> io::Result<u64> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)?;
    }

    let tmp = partial_path(dst);
    let result = (|| -> io::Result<u64> {
        let bytes = fs::copy(src, &tmp)?;
        let modified = fs::metadata(src)?.modified()?;
        set_modified_time(&tmp, modified)?;
        fs::rename(&tmp, dst)?;
        Ok(bytes)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

/// Replace `path` with `contents` via a temporary file.
pub fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let tmp = partial_path(path);
    let result = fs::write(&tmp, contents).and_then(|_| fs::rename(&tmp, path));
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}
