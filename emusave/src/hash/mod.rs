//! Content hashing for equality and conflict tests.
//!
//! Digests are SHA-256 in lowercase hex. Hashing never fails: an unreadable
//! file or directory produces [`Digest::unknown`], which compares unequal to
//! everything, itself included.

use sha2::{Digest as _, Sha256};
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use tracing::debug;

use crate::fs::walker::{walk_directory, WalkOptions};

/// Read buffer size.
const CHUNK_SIZE: usize = 8 * 1024;

/// Hex-encoded content digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Digest(String);

impl Digest {
    /// Sentinel for content that could not be read.
    pub fn unknown() -> Self {
        Digest(String::new())
    }

    pub fn is_unknown(&self) -> bool {
        self.0.is_empty()
    }

    /// True when both digests are known and equal.
    pub fn matches(&self, other: &Digest) -> bool {
        !self.is_unknown() && self == other
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unknown() {
            f.write_str("unknown")
        } else {
            f.write_str(&self.0)
        }
    }
}

/// Hash a single file in fixed-size chunks.
pub fn hash_file(path: &Path) -> Digest {
    match try_hash_file(path) {
        Ok(digest) => digest,
        Err(e) => {
            debug!("Hash failed for {}: {}", path.display(), e);
            Digest::unknown()
        }
    }
}

/// Hash of the concatenated file digests below `dir`, sorted by relative path.
pub fn hash_tree(dir: &Path) -> Digest {
    if !dir.is_dir() {
        debug!("Tree hash requested for non-directory {}", dir.display());
        return Digest::unknown();
    }

    let files = match walk_directory(dir, &WalkOptions::default()) {
        Ok(files) => files,
        Err(e) => {
            debug!("Tree hash failed for {}: {}", dir.display(), e);
            return Digest::unknown();
        }
    };

    let mut hasher = Sha256::new();
    for file in &files {
        let digest = hash_file(&file.path);
        if digest.is_unknown() {
            return Digest::unknown();
        }
        hasher.update(digest.as_str().as_bytes());
    }
    Digest(format!("{:x}", hasher.finalize()))
}

/// Hash a file or a directory tree, whichever `path` is.
pub fn hash_path(path: &Path) -> Digest {
    if path.is_dir() {
        hash_tree(path)
    } else {
        hash_file(path)
    }
}

/// Hash an in-memory buffer.
pub fn hash_bytes(data: &[u8]) -> Digest {
    Digest(format!("{:x}", Sha256::digest(data)))
}

/// Hash everything `reader` yields.
pub fn hash_reader<R: Read>(reader: &mut R) -> io::Result<Digest> {
    let mut hasher = Sha256::new();
    let mut buf = [0u8; CHUNK_SIZE];

    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(Digest(format!("{:x}", hasher.finalize())))
}

/// Digest of named parts, independent of the order they are given in.
///
/// Unknown if any part is unknown.
pub fn hash_listing(mut parts: Vec<(String, Digest)>) -> Digest {
    if parts.iter().any(|(_, d)| d.is_unknown()) {
        return Digest::unknown();
    }
    parts.sort_by(|a, b| a.0.cmp(&b.0));

    let mut hasher = Sha256::new();
    for (name, digest) in &parts {
        hasher.update(name.as_bytes());
        hasher.update([0u8]);
        hasher.update(digest.as_str().as_bytes());
        hasher.update(b"\n");
    }
    Digest(format!("{:x}", hasher.finalize()))
}

fn try_hash_file(path: &Path) -> io::Result<Digest> {
    hash_reader(&mut File::open(path)?)
}
