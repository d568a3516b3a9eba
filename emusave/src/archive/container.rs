//! Zip container holding the payload of one archive.
//!
//! Entries keep the modification time of their source file. A container is
//! written to a `.partial` sibling and only renamed into place by
//! [`ContainerWriter::finish`]; dropping an unfinished writer removes it.

use chrono::{DateTime, Datelike, Local, NaiveDate, NaiveDateTime, TimeZone, Timelike};
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::fs::metadata::{partial_path, set_modified_time};
use crate::fs::walker::{walk_directory, WalkOptions};
use crate::hash::{hash_listing, hash_reader, Digest};
use crate::utils::errors::{EngineError, Result};

/// Container compression settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Compression {
    pub method: CompressionMethod,
    pub level: Option<i64>,
}

impl Compression {
    /// Parse the configured method name (zstd, deflate, stored).
    pub fn from_config(name: &str, level: Option<i64>) -> Result<Self> {
        let method = match name.to_ascii_lowercase().as_str() {
            "zstd" => CompressionMethod::Zstd,
            "deflate" | "gzip" => CompressionMethod::Deflated,
            "stored" | "none" => CompressionMethod::Stored,
            other => {
                return Err(EngineError::Config(format!(
                    "Unknown compression method: {}",
                    other
                )))
            }
        };
        let level = if method == CompressionMethod::Stored {
            None
        } else {
            level
        };
        Ok(Self { method, level })
    }
}

impl Default for Compression {
    fn default() -> Self {
        Self {
            method: CompressionMethod::Zstd,
            level: None,
        }
    }
}

/// Writer for a new container.
pub struct ContainerWriter {
    zip: Option<ZipWriter<BufWriter<File>>>,
    target: PathBuf,
    partial: PathBuf,
    compression: Compression,
    names: HashSet<String>,
    total_bytes: u64,
}

impl ContainerWriter {
    pub fn create(target: &Path, compression: Compression) -> Result<Self> {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let partial = partial_path(target);
        let file = File::create(&partial)?;

        Ok(Self {
            zip: Some(ZipWriter::new(BufWriter::new(file))),
            target: target.to_path_buf(),
            partial,
            compression,
            names: HashSet::new(),
            total_bytes: 0,
        })
    }

    /// Bytes of source data added so far.
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// First free entry prefix derived from `wanted`: `wanted`, `wanted-2`, ...
    pub fn reserve_name(&mut self, wanted: &str) -> String {
        let mut candidate = wanted.to_string();
        let mut n = 2;
        while self.names.contains(&candidate) {
            candidate = format!("{}-{}", wanted, n);
            n += 1;
        }
        self.names.insert(candidate.clone());
        candidate
    }

    /// Add one file under `entry_name`.
    pub fn add_file(&mut self, src: &Path, entry_name: &str) -> Result<u64> {
        let metadata = fs::metadata(src)?;
        if !metadata.is_file() {
            return Err(EngineError::NotFound(format!(
                "Not a file: {}",
                src.display()
            )));
        }

        let mut options = SimpleFileOptions::default()
            .compression_method(self.compression.method)
            .compression_level(self.compression.level)
            .large_file(metadata.len() >= u32::MAX as u64);
        if let Ok(modified) = metadata.modified() {
            options = options.last_modified_time(to_zip_time(DateTime::<Local>::from(modified)));
        }

        let zip = self.zip_mut()?;
        zip.start_file(entry_name, options)?;
        let mut reader = BufReader::new(File::open(src)?);
        let bytes = io::copy(&mut reader, zip)?;

        self.total_bytes += bytes;
        debug!(entry = entry_name, bytes, "Added container entry");
        Ok(bytes)
    }

    /// Add every file below `dir`, keeping its structure under `prefix/`.
    pub fn add_dir(&mut self, dir: &Path, prefix: &str) -> Result<usize> {
        let files = walk_directory(dir, &WalkOptions::default())?;
        let zip = self.zip_mut()?;
        zip.add_directory(
            format!("{}/", prefix),
            SimpleFileOptions::default().compression_method(CompressionMethod::Stored),
        )?;

        for file in &files {
            self.add_file(&file.path, &format!("{}/{}", prefix, file.relative))?;
        }
        Ok(files.len())
    }

    /// Finish the zip and move it into place.
    pub fn finish(mut self) -> Result<PathBuf> {
        let zip = self
            .zip
            .take()
            .ok_or_else(|| EngineError::InvalidInput("Container already finished".into()))?;
        let finished = (|| -> Result<()> {
            let mut writer = zip.finish()?;
            io::Write::flush(&mut writer)?;
            drop(writer);
            fs::rename(&self.partial, &self.target)?;
            Ok(())
        })();

        if let Err(e) = finished {
            let _ = fs::remove_file(&self.partial);
            return Err(e);
        }
        Ok(self.target.clone())
    }

    fn zip_mut(&mut self) -> Result<&mut ZipWriter<BufWriter<File>>> {
        self.zip
            .as_mut()
            .ok_or_else(|| EngineError::InvalidInput("Container already finished".into()))
    }
}

impl Drop for ContainerWriter {
    fn drop(&mut self) {
        if self.zip.take().is_some() {
            if let Err(e) = fs::remove_file(&self.partial) {
                warn!("Failed to discard partial container {}: {}", self.partial.display(), e);
            }
        }
    }
}

/// One entry of an existing container.
#[derive(Debug, Clone)]
pub struct EntryInfo {
    pub name: String,
    pub size: u64,
    pub is_dir: bool,
    pub modified: Option<DateTime<Local>>,
}

/// Read access to an existing container.
pub struct ContainerReader {
    zip: ZipArchive<BufReader<File>>,
}

impl ContainerReader {
    pub fn open(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(EngineError::NotFound(format!(
                "Container not found: {}",
                path.display()
            )));
        }
        let zip = ZipArchive::new(BufReader::new(File::open(path)?))?;
        Ok(Self { zip })
    }

    pub fn entries(&mut self) -> Result<Vec<EntryInfo>> {
        let mut entries = Vec::with_capacity(self.zip.len());
        for i in 0..self.zip.len() {
            let entry = self.zip.by_index(i)?;
            entries.push(EntryInfo {
                name: entry.name().to_string(),
                size: entry.size(),
                is_dir: entry.is_dir(),
                modified: entry.last_modified().and_then(from_zip_time),
            });
        }
        Ok(entries)
    }

    /// Digest over entry names and entry contents. Entry timestamps and
    /// compression settings do not take part.
    pub fn content_digest(&mut self) -> Result<Digest> {
        let mut parts = Vec::with_capacity(self.zip.len());
        for i in 0..self.zip.len() {
            let mut entry = self.zip.by_index(i)?;
            if entry.is_dir() {
                continue;
            }
            let name = entry.name().to_string();
            parts.push((name, hash_reader(&mut entry)?));
        }
        Ok(hash_listing(parts))
    }

    /// Write the entry `name` to `dest`, creating parent directories and
    /// restoring the entry timestamp.
    pub fn extract_to(&mut self, name: &str, dest: &Path) -> Result<u64> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut entry = self.zip.by_name(name)?;
        let modified = entry.last_modified().and_then(from_zip_time);

        let tmp = partial_path(dest);
        let written = (|| -> Result<u64> {
            let mut out = BufWriter::new(File::create(&tmp)?);
            let bytes = io::copy(&mut entry, &mut out)?;
            io::Write::flush(&mut out)?;
            drop(out);
            if let Some(modified) = modified {
                set_modified_time(&tmp, modified.into())?;
            }
            fs::rename(&tmp, dest)?;
            Ok(bytes)
        })();

        if written.is_err() {
            let _ = fs::remove_file(&tmp);
        }
        written
    }
}

/// Content digest of the container at `path`, unknown if it cannot be read.
pub fn hash_container(path: &Path) -> Digest {
    match ContainerReader::open(path).and_then(|mut reader| reader.content_digest()) {
        Ok(digest) => digest,
        Err(e) => {
            debug!("Container hash failed for {}: {}", path.display(), e);
            Digest::unknown()
        }
    }
}

/// Reject relative entry paths that would escape their destination.
pub fn is_safe_relative(rel: &str) -> bool {
    Path::new(rel)
        .components()
        .all(|c| matches!(c, Component::Normal(_)))
}

fn to_zip_time(time: DateTime<Local>) -> zip::DateTime {
    let naive = time.naive_local();
    zip::DateTime::from_date_and_time(
        naive.year().clamp(1980, 2107) as u16,
        naive.month() as u8,
        naive.day() as u8,
        naive.hour() as u8,
        naive.minute() as u8,
        naive.second() as u8,
    )
    .unwrap_or_default()
}

fn from_zip_time(time: zip::DateTime) -> Option<DateTime<Local>> {
    let naive: NaiveDateTime = NaiveDate::from_ymd_opt(
        time.year() as i32,
        time.month() as u32,
        time.day() as u32,
    )?
    .and_hms_opt(time.hour() as u32, time.minute() as u32, time.second() as u32)?;
    Local.from_local_datetime(&naive).earliest()
}
