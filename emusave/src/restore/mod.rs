//! Restore manager - writes archive contents back to live save locations.
//!
//! Destinations come from the sidecar's portable source paths resolved on
//! this machine. `${EMU_DATA}` prefers the live detected data directory of
//! the emulator and falls back to the directory recorded at backup time.

use chrono::{DateTime, Local};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

use crate::archive::container::{is_safe_relative, ContainerReader, EntryInfo};
use crate::archive::store::ArchiveStore;
use crate::fs::metadata::modified_time;
use crate::models::archive::{Archive, ArtifactEntry};
use crate::paths::PathResolver;
use crate::plugin::Detection;
use crate::utils::errors::Result;

/// Zip entry times are stored with two-second resolution.
const MTIME_TOLERANCE_SECS: i64 = 2;

/// One destination file touched by a restore.
#[derive(Debug, Clone, PartialEq)]
pub struct FileChange {
    /// Entry name inside the container
    pub container_path: String,
    pub destination: PathBuf,
    pub dest_exists: bool,
    pub dest_modified: Option<DateTime<Local>>,
    /// Time of the entry inside the container
    pub source_modified: Option<DateTime<Local>>,
    /// Destination is strictly newer than the archived copy
    pub is_newer_locally: bool,
}

/// Failure of a single artifact or file during restore.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RestoreError {
    #[error("Skipped {destination}: local file is newer than the backup")]
    SkippedNewer { destination: PathBuf },

    #[error("Cannot resolve destination of {artifact}")]
    Unresolved { artifact: String },

    #[error("Refusing unsafe entry path {entry}")]
    UnsafeEntry { entry: String },

    #[error("Entry {entry} not found in container")]
    MissingEntry { entry: String },

    #[error("Failed to restore {artifact}: {message}")]
    Io { artifact: String, message: String },
}

pub struct RestoreManager {
    store: ArchiveStore,
    resolver: PathResolver,
    detection: Detection,
}

impl RestoreManager {
    pub fn new(store: ArchiveStore, resolver: PathResolver) -> Self {
        Self {
            store,
            resolver,
            detection: Detection::default(),
        }
    }

    /// Use live data directories for `${EMU_DATA}`.
    pub fn with_detection(mut self, detection: Detection) -> Self {
        self.detection = detection;
        self
    }

    pub fn store(&self) -> &ArchiveStore {
        &self.store
    }

    /// Report what restoring `archive` would write, without writing anything.
    ///
    /// Artifacts whose destination cannot be planned are logged and left out.
    pub fn preview(&self, archive: &Archive) -> Result<Vec<FileChange>> {
        let mut reader = ContainerReader::open(&archive.container)?;
        let (changes, problems) = self.plan(&mut reader, archive)?;
        for problem in &problems {
            warn!(
                emulator = %archive.emulator,
                game_id = %archive.game_id,
                "Preview: {}",
                problem
            );
        }
        Ok(changes)
    }

    /// Extract `archive` to its destinations.
    ///
    /// Every artifact is attempted; the returned list holds one error per
    /// file or artifact that could not be restored. Without `force`,
    /// destinations newer than the archived copy are left alone.
    pub fn restore(&self, archive: &Archive, force: bool) -> Vec<RestoreError> {
        let mut reader = match ContainerReader::open(&archive.container) {
            Ok(reader) => reader,
            Err(e) => {
                return vec![RestoreError::Io {
                    artifact: archive.container.display().to_string(),
                    message: e.to_string(),
                }]
            }
        };

        let (changes, mut errors) = match self.plan(&mut reader, archive) {
            Ok(planned) => planned,
            Err(e) => {
                return vec![RestoreError::Io {
                    artifact: archive.container.display().to_string(),
                    message: e.to_string(),
                }]
            }
        };

        // Directory artifacts are recreated even when they hold no files
        for artifact in archive.sidecar.backup_paths.iter().filter(|a| a.is_dir) {
            let Some(dest_root) = self.destination(archive, artifact) else {
                continue;
            };
            if let Err(e) = fs::create_dir_all(&dest_root) {
                errors.push(RestoreError::Io {
                    artifact: artifact.source.clone(),
                    message: e.to_string(),
                });
            }
        }

        let mut restored = 0;
        for change in &changes {
            if change.is_newer_locally && !force {
                warn!(
                    "Keeping newer local file {}",
                    change.destination.display()
                );
                errors.push(RestoreError::SkippedNewer {
                    destination: change.destination.clone(),
                });
                continue;
            }
            match reader.extract_to(&change.container_path, &change.destination) {
                Ok(_) => restored += 1,
                Err(e) => {
                    warn!(
                        "Failed to restore {} to {}: {}",
                        change.container_path,
                        change.destination.display(),
                        e
                    );
                    errors.push(RestoreError::Io {
                        artifact: change.container_path.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }

        info!(
            emulator = %archive.emulator,
            game_id = %archive.game_id,
            "Restored v{} ({}): {} file(s), {} error(s)",
            archive.version,
            archive.id,
            restored,
            errors.len()
        );
        errors
    }

    /// Resolve the live directory or file an artifact maps to.
    pub fn destination(&self, archive: &Archive, entry: &ArtifactEntry) -> Option<PathBuf> {
        self.resolver.resolve_with(
            &entry.source,
            self.detection.get(&archive.emulator),
            archive.sidecar.emulator_data_path(),
        )
    }

    fn plan(
        &self,
        reader: &mut ContainerReader,
        archive: &Archive,
    ) -> Result<(Vec<FileChange>, Vec<RestoreError>)> {
        let entries = reader.entries()?;
        let mut changes = Vec::new();
        let mut problems = Vec::new();

        for artifact in &archive.sidecar.backup_paths {
            let Some(dest_root) = self.destination(archive, artifact) else {
                problems.push(RestoreError::Unresolved {
                    artifact: artifact.source.clone(),
                });
                continue;
            };

            if artifact.is_dir {
                for (info, rel) in files_under(&entries, &artifact.container_path) {
                    if rel.is_empty() || !is_safe_relative(&rel) {
                        problems.push(RestoreError::UnsafeEntry {
                            entry: info.name.clone(),
                        });
                        continue;
                    }
                    changes.push(file_change(info, dest_root.join(&rel)));
                }
            } else {
                match entries
                    .iter()
                    .find(|e| !e.is_dir && e.name == artifact.container_path)
                {
                    Some(info) => changes.push(file_change(info, dest_root)),
                    None => problems.push(RestoreError::MissingEntry {
                        entry: artifact.container_path.clone(),
                    }),
                }
            }
        }

        Ok((changes, problems))
    }
}

/// File entries below the `prefix/` directory, with their relative path.
fn files_under<'a>(entries: &'a [EntryInfo], prefix: &str) -> Vec<(&'a EntryInfo, String)> {
    let prefix = format!("{}/", prefix.trim_end_matches('/'));
    entries
        .iter()
        .filter(|e| !e.is_dir)
        .filter_map(|e| Some((e, e.name.strip_prefix(&prefix)?.to_string())))
        .collect()
}

fn file_change(info: &EntryInfo, destination: PathBuf) -> FileChange {
    let dest_modified = existing_mtime(&destination);
    let is_newer_locally = match (dest_modified, info.modified) {
        (Some(dest), Some(src)) => (dest - src).num_seconds() > MTIME_TOLERANCE_SECS,
        _ => false,
    };
    FileChange {
        container_path: info.name.clone(),
        dest_exists: destination.exists(),
        destination,
        dest_modified,
        source_modified: info.modified,
        is_newer_locally,
    }
}

fn existing_mtime(path: &Path) -> Option<DateTime<Local>> {
    if path.is_file() {
        modified_time(path).ok()
    } else {
        None
    }
}
