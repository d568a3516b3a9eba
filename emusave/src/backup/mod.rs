//! Backup manager - creates, lists, pins and rotates versioned archives.
//!
//! One archive packages every artifact of every [`SaveRecord`] of a game:
//! directories under `{kind}/{dir-name}/...`, files under `{kind}/{file-name}`.
//! The sidecar records each artifact's portable source path so the archive can
//! be restored on another machine.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::archive::container::{Compression, ContainerWriter};
use crate::archive::store::{validate_component, ArchiveStore};
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::models::archive::{Archive, ArtifactEntry, Sidecar};
use crate::models::save_record::{SaveArtifact, SaveRecord};
use crate::paths::PathResolver;
use crate::utils::errors::{EngineError, Result};

/// Main backup manager
pub struct BackupManager {
    store: ArchiveStore,
    resolver: PathResolver,
    machine_id: String,
    max_backups: usize,
    compression: Compression,
    clock: Arc<dyn Clock>,
}

/// Result of a rotation pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Rotation {
    pub deleted: usize,
    /// One message per archive that could not be deleted
    pub errors: Vec<String>,
}

/// A newly written archive and the rotation that followed it.
#[derive(Debug, Clone)]
pub struct Created {
    pub archive: Archive,
    pub rotation: Rotation,
}

/// Fields picked from the first record that provides them.
struct Representative<'a> {
    title: &'a str,
    platform: &'a str,
    version_tag: Option<&'a str>,
    emulator_data_path: Option<&'a Path>,
}

impl<'a> Representative<'a> {
    fn pick(records: &'a [SaveRecord]) -> Self {
        let game_id = records[0].game_id.as_str();
        Self {
            title: records
                .iter()
                .find(|r| r.has_display_name())
                .map(|r| r.game_name.as_str())
                .unwrap_or(game_id),
            platform: records
                .iter()
                .map(|r| r.platform.as_str())
                .find(|p| !p.is_empty())
                .unwrap_or(""),
            version_tag: records
                .iter()
                .filter_map(|r| r.version_tag.as_deref())
                .find(|t| !t.trim().is_empty()),
            emulator_data_path: records.iter().find_map(|r| r.emulator_data_path.as_deref()),
        }
    }
}

impl BackupManager {
    pub fn new(config: &Config, resolver: PathResolver) -> Result<Self> {
        Ok(Self {
            store: ArchiveStore::new(&config.backup.root),
            resolver,
            machine_id: config.machine.id.clone(),
            max_backups: config.backup.max_backups,
            compression: Compression::from_config(
                &config.backup.compression,
                config.backup.compression_level,
            )?,
            clock: Arc::new(SystemClock),
        })
    }

    /// Replace the time source used for archive identities.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &ArchiveStore {
        &self.store
    }

    /// Package all `records` of one game into a new archive version.
    ///
    /// Any failure while adding an artifact aborts the whole backup and leaves
    /// no container behind. Rotation runs right after a successful write; its
    /// failures do not undo the backup and are returned with it.
    pub fn create(&self, records: &[SaveRecord]) -> Result<Created> {
        let first = records
            .first()
            .ok_or_else(|| EngineError::InvalidInput("No save records to back up".into()))?;
        let emulator = first.emulator.as_str();
        let game_id = first.game_id.as_str();
        validate_component("emulator", emulator)?;
        validate_component("game id", game_id)?;

        if let Some(other) = records
            .iter()
            .find(|r| r.emulator != emulator || r.game_id != game_id)
        {
            return Err(EngineError::InvalidInput(format!(
                "Records of different games in one backup: {} and {}",
                first.unique_key(),
                other.unique_key()
            )));
        }

        let rep = Representative::pick(records);
        let existing = self.store.list(emulator, game_id).len();
        let now = self.clock.now();
        let id = self.store.next_id(emulator, game_id, now)?;
        let container_path = self.store.container_path(emulator, game_id, &id);

        info!(
            emulator = %emulator,
            game_id = %game_id,
            "Creating backup {} ({} artifacts)",
            id,
            records.iter().map(|r| r.artifacts.len()).sum::<usize>()
        );

        let mut writer = ContainerWriter::create(&container_path, self.compression)?;
        let mut entries = Vec::new();
        for artifact in records.iter().flat_map(|r| r.artifacts.iter()) {
            match self.add_artifact(&mut writer, artifact, rep.emulator_data_path) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    error!(
                        emulator = %emulator,
                        game_id = %game_id,
                        "Failed to add {}: {}",
                        artifact.path.display(),
                        e
                    );
                    return Err(e);
                }
            }
        }
        let total_size = writer.total_bytes();
        writer.finish()?;

        let sidecar = Sidecar {
            title: rep.title.to_string(),
            game_id: game_id.to_string(),
            emulator: emulator.to_string(),
            platform: rep.platform.to_string(),
            version_tag: rep.version_tag.unwrap_or_default().to_string(),
            source_machine: self.machine_id.clone(),
            emulator_data_path: rep
                .emulator_data_path
                .map(|p| self.resolver.to_portable(p))
                .unwrap_or_default(),
            is_pinned: false,
            label: String::new(),
            backup_paths: entries,
            created_at: Some(now.format("%Y-%m-%dT%H:%M:%SZ").to_string()),
            total_size,
        };

        let sidecar_path = self.store.sidecar_path(emulator, game_id, &id);
        if let Err(e) = self.store.write_sidecar(&sidecar_path, &sidecar) {
            error!("Failed to write sidecar {}: {}", sidecar_path.display(), e);
            let _ = std::fs::remove_file(&container_path);
            return Err(e);
        }

        let version = existing as u32 + 1;
        info!(
            emulator = %emulator,
            game_id = %game_id,
            "Created backup v{} for {} at {} ({} bytes)",
            version,
            sidecar.title,
            container_path.display(),
            total_size
        );

        let archive = Archive {
            emulator: emulator.to_string(),
            game_id: game_id.to_string(),
            id,
            container: container_path,
            sidecar_path,
            sidecar,
            version,
        };

        let rotation = self.rotate(emulator, game_id);
        Ok(Created { archive, rotation })
    }

    fn add_artifact(
        &self,
        writer: &mut ContainerWriter,
        artifact: &SaveArtifact,
        emulator_data_path: Option<&Path>,
    ) -> Result<ArtifactEntry> {
        let path = &artifact.path;
        if !path.exists() {
            return Err(EngineError::NotFound(format!(
                "Save artifact not found: {}",
                path.display()
            )));
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "data".to_string());
        let container_path = writer.reserve_name(&format!("{}/{}", artifact.kind, name));
        let is_dir = path.is_dir();

        if is_dir {
            writer.add_dir(path, &container_path)?;
        } else {
            writer.add_file(path, &container_path)?;
        }

        Ok(ArtifactEntry {
            source: self.resolver.to_portable_with(path, emulator_data_path),
            kind: artifact.kind,
            container_path,
            is_dir,
        })
    }

    /// Archives of one game, newest first.
    pub fn list(&self, emulator: &str, game_id: &str) -> Vec<Archive> {
        self.store.list(emulator, game_id)
    }

    /// All archives grouped by `emulator:game_id`.
    pub fn list_all(&self) -> BTreeMap<String, Vec<Archive>> {
        self.store.list_all()
    }

    pub fn find_version(&self, emulator: &str, game_id: &str, version: u32) -> Option<Archive> {
        self.store.find_version(emulator, game_id, version)
    }

    /// Delete non-pinned archives beyond the retention count, oldest first.
    ///
    /// Pinned archives neither count toward the limit nor get deleted.
    pub fn rotate(&self, emulator: &str, game_id: &str) -> Rotation {
        if self.max_backups == 0 {
            return Rotation::default();
        }

        let non_pinned: Vec<Archive> = self
            .store
            .list(emulator, game_id)
            .into_iter()
            .filter(|a| !a.is_pinned())
            .collect();
        if non_pinned.len() <= self.max_backups {
            return Rotation::default();
        }
        self.remove_all(&non_pinned[self.max_backups..])
    }

    fn remove_all(&self, archives: &[Archive]) -> Rotation {
        let mut rotation = Rotation::default();
        for archive in archives {
            match self.store.delete(archive) {
                Ok(()) => {
                    rotation.deleted += 1;
                    info!(
                        emulator = %archive.emulator,
                        game_id = %archive.game_id,
                        "Rotated old backup: {}",
                        archive.container.display()
                    );
                }
                Err(e) => {
                    let msg = format!(
                        "Failed to delete backup {}: {}",
                        archive.container.display(),
                        e
                    );
                    error!("{}", msg);
                    rotation.errors.push(msg);
                }
            }
        }
        rotation
    }

    /// Mark an archive as permanently kept, optionally with a label.
    pub fn pin(&self, archive: &mut Archive, label: Option<&str>) -> Result<()> {
        self.update_sidecar(archive, |s| {
            s.is_pinned = true;
            if let Some(label) = label {
                s.label = label.to_string();
            }
        })
    }

    pub fn unpin(&self, archive: &mut Archive) -> Result<()> {
        self.update_sidecar(archive, |s| s.is_pinned = false)
    }

    /// Remove an archive. Irreversible.
    pub fn delete(&self, archive: &Archive) -> Result<()> {
        self.store.delete(archive)?;
        info!("Deleted backup: {}", archive.container.display());
        Ok(())
    }

    fn update_sidecar(&self, archive: &mut Archive, update: impl FnOnce(&mut Sidecar)) -> Result<()> {
        let mut sidecar = match self.store.read_sidecar(&archive.sidecar_path) {
            Ok(sidecar) => sidecar,
            Err(e) => {
                warn!("Failed to read sidecar {}: {}", archive.sidecar_path.display(), e);
                return Err(e);
            }
        };
        update(&mut sidecar);
        self.store.write_sidecar(&archive.sidecar_path, &sidecar)?;
        archive.sidecar = sidecar;
        Ok(())
    }
}
