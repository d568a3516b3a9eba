//! On-disk layout of an archive tree.
//!
//! ```text
//! {root}/{emulator}/{game_id}/{YYYY-MM-DD_HH-mm}.zip    payload
//! {root}/{emulator}/{game_id}/{YYYY-MM-DD_HH-mm}.json   sidecar
//! ```
//!
//! The same layout is used for the local backup tree and for the shared sync
//! tree, so both are read through an [`ArchiveStore`].

use chrono::NaiveDateTime;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::fs::metadata::write_atomic;
use crate::models::archive::{Archive, ArchiveId, Sidecar, CONTAINER_EXT};
use crate::utils::errors::{EngineError, Result};

/// Highest collision counter tried within one minute.
const MAX_COLLISIONS: u32 = 99;

#[derive(Debug, Clone)]
pub struct ArchiveStore {
    root: PathBuf,
}

impl ArchiveStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn game_dir(&self, emulator: &str, game_id: &str) -> PathBuf {
        self.root.join(emulator).join(game_id)
    }

    pub fn container_path(&self, emulator: &str, game_id: &str, id: &ArchiveId) -> PathBuf {
        self.game_dir(emulator, game_id).join(id.container_name())
    }

    pub fn sidecar_path(&self, emulator: &str, game_id: &str, id: &ArchiveId) -> PathBuf {
        self.game_dir(emulator, game_id).join(id.sidecar_name())
    }

    /// First unused identity for an archive created at `now`.
    pub fn next_id(&self, emulator: &str, game_id: &str, now: NaiveDateTime) -> Result<ArchiveId> {
        let base = ArchiveId::new(now);
        if !self.is_taken(emulator, game_id, &base) {
            return Ok(base);
        }
        (1..=MAX_COLLISIONS)
            .map(|n| ArchiveId::with_counter(now, n))
            .find(|id| !self.is_taken(emulator, game_id, id))
            .ok_or_else(|| {
                EngineError::InvalidInput(format!(
                    "Too many archives for {}:{} within {}",
                    emulator,
                    game_id,
                    base.display_time()
                ))
            })
    }

    fn is_taken(&self, emulator: &str, game_id: &str, id: &ArchiveId) -> bool {
        self.container_path(emulator, game_id, id).exists()
            || self.sidecar_path(emulator, game_id, id).exists()
    }

    pub fn read_sidecar(&self, path: &Path) -> Result<Sidecar> {
        if !path.is_file() {
            return Err(EngineError::NotFound(format!(
                "Sidecar not found: {}",
                path.display()
            )));
        }
        let content = fs::read(path)?;
        Ok(serde_json::from_slice(&content)?)
    }

    pub fn write_sidecar(&self, path: &Path, sidecar: &Sidecar) -> Result<()> {
        let json = serde_json::to_vec_pretty(sidecar)?;
        write_atomic(path, &json)?;
        Ok(())
    }

    /// Archives of one game, newest first, with positional versions (oldest = 1).
    ///
    /// Containers without a readable sidecar are skipped with a warning.
    pub fn list(&self, emulator: &str, game_id: &str) -> Vec<Archive> {
        let game_dir = self.game_dir(emulator, game_id);
        let entries = match fs::read_dir(&game_dir) {
            Ok(entries) => entries,
            Err(_) => return Vec::new(),
        };

        let mut archives = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some(CONTAINER_EXT) {
                continue;
            }
            let Some(id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(ArchiveId::parse)
            else {
                continue;
            };

            let sidecar_path = self.sidecar_path(emulator, game_id, &id);
            match self.read_sidecar(&sidecar_path) {
                Ok(sidecar) => archives.push(Archive {
                    emulator: emulator.to_string(),
                    game_id: game_id.to_string(),
                    id,
                    container: path,
                    sidecar_path,
                    sidecar,
                    version: 0,
                }),
                Err(e) => {
                    warn!(
                        emulator = %emulator,
                        game_id = %game_id,
                        "Skipping archive {}: {}",
                        path.display(),
                        e
                    );
                }
            }
        }

        archives.sort_by(|a, b| b.id.cmp(&a.id));
        let count = archives.len() as u32;
        for (i, archive) in archives.iter_mut().enumerate() {
            archive.version = count - i as u32;
        }
        archives
    }

    /// Newest archive of one game.
    pub fn latest(&self, emulator: &str, game_id: &str) -> Option<Archive> {
        self.list(emulator, game_id).into_iter().next()
    }

    pub fn find_version(&self, emulator: &str, game_id: &str, version: u32) -> Option<Archive> {
        self.list(emulator, game_id)
            .into_iter()
            .find(|a| a.version == version)
    }

    /// Every `(emulator, game_id)` directory pair in the tree.
    pub fn games(&self) -> Vec<(String, String)> {
        let mut games = Vec::new();
        for emu_dir in read_subdirs(&self.root) {
            let Some(emulator) = dir_name(&emu_dir) else {
                continue;
            };
            for game_dir in read_subdirs(&emu_dir) {
                if let Some(game_id) = dir_name(&game_dir) {
                    games.push((emulator.clone(), game_id));
                }
            }
        }
        games.sort();
        games
    }

    /// All archives grouped by `emulator:game_id`; games without archives are left out.
    pub fn list_all(&self) -> BTreeMap<String, Vec<Archive>> {
        self.games()
            .into_iter()
            .filter_map(|(emulator, game_id)| {
                let archives = self.list(&emulator, &game_id);
                if archives.is_empty() {
                    None
                } else {
                    Some((format!("{}:{}", emulator, game_id), archives))
                }
            })
            .collect()
    }

    /// Remove container and sidecar of `archive`.
    pub fn delete(&self, archive: &Archive) -> Result<()> {
        if archive.container.exists() {
            fs::remove_file(&archive.container)?;
        }
        if archive.sidecar_path.exists() {
            fs::remove_file(&archive.sidecar_path)?;
        }
        Ok(())
    }
}

/// Check that `name` can be used as a single directory name.
pub fn validate_component(kind: &str, name: &str) -> Result<()> {
    let invalid = name.trim().is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', ':']);
    if invalid {
        return Err(EngineError::InvalidInput(format!(
            "Invalid {}: {:?}",
            kind, name
        )));
    }
    Ok(())
}

fn read_subdirs(dir: &Path) -> Vec<PathBuf> {
    match fs::read_dir(dir) {
        Ok(entries) => entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect(),
        Err(_) => Vec::new(),
    }
}

fn dir_name(path: &Path) -> Option<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn put(store: &ArchiveStore, id: &ArchiveId, sidecar: Option<&Sidecar>) -> Result<()> {
        let container = store.container_path("PCSX2", "SLUS-21005", id);
        fs::create_dir_all(container.parent().unwrap())?;
        fs::write(&container, b"zip")?;
        if let Some(sidecar) = sidecar {
            store.write_sidecar(&store.sidecar_path("PCSX2", "SLUS-21005", id), sidecar)?;
        }
        Ok(())
    }

    #[test]
    fn test_list_orders_and_numbers() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = ArchiveStore::new(temp_dir.path());
        let sidecar = Sidecar::default();

        put(&store, &ArchiveId::new(at(10, 0)), Some(&sidecar))?;
        put(&store, &ArchiveId::new(at(12, 0)), Some(&sidecar))?;
        put(&store, &ArchiveId::with_counter(at(10, 0), 1), Some(&sidecar))?;

        let archives = store.list("PCSX2", "SLUS-21005");
        let stems: Vec<_> = archives.iter().map(|a| a.id.stem()).collect();
        assert_eq!(
            stems,
            vec!["2024-05-01_12-00", "2024-05-01_10-00_01", "2024-05-01_10-00"]
        );
        let versions: Vec<_> = archives.iter().map(|a| a.version).collect();
        assert_eq!(versions, vec![3, 2, 1]);
        Ok(())
    }

    #[test]
    fn test_missing_or_corrupt_sidecar_is_skipped() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = ArchiveStore::new(temp_dir.path());

        put(&store, &ArchiveId::new(at(10, 0)), Some(&Sidecar::default()))?;
        put(&store, &ArchiveId::new(at(11, 0)), None)?;
        let corrupt = ArchiveId::new(at(12, 0));
        put(&store, &corrupt, None)?;
        fs::write(store.sidecar_path("PCSX2", "SLUS-21005", &corrupt), b"{not json")?;

        let archives = store.list("PCSX2", "SLUS-21005");
        assert_eq!(archives.len(), 1);
        assert_eq!(archives[0].version, 1);
        Ok(())
    }

    #[test]
    fn test_next_id_disambiguates_same_minute() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = ArchiveStore::new(temp_dir.path());
        let now = at(9, 15);

        let first = store.next_id("PCSX2", "SLUS-21005", now)?;
        assert_eq!(first.stem(), "2024-05-01_09-15");
        put(&store, &first, Some(&Sidecar::default()))?;

        let second = store.next_id("PCSX2", "SLUS-21005", now)?;
        assert_eq!(second.stem(), "2024-05-01_09-15_01");
        Ok(())
    }

    #[test]
    fn test_games_and_list_all() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = ArchiveStore::new(temp_dir.path());
        put(&store, &ArchiveId::new(at(10, 0)), Some(&Sidecar::default()))?;
        fs::create_dir_all(temp_dir.path().join("Mesen/empty-game"))?;

        assert_eq!(store.games().len(), 2);
        let all = store.list_all();
        assert_eq!(all.keys().collect::<Vec<_>>(), vec!["PCSX2:SLUS-21005"]);
        Ok(())
    }

    #[test]
    fn test_validate_component() {
        assert!(validate_component("game id", "SLUS-21005").is_ok());
        assert!(validate_component("game id", "../etc").is_err());
        assert!(validate_component("emulator", "").is_err());
        assert!(validate_component("emulator", "a/b").is_err());
    }
}
