//! Sync manifest - serialized as `sync_manifest.json` at the sync root.
//!
//! Records, per `emulator:game_id`, which archive was last pushed and by whom.
//! Only consulted for the version tag of the other side; content checks always
//! hash the real files.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::warn;

use crate::fs::metadata::write_atomic;
use crate::utils::errors::Result;

pub const MANIFEST_FILE: &str = "sync_manifest.json";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SyncManifest {
    pub entries: BTreeMap<String, SyncManifestEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncManifestEntry {
    #[serde(default)]
    pub game_id: String,
    #[serde(default)]
    pub emulator: String,
    #[serde(default)]
    pub last_sync_time: String,
    #[serde(default)]
    pub source_machine: String,
    #[serde(default)]
    pub file_hash: String,
    /// Container path relative to the sync root, `/`-separated
    #[serde(default)]
    pub relative_path: String,
    #[serde(default, alias = "crc32")]
    pub version_tag: String,
}

impl SyncManifest {
    /// Read the manifest; a missing or unreadable file yields an empty one.
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        let parsed = std::fs::read(path)
            .map_err(|e| e.to_string())
            .and_then(|bytes| serde_json::from_slice(&bytes).map_err(|e| e.to_string()));
        match parsed {
            Ok(manifest) => manifest,
            Err(e) => {
                warn!("Ignoring unreadable sync manifest {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        write_atomic(path, &json)?;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&SyncManifestEntry> {
        self.entries.get(key)
    }

    pub fn upsert(&mut self, entry: SyncManifestEntry) {
        let key = format!("{}:{}", entry.emulator, entry.game_id);
        self.entries.insert(key, entry);
    }

    /// Version tag last pushed for `key`, if one was recorded.
    pub fn version_tag(&self, key: &str) -> Option<&str> {
        self.get(key)
            .map(|e| e.version_tag.as_str())
            .filter(|t| !t.trim().is_empty())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(tag: &str) -> SyncManifestEntry {
        SyncManifestEntry {
            game_id: "SLUS-21005".to_string(),
            emulator: "PCSX2".to_string(),
            last_sync_time: "2024-05-01T21:30:00+02:00".to_string(),
            source_machine: "desk".to_string(),
            file_hash: "ab".repeat(32),
            relative_path: "PCSX2/SLUS-21005/2024-05-01_21-30.zip".to_string(),
            version_tag: tag.to_string(),
        }
    }

    #[test]
    fn test_save_and_load() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join(MANIFEST_FILE);

        let mut manifest = SyncManifest::default();
        manifest.upsert(entry("083F0E03"));
        manifest.save(&path)?;

        let loaded = SyncManifest::load(&path);
        assert_eq!(loaded, manifest);
        assert_eq!(loaded.version_tag("PCSX2:SLUS-21005"), Some("083F0E03"));

        let raw: serde_json::Value = serde_json::from_slice(&std::fs::read(&path)?)?;
        assert!(raw["PCSX2:SLUS-21005"]["file_hash"].is_string());
        Ok(())
    }

    #[test]
    fn test_missing_or_corrupt_manifest_is_empty() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join(MANIFEST_FILE);
        assert!(SyncManifest::load(&path).is_empty());

        std::fs::write(&path, b"[1, 2")?;
        assert!(SyncManifest::load(&path).is_empty());
        Ok(())
    }

    #[test]
    fn test_legacy_crc32_field_and_empty_tag() {
        let json = r#"{"PCSX2:SLUS-21005": {"game_id": "SLUS-21005", "emulator": "PCSX2", "crc32": "A1B2"},
                      "Mesen:Zelda": {"game_id": "Zelda", "emulator": "Mesen", "version_tag": ""}}"#;
        let manifest: SyncManifest = serde_json::from_str(json).unwrap();
        assert_eq!(manifest.version_tag("PCSX2:SLUS-21005"), Some("A1B2"));
        assert_eq!(manifest.version_tag("Mesen:Zelda"), None);
        assert_eq!(manifest.len(), 2);
    }
}
