//! Emulator plugin contract.
//!
//! Plugins locate emulator installations and classify raw save files into
//! [`SaveRecord`]s. The engine never re-derives that classification; it only
//! consumes the records and the detected data directories.

pub mod registry;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::models::save_record::SaveRecord;

pub use registry::{group_by_game, PluginRegistry};

/// A detected emulator installation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmulatorInstall {
    pub name: String,
    /// Executable or install directory
    pub install_path: PathBuf,
    /// Data/config directory, the live value of `${EMU_DATA}`
    pub data_path: PathBuf,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub is_portable: bool,
}

pub trait EmulatorPlugin: Send + Sync {
    /// Unique name, also the emulator component of archive paths.
    fn name(&self) -> &str;

    fn display_name(&self) -> &str {
        self.name()
    }

    fn supported_platforms(&self) -> Vec<String>;

    /// Installations found on this machine, plus any under `extra_paths`.
    fn detect_installation(&self, extra_paths: &[PathBuf]) -> Vec<EmulatorInstall>;

    fn scan_saves(&self, install: &EmulatorInstall) -> Vec<SaveRecord>;
}

/// Live data directory per emulator name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Detection {
    data_dirs: BTreeMap<String, PathBuf>,
}

impl Detection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Data directories configured under `[emulators.<name>]`.
    pub fn from_config(config: &Config) -> Self {
        let data_dirs = config
            .emulators
            .iter()
            .filter_map(|(name, emu)| emu.data_path.clone().map(|p| (name.clone(), p)))
            .collect();
        Self { data_dirs }
    }

    pub fn insert(&mut self, emulator: impl Into<String>, data_dir: impl Into<PathBuf>) {
        self.data_dirs.insert(emulator.into(), data_dir.into());
    }

    pub fn get(&self, emulator: &str) -> Option<&Path> {
        self.data_dirs.get(emulator).map(PathBuf::as_path)
    }

    /// Entries of `other` win over existing ones.
    pub fn merge(&mut self, other: Detection) {
        self.data_dirs.extend(other.data_dirs);
    }

    pub fn len(&self) -> usize {
        self.data_dirs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data_dirs.is_empty()
    }
}

impl FromIterator<(String, PathBuf)> for Detection {
    fn from_iter<I: IntoIterator<Item = (String, PathBuf)>>(iter: I) -> Self {
        Self {
            data_dirs: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EmulatorConfig;

    #[test]
    fn test_detection_from_config_and_merge() {
        let mut config = Config::for_machine("desk", Path::new("/tmp/backups"));
        config.emulators.insert(
            "Mesen".to_string(),
            EmulatorConfig {
                data_path: Some(PathBuf::from("/opt/mesen")),
            },
        );
        config
            .emulators
            .insert("Snes9x".to_string(), EmulatorConfig::default());

        let mut detection = Detection::from_config(&config);
        assert_eq!(detection.len(), 1);
        assert_eq!(detection.get("Mesen"), Some(Path::new("/opt/mesen")));
        assert!(detection.get("Snes9x").is_none());

        let live: Detection = [("Mesen".to_string(), PathBuf::from("/home/u/Mesen2"))]
            .into_iter()
            .collect();
        detection.merge(live);
        assert_eq!(detection.get("Mesen"), Some(Path::new("/home/u/Mesen2")));
    }
}
