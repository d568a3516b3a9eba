//! Explicit registry of emulator plugins, keyed by name.

use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, info, warn};

use super::{Detection, EmulatorInstall, EmulatorPlugin};
use crate::models::save_record::SaveRecord;

#[derive(Default)]
pub struct PluginRegistry {
    plugins: BTreeMap<String, Box<dyn EmulatorPlugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a plugin, replacing any previous one with the same name.
    pub fn register(&mut self, plugin: Box<dyn EmulatorPlugin>) {
        let name = plugin.name().to_string();
        if self.plugins.insert(name.clone(), plugin).is_some() {
            warn!("Plugin {} registered twice, keeping the latest", name);
        } else {
            info!("Registered plugin: {}", name);
        }
    }

    pub fn get(&self, name: &str) -> Option<&dyn EmulatorPlugin> {
        self.plugins.get(name).map(|p| p.as_ref())
    }

    pub fn names(&self) -> Vec<&str> {
        self.plugins.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Installations of every registered emulator.
    pub fn installations(&self, extra_paths: &[PathBuf]) -> Vec<EmulatorInstall> {
        self.plugins
            .values()
            .flat_map(|p| {
                let found = p.detect_installation(extra_paths);
                debug!("{}: {} installation(s)", p.name(), found.len());
                found
            })
            .collect()
    }

    /// Live data directory per emulator. The first installation found wins.
    pub fn detect_all(&self, extra_paths: &[PathBuf]) -> Detection {
        let mut detection = Detection::new();
        for install in self.installations(extra_paths) {
            if detection.get(&install.name).is_none() {
                detection.insert(install.name.clone(), install.data_path.clone());
            }
        }
        detection
    }

    /// Save records of every installation of every registered emulator.
    pub fn scan_all(&self, extra_paths: &[PathBuf]) -> Vec<SaveRecord> {
        let mut records = Vec::new();
        for install in self.installations(extra_paths) {
            let Some(plugin) = self.get(&install.name) else {
                warn!("No plugin for detected installation {}", install.name);
                continue;
            };
            let found = plugin.scan_saves(&install);
            info!(
                "Scanned {} at {}: {} save(s)",
                install.name,
                install.data_path.display(),
                found.len()
            );
            records.extend(found);
        }
        records
    }
}

/// Group records by `emulator:game_id`, keeping input order inside each group.
///
/// Each group is the input of one `BackupManager::create` call.
pub fn group_by_game(records: Vec<SaveRecord>) -> BTreeMap<String, Vec<SaveRecord>> {
    let mut groups: BTreeMap<String, Vec<SaveRecord>> = BTreeMap::new();
    for record in records {
        groups.entry(record.unique_key()).or_default().push(record);
    }
    groups
}
