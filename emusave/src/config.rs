//! Configuration management for the save engine.
//!
//! Loads configuration from a TOML file. Every section has defaults so a
//! missing or partial file still produces a usable configuration.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub machine: MachineConfig,
    #[serde(default)]
    pub backup: BackupConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub emulators: BTreeMap<String, EmulatorConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineConfig {
    /// Identifier recorded in every archive and manifest entry this machine writes
    #[serde(default = "default_machine_id")]
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Local archive tree root
    #[serde(default = "default_backup_root")]
    pub root: PathBuf,

    /// Non-pinned archives kept per game (0 = keep everything)
    #[serde(default = "default_max_backups")]
    pub max_backups: usize,

    /// Container compression (zstd, deflate, stored)
    #[serde(default = "default_compression")]
    pub compression: String,

    /// Compression level, method-specific
    #[serde(default)]
    pub compression_level: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Shared folder kept consistent by an external client (None = sync disabled)
    #[serde(default)]
    pub folder: Option<PathBuf>,

    /// Seconds between two `sync_all` runs in watch mode
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// Explicit overrides for the portable path roots.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PathsConfig {
    pub documents: Option<PathBuf>,
    pub home: Option<PathBuf>,
    pub appdata: Option<PathBuf>,
    pub localappdata: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmulatorConfig {
    /// User-specified data directory, used when no plugin detects one
    #[serde(default)]
    pub data_path: Option<PathBuf>,
}

// Default values
fn default_machine_id() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string()[..12].to_string())
}

fn default_backup_root() -> PathBuf {
    dirs::data_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("emusave")
        .join("backups")
}

fn default_max_backups() -> usize {
    5
}

fn default_compression() -> String {
    "zstd".to_string()
}

fn default_interval_secs() -> u64 {
    300
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            id: default_machine_id(),
        }
    }
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            root: default_backup_root(),
            max_backups: default_max_backups(),
            compression: default_compression(),
            compression_level: None,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            machine: MachineConfig::default(),
            backup: BackupConfig::default(),
            sync: SyncConfig {
                folder: None,
                interval_secs: default_interval_secs(),
            },
            log: LogConfig::default(),
            paths: PathsConfig::default(),
            emulators: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Write configuration back as TOML
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Default location of the configuration file
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("emusave")
            .join("config.toml")
    }

    /// Configuration rooted at `backup_root`, identified as `machine_id`.
    pub fn for_machine(machine_id: &str, backup_root: &Path) -> Self {
        let mut config = Config::default();
        config.machine.id = machine_id.to_string();
        config.backup.root = backup_root.to_path_buf();
        config
    }

    /// User-configured data directory for `emulator`.
    pub fn emulator_data_path(&self, emulator: &str) -> Option<&Path> {
        self.emulators
            .get(emulator)
            .and_then(|e| e.data_path.as_deref())
    }
}
