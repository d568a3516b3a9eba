//! Classified save data handed over by the plugin layer.

use chrono::{DateTime, Local};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::PathBuf;

/// Kind of a save artifact.
///
/// Also used as the top-level folder of an artifact inside an archive container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SaveKind {
    /// Memory card image or folder (PS2, GameCube)
    Memcard,
    /// Battery-backed SRAM (NES/SNES/GB)
    Battery,
    /// Emulator save state
    Savestate,
    /// Folder-type save
    Folder,
    /// Single file save
    File,
}

impl SaveKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SaveKind::Memcard => "memcard",
            SaveKind::Battery => "battery",
            SaveKind::Savestate => "savestate",
            SaveKind::Folder => "folder",
            SaveKind::File => "file",
        }
    }

    /// Parse a kind tag. Unknown tags fall back to `File`.
    pub fn parse(tag: &str) -> Self {
        match tag.to_ascii_lowercase().as_str() {
            "memcard" | "memcard_folder" => SaveKind::Memcard,
            "battery" => SaveKind::Battery,
            "savestate" => SaveKind::Savestate,
            "folder" => SaveKind::Folder,
            _ => SaveKind::File,
        }
    }
}

impl Serialize for SaveKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for SaveKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        Ok(SaveKind::parse(&tag))
    }
}

impl fmt::Display for SaveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single file or directory on disk belonging to a game's save data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveArtifact {
    /// Absolute path to the file or directory
    pub path: PathBuf,

    #[serde(rename = "type")]
    pub kind: SaveKind,

    /// Size in bytes (sum of contained files for directories)
    #[serde(default)]
    pub size: u64,

    #[serde(default)]
    pub modified: Option<DateTime<Local>>,
}

impl SaveArtifact {
    pub fn new(path: impl Into<PathBuf>, kind: SaveKind) -> Self {
        Self {
            path: path.into(),
            kind,
            size: 0,
            modified: None,
        }
    }
}

/// All save data of one game in one emulator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveRecord {
    pub emulator: String,

    /// Serial number, ROM file stem or title id
    pub game_id: String,

    /// Human-readable title; equal to `game_id` when the plugin knows no better
    #[serde(default)]
    pub game_name: String,

    #[serde(default)]
    pub platform: String,

    /// Checksum of the game disc/ROM, used to spot different game revisions
    #[serde(default)]
    pub version_tag: Option<String>,

    /// Emulator data directory the artifacts were found under
    #[serde(default)]
    pub emulator_data_path: Option<PathBuf>,

    #[serde(default)]
    pub artifacts: Vec<SaveArtifact>,
}

impl SaveRecord {
    pub fn new(emulator: &str, game_id: &str) -> Self {
        Self {
            emulator: emulator.to_string(),
            game_id: game_id.to_string(),
            game_name: game_id.to_string(),
            platform: String::new(),
            version_tag: None,
            emulator_data_path: None,
            artifacts: Vec::new(),
        }
    }

    /// Key combining emulator and game id, as used by the sync manifest.
    pub fn unique_key(&self) -> String {
        format!("{}:{}", self.emulator, self.game_id)
    }

    pub fn total_size(&self) -> u64 {
        self.artifacts.iter().map(|a| a.size).sum()
    }

    pub fn last_modified(&self) -> Option<DateTime<Local>> {
        self.artifacts.iter().filter_map(|a| a.modified).max()
    }

    /// True when `game_name` carries more than the raw id.
    pub fn has_display_name(&self) -> bool {
        !self.game_name.is_empty() && self.game_name != self.game_id
    }
}
