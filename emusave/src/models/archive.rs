//! Archive identity and sidecar metadata.
//!
//! An archive is a `{stem}.zip` container plus a `{stem}.json` sidecar stored
//! under `{root}/{emulator}/{game_id}/`. The stem encodes the creation time
//! truncated to the minute, optionally followed by a disambiguating suffix.

use chrono::{Local, NaiveDateTime, TimeZone, Timelike};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::path::PathBuf;

use super::save_record::SaveKind;

/// Timestamp format of archive stems.
pub const STEM_FORMAT: &str = "%Y-%m-%d_%H-%M";

const STEM_TIMESTAMP_LEN: usize = 16;

/// Container file extension.
pub const CONTAINER_EXT: &str = "zip";

/// Sidecar file extension.
pub const SIDECAR_EXT: &str = "json";

/// Identity of one archive inside a game directory.
///
/// Suffix is empty for the first archive of a minute, `_01`..`_99` for
/// collisions, or any foreign suffix such as `_conflict_<machine>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArchiveId {
    pub timestamp: NaiveDateTime,
    pub suffix: String,
}

impl ArchiveId {
    pub fn new(timestamp: NaiveDateTime) -> Self {
        Self {
            timestamp: truncate_to_minute(timestamp),
            suffix: String::new(),
        }
    }

    /// Collision variant number `n` (1-based) of the same minute.
    pub fn with_counter(timestamp: NaiveDateTime, n: u32) -> Self {
        Self {
            timestamp: truncate_to_minute(timestamp),
            suffix: format!("_{:02}", n),
        }
    }

    /// Parse a file stem. Returns None when it does not start with a timestamp.
    pub fn parse(stem: &str) -> Option<Self> {
        let ts_part = stem.get(..STEM_TIMESTAMP_LEN)?;
        let timestamp = NaiveDateTime::parse_from_str(ts_part, STEM_FORMAT).ok()?;
        Some(Self {
            timestamp,
            suffix: stem[STEM_TIMESTAMP_LEN..].to_string(),
        })
    }

    pub fn stem(&self) -> String {
        format!("{}{}", self.timestamp.format(STEM_FORMAT), self.suffix)
    }

    pub fn container_name(&self) -> String {
        format!("{}.{}", self.stem(), CONTAINER_EXT)
    }

    pub fn sidecar_name(&self) -> String {
        format!("{}.{}", self.stem(), SIDECAR_EXT)
    }

    /// Stem time shown in this machine's timezone, e.g. `2024/05/01 21:30`.
    pub fn display_time(&self) -> String {
        Local
            .from_utc_datetime(&self.timestamp)
            .format("%Y/%m/%d %H:%M")
            .to_string()
    }
}

impl Ord for ArchiveId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.timestamp
            .cmp(&other.timestamp)
            .then_with(|| self.suffix.cmp(&other.suffix))
    }
}

impl PartialOrd for ArchiveId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ArchiveId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.stem())
    }
}

fn truncate_to_minute(ts: NaiveDateTime) -> NaiveDateTime {
    ts.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(ts)
}

/// One artifact recorded in a sidecar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactEntry {
    /// Portable source path (`${DOCUMENTS}/...`, `${EMU_DATA}/...` or absolute)
    pub source: String,

    #[serde(rename = "type")]
    pub kind: SaveKind,

    /// Path inside the container, `/`-separated
    pub container_path: String,

    #[serde(default)]
    pub is_dir: bool,
}

/// Sidecar metadata, serialized as `{stem}.json` next to each container.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Sidecar {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub game_id: String,
    #[serde(default)]
    pub emulator: String,
    #[serde(default)]
    pub platform: String,
    #[serde(default)]
    pub version_tag: String,
    #[serde(default)]
    pub source_machine: String,
    /// Portable emulator data directory at backup time, empty if unknown
    #[serde(default)]
    pub emulator_data_path: String,
    #[serde(default)]
    pub is_pinned: bool,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub backup_paths: Vec<ArtifactEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default)]
    pub total_size: u64,
}

impl Sidecar {
    pub fn version_tag(&self) -> Option<&str> {
        non_empty(&self.version_tag)
    }

    pub fn emulator_data_path(&self) -> Option<&str> {
        non_empty(&self.emulator_data_path)
    }

    pub fn source_machine(&self) -> Option<&str> {
        non_empty(&self.source_machine)
    }
}

fn non_empty(s: &str) -> Option<&str> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

/// A stored archive as seen by a listing.
#[derive(Debug, Clone)]
pub struct Archive {
    pub emulator: String,
    pub game_id: String,
    pub id: ArchiveId,
    pub container: PathBuf,
    pub sidecar_path: PathBuf,
    pub sidecar: Sidecar,
    /// Positional version, oldest = 1. Recomputed on every listing.
    pub version: u32,
}

impl Archive {
    pub fn is_pinned(&self) -> bool {
        self.sidecar.is_pinned
    }

    pub fn label(&self) -> &str {
        &self.sidecar.label
    }

    pub fn unique_key(&self) -> String {
        format!("{}:{}", self.emulator, self.game_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn test_stem_truncates_to_minute() {
        let id = ArchiveId::new(at(21, 30, 59));
        assert_eq!(id.stem(), "2024-05-01_21-30");
        assert_eq!(id.container_name(), "2024-05-01_21-30.zip");
        assert_eq!(ArchiveId::parse("2024-05-01_21-30"), Some(id));
    }

    #[test]
    fn test_collision_suffix_orders_after_base() {
        let base = ArchiveId::new(at(21, 30, 0));
        let second = ArchiveId::with_counter(at(21, 30, 10), 1);
        let next_minute = ArchiveId::new(at(21, 31, 0));

        assert_eq!(second.stem(), "2024-05-01_21-30_01");
        assert!(base < second);
        assert!(second < next_minute);
        // Lexicographic order of stems agrees with identity order
        assert!(base.stem() < second.stem());
        assert!(second.stem() < next_minute.stem());
    }

    #[test]
    fn test_parse_keeps_foreign_suffix() {
        let id = ArchiveId::parse("2024-05-01_21-30_conflict_desk").unwrap();
        assert_eq!(id.suffix, "_conflict_desk");
        assert_eq!(id.stem(), "2024-05-01_21-30_conflict_desk");
        assert!(ArchiveId::parse("notes").is_none());
        assert!(ArchiveId::parse("2024-13-01_21-30").is_none());
    }

    #[test]
    fn test_sidecar_tolerates_missing_fields() {
        let sidecar: Sidecar =
            serde_json::from_str(r#"{"title": "FFX", "game_id": "SLUS-21005"}"#).unwrap();
        assert_eq!(sidecar.title, "FFX");
        assert!(!sidecar.is_pinned);
        assert!(sidecar.version_tag().is_none());
        assert!(sidecar.backup_paths.is_empty());
    }
}
