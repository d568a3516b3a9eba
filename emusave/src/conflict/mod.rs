//! Divergence detection between a local and a remote copy of a game's saves.
//!
//! A [`ConflictRecord`] can only be obtained from [`ConflictDetector::detect`],
//! which builds one only when both sides exist and their content differs.

use chrono::{DateTime, Local};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info};

use crate::archive::container::hash_container;
use crate::fs::metadata::path_modified_time;
use crate::hash::{hash_path, Digest};

/// Game identity and remote origin a comparison is made for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConflictScope {
    pub emulator: String,
    pub game_id: String,
    /// Machine that produced the remote copy, empty if unknown
    pub remote_machine: String,
}

impl ConflictScope {
    pub fn new(emulator: &str, game_id: &str, remote_machine: &str) -> Self {
        Self {
            emulator: emulator.to_string(),
            game_id: game_id.to_string(),
            remote_machine: remote_machine.to_string(),
        }
    }
}

/// Two copies of the same game whose content differs.
#[derive(Debug, Clone, PartialEq)]
pub struct ConflictRecord {
    scope: ConflictScope,
    local_path: PathBuf,
    remote_path: PathBuf,
    local_mtime: Option<DateTime<Local>>,
    remote_mtime: Option<DateTime<Local>>,
    local_hash: Digest,
    remote_hash: Digest,
}

impl ConflictRecord {
    pub fn emulator(&self) -> &str {
        &self.scope.emulator
    }

    pub fn game_id(&self) -> &str {
        &self.scope.game_id
    }

    pub fn unique_key(&self) -> String {
        format!("{}:{}", self.scope.emulator, self.scope.game_id)
    }

    pub fn remote_machine(&self) -> Option<&str> {
        let machine = self.scope.remote_machine.as_str();
        (!machine.is_empty()).then_some(machine)
    }

    pub fn local_path(&self) -> &Path {
        &self.local_path
    }

    pub fn remote_path(&self) -> &Path {
        &self.remote_path
    }

    pub fn local_mtime(&self) -> Option<DateTime<Local>> {
        self.local_mtime
    }

    pub fn remote_mtime(&self) -> Option<DateTime<Local>> {
        self.remote_mtime
    }

    pub fn local_hash(&self) -> &Digest {
        &self.local_hash
    }

    pub fn remote_hash(&self) -> &Digest {
        &self.remote_hash
    }
}

impl fmt::Display for ConflictRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} diverged: local {} ({}) vs remote {} ({}) from {}",
            self.unique_key(),
            self.local_path.display(),
            format_mtime(self.local_mtime),
            self.remote_path.display(),
            format_mtime(self.remote_mtime),
            self.remote_machine().unwrap_or("unknown machine")
        )
    }
}

fn format_mtime(time: Option<DateTime<Local>>) -> String {
    time.map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "no time".to_string())
}

/// How a conflict is settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Local archive replaces the remote one
    UseLocal,
    /// Remote archive replaces the local one
    UseRemote,
    /// Remote archive is added locally under an alternate name
    KeepBoth,
    /// Leave both sides untouched
    Skip,
}

impl Resolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::UseLocal => "use_local",
            Resolution::UseRemote => "use_remote",
            Resolution::KeepBoth => "keep_both",
            Resolution::Skip => "skip",
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "use_local" => Ok(Resolution::UseLocal),
            "use_remote" => Ok(Resolution::UseRemote),
            "keep_both" => Ok(Resolution::KeepBoth),
            "skip" => Ok(Resolution::Skip),
            other => Err(format!("Unknown resolution: {}", other)),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ConflictDetector;

impl ConflictDetector {
    pub fn new() -> Self {
        Self
    }

    /// Compare two files or two directory trees.
    ///
    /// None if either side is missing or both hash equal. An unreadable side
    /// hashes as unknown and therefore always differs.
    pub fn detect(&self, local: &Path, remote: &Path, scope: &ConflictScope) -> Option<ConflictRecord> {
        self.compare(local, remote, scope, hash_path)
    }

    /// [`detect`](Self::detect) for two archive containers, compared by
    /// entry names and contents only.
    pub fn detect_containers(
        &self,
        local: &Path,
        remote: &Path,
        scope: &ConflictScope,
    ) -> Option<ConflictRecord> {
        self.compare(local, remote, scope, hash_container)
    }

    fn compare(
        &self,
        local: &Path,
        remote: &Path,
        scope: &ConflictScope,
        hash: fn(&Path) -> Digest,
    ) -> Option<ConflictRecord> {
        if !local.exists() || !remote.exists() {
            debug!(
                "No conflict check for {}:{}: a side is missing",
                scope.emulator, scope.game_id
            );
            return None;
        }

        let local_hash = hash(local);
        let remote_hash = hash(remote);
        if local_hash.matches(&remote_hash) {
            return None;
        }

        let record = ConflictRecord {
            scope: scope.clone(),
            local_path: local.to_path_buf(),
            remote_path: remote.to_path_buf(),
            local_mtime: path_modified_time(local),
            remote_mtime: path_modified_time(remote),
            local_hash,
            remote_hash,
        };
        info!("Conflict detected: {}", record);
        Some(record)
    }

    /// Strictly newer side wins; equal or unknown times need a manual decision.
    pub fn auto_resolve(&self, record: &ConflictRecord) -> Resolution {
        match (record.local_mtime, record.remote_mtime) {
            (Some(local), Some(remote)) if local > remote => Resolution::UseLocal,
            (Some(local), Some(remote)) if remote > local => Resolution::UseRemote,
            _ => Resolution::Skip,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::metadata::set_modified_time;
    use std::fs;
    use std::io;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    fn scope() -> ConflictScope {
        ConflictScope::new("PCSX2", "SLUS-21005", "laptop")
    }

    fn at(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
    }

    #[test]
    fn test_identical_content_never_conflicts() -> io::Result<()> {
        let temp_dir = TempDir::new()?;
        let local = temp_dir.path().join("local.zip");
        let remote = temp_dir.path().join("remote.zip");
        fs::write(&local, b"same bytes")?;
        fs::write(&remote, b"same bytes")?;
        set_modified_time(&remote, at(1_000))?;

        assert!(ConflictDetector::new().detect(&local, &remote, &scope()).is_none());
        Ok(())
    }

    #[test]
    fn test_missing_side_is_not_a_conflict() -> io::Result<()> {
        let temp_dir = TempDir::new()?;
        let local = temp_dir.path().join("local.zip");
        fs::write(&local, b"bytes")?;

        let detector = ConflictDetector::new();
        assert!(detector
            .detect(&local, &temp_dir.path().join("gone.zip"), &scope())
            .is_none());
        assert!(detector
            .detect(&temp_dir.path().join("gone.zip"), &local, &scope())
            .is_none());
        Ok(())
    }

    #[test]
    fn test_diverged_files_conflict_and_newer_wins() -> io::Result<()> {
        let temp_dir = TempDir::new()?;
        let local = temp_dir.path().join("local.zip");
        let remote = temp_dir.path().join("remote.zip");
        fs::write(&local, b"local progress")?;
        fs::write(&remote, b"remote progress")?;
        set_modified_time(&local, at(2_000_000))?;
        set_modified_time(&remote, at(1_000_000))?;

        let detector = ConflictDetector::new();
        let record = detector.detect(&local, &remote, &scope()).unwrap();
        assert_eq!(record.unique_key(), "PCSX2:SLUS-21005");
        assert_eq!(record.remote_machine(), Some("laptop"));
        assert_ne!(record.local_hash(), record.remote_hash());
        assert_eq!(detector.auto_resolve(&record), Resolution::UseLocal);

        set_modified_time(&remote, at(3_000_000))?;
        let record = detector.detect(&local, &remote, &scope()).unwrap();
        assert_eq!(detector.auto_resolve(&record), Resolution::UseRemote);

        set_modified_time(&remote, at(2_000_000))?;
        let record = detector.detect(&local, &remote, &scope()).unwrap();
        assert_eq!(detector.auto_resolve(&record), Resolution::Skip);
        Ok(())
    }

    #[test]
    fn test_directories_compare_by_tree_hash() -> io::Result<()> {
        let temp_dir = TempDir::new()?;
        let local = temp_dir.path().join("local");
        let remote = temp_dir.path().join("remote");
        for dir in [&local, &remote] {
            fs::create_dir_all(dir.join("BASLUS-21005"))?;
            fs::write(dir.join("BASLUS-21005/data"), b"slot")?;
        }

        let detector = ConflictDetector::new();
        assert!(detector.detect(&local, &remote, &scope()).is_none());

        fs::write(remote.join("BASLUS-21005/data"), b"other slot")?;
        set_modified_time(&remote.join("BASLUS-21005/data"), at(5_000_000))?;
        let record = detector.detect(&local, &remote, &scope()).unwrap();
        assert_eq!(record.remote_mtime().map(SystemTime::from), Some(at(5_000_000)));
        Ok(())
    }

    #[test]
    fn test_containers_with_same_entries_do_not_conflict() -> crate::utils::errors::Result<()> {
        use crate::archive::container::{Compression, ContainerWriter};

        let temp_dir = TempDir::new()?;
        let pack = |name: &str, payload: &[u8], secs: u64| -> crate::utils::errors::Result<PathBuf> {
            let src = temp_dir.path().join(format!("{}.srm", name));
            fs::write(&src, payload)?;
            set_modified_time(&src, at(secs))?;
            let target = temp_dir.path().join(format!("{}.zip", name));
            let mut writer = ContainerWriter::create(&target, Compression::default())?;
            writer.add_file(&src, "battery/zelda.srm")?;
            writer.finish()?;
            Ok(target)
        };

        let local = pack("local", b"sram", 1_000_000)?;
        let remote = pack("remote", b"sram", 1_003_600)?;
        let detector = ConflictDetector::new();
        assert!(detector.detect_containers(&local, &remote, &scope()).is_none());

        let changed = pack("changed", b"new sram", 1_003_600)?;
        let record = detector
            .detect_containers(&local, &changed, &scope())
            .unwrap();
        assert!(!record.local_hash().matches(record.remote_hash()));
        Ok(())
    }

    #[test]
    fn test_resolution_parse() {
        assert_eq!("use-local".parse::<Resolution>(), Ok(Resolution::UseLocal));
        assert_eq!("KEEP_BOTH".parse::<Resolution>(), Ok(Resolution::KeepBoth));
        assert!("merge".parse::<Resolution>().is_err());
        assert_eq!(Resolution::UseRemote.to_string(), "use_remote");
    }
}
