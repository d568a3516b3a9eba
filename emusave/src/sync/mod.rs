//! Folder-based sync between the local archive tree and a shared folder.
//!
//! The shared folder is kept consistent across machines by an external client
//! and holds `{sync_folder}/emulator-save-manager/` with the same layout as the
//! local archive tree. Only the newest archive of each side is compared:
//!
//! Archives are compared by [`hash_container`], so copies that differ only in
//! file timestamps or compression settings count as equal.
//!
//! * equal content: in sync, nothing to do
//! * the other side's newest archive is also present here: this side is ahead
//!   and its newest archive is copied over
//! * otherwise: diverged, reported as a [`ConflictRecord`] with no changes made

pub mod manifest;
pub mod result;

use chrono::Local;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use crate::archive::container::hash_container;
use crate::archive::store::ArchiveStore;
use crate::config::Config;
use crate::conflict::{ConflictDetector, ConflictRecord, ConflictScope, Resolution};
use crate::fs::metadata::copy_file_atomic;
use crate::hash::Digest;
use crate::models::archive::{Archive, SIDECAR_EXT};
use crate::utils::errors::{EngineError, Result};

pub use manifest::{SyncManifest, SyncManifestEntry, MANIFEST_FILE};
pub use result::{SyncResult, NOT_CONFIGURED};

/// Directory inside the sync folder that holds the shared archive tree.
pub const SYNC_ROOT_DIR: &str = "emulator-save-manager";

/// Sync state of one game.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    NotConfigured,
    /// No archive on either side
    Empty,
    LocalOnly,
    RemoteOnly,
    InSync,
    /// Local has archives the shared folder lacks; push proceeds
    LocalAhead,
    /// Shared folder has archives this machine lacks; pull proceeds
    RemoteAhead,
    /// Both sides changed independently
    Diverged,
}

impl SyncState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::NotConfigured => "not configured",
            SyncState::Empty => "empty",
            SyncState::LocalOnly => "local only",
            SyncState::RemoteOnly => "remote only",
            SyncState::InSync => "in sync",
            SyncState::LocalAhead => "local ahead",
            SyncState::RemoteAhead => "remote ahead",
            SyncState::Diverged => "diverged",
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct SyncManager {
    local: ArchiveStore,
    sync_folder: Option<PathBuf>,
    machine_id: String,
    detector: ConflictDetector,
}

impl SyncManager {
    pub fn new(config: &Config, local: ArchiveStore) -> Self {
        Self {
            local,
            sync_folder: config.sync.folder.clone(),
            machine_id: config.machine.id.clone(),
            detector: ConflictDetector::new(),
        }
    }

    /// True when a sync folder is configured and present on disk.
    pub fn is_configured(&self) -> bool {
        self.folder().is_some()
    }

    /// `{sync_folder}/emulator-save-manager`, when configured.
    pub fn sync_root(&self) -> Option<PathBuf> {
        self.folder().map(|f| f.join(SYNC_ROOT_DIR))
    }

    fn folder(&self) -> Option<&Path> {
        self.sync_folder
            .as_deref()
            .filter(|p| !p.as_os_str().is_empty() && p.exists())
    }

    fn remote(&self) -> Option<ArchiveStore> {
        self.sync_root().map(ArchiveStore::new)
    }

    /// Current manifest of the sync root; empty when not configured.
    pub fn manifest(&self) -> SyncManifest {
        match self.sync_root() {
            Some(root) => SyncManifest::load(&root.join(MANIFEST_FILE)),
            None => SyncManifest::default(),
        }
    }

    pub fn status(&self, emulator: &str, game_id: &str) -> SyncState {
        let Some(remote) = self.remote() else {
            return SyncState::NotConfigured;
        };
        match (
            self.local.latest(emulator, game_id),
            remote.latest(emulator, game_id),
        ) {
            (None, None) => SyncState::Empty,
            (Some(_), None) => SyncState::LocalOnly,
            (None, Some(_)) => SyncState::RemoteOnly,
            (Some(local), Some(shared)) => self.relation(&remote, &local, &shared),
        }
    }

    /// Copy the newest local archive of a game into the shared folder.
    pub fn push(&self, emulator: &str, game_id: &str) -> SyncResult {
        let Some(remote) = self.remote() else {
            return SyncResult::not_configured();
        };
        let mut result = SyncResult::default();

        let Some(local) = self.local.latest(emulator, game_id) else {
            info!(emulator = %emulator, game_id = %game_id, "No backups to push");
            return result;
        };

        let key = local.unique_key();
        let manifest = SyncManifest::load(&remote.root().join(MANIFEST_FILE));
        if let Some(warning) =
            version_mismatch(&key, local.sidecar.version_tag(), manifest.version_tag(&key))
        {
            result.version_warnings.push(warning);
        }

        if let Some(shared) = remote.latest(emulator, game_id) {
            match self.relation(&remote, &local, &shared) {
                SyncState::InSync => {
                    info!(emulator = %emulator, game_id = %game_id, "Push skipped, already in sync");
                    return result;
                }
                SyncState::RemoteAhead => {
                    info!(
                        emulator = %emulator,
                        game_id = %game_id,
                        "Push skipped, shared folder has newer archive {}",
                        shared.id
                    );
                    return result;
                }
                SyncState::Diverged => {
                    if let Some(conflict) = self.detect(&local, &shared) {
                        result.conflicts.push(conflict);
                        return result;
                    }
                }
                _ => {}
            }
        }

        match copy_archive(&local, &remote) {
            Ok(dest) => {
                result.pushed = 1;
                info!(
                    emulator = %emulator,
                    game_id = %game_id,
                    "Pushed backup {} to {}",
                    local.id,
                    dest.display()
                );
                let recorded = self.record_push(
                    &remote,
                    &local.emulator,
                    &local.game_id,
                    &dest,
                    &local.sidecar.version_tag,
                );
                if let Err(e) = recorded {
                    let msg = format!("Failed to update sync manifest for {}: {}", key, e);
                    error!("{}", msg);
                    result.errors.push(msg);
                }
            }
            Err(e) => {
                let msg = format!("Push failed for {}: {}", key, e);
                error!("{}", msg);
                result.errors.push(msg);
            }
        }
        result
    }

    /// Copy the newest shared archive of a game into the local tree.
    pub fn pull(&self, emulator: &str, game_id: &str) -> SyncResult {
        let Some(remote) = self.remote() else {
            return SyncResult::not_configured();
        };
        let mut result = SyncResult::default();

        let Some(shared) = remote.latest(emulator, game_id) else {
            return result;
        };

        if let Some(local) = self.local.latest(emulator, game_id) {
            if let Some(warning) = version_mismatch(
                &shared.unique_key(),
                local.sidecar.version_tag(),
                shared.sidecar.version_tag(),
            ) {
                result.version_warnings.push(warning);
            }

            match self.relation(&remote, &local, &shared) {
                SyncState::InSync => {
                    info!(emulator = %emulator, game_id = %game_id, "Pull skipped, already in sync");
                    return result;
                }
                SyncState::LocalAhead => {
                    info!(
                        emulator = %emulator,
                        game_id = %game_id,
                        "Pull skipped, local archive {} is newer",
                        local.id
                    );
                    return result;
                }
                SyncState::Diverged => {
                    if let Some(conflict) = self.detect(&local, &shared) {
                        result.conflicts.push(conflict);
                        return result;
                    }
                }
                _ => {}
            }
        }

        match copy_archive(&shared, &self.local) {
            Ok(dest) => {
                result.pulled = 1;
                info!(
                    emulator = %emulator,
                    game_id = %game_id,
                    "Pulled backup {} into {}",
                    shared.id,
                    dest.display()
                );
            }
            Err(e) => {
                let msg = format!("Pull failed for {}: {}", shared.unique_key(), e);
                error!("{}", msg);
                result.errors.push(msg);
            }
        }
        result
    }

    /// Push every local game, then pull every shared game with archives.
    ///
    /// Games that diverged on push are not pulled again.
    pub fn sync_all(&self) -> SyncResult {
        let Some(remote) = self.remote() else {
            return SyncResult::not_configured();
        };
        let mut total = SyncResult::default();

        for (emulator, game_id) in self.local.games() {
            total.merge(self.push(&emulator, &game_id));
        }

        for (emulator, game_id) in remote.games() {
            let key = format!("{}:{}", emulator, game_id);
            if total.conflicts.iter().any(|c| c.unique_key() == key) {
                continue;
            }
            if remote.latest(&emulator, &game_id).is_none() {
                continue;
            }
            total.merge(self.pull(&emulator, &game_id));
        }

        info!(
            "Sync complete: pushed {}, pulled {}, conflicts {}, errors {}, version warnings {}",
            total.pushed,
            total.pulled,
            total.conflicts.len(),
            total.errors.len(),
            total.version_warnings.len()
        );
        total
    }

    /// Re-run detection for a game, as needed to resolve it later.
    pub fn find_conflict(&self, emulator: &str, game_id: &str) -> Option<ConflictRecord> {
        let remote = self.remote()?;
        let local = self.local.latest(emulator, game_id)?;
        let shared = remote.latest(emulator, game_id)?;
        match self.relation(&remote, &local, &shared) {
            SyncState::Diverged => self.detect(&local, &shared),
            _ => None,
        }
    }

    /// Settle a conflict by replacing or duplicating archive pairs.
    ///
    /// Returns the errors encountered; empty on success. A later push or pull
    /// brings the game back in sync.
    pub fn apply_resolution(&self, record: &ConflictRecord, resolution: Resolution) -> Vec<String> {
        if !self.is_configured() {
            return vec![NOT_CONFIGURED.to_string()];
        }

        let outcome: Result<()> = match resolution {
            Resolution::UseLocal => copy_pair(record.local_path(), record.remote_path())
                .map_err(EngineError::from)
                .and_then(|()| self.record_use_local(record)),
            Resolution::UseRemote => {
                copy_pair(record.remote_path(), record.local_path()).map_err(EngineError::from)
            }
            Resolution::KeepBoth => keep_both_path(record)
                .and_then(|dest| copy_pair(record.remote_path(), &dest))
                .map_err(EngineError::from),
            Resolution::Skip => {
                info!("Conflict for {} skipped", record.unique_key());
                return Vec::new();
            }
        };

        match outcome {
            Ok(()) => {
                info!("Conflict resolved: {} for {}", resolution, record.unique_key());
                Vec::new()
            }
            Err(e) => {
                let msg = format!(
                    "Failed to apply {} for {}: {}",
                    resolution,
                    record.unique_key(),
                    e
                );
                error!("{}", msg);
                vec![msg]
            }
        }
    }

    /// Relation of the newest local archive to the newest shared one.
    fn relation(&self, remote: &ArchiveStore, local: &Archive, shared: &Archive) -> SyncState {
        let local_hash = hash_container(&local.container);
        let shared_hash = hash_container(&shared.container);
        if local_hash.matches(&shared_hash) {
            SyncState::InSync
        } else if holds_copy(&self.local, shared, &shared_hash) {
            SyncState::LocalAhead
        } else if holds_copy(remote, local, &local_hash) {
            SyncState::RemoteAhead
        } else {
            SyncState::Diverged
        }
    }

    fn detect(&self, local: &Archive, shared: &Archive) -> Option<ConflictRecord> {
        let scope = ConflictScope::new(
            &local.emulator,
            &local.game_id,
            shared.sidecar.source_machine().unwrap_or(""),
        );
        self.detector
            .detect_containers(&local.container, &shared.container, &scope)
    }

    /// Record that this machine's archive now sits at `dest` in the sync root.
    fn record_push(
        &self,
        remote: &ArchiveStore,
        emulator: &str,
        game_id: &str,
        dest: &Path,
        version_tag: &str,
    ) -> Result<()> {
        let manifest_path = remote.root().join(MANIFEST_FILE);
        let relative_path = dest
            .strip_prefix(remote.root())
            .map(|p| p.to_string_lossy().replace('\\', "/"))
            .unwrap_or_else(|_| dest.display().to_string());

        let mut manifest = SyncManifest::load(&manifest_path);
        manifest.upsert(SyncManifestEntry {
            game_id: game_id.to_string(),
            emulator: emulator.to_string(),
            last_sync_time: Local::now().to_rfc3339(),
            source_machine: self.machine_id.clone(),
            file_hash: hash_container(dest).as_str().to_string(),
            relative_path,
            version_tag: version_tag.to_string(),
        });
        manifest.save(&manifest_path)
    }

    /// Manifest update after the local pair replaced the remote one.
    fn record_use_local(&self, record: &ConflictRecord) -> Result<()> {
        let remote = self
            .remote()
            .ok_or_else(|| EngineError::Config(NOT_CONFIGURED.to_string()))?;
        let sidecar_path = record.local_path().with_extension(SIDECAR_EXT);
        let version_tag = if sidecar_path.is_file() {
            self.local.read_sidecar(&sidecar_path)?.version_tag
        } else {
            String::new()
        };
        self.record_push(
            &remote,
            record.emulator(),
            record.game_id(),
            record.remote_path(),
            &version_tag,
        )
    }
}

/// True when `store` has a container at `archive`'s identity with `digest` content.
fn holds_copy(store: &ArchiveStore, archive: &Archive, digest: &Digest) -> bool {
    let path = store.container_path(&archive.emulator, &archive.game_id, &archive.id);
    path.is_file() && hash_container(&path).matches(digest)
}

/// Copy an archive pair into `dest` under the same identity.
fn copy_archive(archive: &Archive, dest: &ArchiveStore) -> io::Result<PathBuf> {
    let container = dest.container_path(&archive.emulator, &archive.game_id, &archive.id);
    copy_pair(&archive.container, &container)?;
    Ok(container)
}

/// Copy a container and, when present, its sidecar. Container first, so a
/// sidecar never points at a missing payload.
fn copy_pair(src_container: &Path, dst_container: &Path) -> io::Result<()> {
    copy_file_atomic(src_container, dst_container)?;
    let src_sidecar = src_container.with_extension(SIDECAR_EXT);
    if src_sidecar.is_file() {
        copy_file_atomic(&src_sidecar, &dst_container.with_extension(SIDECAR_EXT))?;
    }
    Ok(())
}

/// Local alternate name for the remote copy: `{local_stem}_conflict_{machine}`.
fn keep_both_path(record: &ConflictRecord) -> io::Result<PathBuf> {
    let local = record.local_path();
    let (Some(dir), Some(stem), Some(ext)) = (
        local.parent(),
        local.file_stem().and_then(|s| s.to_str()),
        local.extension().and_then(|e| e.to_str()),
    ) else {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("Unexpected archive path {}", local.display()),
        ));
    };
    let machine = sanitize_machine(record.remote_machine().unwrap_or("remote"));
    Ok(dir.join(format!("{}_conflict_{}.{}", stem, machine, ext)))
}

fn sanitize_machine(machine: &str) -> String {
    machine
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Warning text when both tags are known and differ (case-insensitive).
fn version_mismatch(key: &str, local: Option<&str>, remote: Option<&str>) -> Option<String> {
    let (local, remote) = (local?.trim(), remote?.trim());
    if local.is_empty() || remote.is_empty() || local.eq_ignore_ascii_case(remote) {
        return None;
    }
    warn!(
        "Version tag mismatch for {}: local={} remote={} (different game revision?)",
        key, local, remote
    );
    Some(format!(
        "{}: local version {} differs from remote version {}",
        key, local, remote
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::container::{Compression, ContainerWriter};
    use crate::fs::metadata::set_modified_time;
    use crate::hash::hash_file;
    use crate::models::archive::{ArchiveId, Sidecar};
    use crate::utils::errors::Result;
    use chrono::{NaiveDate, NaiveDateTime};
    use std::fs;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    const EMU: &str = "PCSX2";
    const GAME: &str = "SLUS-21005";

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    struct Machine {
        store: ArchiveStore,
        sync: SyncManager,
    }

    fn machine(temp: &TempDir, name: &str, shared: &Path) -> Machine {
        let mut config = Config::for_machine(name, &temp.path().join(name));
        config.sync.folder = Some(shared.to_path_buf());
        let store = ArchiveStore::new(&config.backup.root);
        Machine {
            sync: SyncManager::new(&config, store.clone()),
            store,
        }
    }

    /// Write an archive holding one file with `payload`.
    fn put(m: &Machine, when: NaiveDateTime, payload: &[u8], tag: &str, temp: &TempDir) -> Result<ArchiveId> {
        put_game(m, GAME, when, payload, tag, temp, None)
    }

    /// [`put`] for any game, optionally pinning the source file's mtime.
    fn put_game(
        m: &Machine,
        game: &str,
        when: NaiveDateTime,
        payload: &[u8],
        tag: &str,
        temp: &TempDir,
        mtime: Option<SystemTime>,
    ) -> Result<ArchiveId> {
        let id = m.store.next_id(EMU, game, when)?;
        let src = temp.path().join(format!("src-{}-{}-{}", m.sync.machine_id, game, id.stem()));
        fs::write(&src, payload)?;
        if let Some(mtime) = mtime {
            set_modified_time(&src, mtime)?;
        }
        let mut writer =
            ContainerWriter::create(&m.store.container_path(EMU, game, &id), Compression::default())?;
        writer.add_file(&src, "memcard/Mcd001.ps2")?;
        writer.finish()?;
        let sidecar = Sidecar {
            game_id: game.to_string(),
            emulator: EMU.to_string(),
            version_tag: tag.to_string(),
            source_machine: m
                .store
                .root()
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default()
                .to_string(),
            ..Sidecar::default()
        };
        m.store
            .write_sidecar(&m.store.sidecar_path(EMU, game, &id), &sidecar)?;
        Ok(id)
    }

    fn setup() -> Result<(TempDir, PathBuf)> {
        let temp = TempDir::new()?;
        let shared = temp.path().join("OneDrive");
        fs::create_dir_all(&shared)?;
        Ok((temp, shared))
    }

    #[test]
    fn test_not_configured() -> Result<()> {
        let temp = TempDir::new()?;
        let config = Config::for_machine("desk", temp.path());
        let sync = SyncManager::new(&config, ArchiveStore::new(temp.path()));

        assert!(!sync.is_configured());
        assert_eq!(sync.push(EMU, GAME).errors, vec![NOT_CONFIGURED.to_string()]);
        assert_eq!(sync.pull(EMU, GAME).errors, vec![NOT_CONFIGURED.to_string()]);
        assert_eq!(sync.sync_all().errors, vec![NOT_CONFIGURED.to_string()]);
        assert_eq!(sync.status(EMU, GAME), SyncState::NotConfigured);
        assert!(sync.manifest().is_empty());
        Ok(())
    }

    #[test]
    fn test_push_is_idempotent_and_records_manifest() -> Result<()> {
        let (temp, shared) = setup()?;
        let desk = machine(&temp, "desk", &shared);
        let id = put(&desk, at(10, 0), b"card", "083F0E03", &temp)?;
        assert_eq!(desk.sync.status(EMU, GAME), SyncState::LocalOnly);

        let first = desk.sync.push(EMU, GAME);
        assert_eq!(first.pushed, 1);
        assert!(first.errors.is_empty());
        assert_eq!(desk.sync.status(EMU, GAME), SyncState::InSync);

        let second = desk.sync.push(EMU, GAME);
        assert!(second.is_noop());

        let root = desk.sync.sync_root().unwrap();
        assert!(root.join(EMU).join(GAME).join(id.container_name()).is_file());
        assert!(root.join(EMU).join(GAME).join(id.sidecar_name()).is_file());

        let manifest = desk.sync.manifest();
        let entry = manifest.get("PCSX2:SLUS-21005").unwrap();
        assert_eq!(entry.source_machine, "desk");
        assert_eq!(entry.version_tag, "083F0E03");
        assert_eq!(
            entry.relative_path,
            format!("PCSX2/SLUS-21005/{}", id.container_name())
        );
        assert_eq!(
            entry.file_hash,
            hash_container(&desk.store.container_path(EMU, GAME, &id)).as_str()
        );
        Ok(())
    }

    #[test]
    fn test_second_machine_conflict_leaves_remote_untouched() -> Result<()> {
        let (temp, shared) = setup()?;
        let desk = machine(&temp, "desk", &shared);
        let laptop = machine(&temp, "laptop", &shared);

        put(&desk, at(10, 0), b"desk progress", "", &temp)?;
        put(&laptop, at(11, 0), b"laptop progress", "", &temp)?;
        assert_eq!(desk.sync.push(EMU, GAME).pushed, 1);

        let remote = ArchiveStore::new(desk.sync.sync_root().unwrap());
        let before = hash_file(&remote.latest(EMU, GAME).unwrap().container);

        let result = laptop.sync.push(EMU, GAME);
        assert_eq!(result.pushed, 0);
        assert_eq!(result.conflicts.len(), 1);
        assert_eq!(result.conflicts[0].remote_machine(), Some("desk"));
        assert_eq!(laptop.sync.status(EMU, GAME), SyncState::Diverged);

        let listed = remote.list(EMU, GAME);
        assert_eq!(listed.len(), 1);
        assert!(hash_file(&listed[0].container).matches(&before));

        // Pull reports the same divergence instead of copying
        let pulled = laptop.sync.pull(EMU, GAME);
        assert_eq!(pulled.pulled, 0);
        assert_eq!(pulled.conflicts.len(), 1);
        assert!(laptop.sync.find_conflict(EMU, GAME).is_some());
        Ok(())
    }

    #[test]
    fn test_same_saves_with_different_mtimes_are_in_sync() -> Result<()> {
        let (temp, shared) = setup()?;
        let desk = machine(&temp, "desk", &shared);
        let laptop = machine(&temp, "laptop", &shared);
        let base = SystemTime::UNIX_EPOCH + Duration::from_secs(1_714_557_600);

        put_game(&desk, GAME, at(10, 0), b"zelda sram", "", &temp, Some(base))?;
        put_game(
            &laptop,
            GAME,
            at(11, 0),
            b"zelda sram",
            "",
            &temp,
            Some(base + Duration::from_secs(3600)),
        )?;

        assert_eq!(desk.sync.push(EMU, GAME).pushed, 1);
        assert_eq!(laptop.sync.status(EMU, GAME), SyncState::InSync);
        let pushed = laptop.sync.push(EMU, GAME);
        assert_eq!((pushed.pushed, pushed.conflicts.len()), (0, 0));
        assert!(laptop.sync.find_conflict(EMU, GAME).is_none());
        assert!(laptop.sync.sync_all().is_noop());
        Ok(())
    }

    #[test]
    fn test_fast_forward_both_directions() -> Result<()> {
        let (temp, shared) = setup()?;
        let desk = machine(&temp, "desk", &shared);
        let laptop = machine(&temp, "laptop", &shared);

        put(&desk, at(10, 0), b"v1", "", &temp)?;
        desk.sync.push(EMU, GAME);
        assert_eq!(laptop.sync.pull(EMU, GAME).pulled, 1);
        assert_eq!(laptop.sync.status(EMU, GAME), SyncState::InSync);

        // Laptop continues playing and pushes on top of the shared archive
        put(&laptop, at(12, 0), b"v2", "", &temp)?;
        assert_eq!(laptop.sync.status(EMU, GAME), SyncState::LocalAhead);
        assert_eq!(laptop.sync.pull(EMU, GAME).pulled, 0);
        assert_eq!(desk.sync.status(EMU, GAME), SyncState::InSync);

        let pushed = laptop.sync.push(EMU, GAME);
        assert_eq!(pushed.pushed, 1);
        assert!(pushed.conflicts.is_empty());

        assert_eq!(desk.sync.status(EMU, GAME), SyncState::RemoteAhead);
        assert!(desk.sync.push(EMU, GAME).is_noop());
        let pulled = desk.sync.pull(EMU, GAME);
        assert_eq!(pulled.pulled, 1);
        assert!(pulled.conflicts.is_empty());
        assert_eq!(desk.store.list(EMU, GAME).len(), 2);
        assert_eq!(desk.sync.status(EMU, GAME), SyncState::InSync);
        Ok(())
    }

    #[test]
    fn test_version_tag_warnings() -> Result<()> {
        let (temp, shared) = setup()?;
        let desk = machine(&temp, "desk", &shared);
        let laptop = machine(&temp, "laptop", &shared);

        put(&desk, at(10, 0), b"ntsc", "083F0E03", &temp)?;
        desk.sync.push(EMU, GAME);

        put(&laptop, at(9, 0), b"pal", "a1b2c3d4", &temp)?;
        let pushed = laptop.sync.push(EMU, GAME);
        assert_eq!(pushed.version_warnings.len(), 1);
        let pulled = laptop.sync.pull(EMU, GAME);
        assert_eq!(pulled.version_warnings.len(), 1);

        assert!(version_mismatch("k", Some("083f0e03"), Some("083F0E03")).is_none());
        assert!(version_mismatch("k", Some(""), Some("083F0E03")).is_none());
        assert!(version_mismatch("k", None, Some("083F0E03")).is_none());
        Ok(())
    }

    #[test]
    fn test_sync_all_pushes_and_pulls() -> Result<()> {
        let (temp, shared) = setup()?;
        let desk = machine(&temp, "desk", &shared);
        let laptop = machine(&temp, "laptop", &shared);

        put(&desk, at(10, 0), b"desk only", "", &temp)?;
        let first = desk.sync.sync_all();
        assert_eq!((first.pushed, first.pulled), (1, 0));

        let second = laptop.sync.sync_all();
        assert_eq!((second.pushed, second.pulled), (0, 1));
        assert!(second.conflicts.is_empty());

        assert!(desk.sync.sync_all().is_noop());
        assert!(laptop.sync.sync_all().is_noop());
        Ok(())
    }

    #[test]
    fn test_sync_all_continues_past_failing_game() -> Result<()> {
        let (temp, shared) = setup()?;
        let desk = machine(&temp, "desk", &shared);
        put_game(&desk, "SLUS-20312", at(10, 0), b"broken", "", &temp, None)?;
        put(&desk, at(10, 0), b"fine", "", &temp)?;

        // A file where the shared game directory should be
        let root = desk.sync.sync_root().unwrap();
        fs::create_dir_all(root.join(EMU))?;
        fs::write(root.join(EMU).join("SLUS-20312"), b"not a directory")?;

        let result = desk.sync.sync_all();
        assert_eq!(result.pushed, 1);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("PCSX2:SLUS-20312"));
        assert_eq!(desk.sync.status(EMU, GAME), SyncState::InSync);
        Ok(())
    }

    #[test]
    fn test_sync_all_reports_conflict_once() -> Result<()> {
        let (temp, shared) = setup()?;
        let desk = machine(&temp, "desk", &shared);
        let laptop = machine(&temp, "laptop", &shared);

        put(&desk, at(10, 0), b"desk", "", &temp)?;
        desk.sync.push(EMU, GAME);
        put(&laptop, at(11, 0), b"laptop", "", &temp)?;

        let result = laptop.sync.sync_all();
        assert_eq!(result.conflicts.len(), 1);
        assert_eq!((result.pushed, result.pulled), (0, 0));
        Ok(())
    }

    fn diverged() -> Result<(TempDir, Machine, Machine, ConflictRecord)> {
        let (temp, shared) = setup()?;
        let desk = machine(&temp, "desk", &shared);
        let laptop = machine(&temp, "laptop", &shared);
        put(&desk, at(10, 0), b"desk", "", &temp)?;
        desk.sync.push(EMU, GAME);
        put(&laptop, at(11, 0), b"laptop", "", &temp)?;
        let record = laptop.sync.find_conflict(EMU, GAME).unwrap();
        Ok((temp, desk, laptop, record))
    }

    #[test]
    fn test_resolve_use_local_then_in_sync() -> Result<()> {
        let (_temp, _desk, laptop, record) = diverged()?;
        assert!(laptop.sync.apply_resolution(&record, Resolution::UseLocal).is_empty());
        assert!(hash_container(record.remote_path()).matches(record.local_hash()));
        assert_eq!(laptop.sync.status(EMU, GAME), SyncState::InSync);
        Ok(())
    }

    #[test]
    fn test_resolve_use_local_updates_manifest() -> Result<()> {
        let (temp, shared) = setup()?;
        let desk = machine(&temp, "desk", &shared);
        let laptop = machine(&temp, "laptop", &shared);
        let desk_id = put(&desk, at(10, 0), b"desk", "AAAA", &temp)?;
        desk.sync.push(EMU, GAME);
        put(&laptop, at(11, 0), b"laptop", "BBBB", &temp)?;

        let record = laptop.sync.find_conflict(EMU, GAME).unwrap();
        assert!(laptop.sync.apply_resolution(&record, Resolution::UseLocal).is_empty());

        let manifest = laptop.sync.manifest();
        let entry = manifest.get("PCSX2:SLUS-21005").unwrap();
        assert_eq!(entry.source_machine, "laptop");
        assert_eq!(entry.version_tag, "BBBB");
        assert_eq!(
            entry.relative_path,
            format!("PCSX2/SLUS-21005/{}", desk_id.container_name())
        );
        assert_eq!(entry.file_hash, record.local_hash().as_str());

        assert!(laptop.sync.push(EMU, GAME).is_noop());
        Ok(())
    }

    #[test]
    fn test_resolve_use_remote_then_in_sync() -> Result<()> {
        let (_temp, _desk, laptop, record) = diverged()?;
        assert!(laptop.sync.apply_resolution(&record, Resolution::UseRemote).is_empty());
        assert!(hash_container(record.local_path()).matches(record.remote_hash()));
        assert_eq!(laptop.sync.status(EMU, GAME), SyncState::InSync);
        Ok(())
    }

    #[test]
    fn test_resolve_keep_both_adds_conflict_copy() -> Result<()> {
        let (_temp, _desk, laptop, record) = diverged()?;
        assert!(laptop.sync.apply_resolution(&record, Resolution::KeepBoth).is_empty());

        let archives = laptop.store.list(EMU, GAME);
        let stems: Vec<_> = archives.iter().map(|a| a.id.stem()).collect();
        assert_eq!(
            stems,
            vec!["2024-05-01_11-00_conflict_desk", "2024-05-01_11-00"]
        );
        // Original local archive is untouched
        assert!(hash_container(&archives[1].container).matches(record.local_hash()));
        assert!(hash_container(&archives[0].container).matches(record.remote_hash()));
        assert_eq!(laptop.sync.status(EMU, GAME), SyncState::InSync);
        Ok(())
    }

    #[test]
    fn test_resolve_skip_changes_nothing() -> Result<()> {
        let (_temp, _desk, laptop, record) = diverged()?;
        assert!(laptop.sync.apply_resolution(&record, Resolution::Skip).is_empty());
        assert_eq!(laptop.sync.status(EMU, GAME), SyncState::Diverged);
        Ok(())
    }
}
