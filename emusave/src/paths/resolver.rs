//! Bidirectional mapping between machine paths and portable placeholders.
//!
//! Portable strings look like `${DOCUMENTS}/PCSX2/memcards/Mcd001.ps2`. They are
//! what sidecars persist, so an archive made on one machine restores into the
//! matching folder of another machine even when that folder lives elsewhere.

use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::config::PathsConfig;

/// Placeholder tokens of the portable path grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Placeholder {
    /// Emulator data directory, resolved per restore
    EmuData,
    Documents,
    AppData,
    LocalAppData,
    Home,
}

impl Placeholder {
    /// Tie-break order for roots of equal length: most specific first.
    const ALL: [Placeholder; 5] = [
        Placeholder::EmuData,
        Placeholder::Documents,
        Placeholder::AppData,
        Placeholder::LocalAppData,
        Placeholder::Home,
    ];

    pub fn token(&self) -> &'static str {
        match self {
            Placeholder::EmuData => "${EMU_DATA}",
            Placeholder::Documents => "${DOCUMENTS}",
            Placeholder::AppData => "${APPDATA}",
            Placeholder::LocalAppData => "${LOCALAPPDATA}",
            Placeholder::Home => "${HOME}",
        }
    }

    /// Split `portable` into its leading placeholder and the remaining path.
    pub fn split(portable: &str) -> Option<(Placeholder, &str)> {
        Self::ALL.iter().find_map(|p| {
            let rest = portable.strip_prefix(p.token())?;
            if rest.is_empty() || rest.starts_with('/') || rest.starts_with('\\') {
                Some((*p, rest.trim_start_matches(['/', '\\'])))
            } else {
                None
            }
        })
    }
}

impl fmt::Display for Placeholder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// The generic per-user roots of the current machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnownRoots {
    pub documents: PathBuf,
    pub home: PathBuf,
    /// Roaming application data (`%APPDATA%`, `~/.config`)
    pub appdata: PathBuf,
    /// Local application data (`%LOCALAPPDATA%`, `~/.local/share`)
    pub localappdata: PathBuf,
}

impl KnownRoots {
    /// Look the roots up from the operating system.
    ///
    /// `dirs::document_dir` honours a relocated Documents folder on Windows.
    pub fn detect() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/"));
        let documents = dirs::document_dir().unwrap_or_else(|| home.join("Documents"));
        let appdata = dirs::config_dir().unwrap_or_else(|| home.clone());
        let localappdata = dirs::data_local_dir().unwrap_or_else(|| home.clone());

        let roots = Self {
            documents,
            home,
            appdata,
            localappdata,
        };
        debug!(?roots, "Resolved portable path roots");
        roots
    }

    /// Detected roots with any configured override applied.
    pub fn from_config(paths: &PathsConfig) -> Self {
        let detected = Self::detect();
        Self {
            documents: paths.documents.clone().unwrap_or(detected.documents),
            home: paths.home.clone().unwrap_or(detected.home),
            appdata: paths.appdata.clone().unwrap_or(detected.appdata),
            localappdata: paths.localappdata.clone().unwrap_or(detected.localappdata),
        }
    }

    fn get(&self, placeholder: Placeholder) -> Option<&Path> {
        match placeholder {
            Placeholder::EmuData => None,
            Placeholder::Documents => Some(&self.documents),
            Placeholder::AppData => Some(&self.appdata),
            Placeholder::LocalAppData => Some(&self.localappdata),
            Placeholder::Home => Some(&self.home),
        }
    }
}

/// Path portability for one machine.
///
/// The root table is built once and kept sorted longest-first, so that a
/// specific root such as Documents wins over Home, which is its prefix.
#[derive(Debug, Clone)]
pub struct PathResolver {
    roots: KnownRoots,
    table: Vec<(Placeholder, String)>,
}

impl PathResolver {
    pub fn new(roots: KnownRoots) -> Self {
        let mut table: Vec<(Placeholder, String)> = Placeholder::ALL
            .iter()
            .filter_map(|p| roots.get(*p).map(|r| (*p, normalize(r))))
            .filter(|(_, r)| !r.is_empty())
            .collect();
        // Stable sort keeps the tie-break order of Placeholder::ALL
        table.sort_by(|a, b| b.1.len().cmp(&a.1.len()));
        Self { roots, table }
    }

    pub fn roots(&self) -> &KnownRoots {
        &self.roots
    }

    /// Replace the longest matching known root of `path` with its placeholder.
    ///
    /// Paths outside every root come back normalised but otherwise unchanged.
    pub fn to_portable(&self, path: &Path) -> String {
        self.to_portable_with(path, None)
    }

    /// Like [`to_portable`](Self::to_portable), with the emulator data
    /// directory taking part in the match as `${EMU_DATA}`.
    pub fn to_portable_with(&self, path: &Path, emu_data: Option<&Path>) -> String {
        let abs = normalize(path);
        let emu_root = emu_data.map(normalize).filter(|r| !r.is_empty());

        let mut best: Option<(Placeholder, &str)> = None;
        let candidates = emu_root
            .as_deref()
            .map(|r| (Placeholder::EmuData, r))
            .into_iter()
            .chain(self.table.iter().map(|(p, r)| (*p, r.as_str())));

        for (placeholder, root) in candidates {
            if !has_prefix_ignore_case(&abs, root) {
                continue;
            }
            match best {
                Some((_, current)) if current.len() >= root.len() => {}
                _ => best = Some((placeholder, root)),
            }
        }

        match best {
            Some((placeholder, root)) => {
                let rest = abs[root.len()..].trim_start_matches('/');
                if rest.is_empty() {
                    placeholder.token().to_string()
                } else {
                    format!("{}/{}", placeholder.token(), rest)
                }
            }
            None => abs,
        }
    }

    /// Expand a portable string against the current machine.
    ///
    /// `${EMU_DATA}` needs `emu_data`; without it the string is returned as a
    /// path unchanged. Strings without a known placeholder are taken as absolute.
    pub fn resolve(&self, portable: &str, emu_data: Option<&Path>) -> PathBuf {
        match Placeholder::split(portable) {
            Some((Placeholder::EmuData, rest)) => match emu_data {
                Some(root) => join_normalized(&normalize(root), rest),
                None => PathBuf::from(portable),
            },
            Some((placeholder, rest)) => match self.roots.get(placeholder) {
                Some(root) => join_normalized(&normalize(root), rest),
                None => PathBuf::from(portable),
            },
            None => PathBuf::from(portable),
        }
    }

    /// Two-tier resolution used by restore.
    ///
    /// `${EMU_DATA}` is taken from the live `detected` directory when available,
    /// else from the `stored` (possibly portable) value recorded at backup time.
    /// Returns None when `${EMU_DATA}` cannot be resolved by either.
    pub fn resolve_with(
        &self,
        portable: &str,
        detected: Option<&Path>,
        stored: Option<&str>,
    ) -> Option<PathBuf> {
        match Placeholder::split(portable) {
            Some((Placeholder::EmuData, _)) => {
                let root = match detected {
                    Some(live) => live.to_path_buf(),
                    None => {
                        let stored = stored?;
                        if matches!(Placeholder::split(stored), Some((Placeholder::EmuData, _))) {
                            return None;
                        }
                        self.resolve(stored, None)
                    }
                };
                Some(self.resolve(portable, Some(&root)))
            }
            _ => Some(self.resolve(portable, None)),
        }
    }

    /// True when `s` starts with a recognised placeholder.
    pub fn is_portable(s: &str) -> bool {
        Placeholder::split(s).is_some()
    }
}

/// Forward-slash form of a path without a trailing separator.
fn normalize(path: &Path) -> String {
    let s = path.to_string_lossy().replace('\\', "/");
    let trimmed = s.trim_end_matches('/');
    if trimmed.is_empty() && s.starts_with('/') {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

fn join_normalized(root: &str, rest: &str) -> PathBuf {
    if rest.is_empty() {
        PathBuf::from(root)
    } else if root.ends_with('/') {
        PathBuf::from(format!("{}{}", root, rest.replace('\\', "/")))
    } else {
        PathBuf::from(format!("{}/{}", root, rest.replace('\\', "/")))
    }
}

/// Case-insensitive prefix test on whole path components.
fn has_prefix_ignore_case(path: &str, root: &str) -> bool {
    if root == "/" {
        return path.starts_with('/');
    }
    if path.len() < root.len() || !path.is_char_boundary(root.len()) {
        return false;
    }
    let (head, tail) = path.split_at(root.len());
    head.to_lowercase() == root.to_lowercase() && (tail.is_empty() || tail.starts_with('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn windows_roots() -> KnownRoots {
        KnownRoots {
            documents: PathBuf::from("C:/Users/alice/Documents"),
            home: PathBuf::from("C:/Users/alice"),
            appdata: PathBuf::from("C:/Users/alice/AppData/Roaming"),
            localappdata: PathBuf::from("C:/Users/alice/AppData/Local"),
        }
    }

    #[test]
    fn test_documents_wins_over_home() {
        let resolver = PathResolver::new(windows_roots());
        let portable =
            resolver.to_portable(Path::new("C:/Users/alice/Documents/PCSX2/memcards/x.ps2"));
        assert_eq!(portable, "${DOCUMENTS}/PCSX2/memcards/x.ps2");

        let other = PathResolver::new(KnownRoots {
            documents: PathBuf::from("D:/Docs"),
            ..windows_roots()
        });
        assert_eq!(
            other.resolve(&portable, None),
            PathBuf::from("D:/Docs/PCSX2/memcards/x.ps2")
        );
    }

    #[test]
    fn test_case_insensitive_and_backslashes() {
        let resolver = PathResolver::new(windows_roots());
        let portable =
            resolver.to_portable(Path::new(r"c:\users\ALICE\AppData\Local\melonDS\game.sav"));
        assert_eq!(portable, "${LOCALAPPDATA}/melonDS/game.sav");
    }

    #[test]
    fn test_component_boundary_required() {
        let resolver = PathResolver::new(windows_roots());
        // "alice2" shares a string prefix with "alice" but is a different folder
        let portable = resolver.to_portable(Path::new("C:/Users/alice2/save.srm"));
        assert_eq!(portable, "C:/Users/alice2/save.srm");
    }

    #[test]
    fn test_root_itself_maps_to_bare_token() {
        let resolver = PathResolver::new(windows_roots());
        assert_eq!(resolver.to_portable(Path::new("C:/Users/alice/")), "${HOME}");
        assert_eq!(
            resolver.resolve("${HOME}", None),
            PathBuf::from("C:/Users/alice")
        );
    }

    #[test]
    fn test_round_trip_every_root() {
        let roots = windows_roots();
        let resolver = PathResolver::new(roots.clone());
        for root in [&roots.documents, &roots.home, &roots.appdata, &roots.localappdata] {
            for suffix in ["a.sav", "PCSX2/memcards/Mcd001.ps2", "deep/er/dir/x"] {
                let original = PathBuf::from(format!("{}/{}", root.display(), suffix));
                let portable = resolver.to_portable(&original);
                assert!(PathResolver::is_portable(&portable), "{portable}");
                assert_eq!(resolver.resolve(&portable, None), original);
            }
        }
    }

    #[test]
    fn test_emu_data_is_most_specific() {
        let resolver = PathResolver::new(windows_roots());
        let emu = Path::new("C:/Users/alice/Documents/PCSX2");
        let portable = resolver.to_portable_with(
            Path::new("C:/Users/alice/Documents/PCSX2/memcards/x.ps2"),
            Some(emu),
        );
        assert_eq!(portable, "${EMU_DATA}/memcards/x.ps2");

        // A portable install on another drive
        let restored = resolver.resolve(&portable, Some(Path::new("E:/Portable/PCSX2")));
        assert_eq!(restored, PathBuf::from("E:/Portable/PCSX2/memcards/x.ps2"));
    }

    #[test]
    fn test_two_tier_emu_data_resolution() {
        let resolver = PathResolver::new(windows_roots());
        let live = Path::new("F:/Emu/PCSX2");

        assert_eq!(
            resolver.resolve_with("${EMU_DATA}/sstates/a.p2s", Some(live), Some("${DOCUMENTS}/PCSX2")),
            Some(PathBuf::from("F:/Emu/PCSX2/sstates/a.p2s"))
        );
        assert_eq!(
            resolver.resolve_with("${EMU_DATA}/sstates/a.p2s", None, Some("${DOCUMENTS}/PCSX2")),
            Some(PathBuf::from("C:/Users/alice/Documents/PCSX2/sstates/a.p2s"))
        );
        assert_eq!(resolver.resolve_with("${EMU_DATA}/sstates/a.p2s", None, None), None);
    }

    #[test]
    fn test_unmatched_and_unknown_tokens_pass_through() {
        let resolver = PathResolver::new(windows_roots());
        assert_eq!(resolver.to_portable(Path::new("/mnt/games/x.srm")), "/mnt/games/x.srm");
        assert_eq!(
            resolver.resolve("${UNKNOWN}/x", None),
            PathBuf::from("${UNKNOWN}/x")
        );
        assert!(!PathResolver::is_portable("${HOMEWARD}/x"));
    }
}
