//! Outcome of a sync operation.

use crate::conflict::ConflictRecord;

pub const NOT_CONFIGURED: &str = "Sync folder not configured";

#[derive(Debug, Clone, Default)]
pub struct SyncResult {
    pub pushed: usize,
    pub pulled: usize,
    /// Diverged games; nothing was copied for them
    pub conflicts: Vec<ConflictRecord>,
    pub errors: Vec<String>,
    /// Version tag mismatches between the two sides (different disc/ROM revisions)
    pub version_warnings: Vec<String>,
}

impl SyncResult {
    pub fn not_configured() -> Self {
        Self {
            errors: vec![NOT_CONFIGURED.to_string()],
            ..Self::default()
        }
    }

    pub fn merge(&mut self, other: SyncResult) {
        self.pushed += other.pushed;
        self.pulled += other.pulled;
        self.conflicts.extend(other.conflicts);
        self.errors.extend(other.errors);
        self.version_warnings.extend(other.version_warnings);
    }

    /// True when nothing was copied and nothing needs attention.
    pub fn is_noop(&self) -> bool {
        self.pushed == 0
            && self.pulled == 0
            && self.conflicts.is_empty()
            && self.errors.is_empty()
            && self.version_warnings.is_empty()
    }
}
