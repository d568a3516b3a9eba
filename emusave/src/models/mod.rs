//! Data model shared across the engine.

pub mod archive;
pub mod save_record;

pub use archive::{Archive, ArchiveId, ArtifactEntry, Sidecar};
pub use save_record::{SaveArtifact, SaveKind, SaveRecord};
