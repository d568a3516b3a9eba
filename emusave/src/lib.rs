//! Emulator save engine
//!
//! Versioned backup, restore with portable paths, and folder-based sync of
//! emulator save data between machines.

pub mod archive;
pub mod backup;
pub mod clock;
pub mod config;
pub mod conflict;
pub mod daemon;
pub mod fs;
pub mod hash;
pub mod models;
pub mod paths;
pub mod plugin;
pub mod restore;
pub mod sync;
pub mod utils;

// Re-export commonly used types
pub use backup::BackupManager;
pub use config::Config;
pub use restore::RestoreManager;
pub use sync::SyncManager;
pub use utils::errors::{EngineError, Result};
