//! Utility modules shared by the engine and the CLI.

pub mod errors;
pub mod logger;

pub use errors::{EngineError, Result};
