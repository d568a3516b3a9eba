//! Portable path handling.

pub mod resolver;

pub use resolver::{KnownRoots, PathResolver, Placeholder};
