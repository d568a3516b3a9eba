//! File system helpers.

pub mod metadata;
pub mod walker;
