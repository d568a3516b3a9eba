//! Archive containers and the archive tree layout.

pub mod container;
pub mod store;

pub use container::{Compression, ContainerReader, ContainerWriter};
pub use store::ArchiveStore;
