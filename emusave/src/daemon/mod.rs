//! Long-running watch mode.

pub mod shutdown;
pub mod watch;

pub use shutdown::ShutdownCoordinator;
