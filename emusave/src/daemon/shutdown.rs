//! Stop watch mode on SIGINT or SIGTERM.
//!
//! A running sync pass is allowed to finish; the watch loop stops before the
//! next one starts.

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Token cancelled once shutdown starts.
    pub fn token(&self) -> CancellationToken {
        self.token.child_token()
    }

    /// Block until SIGINT or SIGTERM arrives, then cancel every token.
    ///
    /// A handler that cannot be installed is logged and never fires.
    pub async fn wait_for_signal(&self) {
        let interrupt = async {
            if let Err(e) = signal::ctrl_c().await {
                error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    error!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = interrupt => info!("Interrupted, stopping after the current pass"),
            _ = terminate => info!("Terminated, stopping after the current pass"),
            _ = self.token.cancelled() => {}
        }

        self.trigger();
    }

    pub fn trigger(&self) {
        self.token.cancel();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
