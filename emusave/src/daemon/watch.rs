//! Periodic `sync_all` until cancelled.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::sync::{SyncManager, SyncResult};

/// Sync passes run by one watch session.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WatchStats {
    pub passes: u64,
    pub pushed: usize,
    pub pulled: usize,
    pub conflicts: usize,
    pub errors: usize,
}

impl WatchStats {
    fn record(&mut self, result: &SyncResult) {
        self.passes += 1;
        self.pushed += result.pushed;
        self.pulled += result.pulled;
        self.conflicts += result.conflicts.len();
        self.errors += result.errors.len();
    }
}

/// Run `sync_all` every `interval` on the blocking pool; the first pass runs
/// right away. A pass in progress completes before cancellation is honoured.
pub async fn run(sync: Arc<SyncManager>, interval: Duration, cancel: CancellationToken) -> WatchStats {
    let mut stats = WatchStats::default();
    let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!("Watching sync folder every {}s", interval.as_secs());
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = cancel.cancelled() => break,
        }

        let pass = Arc::clone(&sync);
        match tokio::task::spawn_blocking(move || pass.sync_all()).await {
            Ok(result) => {
                for conflict in &result.conflicts {
                    warn!("Unresolved conflict: {}", conflict);
                }
                for warning in &result.version_warnings {
                    warn!("{}", warning);
                }
                for err in &result.errors {
                    error!("{}", err);
                }
                stats.record(&result);
            }
            Err(e) => error!("Sync pass panicked: {}", e),
        }

        if cancel.is_cancelled() {
            break;
        }
    }

    info!(
        "Watch stopped after {} pass(es): pushed {}, pulled {}",
        stats.passes, stats.pushed, stats.pulled
    );
    stats
}
