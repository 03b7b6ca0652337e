//! Order-book fallback for missed stream updates.

use super::fill_dispatcher::{DispatcherStats, FillDispatcher};
use super::Shutdown;
use crate::broker::OrderBookSource;
use crate::config::WatcherConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollerStats {
    pub scans: u64,
    pub scan_failures: u64,
    pub fills: DispatcherStats,
}

/// Periodically scans the order book and credits completed buys.
///
/// Update ids are derived from order contents, so a fill already credited from
/// the stream is a duplicate here and vice versa.
pub struct OrderBookPoller {
    source: Arc<dyn OrderBookSource>,
    dispatcher: FillDispatcher,
    poll_interval: Duration,
    poll_timeout: Duration,
}

impl OrderBookPoller {
    pub fn new(
        source: Arc<dyn OrderBookSource>,
        dispatcher: FillDispatcher,
        config: &WatcherConfig,
    ) -> Self {
        Self {
            source,
            dispatcher,
            poll_interval: Duration::from_millis(config.order_poll_interval_ms),
            poll_timeout: Duration::from_secs(config.poll_timeout_secs),
        }
    }

    pub async fn scan_once(&self, stats: &mut PollerStats) {
        stats.scans += 1;
        let updates = match timeout(self.poll_timeout, self.source.order_updates()).await {
            Ok(Ok(updates)) => updates,
            Ok(Err(e)) => {
                stats.scan_failures += 1;
                warn!(error = %e, "Order-book scan failed");
                return;
            }
            Err(_) => {
                stats.scan_failures += 1;
                warn!(timeout = ?self.poll_timeout, "Order-book scan timed out");
                return;
            }
        };

        for update in &updates {
            self.dispatcher.dispatch(update, &mut stats.fills);
        }
    }

    pub async fn run(self, mut shutdown: Shutdown) -> PollerStats {
        let mut stats = PollerStats::default();
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(interval = ?self.poll_interval, "Order-book poller started");
        loop {
            tokio::select! {
                biased;
                _ = shutdown.wait() => break,
                _ = ticker.tick() => self.scan_once(&mut stats).await,
            }
        }

        info!(
            scans = stats.scans,
            credited = stats.fills.credited,
            "Order-book poller stopped"
        );
        stats
    }
}
