//! Standing-order trigger watcher.

use super::Shutdown;
use crate::broker::TriggerSource;
use crate::config::WatcherConfig;
use crate::linker::{BindOutcome, Linker};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Counters reported when the watcher stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatcherStats {
    pub polls: u64,
    pub poll_failures: u64,
    pub bound: u64,
    pub skipped: u64,
}

/// Polls the broker for fired standing orders and binds their children.
pub struct TriggerWatcher {
    source: Arc<dyn TriggerSource>,
    linker: Arc<Linker>,
    poll_interval: Duration,
    poll_timeout: Duration,
}

impl TriggerWatcher {
    pub fn new(source: Arc<dyn TriggerSource>, linker: Arc<Linker>, config: &WatcherConfig) -> Self {
        Self {
            source,
            linker,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            poll_timeout: Duration::from_secs(config.poll_timeout_secs),
        }
    }

    /// Run one poll and bind every newly fired standing order.
    pub async fn poll_once(&self, stats: &mut WatcherStats) {
        let unbound: HashSet<String> = self.linker.unbound_standing_ids().into_iter().collect();
        if unbound.is_empty() {
            stats.skipped += 1;
            return;
        }

        stats.polls += 1;
        let fired = match timeout(self.poll_timeout, self.source.poll()).await {
            Ok(Ok(fired)) => fired,
            Ok(Err(e)) => {
                stats.poll_failures += 1;
                warn!(error = %e, "Trigger poll failed");
                return;
            }
            Err(_) => {
                stats.poll_failures += 1;
                warn!(timeout = ?self.poll_timeout, "Trigger poll timed out");
                return;
            }
        };

        for trigger in fired.iter().filter(|t| unbound.contains(&t.standing_id)) {
            match self.linker.bind_child(&trigger.standing_id, &trigger.child_id) {
                BindOutcome::Bound { link_key } => {
                    stats.bound += 1;
                    debug!(%link_key, standing_id = %trigger.standing_id, "Trigger bound");
                }
                other => {
                    debug!(standing_id = %trigger.standing_id, outcome = ?other, "Trigger not bound");
                }
            }
        }
    }

    /// Poll until shutdown.
    pub async fn run(self, mut shutdown: Shutdown) -> WatcherStats {
        let mut stats = WatcherStats::default();
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(interval = ?self.poll_interval, "Trigger watcher started");
        loop {
            tokio::select! {
                biased;
                _ = shutdown.wait() => break,
                _ = ticker.tick() => self.poll_once(&mut stats).await,
            }
        }

        info!(
            polls = stats.polls,
            bound = stats.bound,
            failures = stats.poll_failures,
            "Trigger watcher stopped"
        );
        stats
    }
}
