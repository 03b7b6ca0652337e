//! Order-update stream consumer.

use super::Shutdown;
use crate::broker::FillEvent;
use crate::linker::{CreditOutcome, Linker};
use futures_util::{pin_mut, Stream, StreamExt};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatcherStats {
    pub received: u64,
    /// Not a completed buy
    pub filtered: u64,
    pub credited: u64,
    pub duplicates: u64,
    pub unresolved: u64,
}

/// Forwards completed buy fills to the linker.
#[derive(Clone)]
pub struct FillDispatcher {
    linker: Arc<Linker>,
}

impl FillDispatcher {
    pub fn new(linker: Arc<Linker>) -> Self {
        Self { linker }
    }

    /// Handle one event. Everything except completed buys is dropped.
    pub fn dispatch(&self, event: &FillEvent, stats: &mut DispatcherStats) -> Option<CreditOutcome> {
        stats.received += 1;
        if !event.is_completed_buy() {
            stats.filtered += 1;
            return None;
        }

        let outcome = self
            .linker
            .credit_fill(&event.fill_id, &event.order_id, event.filled_quantity);
        match &outcome {
            CreditOutcome::Credited { .. } => stats.credited += 1,
            CreditOutcome::Duplicate => stats.duplicates += 1,
            CreditOutcome::Unresolved => stats.unresolved += 1,
            CreditOutcome::Ignored => stats.filtered += 1,
        }
        debug!(fill_id = %event.fill_id, outcome = ?outcome, "Fill dispatched");
        Some(outcome)
    }

    /// Consume `events` until the stream ends or shutdown is triggered.
    pub async fn run<S>(self, events: S, mut shutdown: Shutdown) -> DispatcherStats
    where
        S: Stream<Item = FillEvent>,
    {
        let mut stats = DispatcherStats::default();
        pin_mut!(events);

        info!("Fill dispatcher started");
        loop {
            tokio::select! {
                biased;
                _ = shutdown.wait() => break,
                next = events.next() => match next {
                    Some(event) => {
                        self.dispatch(&event, &mut stats);
                    }
                    None => {
                        info!("Order-update stream ended");
                        break;
                    }
                },
            }
        }

        info!(
            received = stats.received,
            credited = stats.credited,
            duplicates = stats.duplicates,
            "Fill dispatcher stopped"
        );
        stats
    }
}
