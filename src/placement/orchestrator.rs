//! Batch placement and release feedback.

use crate::broker::{
    IntentKind, LinkKey, OrderIntent, OrderSide, OrderSubmitter, SubmitError, SubmitReceipt,
};
use crate::config::ExecutionConfig;
use crate::linker::{LinkError, Linker, ReleasedSell};
use crate::workers::Shutdown;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum PlacementError {
    #[error("failed to place {side} {quantity} {symbol}: {source}")]
    Submission {
        symbol: String,
        side: OrderSide,
        quantity: u64,
        #[source]
        source: SubmitError,
    },

    #[error("failed to register buy {order_id}: {source}")]
    Registration {
        order_id: String,
        #[source]
        source: LinkError,
    },

    #[error("failed to queue sell {symbol}: {source}")]
    Queue {
        symbol: String,
        #[source]
        source: LinkError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlacementStatus {
    /// Submitted, not tracked by the linker
    Placed,
    /// Submitted and registered as a linked buy
    Registered,
    /// Waiting in the sell queue
    Queued,
    /// Released on arrival by banked credit and submitted
    Released,
    /// Dry run; nothing was sent
    DryRun,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlacedOrder {
    pub intent: OrderIntent,
    pub status: PlacementStatus,
    pub receipt: Option<SubmitReceipt>,
}

/// Outcome of one batch, in processing order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub orders: Vec<PlacedOrder>,
}

impl BatchReport {
    pub fn count(&self, status: PlacementStatus) -> usize {
        self.orders.iter().filter(|o| o.status == status).count()
    }

    fn push(&mut self, intent: &OrderIntent, status: PlacementStatus, receipt: Option<SubmitReceipt>) {
        self.orders.push(PlacedOrder {
            intent: intent.clone(),
            status,
            receipt,
        });
    }
}

/// Places intent batches and submits sells released by the linker.
pub struct PlacementOrchestrator {
    submitter: Arc<dyn OrderSubmitter>,
    linker: Arc<Linker>,
    config: ExecutionConfig,
}

impl PlacementOrchestrator {
    pub fn new(submitter: Arc<dyn OrderSubmitter>, linker: Arc<Linker>, config: ExecutionConfig) -> Self {
        Self {
            submitter,
            linker,
            config,
        }
    }

    /// Place a batch: every BUY first, then every SELL.
    ///
    /// The first submission failure aborts the rest of the batch. Intents
    /// already processed stay placed and registered.
    pub async fn execute_batch(&self, intents: &[OrderIntent]) -> Result<BatchReport, PlacementError> {
        let (buys, sells): (Vec<&OrderIntent>, Vec<&OrderIntent>) =
            intents.iter().partition(|i| i.side() == OrderSide::Buy);

        info!(
            buys = buys.len(),
            sells = sells.len(),
            dry_run = self.config.dry_run,
            "Executing batch"
        );

        let mut report = BatchReport::default();
        if self.config.dry_run {
            for intent in buys.iter().chain(sells.iter()) {
                info!(
                    symbol = intent.symbol(),
                    side = %intent.side(),
                    quantity = intent.quantity(),
                    kind = ?intent.kind(),
                    "[DRY RUN] Would place"
                );
                report.push(intent, PlacementStatus::DryRun, None);
            }
            return Ok(report);
        }

        let mut first = true;
        for intent in buys {
            self.pace(&mut first).await;
            self.place_buy(intent, &mut report).await?;
        }

        for intent in sells {
            match intent.kind() {
                IntentKind::Linked(link_key) => {
                    self.queue_sell(link_key, intent, &mut report).await?;
                }
                IntentKind::Exit | IntentKind::Immediate => {
                    self.pace(&mut first).await;
                    let receipt = self.submit(intent).await?;
                    info!(symbol = intent.symbol(), id = receipt.id(), "Exit order placed");
                    report.push(intent, PlacementStatus::Placed, Some(receipt));
                }
            }
        }

        info!(
            placed = report.count(PlacementStatus::Placed),
            registered = report.count(PlacementStatus::Registered),
            queued = report.count(PlacementStatus::Queued),
            released = report.count(PlacementStatus::Released),
            "Batch complete"
        );
        Ok(report)
    }

    async fn place_buy(&self, intent: &OrderIntent, report: &mut BatchReport) -> Result<(), PlacementError> {
        let receipt = self.submit(intent).await?;

        let Some(link_key) = intent.kind().link_key() else {
            debug!(symbol = intent.symbol(), id = receipt.id(), "Unlinked buy placed");
            report.push(intent, PlacementStatus::Placed, Some(receipt));
            return Ok(());
        };

        let registered = match &receipt {
            SubmitReceipt::Order(order_id) => {
                self.linker.register_buy(link_key, order_id, intent.quantity())
            }
            SubmitReceipt::Standing(standing_id) => {
                self.linker
                    .register_standing_buy(link_key, standing_id, intent.quantity())
            }
        };
        registered.map_err(|source| PlacementError::Registration {
            order_id: receipt.id().to_string(),
            source,
        })?;

        report.push(intent, PlacementStatus::Registered, Some(receipt));
        Ok(())
    }

    async fn queue_sell(
        &self,
        link_key: &LinkKey,
        intent: &OrderIntent,
        report: &mut BatchReport,
    ) -> Result<(), PlacementError> {
        let outcome = self
            .linker
            .queue_sell(link_key, intent.clone())
            .map_err(|source| PlacementError::Queue {
                symbol: intent.symbol().to_string(),
                source,
            })?;

        // Released sells also go out on the linker's release channel when one
        // is attached; submit here only when nobody else will.
        if outcome.released.is_empty() || self.linker.has_release_channel() {
            report.push(intent, PlacementStatus::Queued, None);
            return Ok(());
        }

        for released in &outcome.released {
            let receipt = self.submit(&released.intent).await?;
            report.push(&released.intent, PlacementStatus::Released, Some(receipt));
        }
        Ok(())
    }

    async fn pace(&self, first: &mut bool) {
        if !*first && self.config.place_pause_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.place_pause_ms)).await;
        }
        *first = false;
    }

    /// Submit with the configured timeout.
    pub async fn submit(&self, intent: &OrderIntent) -> Result<SubmitReceipt, PlacementError> {
        let limit = Duration::from_secs(self.config.submit_timeout_secs);
        let result = match tokio::time::timeout(limit, self.submitter.submit(intent)).await {
            Ok(result) => result,
            Err(_) => Err(SubmitError::Timeout(limit)),
        };

        result.map_err(|source| {
            warn!(
                symbol = intent.symbol(),
                side = %intent.side(),
                quantity = intent.quantity(),
                error = %source,
                "Order submission failed"
            );
            PlacementError::Submission {
                symbol: intent.symbol().to_string(),
                side: intent.side(),
                quantity: intent.quantity(),
                source,
            }
        })
    }

    /// Submit one released sell.
    pub async fn submit_released(&self, released: &ReleasedSell) -> Result<SubmitReceipt, PlacementError> {
        let receipt = self.submit(&released.intent).await?;
        info!(
            link_key = %released.link_key,
            symbol = released.intent.symbol(),
            quantity = released.intent.quantity(),
            id = receipt.id(),
            "Released sell placed"
        );
        Ok(receipt)
    }

    /// Submit released sells until shutdown; sells already released by then
    /// are still submitted. Failures are logged and do not stop the loop.
    ///
    /// Stop this loop only after every task that credits fills has exited
    /// (see `SessionShutdown`). A credit applied after the receiver is gone
    /// is kept in `Linker::undelivered_releases` instead of being placed.
    pub async fn run_release_loop(
        &self,
        mut releases: mpsc::UnboundedReceiver<ReleasedSell>,
        mut shutdown: Shutdown,
    ) -> usize {
        let mut submitted = 0;
        let mut first = true;

        loop {
            tokio::select! {
                biased;
                next = releases.recv() => match next {
                    Some(released) => {
                        self.pace(&mut first).await;
                        submitted += self.submit_logged(&released).await;
                    }
                    None => break,
                },
                _ = shutdown.wait() => {
                    while let Ok(released) = releases.try_recv() {
                        submitted += self.submit_logged(&released).await;
                    }
                    break;
                }
            }
        }

        info!(submitted, "Release loop stopped");
        submitted
    }

    async fn submit_logged(&self, released: &ReleasedSell) -> usize {
        match self.submit_released(released).await {
            Ok(_) => 1,
            Err(e) => {
                error!(link_key = %released.link_key, error = %e, "Released sell could not be placed");
                0
            }
        }
    }
}
