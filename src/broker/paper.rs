//! Paper broker for dry sessions and tests.
//!
//! Accepts every order, simulates standing orders firing and fills, and
//! pushes order updates into a channel that plays the role of the broker's
//! order-update stream.

use super::traits::{OrderBookSource, OrderSubmitter, PositionSource, SubmitError, TriggerSource};
use super::types::*;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};

/// A simulated execution order.
#[derive(Debug, Clone)]
pub struct PaperOrder {
    pub order_id: String,
    pub intent: OrderIntent,
    pub filled: u64,
    pub status: OrderStatus,
}

impl PaperOrder {
    fn update(&self) -> FillEvent {
        FillEvent::from_order_update(
            self.order_id.clone(),
            self.intent.side(),
            self.status.clone(),
            self.filled,
        )
    }
}

/// A simulated standing order.
#[derive(Debug, Clone)]
pub struct PaperStanding {
    pub standing_id: String,
    pub intent: OrderIntent,
    pub child_id: Option<String>,
}

#[derive(Debug, Default)]
struct PaperState {
    orders: HashMap<String, PaperOrder>,
    standing: HashMap<String, PaperStanding>,
    /// Fired since the last trigger poll.
    fired: Vec<TriggerFired>,
    /// Submission order, for inspection.
    submitted: Vec<OrderIntent>,
    /// Net filled quantity per (exchange, symbol, product).
    positions: HashMap<(String, String, String), i64>,
}

/// Paper broker implementing every collaborator trait.
pub struct PaperBroker {
    state: Arc<RwLock<PaperState>>,
    id_counter: AtomicU64,
    updates_tx: mpsc::UnboundedSender<FillEvent>,
}

impl PaperBroker {
    /// Create a broker and the receiving end of its order-update stream.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<FillEvent>) {
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        let broker = Self {
            state: Arc::new(RwLock::new(PaperState::default())),
            id_counter: AtomicU64::new(1),
            updates_tx,
        };
        (broker, updates_rx)
    }

    fn next_id(&self, prefix: &str) -> String {
        format!("{}-{}", prefix, self.id_counter.fetch_add(1, Ordering::SeqCst))
    }

    fn publish(&self, event: FillEvent) {
        if self.updates_tx.send(event).is_err() {
            debug!("Paper order-update receiver dropped");
        }
    }

    /// Fire a standing order, creating its child execution order.
    pub async fn fire_trigger(&self, standing_id: &str) -> Option<String> {
        let mut state = self.state.write().await;
        let standing = state.standing.get_mut(standing_id)?;
        if standing.child_id.is_some() {
            return None;
        }

        let child_id = self.next_id("P");
        standing.child_id = Some(child_id.clone());
        let intent = standing.intent.clone();

        state.orders.insert(
            child_id.clone(),
            PaperOrder {
                order_id: child_id.clone(),
                intent,
                filled: 0,
                status: OrderStatus::Open,
            },
        );
        state.fired.push(TriggerFired {
            standing_id: standing_id.to_string(),
            child_id: child_id.clone(),
        });

        info!(%standing_id, %child_id, "[PAPER] Standing order fired");
        Some(child_id)
    }

    /// Fill `quantity` more units of an open order and publish the update.
    pub async fn fill(&self, order_id: &str, quantity: u64) -> Option<FillEvent> {
        let mut state = self.state.write().await;
        let order = state.orders.get_mut(order_id)?;
        if order.status != OrderStatus::Open {
            return None;
        }

        let before = order.filled;
        order.filled = order.filled.saturating_add(quantity).min(order.intent.quantity());
        if order.filled == order.intent.quantity() {
            order.status = OrderStatus::Complete;
        }

        let event = order.update();
        let delta = i64::try_from(order.filled - before).unwrap_or(i64::MAX);
        let signed = match order.intent.side() {
            OrderSide::Buy => delta,
            OrderSide::Sell => -delta,
        };
        let position_key = (
            order.intent.exchange().to_string(),
            order.intent.symbol().to_string(),
            order.intent.product().to_string(),
        );
        let net = state.positions.entry(position_key).or_default();
        *net = net.saturating_add(signed);
        drop(state);

        debug!(
            %order_id,
            filled = event.filled_quantity,
            status = %event.status,
            "[PAPER] Order filled"
        );
        self.publish(event.clone());
        Some(event)
    }

    /// Re-publish the latest update for an order (at-least-once delivery).
    pub async fn redeliver(&self, order_id: &str) -> Option<FillEvent> {
        let event = self.state.read().await.orders.get(order_id)?.update();
        self.publish(event.clone());
        Some(event)
    }

    /// One simulated market step: fire every pending standing order, then
    /// completely fill every open order.
    pub async fn simulate_step(&self) -> usize {
        let pending: Vec<String> = {
            let state = self.state.read().await;
            state
                .standing
                .values()
                .filter(|s| s.child_id.is_none())
                .map(|s| s.standing_id.clone())
                .collect()
        };
        for standing_id in &pending {
            self.fire_trigger(standing_id).await;
        }

        let open: Vec<(String, u64)> = {
            let state = self.state.read().await;
            state
                .orders
                .values()
                .filter(|o| o.status == OrderStatus::Open)
                .map(|o| (o.order_id.clone(), o.intent.quantity() - o.filled))
                .collect()
        };
        for (order_id, remaining) in &open {
            self.fill(order_id, *remaining).await;
        }

        pending.len() + open.len()
    }

    /// Every intent submitted so far, in submission order.
    pub async fn submitted(&self) -> Vec<OrderIntent> {
        self.state.read().await.submitted.clone()
    }

}

#[async_trait]
impl OrderSubmitter for PaperBroker {
    async fn submit(&self, intent: &OrderIntent) -> Result<SubmitReceipt, SubmitError> {
        let mut state = self.state.write().await;
        state.submitted.push(intent.clone());

        if intent.class().is_standing() {
            let standing_id = self.next_id("G");
            state.standing.insert(
                standing_id.clone(),
                PaperStanding {
                    standing_id: standing_id.clone(),
                    intent: intent.clone(),
                    child_id: None,
                },
            );
            info!(
                %standing_id,
                symbol = intent.symbol(),
                side = %intent.side(),
                quantity = intent.quantity(),
                "[PAPER] Standing order accepted"
            );
            return Ok(SubmitReceipt::Standing(standing_id));
        }

        let order_id = self.next_id("P");
        state.orders.insert(
            order_id.clone(),
            PaperOrder {
                order_id: order_id.clone(),
                intent: intent.clone(),
                filled: 0,
                status: OrderStatus::Open,
            },
        );
        info!(
            %order_id,
            symbol = intent.symbol(),
            side = %intent.side(),
            quantity = intent.quantity(),
            "[PAPER] Order accepted"
        );
        Ok(SubmitReceipt::Order(order_id))
    }
}

#[async_trait]
impl TriggerSource for PaperBroker {
    async fn poll(&self) -> anyhow::Result<Vec<TriggerFired>> {
        Ok(std::mem::take(&mut self.state.write().await.fired))
    }
}

#[async_trait]
impl OrderBookSource for PaperBroker {
    async fn order_updates(&self) -> anyhow::Result<Vec<FillEvent>> {
        let state = self.state.read().await;
        Ok(state.orders.values().map(PaperOrder::update).collect())
    }
}

#[async_trait]
impl PositionSource for PaperBroker {
    async fn positions(&self) -> anyhow::Result<Vec<Position>> {
        let state = self.state.read().await;
        Ok(state
            .positions
            .iter()
            .filter(|(_, quantity)| **quantity != 0)
            .map(|((exchange, symbol, product), quantity)| Position {
                exchange: exchange.clone(),
                symbol: symbol.clone(),
                product: product.clone(),
                quantity: *quantity,
            })
            .collect())
    }
}
