//! Type definitions for Kite Connect API responses.

use crate::broker::types::{FillEvent, OrderSide, OrderStatus, Position, TriggerFired};
use serde::Deserialize;

const TRIGGERED: &str = "triggered";

/// Standard response envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope<T> {
    pub status: String,
    #[serde(default = "Option::default")]
    pub data: Option<T>,
    #[serde(default)]
    pub message: Option<String>,
}

impl<T> Envelope<T> {
    /// Payload of a successful response, or the broker's message.
    pub fn into_data(self) -> Result<T, String> {
        if self.status != "success" {
            return Err(self
                .message
                .unwrap_or_else(|| format!("status {}", self.status)));
        }
        self.data
            .ok_or_else(|| "response carried no data".to_string())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlaceOrderData {
    pub order_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlaceTriggerData {
    pub trigger_id: u64,
}

/// A standing (GTT) order.
#[derive(Debug, Clone, Deserialize)]
pub struct Trigger {
    pub id: u64,
    pub status: String,
    #[serde(default)]
    pub orders: Vec<TriggerOrder>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TriggerOrder {
    #[serde(default)]
    pub result: Option<TriggerOrderResult>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TriggerOrderResult {
    #[serde(default)]
    pub order_result: Option<ChildOrderResult>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChildOrderResult {
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

impl Trigger {
    /// Child execution order placed when this trigger fired.
    pub fn child_order_id(&self) -> Option<&str> {
        if !self.status.eq_ignore_ascii_case(TRIGGERED) {
            return None;
        }
        self.orders
            .iter()
            .filter_map(|o| o.result.as_ref()?.order_result.as_ref()?.order_id.as_deref())
            .find(|id| !id.is_empty())
    }

    pub fn to_fired(&self) -> Option<TriggerFired> {
        self.child_order_id().map(|child_id| TriggerFired {
            standing_id: self.id.to_string(),
            child_id: child_id.to_string(),
        })
    }
}

/// An order from the order book or an order-update postback.
#[derive(Debug, Clone, Deserialize)]
pub struct Order {
    pub order_id: String,
    pub status: String,
    pub transaction_type: String,
    #[serde(default)]
    pub tradingsymbol: Option<String>,
    #[serde(default)]
    pub filled_quantity: u64,
}

impl Order {
    /// `None` for transaction types the linker does not understand.
    pub fn to_fill_event(&self) -> Option<FillEvent> {
        let side = OrderSide::parse(&self.transaction_type)?;
        Some(FillEvent::from_order_update(
            self.order_id.clone(),
            side,
            OrderStatus::from(self.status.as_str()),
            self.filled_quantity,
        ))
    }
}

/// `/portfolio/positions` payload.
#[derive(Debug, Clone, Deserialize)]
pub struct Positions {
    #[serde(default)]
    pub net: Vec<KitePosition>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KitePosition {
    pub tradingsymbol: String,
    pub exchange: String,
    pub product: String,
    #[serde(default)]
    pub quantity: i64,
}

impl From<KitePosition> for Position {
    fn from(p: KitePosition) -> Self {
        Position {
            exchange: p.exchange,
            symbol: p.tradingsymbol,
            product: p.product,
            quantity: p.quantity,
        }
    }
}

/// Text frame on the order-update socket.
#[derive(Debug, Clone, Deserialize)]
pub struct SocketMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}
