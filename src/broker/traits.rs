//! Broker-agnostic collaborator traits.
//!
//! The linker never talks to a broker directly. Placement goes through
//! [`OrderSubmitter`], trigger detection through [`TriggerSource`] and the
//! fallback order-book scan through [`OrderBookSource`] and position
//! flattening through [`PositionSource`]. Fill streams are plain
//! `futures` streams of [`FillEvent`].

use super::types::{FillEvent, OrderIntent, Position, SubmitReceipt, TriggerFired};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Errors raised when an order cannot be placed.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("broker rejected order: {0}")]
    Rejected(String),
    #[error("broker response carried no usable order identifier")]
    MissingIdentifier,
    #[error("order submission timed out after {0:?}")]
    Timeout(Duration),
    #[error("transport error: {0}")]
    Transport(String),
}

/// Places orders with the broker.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderSubmitter: Send + Sync {
    /// Submit one intent.
    ///
    /// Immediate orders yield [`SubmitReceipt::Order`], standing orders
    /// yield [`SubmitReceipt::Standing`].
    async fn submit(&self, intent: &OrderIntent) -> Result<SubmitReceipt, SubmitError>;
}

/// Reports standing orders that have fired.
#[async_trait]
pub trait TriggerSource: Send + Sync {
    /// Standing orders observed in the fired state, with their child order id.
    ///
    /// A source may report the same trigger on several polls; callers treat
    /// repeats as no-ops.
    async fn poll(&self) -> anyhow::Result<Vec<TriggerFired>>;
}

/// Snapshot of the broker's order book, used as a fallback fill source.
#[async_trait]
pub trait OrderBookSource: Send + Sync {
    async fn order_updates(&self) -> anyhow::Result<Vec<FillEvent>>;
}

/// Net positions of the account, used to build flatten orders.
#[async_trait]
pub trait PositionSource: Send + Sync {
    async fn positions(&self) -> anyhow::Result<Vec<Position>>;
}
