//! Linker error types.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    #[error("link key must not be empty")]
    EmptyLinkKey,

    #[error("order id must not be empty")]
    EmptyOrderId,

    #[error("quantity must be greater than zero")]
    ZeroQuantity,

    #[error("only SELL intents can be queued, got {side} {symbol}")]
    NotASell { symbol: String, side: String },
}

pub type LinkResult<T> = Result<T, LinkError>;
