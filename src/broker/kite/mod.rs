//! Kite Connect integration.
//!
//! - REST: order placement, standing-order (GTT) status, order book
//! - WebSocket: order-update postbacks feeding the fill dispatcher

mod client;
mod stream;
mod types;

pub use client::KiteClient;
pub use stream::{parse_order_update, KiteOrderStream};
pub use types::{Order, Trigger};
