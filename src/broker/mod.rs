//! Broker boundary for the order linker.
//!
//! ## Collaborators
//! The linker consumes three broker surfaces, each behind a trait:
//! - order submission (`OrderSubmitter`)
//! - standing-order trigger status (`TriggerSource`)
//! - order book snapshots (`OrderBookSource`)
//!
//! ## Implementations
//! - `kite`: Kite Connect REST + order-update websocket
//! - `paper`: in-memory broker for dry sessions and tests

pub mod kite;
pub mod paper;
mod traits;
mod types;

pub use kite::{KiteClient, KiteOrderStream};
pub use paper::PaperBroker;
pub use traits::*;
pub use types::*;
