//! Order placement around the linker.
//!
//! Buys are placed and registered, linked sells are queued, exit sells go
//! straight to the broker. Sells released by the linker come back through
//! [`PlacementOrchestrator::run_release_loop`]. [`flatten_intents`] turns
//! open positions into exit orders.

mod exit;
mod orchestrator;

pub use exit::{build_exit_intents, flatten_intents};
pub use orchestrator::{
    BatchReport, PlacedOrder, PlacementError, PlacementOrchestrator, PlacementStatus,
};
