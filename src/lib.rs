//! # Order Linker
//!
//! Links sell orders to the buy orders they depend on: a linked sell is held
//! back until buys sharing its link key have filled at least its quantity.
//!
//! ## Architecture
//!
//! - `config`: Configuration management and validation
//! - `broker`: Order types, collaborator traits, Kite and paper brokers
//! - `linker`: Registration, trigger bindings, credit ledger and sell queue
//! - `workers`: Trigger watcher, fill dispatcher and order-book poller
//! - `placement`: Batch placement and release feedback

pub mod broker;
pub mod config;
pub mod linker;
pub mod placement;
pub mod workers;

pub use config::Config;
pub use linker::Linker;
