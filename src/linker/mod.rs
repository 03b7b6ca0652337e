//! Buy/sell linking.
//!
//! Sells tagged with a link key wait in a FIFO queue until buys registered
//! under the same key have been credited with at least the sell quantity.
//! Standing buys are credited only after their fired child order is bound.

mod bindings;
mod dedup;
mod engine;
mod error;
mod ledger;
mod queue;

pub use bindings::{BindingEntry, TriggerBindings};
pub use dedup::FillDeduplicator;
pub use engine::{
    BindOutcome, CreditOutcome, Linker, LinkerSnapshot, OverCreditAnomaly, QueueOutcome,
    Registration, RegistrationKind, RegistrationState,
};
pub use error::{LinkError, LinkResult};
pub use ledger::{CreditLedger, LedgerEntry};
pub use queue::{QueuedSell, ReleasedSell, SellQueue};
