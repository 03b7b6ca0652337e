//! Per link-key credit accounting.
//!
//! Tracks, for every link key:
//! - quantity registered by buy orders
//! - quantity credited from buy fills
//! - quantity already allocated to queued sells
//!
//! `credited - released` is the credit still banked for future sells.

use crate::broker::LinkKey;
use serde::Serialize;
use std::collections::HashMap;

/// Credit counters of one link key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LedgerEntry {
    /// Sum of registered buy quantities
    pub registered: u64,
    /// Cumulative credited quantity (never decreases)
    pub credited: u64,
    /// Credit allocated to sells, fully or partially released
    pub released: u64,
}

impl LedgerEntry {
    /// Credit not yet allocated to any sell.
    pub fn available(&self) -> u64 {
        self.credited.saturating_sub(self.released)
    }

    /// Credit exceeds what the registered buys could ever fill.
    pub fn is_over_credited(&self) -> bool {
        self.credited > self.registered
    }
}

#[derive(Debug, Default)]
pub struct CreditLedger {
    entries: HashMap<LinkKey, LedgerEntry>,
}

impl CreditLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_registered(&mut self, key: &LinkKey, quantity: u64) {
        let entry = self.entries.entry(key.clone()).or_default();
        entry.registered = entry.registered.saturating_add(quantity);
    }

    /// Undo a registration that is being overwritten.
    pub fn remove_registered(&mut self, key: &LinkKey, quantity: u64) {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.registered = entry.registered.saturating_sub(quantity);
        }
    }

    /// Add credit and return the updated counters.
    pub fn credit(&mut self, key: &LinkKey, quantity: u64) -> LedgerEntry {
        let entry = self.entries.entry(key.clone()).or_default();
        entry.credited = entry.credited.saturating_add(quantity);
        *entry
    }

    /// Allocate up to `quantity` of banked credit; returns what was allocated.
    pub fn allocate(&mut self, key: &LinkKey, quantity: u64) -> u64 {
        let Some(entry) = self.entries.get_mut(key) else {
            return 0;
        };
        let allocated = quantity.min(entry.available());
        entry.released = entry.released.saturating_add(allocated);
        allocated
    }

    pub fn available(&self, key: &LinkKey) -> u64 {
        self.entry(key).available()
    }

    pub fn credited(&self, key: &LinkKey) -> u64 {
        self.entry(key).credited
    }

    pub fn released(&self, key: &LinkKey) -> u64 {
        self.entry(key).released
    }

    pub fn entry(&self, key: &LinkKey) -> LedgerEntry {
        self.entries.get(key).copied().unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&LinkKey, &LedgerEntry)> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credit_banks_until_allocated() {
        let key = LinkKey::new("K");
        let mut ledger = CreditLedger::new();
        ledger.add_registered(&key, 10);

        ledger.credit(&key, 4);
        assert_eq!(ledger.available(&key), 4);

        assert_eq!(ledger.allocate(&key, 3), 3);
        assert_eq!(ledger.available(&key), 1);

        // Never allocates more than banked.
        assert_eq!(ledger.allocate(&key, 5), 1);
        assert_eq!(ledger.available(&key), 0);
        assert_eq!(ledger.credited(&key), 4);
        assert_eq!(ledger.released(&key), 4);
    }

    #[test]
    fn test_over_credit_detection() {
        let key = LinkKey::new("K");
        let mut ledger = CreditLedger::new();
        ledger.add_registered(&key, 5);

        assert!(!ledger.credit(&key, 5).is_over_credited());
        assert!(ledger.credit(&key, 1).is_over_credited());
    }

    #[test]
    fn test_overwrite_registration() {
        let key = LinkKey::new("K");
        let mut ledger = CreditLedger::new();
        ledger.add_registered(&key, 5);
        ledger.remove_registered(&key, 5);
        ledger.add_registered(&key, 8);
        assert_eq!(ledger.entry(&key).registered, 8);
    }

    #[test]
    fn test_registered_quantity_saturates() {
        let key = LinkKey::new("K");
        let mut ledger = CreditLedger::new();
        ledger.add_registered(&key, u64::MAX);
        ledger.add_registered(&key, 1);
        assert_eq!(ledger.entry(&key).registered, u64::MAX);
    }

    #[test]
    fn test_unknown_key_is_empty() {
        let mut ledger = CreditLedger::new();
        let key = LinkKey::new("missing");
        assert_eq!(ledger.entry(&key), LedgerEntry::default());
        assert_eq!(ledger.allocate(&key, 3), 0);
    }
}
