//! The linker: registration, binding, crediting and sell release.

use super::bindings::{BindingEntry, TriggerBindings};
use super::dedup::FillDeduplicator;
use super::error::{LinkError, LinkResult};
use super::ledger::{CreditLedger, LedgerEntry};
use super::queue::{QueuedSell, ReleasedSell, SellQueue};
use crate::broker::{LinkKey, OrderIntent, OrderSide};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// How a registered buy was placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationKind {
    Immediate,
    Standing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RegistrationState {
    Registered,
    /// Standing order fired under `child_id`.
    Bound { child_id: String },
}

/// A buy order the linker credits fills against.
#[derive(Debug, Clone, Serialize)]
pub struct Registration {
    pub link_key: LinkKey,
    /// Execution id for immediate buys, standing id for conditional buys.
    pub order_id: String,
    pub quantity: u64,
    pub kind: RegistrationKind,
    pub state: RegistrationState,
    /// Quantity credited from fills of this order
    pub filled: u64,
    pub registered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindOutcome {
    Bound { link_key: LinkKey },
    /// The standing order already has a child.
    AlreadyBound { child_id: String },
    /// No standing registration with this id (e.g. from a previous session).
    UnknownStanding,
    MissingChildId,
}

/// Credit for a link key exceeded its registered buy quantity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OverCreditAnomaly {
    pub link_key: LinkKey,
    pub fill_id: String,
    pub credited: u64,
    pub registered: u64,
    pub detected_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum CreditOutcome {
    /// Zero quantity; nothing to credit.
    Ignored,
    /// Fill id already processed.
    Duplicate,
    /// Order id matches no registration or binding.
    Unresolved,
    Credited {
        link_key: LinkKey,
        credited: u64,
        released: Vec<ReleasedSell>,
        anomaly: Option<OverCreditAnomaly>,
    },
}

#[derive(Debug, Clone, Default)]
pub struct QueueOutcome {
    /// Sells released by banked credit on arrival
    pub released: Vec<ReleasedSell>,
    /// Credit allocated to the still-queued head entry of the key
    pub reserved: u64,
}

/// Serializable view of the linker state.
#[derive(Debug, Clone, Serialize)]
pub struct LinkerSnapshot {
    pub registrations: Vec<Registration>,
    pub bindings: Vec<BindingEntry>,
    pub ledger: BTreeMap<LinkKey, LedgerEntry>,
    pub queues: BTreeMap<LinkKey, Vec<QueuedSell>>,
    pub processed_fills: usize,
    pub anomalies: Vec<OverCreditAnomaly>,
    pub undelivered: Vec<ReleasedSell>,
}

#[derive(Debug, Default)]
struct LinkerState {
    registrations: BTreeMap<String, Registration>,
    bindings: TriggerBindings,
    ledger: CreditLedger,
    queue: SellQueue,
    processed: FillDeduplicator,
    anomalies: Vec<OverCreditAnomaly>,
    /// Released after the release receiver went away; never submitted.
    undelivered: Vec<ReleasedSell>,
}

/// Session-scoped order linker.
///
/// Every operation takes one lock over all state and never awaits, so a
/// credit and a queue event for the same key are always applied in some
/// total order. Construct a fresh linker per trading session.
#[derive(Debug, Default)]
pub struct Linker {
    state: Mutex<LinkerState>,
    release_tx: Option<mpsc::UnboundedSender<ReleasedSell>>,
}

impl Linker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Linker that also emits every released sell on a channel.
    pub fn with_release_channel() -> (Self, mpsc::UnboundedReceiver<ReleasedSell>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let linker = Self {
            state: Mutex::new(LinkerState::default()),
            release_tx: Some(tx),
        };
        (linker, rx)
    }

    pub fn has_release_channel(&self) -> bool {
        self.release_tx.is_some()
    }

    /// Register a filled-on-submission (immediate) buy.
    pub fn register_buy(&self, link_key: &LinkKey, order_id: &str, quantity: u64) -> LinkResult<()> {
        self.register(link_key, order_id, quantity, RegistrationKind::Immediate)
    }

    /// Register a conditional buy that has not fired yet.
    pub fn register_standing_buy(
        &self,
        link_key: &LinkKey,
        standing_id: &str,
        quantity: u64,
    ) -> LinkResult<()> {
        self.register(link_key, standing_id, quantity, RegistrationKind::Standing)
    }

    fn register(
        &self,
        link_key: &LinkKey,
        order_id: &str,
        quantity: u64,
        kind: RegistrationKind,
    ) -> LinkResult<()> {
        if link_key.is_empty() {
            return Err(LinkError::EmptyLinkKey);
        }
        if order_id.trim().is_empty() {
            return Err(LinkError::EmptyOrderId);
        }
        if quantity == 0 {
            return Err(LinkError::ZeroQuantity);
        }

        let mut state = self.state.lock();
        let registration = Registration {
            link_key: link_key.clone(),
            order_id: order_id.to_string(),
            quantity,
            kind,
            state: RegistrationState::Registered,
            filled: 0,
            registered_at: Utc::now(),
        };

        if let Some(previous) = state.registrations.insert(order_id.to_string(), registration) {
            warn!(
                %order_id,
                previous_key = %previous.link_key,
                "Overwriting existing registration"
            );
            state.ledger.remove_registered(&previous.link_key, previous.quantity);
        }
        state.ledger.add_registered(link_key, quantity);

        info!(%link_key, %order_id, quantity, kind = ?kind, "Buy registered");
        Ok(())
    }

    /// Bind the child execution id of a fired standing buy.
    pub fn bind_child(&self, standing_id: &str, child_id: &str) -> BindOutcome {
        if child_id.trim().is_empty() {
            warn!(%standing_id, "Trigger fired without a child order id");
            return BindOutcome::MissingChildId;
        }

        let mut state = self.state.lock();
        let link_key = match state.registrations.get_mut(standing_id) {
            Some(reg) if reg.kind == RegistrationKind::Standing => match &reg.state {
                RegistrationState::Bound { child_id: existing } => {
                    if existing != child_id {
                        warn!(
                            %standing_id,
                            %existing,
                            reported = %child_id,
                            "Standing order already bound to a different child"
                        );
                    }
                    return BindOutcome::AlreadyBound {
                        child_id: existing.clone(),
                    };
                }
                RegistrationState::Registered => {
                    reg.state = RegistrationState::Bound {
                        child_id: child_id.to_string(),
                    };
                    reg.link_key.clone()
                }
            },
            _ => {
                warn!(%standing_id, %child_id, "Trigger for unregistered standing order dropped");
                return BindOutcome::UnknownStanding;
            }
        };

        state.bindings.bind(child_id, standing_id, link_key.clone());
        info!(%link_key, %standing_id, %child_id, "Standing order bound to child");
        BindOutcome::Bound { link_key }
    }

    /// Queue a linked sell; banked credit is applied immediately.
    pub fn queue_sell(&self, link_key: &LinkKey, intent: OrderIntent) -> LinkResult<QueueOutcome> {
        if link_key.is_empty() {
            return Err(LinkError::EmptyLinkKey);
        }
        if intent.side() != OrderSide::Sell {
            return Err(LinkError::NotASell {
                symbol: intent.symbol().to_string(),
                side: intent.side().to_string(),
            });
        }

        let mut state = self.state.lock();
        info!(
            %link_key,
            symbol = intent.symbol(),
            quantity = intent.quantity(),
            banked = state.ledger.available(link_key),
            "Sell queued"
        );
        state.queue.push(link_key, intent);

        let released = self.release_locked(&mut state, link_key);
        let reserved = state
            .queue
            .pending(link_key)
            .first()
            .map_or(0, |head| head.released);

        Ok(QueueOutcome { released, reserved })
    }

    /// Credit a buy fill. Idempotent per `fill_id`.
    pub fn credit_fill(&self, fill_id: &str, order_id: &str, filled_quantity: u64) -> CreditOutcome {
        if filled_quantity == 0 {
            return CreditOutcome::Ignored;
        }

        let mut state = self.state.lock();
        if state.processed.contains(fill_id) {
            debug!(%fill_id, %order_id, "Duplicate fill ignored");
            return CreditOutcome::Duplicate;
        }

        let direct = state
            .registrations
            .get(order_id)
            .filter(|reg| reg.kind == RegistrationKind::Immediate)
            .map(|reg| (reg.link_key.clone(), reg.order_id.clone()));
        let bound = || {
            state
                .bindings
                .get(order_id)
                .map(|b| (b.link_key.clone(), b.standing_id.clone()))
        };
        let Some((link_key, registration_id)) = direct.or_else(bound) else {
            debug!(%fill_id, %order_id, "Fill for untracked order dropped");
            return CreditOutcome::Unresolved;
        };

        state.processed.mark(fill_id);
        if let Some(reg) = state.registrations.get_mut(&registration_id) {
            reg.filled = reg.filled.saturating_add(filled_quantity);
        }
        let entry = state.ledger.credit(&link_key, filled_quantity);

        info!(
            %link_key,
            %fill_id,
            %order_id,
            filled_quantity,
            credited = entry.credited,
            "Buy fill credited"
        );

        let anomaly = entry.is_over_credited().then(|| {
            let anomaly = OverCreditAnomaly {
                link_key: link_key.clone(),
                fill_id: fill_id.to_string(),
                credited: entry.credited,
                registered: entry.registered,
                detected_at: Utc::now(),
            };
            warn!(
                %link_key,
                %fill_id,
                credited = entry.credited,
                registered = entry.registered,
                "Credit exceeds registered buy quantity"
            );
            state.anomalies.push(anomaly.clone());
            anomaly
        });

        let released = self.release_locked(&mut state, &link_key);
        CreditOutcome::Credited {
            link_key,
            credited: entry.credited,
            released,
            anomaly,
        }
    }

    /// Run the release algorithm for one key. Emission happens under the
    /// lock so releases of a key reach the channel in release order.
    fn release_locked(&self, state: &mut LinkerState, link_key: &LinkKey) -> Vec<ReleasedSell> {
        let LinkerState {
            queue,
            ledger,
            undelivered,
            ..
        } = state;
        let released = queue.release(link_key, ledger);

        for sell in &released {
            info!(
                %link_key,
                symbol = sell.intent.symbol(),
                quantity = sell.intent.quantity(),
                "Sell released"
            );
            if let Some(tx) = &self.release_tx {
                if tx.send(sell.clone()).is_err() {
                    warn!(
                        %link_key,
                        symbol = sell.intent.symbol(),
                        quantity = sell.intent.quantity(),
                        "Release receiver dropped; released sell kept as undelivered"
                    );
                    undelivered.push(sell.clone());
                }
            }
        }
        released
    }

    /// Total quantity credited to `link_key`.
    pub fn credited(&self, link_key: &LinkKey) -> u64 {
        self.state.lock().ledger.credited(link_key)
    }

    /// Credit allocated to sells of `link_key`, fully or partially released.
    pub fn released_total(&self, link_key: &LinkKey) -> u64 {
        self.state.lock().ledger.released(link_key)
    }

    pub fn ledger_entry(&self, link_key: &LinkKey) -> LedgerEntry {
        self.state.lock().ledger.entry(link_key)
    }

    pub fn pending_sells(&self, link_key: &LinkKey) -> Vec<QueuedSell> {
        self.state.lock().queue.pending(link_key)
    }

    /// Number of sells still queued for `link_key`.
    pub fn queued(&self, link_key: &LinkKey) -> usize {
        self.state.lock().queue.len(link_key)
    }

    pub fn pending_sell_count(&self) -> usize {
        self.state.lock().queue.total_len()
    }

    pub fn registration(&self, order_id: &str) -> Option<Registration> {
        self.state.lock().registrations.get(order_id).cloned()
    }

    pub fn has_registrations(&self) -> bool {
        !self.state.lock().registrations.is_empty()
    }

    /// Standing registrations still waiting for their trigger.
    pub fn unbound_standing_ids(&self) -> Vec<String> {
        self.state
            .lock()
            .registrations
            .values()
            .filter(|r| r.kind == RegistrationKind::Standing && r.state == RegistrationState::Registered)
            .map(|r| r.order_id.clone())
            .collect()
    }

    /// Sells released while no receiver was listening.
    pub fn undelivered_releases(&self) -> Vec<ReleasedSell> {
        self.state.lock().undelivered.clone()
    }

    pub fn anomalies(&self) -> Vec<OverCreditAnomaly> {
        self.state.lock().anomalies.clone()
    }

    pub fn snapshot(&self) -> LinkerSnapshot {
        let state = self.state.lock();
        LinkerSnapshot {
            registrations: state.registrations.values().cloned().collect(),
            bindings: state.bindings.iter().cloned().collect(),
            ledger: state.ledger.iter().map(|(k, v)| (k.clone(), *v)).collect(),
            queues: state
                .queue
                .iter()
                .map(|(k, q)| (k.clone(), q.iter().cloned().collect()))
                .collect(),
            processed_fills: state.processed.len(),
            anomalies: state.anomalies.clone(),
            undelivered: state.undelivered.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::OrderIntent;

    fn key() -> LinkKey {
        LinkKey::new("NSE:INFY:g1")
    }

    fn sell(quantity: u64) -> OrderIntent {
        OrderIntent::market("NSE", "INFY", OrderSide::Sell, quantity, Some("link:g1")).unwrap()
    }

    fn released_quantities(outcome: &CreditOutcome) -> Vec<u64> {
        match outcome {
            CreditOutcome::Credited { released, .. } => {
                released.iter().map(|r| r.intent.quantity()).collect()
            }
            other => panic!("expected credit, got {:?}", other),
        }
    }

    #[test]
    fn test_register_rejects_empty_identifiers() {
        let linker = Linker::new();
        assert_eq!(
            linker.register_buy(&LinkKey::new(" "), "B1", 1),
            Err(LinkError::EmptyLinkKey)
        );
        assert_eq!(linker.register_buy(&key(), "", 1), Err(LinkError::EmptyOrderId));
        assert_eq!(
            linker.register_standing_buy(&key(), "G1", 0),
            Err(LinkError::ZeroQuantity)
        );
        assert!(!linker.has_registrations());
    }

    #[test]
    fn test_duplicate_fill_credits_once() {
        let linker = Linker::new();
        linker.register_buy(&key(), "B1", 10).unwrap();

        assert!(matches!(
            linker.credit_fill("f1", "B1", 4),
            CreditOutcome::Credited { credited: 4, .. }
        ));
        assert!(matches!(linker.credit_fill("f1", "B1", 4), CreditOutcome::Duplicate));
        assert_eq!(linker.credited(&key()), 4);
    }

    #[test]
    fn test_fifo_release_ordering() {
        let linker = Linker::new();
        linker.register_buy(&key(), "B1", 8).unwrap();
        linker.queue_sell(&key(), sell(5)).unwrap();
        linker.queue_sell(&key(), sell(3)).unwrap();

        let outcome = linker.credit_fill("f1", "B1", 6);
        assert_eq!(released_quantities(&outcome), vec![5]);

        let pending = linker.pending_sells(&key());
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].intent.quantity(), 3);
        assert_eq!(pending[0].released, 1);
    }

    #[test]
    fn test_child_fill_requires_binding() {
        let linker = Linker::new();
        linker.register_standing_buy(&key(), "G1", 10).unwrap();

        assert!(matches!(
            linker.credit_fill("f1", "C1", 10),
            CreditOutcome::Unresolved
        ));
        assert_eq!(linker.credited(&key()), 0);

        assert_eq!(
            linker.bind_child("G1", "C1"),
            BindOutcome::Bound { link_key: key() }
        );

        // Redelivery of the same fill is credited now: unresolved fills are not marked.
        assert!(matches!(
            linker.credit_fill("f1", "C1", 10),
            CreditOutcome::Credited { credited: 10, .. }
        ));
        assert_eq!(linker.registration("G1").unwrap().filled, 10);
    }

    #[test]
    fn test_standing_id_itself_does_not_credit() {
        let linker = Linker::new();
        linker.register_standing_buy(&key(), "G1", 10).unwrap();
        assert!(matches!(
            linker.credit_fill("f1", "G1", 10),
            CreditOutcome::Unresolved
        ));
    }

    #[test]
    fn test_bind_unknown_standing_is_dropped() {
        let linker = Linker::new();
        assert_eq!(linker.bind_child("G404", "C1"), BindOutcome::UnknownStanding);
        assert_eq!(linker.bind_child("G404", ""), BindOutcome::MissingChildId);

        // Immediate registrations cannot be bound.
        linker.register_buy(&key(), "B1", 1).unwrap();
        assert_eq!(linker.bind_child("B1", "C1"), BindOutcome::UnknownStanding);
    }

    #[test]
    fn test_bind_is_one_shot() {
        let linker = Linker::new();
        linker.register_standing_buy(&key(), "G1", 10).unwrap();
        assert_eq!(linker.unbound_standing_ids(), vec!["G1".to_string()]);

        linker.bind_child("G1", "C1");
        assert!(linker.unbound_standing_ids().is_empty());
        assert_eq!(
            linker.bind_child("G1", "C2"),
            BindOutcome::AlreadyBound {
                child_id: "C1".to_string()
            }
        );
        assert!(matches!(linker.credit_fill("f2", "C2", 10), CreditOutcome::Unresolved));
    }

    #[test]
    fn test_credit_is_banked_for_later_sells() {
        let linker = Linker::new();
        linker.register_buy(&key(), "B1", 10).unwrap();
        let outcome = linker.credit_fill("f1", "B1", 10);
        assert!(released_quantities(&outcome).is_empty());

        let queued = linker.queue_sell(&key(), sell(4)).unwrap();
        assert_eq!(queued.released.len(), 1);
        assert_eq!(queued.reserved, 0);

        let queued = linker.queue_sell(&key(), sell(8)).unwrap();
        assert!(queued.released.is_empty());
        assert_eq!(queued.reserved, 6);
        assert_eq!(linker.released_total(&key()), 10);
    }

    #[test]
    fn test_queue_rejects_buy() {
        let linker = Linker::new();
        let buy = OrderIntent::market("NSE", "INFY", OrderSide::Buy, 1, Some("link:g1")).unwrap();
        assert!(matches!(
            linker.queue_sell(&key(), buy),
            Err(LinkError::NotASell { .. })
        ));
    }

    #[test]
    fn test_over_credit_is_reported_not_clamped() {
        let linker = Linker::new();
        linker.register_buy(&key(), "B1", 5).unwrap();

        let outcome = linker.credit_fill("f1", "B1", 7);
        match outcome {
            CreditOutcome::Credited {
                credited, anomaly, ..
            } => {
                assert_eq!(credited, 7);
                let anomaly = anomaly.unwrap();
                assert_eq!(anomaly.registered, 5);
                assert_eq!(anomaly.credited, 7);
            }
            other => panic!("expected credit, got {:?}", other),
        }
        assert_eq!(linker.anomalies().len(), 1);
        assert_eq!(linker.credited(&key()), 7);
    }

    #[test]
    fn test_zero_quantity_fill_ignored() {
        let linker = Linker::new();
        linker.register_buy(&key(), "B1", 5).unwrap();
        assert!(matches!(linker.credit_fill("f0", "B1", 0), CreditOutcome::Ignored));
        assert_eq!(linker.snapshot().processed_fills, 0);
    }

    #[test]
    fn test_end_to_end_partial_then_full_release() {
        let (linker, mut rx) = Linker::with_release_channel();
        linker.register_buy(&key(), "B1", 10).unwrap();
        linker.queue_sell(&key(), sell(10)).unwrap();

        let outcome = linker.credit_fill("f1", "B1", 4);
        assert!(released_quantities(&outcome).is_empty());
        assert_eq!(linker.pending_sells(&key())[0].released, 4);
        assert!(rx.try_recv().is_err());

        let outcome = linker.credit_fill("f2", "B1", 6);
        assert_eq!(released_quantities(&outcome), vec![10]);
        assert_eq!(linker.queued(&key()), 0);

        let released = rx.try_recv().unwrap();
        assert_eq!(released.intent.quantity(), 10);
        assert_eq!(released.link_key, key());
    }

    #[test]
    fn test_release_without_receiver_is_kept_as_undelivered() {
        let (linker, rx) = Linker::with_release_channel();
        linker.register_buy(&key(), "B1", 10).unwrap();
        linker.queue_sell(&key(), sell(10)).unwrap();
        drop(rx);

        let outcome = linker.credit_fill("B1:COMPLETE:10", "B1", 10);
        assert_eq!(released_quantities(&outcome), vec![10]);

        let undelivered = linker.undelivered_releases();
        assert_eq!(undelivered.len(), 1);
        assert_eq!(undelivered[0].intent.quantity(), 10);
        assert_eq!(linker.snapshot().undelivered.len(), 1);
    }

    #[test]
    fn test_delivered_release_is_not_undelivered() {
        let (linker, _rx) = Linker::with_release_channel();
        linker.register_buy(&key(), "B1", 4).unwrap();
        linker.queue_sell(&key(), sell(4)).unwrap();
        linker.credit_fill("f1", "B1", 4);
        assert!(linker.undelivered_releases().is_empty());
    }

    #[test]
    fn test_filled_quantity_saturates() {
        let linker = Linker::new();
        linker.register_buy(&key(), "B1", u64::MAX).unwrap();
        linker.credit_fill("f1", "B1", u64::MAX);
        linker.credit_fill("f2", "B1", 5);
        assert_eq!(linker.registration("B1").unwrap().filled, u64::MAX);
        assert_eq!(linker.credited(&key()), u64::MAX);
    }

    #[test]
    fn test_released_never_exceeds_credited() {
        let linker = Linker::new();
        linker.register_buy(&key(), "B1", 100).unwrap();

        // Interleave queue and credit events with a deterministic pattern.
        let mut fill = 0;
        for step in 0..60u64 {
            if step % 3 == 0 {
                linker.queue_sell(&key(), sell(step % 7 + 1)).unwrap();
            } else {
                fill += 1;
                linker.credit_fill(&format!("f{}", fill), "B1", step % 5);
            }
            let entry = linker.ledger_entry(&key());
            assert!(entry.released <= entry.credited);
        }
    }

    #[test]
    fn test_snapshot_serializes() {
        let linker = Linker::new();
        linker.register_standing_buy(&key(), "G1", 10).unwrap();
        linker.bind_child("G1", "C1");
        linker.queue_sell(&key(), sell(3)).unwrap();

        let json = serde_json::to_value(linker.snapshot()).unwrap();
        assert_eq!(json["registrations"][0]["state"]["state"], "bound");
        assert_eq!(json["bindings"][0]["child_id"], "C1");
        assert_eq!(json["queues"]["NSE:INFY:g1"][0]["released"], 0);
    }

    #[test]
    fn test_concurrent_credits_and_queues() {
        use std::sync::Arc;

        let linker = Arc::new(Linker::new());
        linker.register_buy(&key(), "B1", 1_000).unwrap();

        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let linker = Arc::clone(&linker);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        if worker % 2 == 0 {
                            linker.queue_sell(&key(), sell(5)).unwrap();
                        } else {
                            linker.credit_fill(&format!("w{}-{}", worker, i), "B1", 5);
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        // 100 sells of 5 against 500 credited: everything released.
        assert_eq!(linker.credited(&key()), 500);
        assert_eq!(linker.released_total(&key()), 500);
        assert_eq!(linker.pending_sell_count(), 0);
    }
}
