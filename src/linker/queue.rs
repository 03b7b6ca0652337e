//! Per link-key FIFO of sells waiting for buy credit.

use super::ledger::CreditLedger;
use crate::broker::{LinkKey, OrderIntent};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};

/// A sell waiting for credit.
#[derive(Debug, Clone, Serialize)]
pub struct QueuedSell {
    pub intent: OrderIntent,
    /// Credit already allocated to this entry
    pub released: u64,
    pub queued_at: DateTime<Utc>,
}

impl QueuedSell {
    pub fn remaining(&self) -> u64 {
        self.intent.quantity() - self.released
    }
}

/// A sell whose quantity is fully covered by credit and may be submitted.
#[derive(Debug, Clone, Serialize)]
pub struct ReleasedSell {
    pub link_key: LinkKey,
    pub intent: OrderIntent,
    pub released_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct SellQueue {
    queues: HashMap<LinkKey, VecDeque<QueuedSell>>,
}

impl SellQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, key: &LinkKey, intent: OrderIntent) {
        self.queues.entry(key.clone()).or_default().push_back(QueuedSell {
            intent,
            released: 0,
            queued_at: Utc::now(),
        });
    }

    /// Allocate banked credit of `key` to its queued sells, oldest first.
    ///
    /// Fully covered entries are removed and returned. A partially covered
    /// entry keeps its allocation and blocks every entry behind it.
    pub fn release(&mut self, key: &LinkKey, ledger: &mut CreditLedger) -> Vec<ReleasedSell> {
        let mut released = Vec::new();
        let Some(queue) = self.queues.get_mut(key) else {
            return released;
        };

        while let Some(front) = queue.front_mut() {
            let allocated = ledger.allocate(key, front.remaining());
            front.released += allocated;

            if front.remaining() > 0 {
                break;
            }

            if let Some(done) = queue.pop_front() {
                released.push(ReleasedSell {
                    link_key: key.clone(),
                    intent: done.intent,
                    released_at: Utc::now(),
                });
            }
        }

        if queue.is_empty() {
            self.queues.remove(key);
        }
        released
    }

    /// Entries still waiting for `key`, oldest first.
    pub fn pending(&self, key: &LinkKey) -> Vec<QueuedSell> {
        self.queues
            .get(key)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self, key: &LinkKey) -> usize {
        self.queues.get(key).map_or(0, VecDeque::len)
    }

    pub fn total_len(&self) -> usize {
        self.queues.values().map(VecDeque::len).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&LinkKey, &VecDeque<QueuedSell>)> {
        self.queues.iter()
    }
}
