//! Processed-fill set.

use std::collections::HashSet;

/// Fill identifiers that have already been credited.
///
/// An identifier, once marked, is never credited again.
#[derive(Debug, Default)]
pub struct FillDeduplicator {
    seen: HashSet<String>,
}

impl FillDeduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, fill_id: &str) -> bool {
        self.seen.contains(fill_id)
    }

    /// Mark a fill as processed. Returns `false` if it was already present.
    pub fn mark(&mut self, fill_id: &str) -> bool {
        self.seen.insert(fill_id.to_string())
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
