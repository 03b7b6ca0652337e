//! Standing-order trigger bindings.
//!
//! Fill notifications for a triggered order report the broker-assigned child
//! id, never the standing id the order was registered under. A binding maps
//! the child back to the registration's link key.

use crate::broker::LinkKey;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;

/// Child execution id bound to a standing registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BindingEntry {
    pub child_id: String,
    pub standing_id: String,
    pub link_key: LinkKey,
    pub bound_at: DateTime<Utc>,
}

/// Child id → binding.
#[derive(Debug, Default)]
pub struct TriggerBindings {
    by_child: HashMap<String, BindingEntry>,
}

impl TriggerBindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `child_id`; returns the previous binding of that child, if any.
    pub fn bind(&mut self, child_id: &str, standing_id: &str, link_key: LinkKey) -> Option<BindingEntry> {
        self.by_child.insert(
            child_id.to_string(),
            BindingEntry {
                child_id: child_id.to_string(),
                standing_id: standing_id.to_string(),
                link_key,
                bound_at: Utc::now(),
            },
        )
    }

    pub fn get(&self, child_id: &str) -> Option<&BindingEntry> {
        self.by_child.get(child_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &BindingEntry> {
        self.by_child.values()
    }

    pub fn len(&self) -> usize {
        self.by_child.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_child.is_empty()
    }
}
