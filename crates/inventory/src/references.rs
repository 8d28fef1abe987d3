use std::collections::{HashSet, VecDeque};

use serde::{Deserialize, Serialize};

/// Most recent correlation references applied to an item, oldest first.
///
/// Lookups go through a hash index; the queue decides eviction. Only the
/// queue is serialized and the index is rebuilt on load.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "VecDeque<String>", into = "VecDeque<String>")]
pub struct ReferenceWindow {
    order: VecDeque<String>,
    index: HashSet<String>,
}

impl ReferenceWindow {
    pub fn contains(&self, reference: &str) -> bool {
        self.index.contains(reference)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Record `reference`, evicting the oldest entries beyond `capacity`.
    pub(crate) fn remember(&mut self, reference: &str, capacity: usize) {
        if !self.index.insert(reference.to_string()) {
            return;
        }
        self.order.push_back(reference.to_string());
        while self.order.len() > capacity.max(1) {
            if let Some(evicted) = self.order.pop_front() {
                self.index.remove(&evicted);
            }
        }
    }
}

impl From<VecDeque<String>> for ReferenceWindow {
    fn from(order: VecDeque<String>) -> Self {
        let mut window = ReferenceWindow::default();
        for reference in order {
            window.remember(&reference, usize::MAX);
        }
        window
    }
}

impl From<ReferenceWindow> for VecDeque<String> {
    fn from(window: ReferenceWindow) -> Self {
        window.order
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest_beyond_capacity() {
        let mut window = ReferenceWindow::default();
        for reference in ["a", "b", "c"] {
            window.remember(reference, 2);
        }

        assert!(!window.contains("a"));
        assert!(window.contains("b"));
        assert!(window.contains("c"));
        assert_eq!(window.len(), 2);
    }

    #[test]
    fn duplicate_does_not_refresh_or_grow() {
        let mut window = ReferenceWindow::default();
        window.remember("a", 2);
        window.remember("b", 2);
        window.remember("a", 2);
        window.remember("c", 2);

        assert!(!window.contains("a"));
        assert_eq!(window.len(), 2);
    }

    #[test]
    fn index_is_rebuilt_from_json() {
        let mut window = ReferenceWindow::default();
        window.remember("x:1", 8);
        window.remember("x:2", 8);

        let json = serde_json::to_value(&window).unwrap();
        assert_eq!(json, serde_json::json!(["x:1", "x:2"]));

        let restored: ReferenceWindow = serde_json::from_value(json).unwrap();
        assert!(restored.contains("x:2"));
        assert_eq!(restored, window);
    }
}
