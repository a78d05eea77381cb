//! Edge-triggered enabled/disabled change recording.
//!
//! Every activate/deactivate edge stamps the node with the time of the change
//! and fans out to registered callbacks. "Updates since T" is exactly the set
//! of nodes stamped after T.

use std::collections::HashMap;

use crate::core::types::NodeId;

/// Callback invoked with `(node, is_now_enabled)` on every edge.
pub type EnabledCallback = Box<dyn FnMut(NodeId, bool) + Send>;

#[derive(Clone, Copy, Debug, PartialEq)]
struct EnabledRecord {
    enabled: bool,
    time_at_last_change: f64,
}

/// Per-node activation tracker.
#[derive(Default)]
pub struct EnabledStateTracker {
    records: HashMap<NodeId, EnabledRecord>,
    callbacks: Vec<EnabledCallback>,
}

impl EnabledStateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback for every future edge.
    pub fn register_callback(&mut self, callback: EnabledCallback) {
        self.callbacks.push(callback);
    }

    /// Record the node's state at `now`.
    ///
    /// Returns false (and stays silent) if the state equals the last recorded one.
    pub fn record(&mut self, node: NodeId, enabled: bool, now: f64) -> bool {
        if let Some(prev) = self.records.get(&node) {
            if prev.enabled == enabled {
                return false;
            }
        }

        self.records.insert(node, EnabledRecord {
            enabled,
            time_at_last_change: now,
        });
        for callback in &mut self.callbacks {
            callback(node, enabled);
        }
        true
    }

    /// Time of the node's last edge, if it ever changed.
    pub fn time_at_last_change(&self, node: NodeId) -> Option<f64> {
        self.records.get(&node).map(|r| r.time_at_last_change)
    }

    /// Last recorded state of the node.
    pub fn state(&self, node: NodeId) -> Option<bool> {
        self.records.get(&node).map(|r| r.enabled)
    }

    /// `Some(enabled)` if the node changed strictly after `since`.
    pub fn changed_since(&self, node: NodeId, since: f64) -> Option<bool> {
        self.records
            .get(&node)
            .filter(|r| r.time_at_last_change > since)
            .map(|r| r.enabled)
    }

    /// Drop the record of a destroyed node.
    pub fn forget(&mut self, node: NodeId) {
        self.records.remove(&node);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_record_is_edge_triggered() {
        let mut tracker = EnabledStateTracker::new();
        assert!(tracker.record(NodeId(1), false, 1.0));
        assert!(!tracker.record(NodeId(1), false, 2.0));
        assert_eq!(tracker.time_at_last_change(NodeId(1)), Some(1.0));

        assert!(tracker.record(NodeId(1), true, 3.0));
        assert_eq!(tracker.time_at_last_change(NodeId(1)), Some(3.0));
        assert_eq!(tracker.state(NodeId(1)), Some(true));
    }

    #[test]
    fn test_callback_sees_every_edge() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let mut tracker = EnabledStateTracker::new();
        tracker.register_callback(Box::new(move |node, enabled| {
            sink.lock().unwrap().push((node, enabled));
        }));

        tracker.record(NodeId(4), false, 0.5);
        tracker.record(NodeId(4), false, 0.6);
        tracker.record(NodeId(4), true, 0.7);

        assert_eq!(*seen.lock().unwrap(), vec![(NodeId(4), false), (NodeId(4), true)]);
    }

    #[test]
    fn test_changed_since_is_strict() {
        let mut tracker = EnabledStateTracker::new();
        tracker.record(NodeId(2), false, 5.0);

        assert_eq!(tracker.changed_since(NodeId(2), 4.9), Some(false));
        assert_eq!(tracker.changed_since(NodeId(2), 5.0), None);
        assert_eq!(tracker.changed_since(NodeId(3), 0.0), None);
    }

    #[test]
    fn test_forget() {
        let mut tracker = EnabledStateTracker::new();
        tracker.record(NodeId(2), false, 1.0);
        tracker.forget(NodeId(2));
        assert!(tracker.is_empty());
        assert!(tracker.record(NodeId(2), false, 2.0));
    }
}
