//! Priority queue for starting newly admitted hierarchies

use crate::core::types::HierarchyId;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Start priority of one admitted hierarchy
#[derive(Clone, Copy, Debug)]
pub struct HierarchyPriority {
    pub root: HierarchyId,
    pub priority: i32, // Higher = more important, negative = optional
    pub distance: f32, // Distance from the client's reference position
}

impl HierarchyPriority {
    pub fn new(root: HierarchyId, priority: i32, distance: f32) -> Self {
        Self { root, priority, distance }
    }

    pub fn is_optional(&self) -> bool {
        self.priority < 0
    }
}

// Implement Ord/PartialOrd for BinaryHeap (max-heap by default)
impl Eq for HierarchyPriority {}

impl PartialEq for HierarchyPriority {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Ord for HierarchyPriority {
    fn cmp(&self, other: &Self) -> Ordering {
        // Required before optional, then priority, then closer first, then lower id
        (!self.is_optional())
            .cmp(&!other.is_optional())
            .then(self.priority.cmp(&other.priority))
            .then(other.distance.total_cmp(&self.distance))
            .then(other.root.cmp(&self.root))
    }
}

impl PartialOrd for HierarchyPriority {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Queue of hierarchies waiting to be started for one client
#[derive(Debug, Default)]
pub struct AdmissionQueue {
    heap: BinaryHeap<HierarchyPriority>,
}

impl AdmissionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
    }

    pub fn push(&mut self, priority: HierarchyPriority) {
        self.heap.push(priority);
    }

    /// Get the most important hierarchy
    pub fn pop(&mut self) -> Option<HierarchyPriority> {
        self.heap.pop()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Pop up to `budget` entries in priority order; the rest stay queued.
    pub fn take(&mut self, budget: usize) -> Vec<HierarchyPriority> {
        std::iter::from_fn(|| self.heap.pop()).take(budget).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::NodeId;

    fn p(root: u64, priority: i32, distance: f32) -> HierarchyPriority {
        HierarchyPriority::new(NodeId(root), priority, distance)
    }

    #[test]
    fn test_priority_ordering() {
        assert!(p(1, 5, 10.0) > p(2, 1, 1.0));
        // Equal priority: closer wins
        assert!(p(1, 0, 2.0) > p(2, 0, 8.0));
        // Optional always last
        assert!(p(1, 0, 100.0) > p(2, -1, 0.0));
        assert!(p(1, -1, 1.0) > p(2, -5, 1.0));
    }

    #[test]
    fn test_queue_pops_in_order() {
        let mut queue = AdmissionQueue::new();
        queue.push(p(1, -2, 1.0));
        queue.push(p(2, 0, 9.0));
        queue.push(p(3, 3, 15.0));
        queue.push(p(4, 0, 4.0));

        let order: Vec<_> = std::iter::from_fn(|| queue.pop()).map(|e| e.root.0).collect();
        assert_eq!(order, vec![3, 4, 2, 1]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_take_respects_budget() {
        let mut queue = AdmissionQueue::new();
        for i in 1..=5 {
            queue.push(p(i, 0, i as f32));
        }

        let first = queue.take(2);
        assert_eq!(first.iter().map(|e| e.root.0).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(queue.len(), 3);

        queue.clear();
        assert!(queue.take(10).is_empty());
    }

    #[test]
    fn test_nan_distance_does_not_panic() {
        let mut queue = AdmissionQueue::new();
        queue.push(p(1, 0, f32::NAN));
        queue.push(p(2, 0, 1.0));
        assert_eq!(queue.take(5).len(), 2);
    }
}
