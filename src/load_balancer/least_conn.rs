//! Weighted least-connections selector.
//!
//! A binary min-heap over backend ids, ordered by `active / weight`. Each
//! backend's [`Slot`] caches its index in the heap array so updates and
//! removals are O(log n) instead of a linear search.
//!
//! The heap is a plain data structure with no synchronization of its own;
//! [`BackendPool`](crate::load_balancer::pool::BackendPool) wraps it in a lock.

use std::cmp::Ordering;

use crate::load_balancer::backend::BackendId;

/// Per-backend load state, owned by the heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub active_connections: usize,
    pub weight: u32,
    /// Index into the heap array, `None` when not a member.
    pub position: Option<usize>,
}

impl Slot {
    fn new(weight: u32) -> Self {
        Self {
            active_connections: 0,
            weight: weight.max(1),
            position: None,
        }
    }

    /// Compare `self.active / self.weight` against `other.active / other.weight`
    /// exactly, by cross-multiplying.
    pub fn cmp_load(&self, other: &Slot) -> Ordering {
        let lhs = self.active_connections as u128 * other.weight as u128;
        let rhs = other.active_connections as u128 * self.weight as u128;
        lhs.cmp(&rhs)
    }

    /// Load ratio as a float, for display only.
    pub fn ratio(&self) -> f64 {
        self.active_connections as f64 / self.weight as f64
    }
}

/// Indexed min-heap keyed by load ratio.
#[derive(Debug, Default)]
pub struct LoadHeap {
    heap: Vec<BackendId>,
    slots: Vec<Slot>,
}

impl LoadHeap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a slot for a new backend. The backend starts absent.
    pub fn track(&mut self, weight: u32) -> BackendId {
        let id = BackendId(self.slots.len());
        self.slots.push(Slot::new(weight));
        id
    }

    /// Number of tracked backends, members or not.
    pub fn tracked(&self) -> usize {
        self.slots.len()
    }

    /// Number of backends currently in the heap.
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn slot(&self, id: BackendId) -> Option<&Slot> {
        self.slots.get(id.0)
    }

    pub fn contains(&self, id: BackendId) -> bool {
        self.position(id).is_some()
    }

    fn position(&self, id: BackendId) -> Option<usize> {
        self.slots.get(id.0).and_then(|slot| slot.position)
    }

    /// Backend with the lowest load ratio, if any.
    pub fn peek(&self) -> Option<BackendId> {
        self.heap.first().copied()
    }

    /// Add an absent backend. Returns `false` if it was already a member.
    pub fn insert(&mut self, id: BackendId) -> bool {
        match self.slots.get(id.0) {
            Some(slot) if slot.position.is_none() => {}
            _ => return false,
        }

        let index = self.heap.len();
        self.heap.push(id);
        self.slots[id.0].position = Some(index);
        self.sift_up(index);
        true
    }

    /// Take a backend out of the heap. Returns `false` if it was absent.
    pub fn remove(&mut self, id: BackendId) -> bool {
        let Some(index) = self.position(id) else {
            return false;
        };

        let last = self.heap.len() - 1;
        self.swap(index, last);
        self.heap.pop();
        self.slots[id.0].position = None;

        if index < self.heap.len() {
            self.fix(index);
        }
        true
    }

    /// Add one connection. Returns `true` if the heap was rebalanced, `false`
    /// if the backend is absent (the count still moves).
    pub fn increment(&mut self, id: BackendId) -> bool {
        let Some(slot) = self.slots.get_mut(id.0) else {
            return false;
        };
        slot.active_connections += 1;
        let position = slot.position;
        match position {
            Some(index) => {
                self.sift_down(index);
                true
            }
            None => false,
        }
    }

    /// Remove one connection, never going below zero. Returns `true` if the
    /// heap was rebalanced.
    pub fn decrement(&mut self, id: BackendId) -> bool {
        let Some(slot) = self.slots.get_mut(id.0) else {
            return false;
        };
        slot.active_connections = slot.active_connections.saturating_sub(1);
        let position = slot.position;
        match position {
            Some(index) => {
                self.sift_up(index);
                true
            }
            None => false,
        }
    }

    fn less(&self, a: usize, b: usize) -> bool {
        let lhs = &self.slots[self.heap[a].0];
        let rhs = &self.slots[self.heap[b].0];
        lhs.cmp_load(rhs) == Ordering::Less
    }

    fn swap(&mut self, a: usize, b: usize) {
        self.heap.swap(a, b);
        self.slots[self.heap[a].0].position = Some(a);
        self.slots[self.heap[b].0].position = Some(b);
    }

    fn fix(&mut self, index: usize) {
        if !self.sift_up(index) {
            self.sift_down(index);
        }
    }

    /// Returns `true` if the element moved.
    fn sift_up(&mut self, mut index: usize) -> bool {
        let start = index;
        while index > 0 {
            let parent = (index - 1) / 2;
            if !self.less(index, parent) {
                break;
            }
            self.swap(index, parent);
            index = parent;
        }
        index != start
    }

    fn sift_down(&mut self, mut index: usize) {
        let len = self.heap.len();
        loop {
            let left = 2 * index + 1;
            if left >= len {
                break;
            }
            let right = left + 1;
            let child = if right < len && self.less(right, left) {
                right
            } else {
                left
            };
            if !self.less(child, index) {
                break;
            }
            self.swap(index, child);
            index = child;
        }
    }

    /// Heap members in array order.
    pub fn members(&self) -> &[BackendId] {
        &self.heap
    }

    /// Panics if the heap property or the position back-references are broken.
    #[cfg(test)]
    pub fn assert_invariants(&self) {
        for (index, id) in self.heap.iter().enumerate() {
            assert_eq!(self.slots[id.0].position, Some(index), "stale position for {}", id);
            if index > 0 {
                let parent = (index - 1) / 2;
                assert!(!self.less(index, parent), "heap order broken at {}", index);
            }
        }
        let members = self.slots.iter().filter(|s| s.position.is_some()).count();
        assert_eq!(members, self.heap.len(), "member count mismatch");
    }
}
