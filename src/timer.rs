//! Indexed binary min-heap of idle timeouts.
//!
//! Entries are keyed by a connection identifier only. Nothing is captured:
//! on expiry the heap hands the identifier back to the caller, which looks it
//! up in its own table and decides what to close.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
struct TimerNode<K> {
    id: K,
    expires: Instant,
}

#[derive(Debug)]
pub struct HeapTimer<K> {
    heap: Vec<TimerNode<K>>,
    positions: HashMap<K, usize>,
}

impl<K: Copy + Eq + Hash> Default for HeapTimer<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Copy + Eq + Hash> HeapTimer<K> {
    pub fn new() -> Self {
        Self {
            heap: Vec::with_capacity(64),
            positions: HashMap::with_capacity(64),
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn contains(&self, id: &K) -> bool {
        self.positions.contains_key(id)
    }

    /// Absolute deadline of `id`, if scheduled.
    pub fn expiry(&self, id: &K) -> Option<Instant> {
        self.positions.get(id).map(|&i| self.heap[i].expires)
    }

    /// Identifier and deadline at the root.
    pub fn peek(&self) -> Option<(K, Instant)> {
        self.heap.first().map(|node| (node.id, node.expires))
    }

    pub fn add(&mut self, id: K, timeout: Duration) {
        self.add_at(id, timeout, Instant::now());
    }

    /// Schedules `id` to expire `timeout` after `now`, replacing any existing deadline.
    pub fn add_at(&mut self, id: K, timeout: Duration, now: Instant) {
        let expires = now + timeout;
        match self.positions.get(&id).copied() {
            None => {
                let i = self.heap.len();
                self.positions.insert(id, i);
                self.heap.push(TimerNode { id, expires });
                self.sift_up(i);
            }
            Some(i) => {
                self.heap[i].expires = expires;
                if !self.sift_down(i, self.heap.len()) {
                    self.sift_up(i);
                }
            }
        }
    }

    /// Pushes the deadline of an existing entry to `timeout` from now.
    /// Returns `false` when `id` is not scheduled.
    pub fn adjust(&mut self, id: K, timeout: Duration) -> bool {
        self.adjust_at(id, timeout, Instant::now())
    }

    pub fn adjust_at(&mut self, id: K, timeout: Duration, now: Instant) -> bool {
        let Some(&i) = self.positions.get(&id) else {
            return false;
        };
        self.heap[i].expires = now + timeout;
        // Deadlines normally only grow, but a shorter one must still reach the root.
        if !self.sift_down(i, self.heap.len()) {
            self.sift_up(i);
        }
        true
    }

    /// Removes `id` without waiting for its deadline.
    pub fn remove(&mut self, id: &K) -> bool {
        match self.positions.get(id).copied() {
            Some(i) => {
                self.delete(i);
                true
            }
            None => false,
        }
    }

    /// Removes the root entry.
    pub fn pop(&mut self) -> Option<K> {
        if self.heap.is_empty() {
            return None;
        }
        let id = self.heap[0].id;
        self.delete(0);
        Some(id)
    }

    pub fn clear(&mut self) {
        self.heap.clear();
        self.positions.clear();
    }

    pub fn tick<F: FnMut(K)>(&mut self, on_expire: F) {
        self.tick_at(Instant::now(), on_expire);
    }

    /// Removes every entry whose deadline is at or before `now`, handing each
    /// identifier to `on_expire` in deadline order.
    pub fn tick_at<F: FnMut(K)>(&mut self, now: Instant, mut on_expire: F) {
        while let Some(node) = self.heap.first().copied() {
            if node.expires > now {
                break;
            }
            self.delete(0);
            on_expire(node.id);
        }
    }

    pub fn next_tick<F: FnMut(K)>(&mut self, on_expire: F) -> Option<Duration> {
        self.next_tick_at(Instant::now(), on_expire)
    }

    /// Expires overdue entries, then reports how long until the next deadline.
    ///
    /// `None` means the heap is empty and the caller may block indefinitely.
    pub fn next_tick_at<F: FnMut(K)>(&mut self, now: Instant, on_expire: F) -> Option<Duration> {
        self.tick_at(now, on_expire);
        self.heap
            .first()
            .map(|node| node.expires.saturating_duration_since(now))
    }

    fn sift_up(&mut self, mut i: usize) {
        while i > 0 {
            let parent = (i - 1) / 2;
            if self.heap[parent].expires <= self.heap[i].expires {
                break;
            }
            self.swap_nodes(i, parent);
            i = parent;
        }
    }

    /// Returns whether the node moved.
    fn sift_down(&mut self, index: usize, n: usize) -> bool {
        let mut i = index;
        let mut child = i * 2 + 1;
        while child < n {
            if child + 1 < n && self.heap[child + 1].expires < self.heap[child].expires {
                child += 1;
            }
            if self.heap[i].expires <= self.heap[child].expires {
                break;
            }
            self.swap_nodes(i, child);
            i = child;
            child = i * 2 + 1;
        }
        i > index
    }

    fn swap_nodes(&mut self, i: usize, j: usize) {
        self.heap.swap(i, j);
        self.positions.insert(self.heap[i].id, i);
        self.positions.insert(self.heap[j].id, j);
    }

    fn delete(&mut self, index: usize) {
        let last = self.heap.len() - 1;
        if index < last {
            self.swap_nodes(index, last);
            if !self.sift_down(index, last) {
                self.sift_up(index);
            }
        }
        if let Some(node) = self.heap.pop() {
            self.positions.remove(&node.id);
        }
    }
}

/// Converts a wait bound into an epoll timeout, rounding up so a wake-up
/// never lands before the deadline it was computed for.
pub fn to_poll_timeout(wait: Option<Duration>) -> i32 {
    match wait {
        None => -1,
        Some(d) => {
            let ms = d.as_nanos().div_ceil(1_000_000);
            i32::try_from(ms).unwrap_or(i32::MAX)
        }
    }
}
