use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::time::Duration;

struct Delayed<T> {
    due: Duration,
    seq: u64,
    item: T,
}

impl<T> Delayed<T> {
    fn key(&self) -> Reverse<(Duration, u64)> {
        Reverse((self.due, self.seq))
    }
}

impl<T> PartialEq for Delayed<T> {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl<T> Eq for Delayed<T> {}

impl<T> PartialOrd for Delayed<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Delayed<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

/// Items held back until a deadline, earliest first. Equal deadlines pop in
/// insertion order.
pub struct DelayQueue<T> {
    heap: BinaryHeap<Delayed<T>>,
    seq: u64,
}

impl<T> Default for DelayQueue<T> {
    fn default() -> Self {
        Self {
            heap: BinaryHeap::new(),
            seq: 0,
        }
    }
}

impl<T> DelayQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, due: Duration, item: T) {
        self.seq += 1;
        self.heap.push(Delayed {
            due,
            seq: self.seq,
            item,
        });
    }

    /// Earliest deadline still waiting.
    pub fn next_due(&self) -> Option<Duration> {
        self.heap.peek().map(|d| d.due)
    }

    /// Remove every item whose deadline is at or before `now`.
    pub fn pop_due(&mut self, now: Duration) -> Vec<T> {
        let mut due = Vec::new();
        while self.heap.peek().is_some_and(|d| d.due <= now) {
            if let Some(delayed) = self.heap.pop() {
                due.push(delayed.item);
            }
        }
        due
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Drop everything, returning how many items were held.
    pub fn clear(&mut self) -> usize {
        let n = self.heap.len();
        self.heap.clear();
        n
    }
}
