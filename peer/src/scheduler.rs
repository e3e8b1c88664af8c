//! Deadline-ordered one-shot tasks.
//!
//! Delayed work (projectile expiry, explosion cleanup, round restarts) is
//! queued as plain data keyed by a monotonic deadline and fired from the tick
//! loop, so tests advance a clock instead of sleeping.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

#[derive(Debug)]
pub struct Scheduler<T> {
    queue: BinaryHeap<Reverse<(u64, u64)>>,
    tasks: HashMap<u64, T>,
    cancelled: HashSet<u64>,
    next_seq: u64,
}

impl<T> Default for Scheduler<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Scheduler<T> {
    pub fn new() -> Self {
        Self {
            queue: BinaryHeap::new(),
            tasks: HashMap::new(),
            cancelled: HashSet::new(),
            next_seq: 0,
        }
    }

    pub fn schedule(&mut self, deadline_ms: u64, task: T) -> TimerId {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push(Reverse((deadline_ms, seq)));
        self.tasks.insert(seq, task);
        TimerId(seq)
    }

    /// Returns the task if it had not fired yet.
    pub fn cancel(&mut self, id: TimerId) -> Option<T> {
        let task = self.tasks.remove(&id.0)?;
        self.cancelled.insert(id.0);
        Some(task)
    }

    /// Pop every task whose deadline is at or before `now_ms`, earliest first.
    /// Tasks sharing a deadline fire in scheduling order.
    pub fn drain_due(&mut self, now_ms: u64) -> Vec<T> {
        let mut due = Vec::new();
        while let Some(Reverse((deadline, seq))) = self.queue.peek().copied() {
            if deadline > now_ms {
                break;
            }
            self.queue.pop();
            if self.cancelled.remove(&seq) {
                continue;
            }
            if let Some(task) = self.tasks.remove(&seq) {
                due.push(task);
            }
        }
        due
    }

    pub fn next_deadline(&self) -> Option<u64> {
        self.queue
            .iter()
            .filter(|Reverse((_, seq))| !self.cancelled.contains(seq))
            .map(|Reverse((deadline, _))| *deadline)
            .min()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
        self.tasks.clear();
        self.cancelled.clear();
    }
}
