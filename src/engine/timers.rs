//! Cancellable deferred-operation queue.
//!
//! Round resets, staggered bot joins, and latency-delayed commands are the
//! only deferred work in the engine. They are stored here keyed by due time
//! and fired by the scheduler on its next advance. Entries with the same due
//! time fire in scheduling order.

use std::collections::{BTreeMap, HashMap};

/// Handle returned by [`TimerQueue::schedule`], used to cancel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

#[derive(Debug)]
pub struct TimerQueue<T> {
    entries: BTreeMap<(i64, u64), T>,
    due_by_id: HashMap<u64, i64>,
    next_id: u64,
}

impl<T> Default for TimerQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TimerQueue<T> {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            due_by_id: HashMap::new(),
            next_id: 0,
        }
    }

    pub fn schedule(&mut self, due_ms: i64, item: T) -> TimerId {
        self.next_id += 1;
        let id = self.next_id;
        self.entries.insert((due_ms, id), item);
        self.due_by_id.insert(id, due_ms);
        TimerId(id)
    }

    /// Cancel a pending entry. Returns the item if it had not fired yet.
    pub fn cancel(&mut self, id: TimerId) -> Option<T> {
        let due = self.due_by_id.remove(&id.0)?;
        self.entries.remove(&(due, id.0))
    }

    /// Remove and return the earliest entry due at or before `now_ms`.
    pub fn pop_due(&mut self, now_ms: i64) -> Option<(TimerId, T)> {
        let (&(due, id), _) = self.entries.first_key_value()?;
        if due > now_ms {
            return None;
        }
        self.due_by_id.remove(&id);
        self.entries.remove(&(due, id)).map(|item| (TimerId(id), item))
    }

    pub fn is_pending(&self, id: TimerId) -> bool {
        self.due_by_id.contains_key(&id.0)
    }

    pub fn next_due(&self) -> Option<i64> {
        self.entries.keys().next().map(|&(due, _)| due)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.due_by_id.clear();
    }
}
