//! # EDF Ready Set
//!
//! Ready tasks ordered by absolute deadline, earliest first. Ties go to the
//! task created first, so selection is deterministic even when a release and
//! a tick land on the same instant.
//!
//! The set is a sorted `heapless::Vec` bounded by `MAX_TASKS`: insertion is
//! a single bubble pass, selection reads the head.

use heapless::Vec;

use crate::config::MAX_TASKS;
use crate::task::Tick;

/// Sort key of a Ready task. Derived ordering compares the deadline first,
/// then the creation index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ReadyEntry {
    pub deadline: Tick,
    /// TCB index; tasks are created in index order.
    pub task: usize,
}

pub struct ReadySet {
    entries: Vec<ReadyEntry, MAX_TASKS>,
}

impl ReadySet {
    pub const fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Queue a task. A task already present is re-keyed.
    ///
    /// Returns `false` only if the set is full, which cannot happen while
    /// every entry belongs to a distinct TCB.
    pub fn insert(&mut self, entry: ReadyEntry) -> bool {
        self.remove(entry.task);
        if self.entries.push(entry).is_err() {
            return false;
        }
        let mut i = self.entries.len() - 1;
        while i > 0 && self.entries[i] < self.entries[i - 1] {
            self.entries.swap(i, i - 1);
            i -= 1;
        }
        true
    }

    /// Remove a task if queued. Returns whether it was present.
    pub fn remove(&mut self, task: usize) -> bool {
        let Some(pos) = self.entries.iter().position(|e| e.task == task) else {
            return false;
        };
        for i in pos..self.entries.len() - 1 {
            self.entries.swap(i, i + 1);
        }
        self.entries.pop();
        true
    }

    /// Earliest-deadline entry.
    #[inline]
    pub fn peek(&self) -> Option<ReadyEntry> {
        self.entries.first().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ReadyEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(deadline: Tick, task: usize) -> ReadyEntry {
        ReadyEntry { deadline, task }
    }

    #[test]
    fn test_orders_by_deadline() {
        let mut set = ReadySet::new();
        set.insert(entry(100, 0));
        set.insert(entry(10, 1));
        set.insert(entry(50, 2));

        let order: [usize; 3] = core::array::from_fn(|i| set.iter().nth(i).unwrap().task);
        assert_eq!(order, [1, 2, 0]);
        assert_eq!(set.peek(), Some(entry(10, 1)));
    }

    #[test]
    fn test_tie_goes_to_earlier_created_task() {
        let mut set = ReadySet::new();
        set.insert(entry(50, 3));
        set.insert(entry(50, 1));
        set.insert(entry(50, 2));
        assert_eq!(set.peek().unwrap().task, 1);
    }

    #[test]
    fn test_remove_keeps_order() {
        let mut set = ReadySet::new();
        for (d, t) in [(40, 0), (10, 1), (30, 2), (20, 3)] {
            set.insert(entry(d, t));
        }
        assert!(set.remove(3));
        assert!(!set.remove(3));
        assert_eq!(set.len(), 3);
        let deadlines: [Tick; 3] = core::array::from_fn(|i| set.iter().nth(i).unwrap().deadline);
        assert_eq!(deadlines, [10, 30, 40]);
    }

    #[test]
    fn test_reinsert_rekeys() {
        let mut set = ReadySet::new();
        set.insert(entry(10, 0));
        set.insert(entry(20, 1));
        set.insert(entry(30, 0));
        assert_eq!(set.len(), 2);
        assert_eq!(set.peek().unwrap().task, 1);
        assert_eq!(set.iter().nth(1), Some(&entry(30, 0)));
    }

    #[test]
    fn test_capacity_is_task_count() {
        let mut set = ReadySet::new();
        for t in 0..MAX_TASKS {
            assert!(set.insert(entry(t as Tick, t)));
        }
        assert!(!set.insert(entry(0, MAX_TASKS)));
        assert_eq!(set.len(), MAX_TASKS);
    }
}
