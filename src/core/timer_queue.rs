// DbgMux - core/timer_queue.rs
//
// Deadline-ordered registry of scheduled calls, shared by both executor
// flavours. Entries are kept sorted by deadline in descending order so the
// next due entry is always at the back and popping it is O(1).
//
// Invariant: at most one entry per `CallId`.

use std::time::{Duration, Instant};

/// Identity of a scheduled call. Allocated monotonically per executor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallId(pub u64);

/// One registered timer.
#[derive(Debug, Clone)]
pub struct TimerEntry<C> {
    pub id: CallId,
    pub at: Instant,
    /// `None` = one-shot.
    pub interval: Option<Duration>,
    pub callback: C,
}

/// Sorted timer registry.
#[derive(Debug)]
pub struct TimedCalls<C> {
    // Sorted by `at`, latest first.
    entries: Vec<TimerEntry<C>>,
}

impl<C> Default for TimedCalls<C> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<C: Clone> TimedCalls<C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert (or replace) the entry for `entry.id`.
    pub fn insert(&mut self, entry: TimerEntry<C>) {
        self.remove(entry.id);
        self.insert_sorted(entry);
    }

    /// Remove and return the entry for `id`.
    pub fn remove(&mut self, id: CallId) -> Option<TimerEntry<C>> {
        let index = self.entries.iter().position(|e| e.id == id)?;
        Some(self.entries.remove(index))
    }

    pub fn contains(&self, id: CallId) -> bool {
        self.entries.iter().any(|e| e.id == id)
    }

    /// Deadline of the earliest entry.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.last().map(|e| e.at)
    }

    /// Remove the earliest entry and return it. A repeating entry is
    /// re-inserted with deadline `at + interval`, so cumulative drift is zero
    /// regardless of how late it fired.
    pub fn pop(&mut self) -> Option<TimerEntry<C>> {
        let entry = self.entries.pop()?;
        if let Some(interval) = entry.interval {
            let mut next = entry.clone();
            next.at = entry.at + interval;
            self.insert_sorted(next);
        }
        Some(entry)
    }

    /// `pop`, but only if the earliest entry is due at `now`.
    pub fn pop_due(&mut self, now: Instant) -> Option<TimerEntry<C>> {
        match self.next_deadline() {
            Some(at) if at <= now => self.pop(),
            _ => None,
        }
    }

    fn insert_sorted(&mut self, entry: TimerEntry<C>) {
        // Equal deadlines go behind existing ones in the vector, which makes
        // them pop first; that is fine, ties have no ordering guarantee.
        let index = self.entries.partition_point(|e| e.at > entry.at);
        self.entries.insert(index, entry);
    }
}
