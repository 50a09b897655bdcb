//! Request start/end correlation.
//!
//! `request__startup` stores a timestamp keyed by the thread that handles the
//! request; `request__shutdown` on the same thread consumes it and yields the
//! elapsed time.
//!
//! ```text
//!            start(id)              end(id)
//!  absent ─────────────▶ pending ─────────────▶ resolved (entry removed)
//!                          │  ▲
//!                          └──┘ start(id) again: last start wins (expired)
//! ```
//!
//! The identity is an OS thread id, which worker pools recycle. A start left
//! behind by a request whose end was never observed will be matched against
//! the next request on that thread only if that request's own start is also
//! lost; otherwise the newer start overwrites it. Either way there is no
//! uniqueness token to tell requests apart, so deltas are approximate.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

use super::bounded_map::BoundedMap;
use crate::domain::{Tid, Timestamp};

/// Default number of simultaneously pending requests
pub const DEFAULT_PENDING_CAPACITY: usize = 10_000;

/// Pending request starts, keyed by thread id
#[derive(Debug)]
pub struct RequestCorrelationTable {
    pending: BoundedMap<Tid, Timestamp>,
    started: AtomicU64,
    resolved: AtomicU64,
    unmatched_ends: AtomicU64,
    overwritten_starts: AtomicU64,
}

impl RequestCorrelationTable {
    /// Table holding at most `capacity` pending starts; the stalest start is
    /// evicted when a new identity arrives at a full table
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            pending: BoundedMap::new(capacity),
            started: AtomicU64::new(0),
            resolved: AtomicU64::new(0),
            unmatched_ends: AtomicU64::new(0),
            overwritten_starts: AtomicU64::new(0),
        }
    }

    /// Record a request start, replacing any pending start for `identity`
    pub fn start(&self, identity: Tid, ts: Timestamp) {
        self.started.fetch_add(1, Ordering::Relaxed);
        if self.pending.insert(identity, ts).is_some() {
            self.overwritten_starts.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Resolve the pending start for `identity`.
    ///
    /// Returns the elapsed nanoseconds (zero if `ts_end` precedes the start),
    /// or `None` when no start is pending. Unmatched ends are only counted.
    pub fn end(&self, identity: Tid, ts_end: Timestamp) -> Option<u64> {
        let Some(ts_start) = self.pending.remove(&identity) else {
            self.unmatched_ends.fetch_add(1, Ordering::Relaxed);
            return None;
        };
        self.resolved.fetch_add(1, Ordering::Relaxed);
        Some(ts_end.saturating_since(ts_start))
    }

    /// Start timestamp pending for `identity`, if any
    #[must_use]
    pub fn pending_start(&self, identity: Tid) -> Option<Timestamp> {
        self.pending.peek(&identity)
    }

    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn stats(&self) -> CorrelationStats {
        CorrelationStats {
            started: self.started.load(Ordering::Relaxed),
            resolved: self.resolved.load(Ordering::Relaxed),
            unmatched_ends: self.unmatched_ends.load(Ordering::Relaxed),
            overwritten_starts: self.overwritten_starts.load(Ordering::Relaxed),
            evicted_starts: self.pending.evictions(),
            pending: self.pending.len() as u64,
        }
    }
}

/// Counters describing how well starts and ends paired up
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct CorrelationStats {
    pub started: u64,
    pub resolved: u64,
    /// Ends that arrived with no pending start (dropped)
    pub unmatched_ends: u64,
    /// Starts that replaced a still-pending start on the same identity
    pub overwritten_starts: u64,
    /// Pending starts evicted because the table was full
    pub evicted_starts: u64,
    pub pending: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_end_yields_delta() {
        let table = RequestCorrelationTable::new(16);
        table.start(Tid(42), Timestamp(1000));

        assert_eq!(table.end(Tid(42), Timestamp(1500)), Some(500));
        assert_eq!(table.pending_len(), 0);
    }

    #[test]
    fn test_unmatched_end_is_dropped() {
        let table = RequestCorrelationTable::new(16);
        assert_eq!(table.end(Tid(99), Timestamp(1500)), None);

        let stats = table.stats();
        assert_eq!(stats.unmatched_ends, 1);
        assert_eq!(stats.resolved, 0);
    }

    #[test]
    fn test_end_consumes_the_start() {
        let table = RequestCorrelationTable::new(16);
        table.start(Tid(7), Timestamp(100));
        assert_eq!(table.end(Tid(7), Timestamp(300)), Some(200));
        assert_eq!(table.end(Tid(7), Timestamp(400)), None);
        assert_eq!(table.stats().unmatched_ends, 1);
    }

    #[test]
    fn test_last_start_wins() {
        let table = RequestCorrelationTable::new(16);
        table.start(Tid(1), Timestamp(100));
        table.start(Tid(1), Timestamp(250));

        assert_eq!(table.pending_start(Tid(1)), Some(Timestamp(250)));
        assert_eq!(table.end(Tid(1), Timestamp(300)), Some(50));
        assert_eq!(table.stats().overwritten_starts, 1);
    }

    #[test]
    fn test_clock_going_backwards_saturates() {
        let table = RequestCorrelationTable::new(16);
        table.start(Tid(1), Timestamp(500));
        assert_eq!(table.end(Tid(1), Timestamp(400)), Some(0));
    }

    #[test]
    fn test_full_table_evicts_stalest_start() {
        let table = RequestCorrelationTable::new(2);
        table.start(Tid(1), Timestamp(10));
        table.start(Tid(2), Timestamp(20));
        table.start(Tid(3), Timestamp(30));

        assert_eq!(table.pending_start(Tid(1)), None);
        assert_eq!(table.end(Tid(3), Timestamp(35)), Some(5));

        let stats = table.stats();
        assert_eq!(stats.evicted_starts, 1);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.started, 3);
    }
}
