//! Event routing into the aggregation tables.
//!
//! | Event | Destination |
//! |-------|-------------|
//! | file-compile | normalizer → `compiled_files` |
//! | exception-thrown | `exceptions_thrown` |
//! | exception-caught | `exceptions_caught` |
//! | request-start / request-end | `requests` (correlation) → `request_latency_us` |
//! | value-observed | `value_sizes` |
//!
//! The dispatcher holds no aggregation logic of its own. Each call runs to
//! completion on the caller's thread.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use phpscope_common::ProbeEvent;

use super::bounded_map::BoundedCountingMap;
use super::correlation::RequestCorrelationTable;
use super::event::Event;
use super::histogram::Exp2Histogram;
use super::key::{ClassKey, KeyNormalizer, PathKey};
use super::snapshot::{CountEntry, DispatchStats, EngineSnapshot};
use crate::config::EngineConfig;

/// The engine's aggregation tables
#[derive(Debug)]
pub struct Aggregates {
    pub compiled_files: BoundedCountingMap<PathKey>,
    pub exceptions_thrown: BoundedCountingMap<ClassKey>,
    pub exceptions_caught: BoundedCountingMap<ClassKey>,
    pub requests: RequestCorrelationTable,
    pub value_sizes: Exp2Histogram,
    pub request_latency_us: Exp2Histogram,
}

impl Aggregates {
    #[must_use]
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            compiled_files: BoundedCountingMap::new(config.compiled_files_capacity),
            exceptions_thrown: BoundedCountingMap::new(config.exceptions_capacity),
            exceptions_caught: BoundedCountingMap::new(config.exceptions_capacity),
            requests: RequestCorrelationTable::new(config.pending_requests_capacity),
            value_sizes: Exp2Histogram::new(config.max_slot),
            request_latency_us: Exp2Histogram::new(config.max_slot),
        }
    }
}

impl Default for Aggregates {
    fn default() -> Self {
        Self::new(&EngineConfig::default())
    }
}

/// What a dispatched event did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// A counter keyed by a path or class was incremented
    Counted,
    /// A magnitude landed in histogram bucket `bucket`
    Bucketed { bucket: u32 },
    /// A request start is now pending
    Pending,
    /// A request end matched its start
    Completed { elapsed_ns: u64 },
    /// A request end arrived with no pending start
    Unmatched,
    /// The raw record had an unknown kind
    Unroutable { raw_kind: u32 },
}

/// Routes events to the tables of a shared [`Aggregates`]
#[derive(Debug)]
pub struct Dispatcher {
    aggregates: Arc<Aggregates>,
    normalizer: KeyNormalizer,
    dispatched: AtomicU64,
    unroutable: AtomicU64,
}

impl Dispatcher {
    #[must_use]
    pub fn new(aggregates: Arc<Aggregates>, normalizer: KeyNormalizer) -> Self {
        Self {
            aggregates,
            normalizer,
            dispatched: AtomicU64::new(0),
            unroutable: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn aggregates(&self) -> &Arc<Aggregates> {
        &self.aggregates
    }

    /// Route one typed event to exactly one table
    pub fn dispatch(&self, event: &Event) -> Outcome {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
        let agg = &self.aggregates;

        match event {
            Event::FileCompile { path } => {
                let key = self.normalizer.normalize(path.as_bytes());
                agg.compiled_files.increment(key, 1);
                Outcome::Counted
            }
            Event::ExceptionThrown { class } => {
                agg.exceptions_thrown.increment(*class, 1);
                Outcome::Counted
            }
            Event::ExceptionCaught { class } => {
                agg.exceptions_caught.increment(*class, 1);
                Outcome::Counted
            }
            Event::RequestStart(info) => {
                agg.requests.start(info.identity, info.timestamp);
                Outcome::Pending
            }
            Event::RequestEnd(info) => match agg.requests.end(info.identity, info.timestamp) {
                Some(elapsed_ns) => {
                    agg.request_latency_us.observe(elapsed_ns / 1_000);
                    Outcome::Completed { elapsed_ns }
                }
                None => Outcome::Unmatched,
            },
            Event::ValueObserved { magnitude } => {
                let bucket = agg.value_sizes.observe(*magnitude);
                Outcome::Bucketed { bucket }
            }
        }
    }

    /// Decode and route a raw probe record; unknown kinds are dropped and counted
    pub fn dispatch_raw(&self, raw: &ProbeEvent) -> Outcome {
        match Event::decode(raw) {
            Some(event) => self.dispatch(&event),
            None => {
                self.unroutable.fetch_add(1, Ordering::Relaxed);
                Outcome::Unroutable { raw_kind: raw.event_type }
            }
        }
    }

    #[must_use]
    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            dispatched: self.dispatched.load(Ordering::Relaxed),
            unroutable: self.unroutable.load(Ordering::Relaxed),
        }
    }

    /// Point-in-time copy of every table
    #[must_use]
    pub fn snapshot(&self) -> EngineSnapshot {
        let agg = &self.aggregates;
        EngineSnapshot {
            compiled_files: CountEntry::sorted(agg.compiled_files.snapshot()),
            compiled_files_evicted: agg.compiled_files.evictions(),
            exceptions_thrown: CountEntry::sorted(agg.exceptions_thrown.snapshot()),
            exceptions_caught: CountEntry::sorted(agg.exceptions_caught.snapshot()),
            value_sizes: agg.value_sizes.snapshot(),
            request_latency_us: agg.request_latency_us.snapshot(),
            requests: agg.requests.stats(),
            dispatch: self.stats(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::event::RequestInfo;
    use crate::aggregation::key::MethodKey;
    use crate::domain::{Tid, Timestamp};

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(Arc::new(Aggregates::default()), KeyNormalizer::Directory)
    }

    fn request(tid: u32, ts: u64) -> RequestInfo {
        RequestInfo {
            identity: Tid(tid),
            timestamp: Timestamp(ts),
            uri: PathKey::from_bytes(b"/"),
            method: MethodKey::from_bytes(b"GET"),
        }
    }

    #[test]
    fn test_compile_is_counted_by_directory() {
        let d = dispatcher();
        for file in [&b"/srv/app/a.php"[..], b"/srv/app/b.php", b"/srv/lib/c.php"] {
            let outcome = d.dispatch(&Event::FileCompile { path: PathKey::from_bytes(file) });
            assert_eq!(outcome, Outcome::Counted);
        }

        let files = &d.aggregates().compiled_files;
        assert_eq!(files.get_or_zero(&PathKey::from_bytes(b"/srv/app/")), 2);
        assert_eq!(files.get_or_zero(&PathKey::from_bytes(b"/srv/lib/")), 1);
        assert_eq!(files.len(), 2);
    }

    #[test]
    fn test_thrown_and_caught_are_separate() {
        let d = dispatcher();
        let class = ClassKey::from_bytes(b"RuntimeException");
        d.dispatch(&Event::ExceptionThrown { class });
        d.dispatch(&Event::ExceptionThrown { class });
        d.dispatch(&Event::ExceptionCaught { class });

        assert_eq!(d.aggregates().exceptions_thrown.get_or_zero(&class), 2);
        assert_eq!(d.aggregates().exceptions_caught.get_or_zero(&class), 1);
    }

    #[test]
    fn test_request_pair_records_latency() {
        let d = dispatcher();
        assert_eq!(d.dispatch(&Event::RequestStart(request(42, 1_000_000))), Outcome::Pending);
        assert_eq!(
            d.dispatch(&Event::RequestEnd(request(42, 3_500_000))),
            Outcome::Completed { elapsed_ns: 2_500_000 }
        );

        // 2500us has bit length 12
        assert_eq!(d.aggregates().request_latency_us.bucket_count(12), 1);
        assert_eq!(d.dispatch(&Event::RequestEnd(request(42, 4_000_000))), Outcome::Unmatched);
    }

    #[test]
    fn test_value_is_bucketed() {
        let d = dispatcher();
        assert_eq!(
            d.dispatch(&Event::ValueObserved { magnitude: 1024 }),
            Outcome::Bucketed { bucket: 11 }
        );
    }

    #[test]
    fn test_unknown_raw_kind_is_dropped() {
        let d = dispatcher();
        let outcome = d.dispatch_raw(&ProbeEvent::empty(99));

        assert_eq!(outcome, Outcome::Unroutable { raw_kind: 99 });
        let stats = d.stats();
        assert_eq!(stats.unroutable, 1);
        assert_eq!(stats.dispatched, 0);
    }

    #[test]
    fn test_snapshot_sorted_by_count() {
        let d = dispatcher();
        let a = ClassKey::from_bytes(b"A");
        let b = ClassKey::from_bytes(b"B");
        d.dispatch(&Event::ExceptionThrown { class: a });
        for _ in 0..3 {
            d.dispatch(&Event::ExceptionThrown { class: b });
        }

        let snapshot = d.snapshot();
        let names: Vec<_> = snapshot.exceptions_thrown.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(names, ["B", "A"]);
        assert_eq!(snapshot.dispatch.dispatched, 4);
    }
}
