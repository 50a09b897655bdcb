//! Read-only views of the aggregation tables for reporting and export

use serde::Serialize;
use std::fmt::Display;

use super::correlation::CorrelationStats;
use super::histogram::HistogramSnapshot;

/// One counter, keyed by its display form
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CountEntry {
    pub key: String,
    pub count: u64,
}

impl CountEntry {
    /// Convert map entries, highest count first (ties broken by key)
    pub fn sorted<K: Display>(entries: Vec<(K, u64)>) -> Vec<Self> {
        let mut out: Vec<Self> = entries
            .into_iter()
            .map(|(key, count)| Self { key: key.to_string(), count })
            .collect();
        out.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.key.cmp(&b.key)));
        out
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct DispatchStats {
    pub dispatched: u64,
    /// Records with an unknown event kind (dropped)
    pub unroutable: u64,
}

/// Everything the engine knows at one instant
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct EngineSnapshot {
    pub compiled_files: Vec<CountEntry>,
    pub compiled_files_evicted: u64,
    pub exceptions_thrown: Vec<CountEntry>,
    pub exceptions_caught: Vec<CountEntry>,
    /// Observed value sizes (bytes)
    pub value_sizes: HistogramSnapshot,
    /// Completed request latencies (microseconds)
    pub request_latency_us: HistogramSnapshot,
    pub requests: CorrelationStats,
    pub dispatch: DispatchStats,
}

impl EngineSnapshot {
    #[must_use]
    pub fn total_compiles(&self) -> u64 {
        total(&self.compiled_files)
    }

    #[must_use]
    pub fn total_thrown(&self) -> u64 {
        total(&self.exceptions_thrown)
    }

    #[must_use]
    pub fn total_caught(&self) -> u64 {
        total(&self.exceptions_caught)
    }
}

fn total(entries: &[CountEntry]) -> u64 {
    entries.iter().fold(0u64, |acc, e| acc.saturating_add(e.count))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sorted_by_count_then_key() {
        let entries = vec![("b", 1), ("c", 5), ("a", 1)];
        let sorted = CountEntry::sorted(entries);
        let keys: Vec<_> = sorted.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, ["c", "a", "b"]);
    }

    #[test]
    fn test_total_saturates() {
        let entries = CountEntry::sorted(vec![("x", u64::MAX), ("y", 3)]);
        assert_eq!(total(&entries), u64::MAX);
    }
}
