//! Base-2 exponential histogram.
//!
//! Bucket layout for `max_slot = 4`:
//!
//! ```text
//! bucket   0      1      2        3        4
//! range   [0]   [1,2)  [2,4)    [4,8)    [8,∞)   ← overflow
//! ```
//!
//! Bucket `i ≥ 1` covers `[2^(i-1), 2^i)`, i.e. the index is the bit length of
//! the value, clamped to `max_slot`. Counts live in a [`BoundedCountingMap`]
//! keyed by bucket index with room for exactly `max_slot + 1` keys, so the
//! histogram never evicts.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

use super::bounded_map::BoundedCountingMap;

/// Default highest bucket (values ≥ 2^21 share the overflow bucket)
pub const DEFAULT_MAX_SLOT: u32 = 22;

/// Highest usable slot: a `u64` has at most 64 significant bits
pub const MAX_SUPPORTED_SLOT: u32 = 64;

/// Bucket index for `value`, in `[0, max_slot]`
#[must_use]
pub fn bucket_index(value: u64, max_slot: u32) -> u32 {
    (u64::BITS - value.leading_zeros()).min(max_slot)
}

/// Inclusive lower bound and exclusive upper bound of bucket `index`.
///
/// The upper bound is `None` for the overflow bucket (and for bucket 64,
/// whose bound does not fit in a `u64`). An `index` past the overflow bucket
/// is treated as the overflow bucket.
#[must_use]
pub fn bucket_bounds(index: u32, max_slot: u32) -> (u64, Option<u64>) {
    let max_slot = max_slot.min(MAX_SUPPORTED_SLOT);
    let index = index.min(max_slot);
    let lower = if index == 0 { 0 } else { 1u64 << (index - 1) };
    let upper = if index >= max_slot { None } else { 1u64.checked_shl(index) };
    (lower, upper)
}

/// Exponential histogram of observed magnitudes
#[derive(Debug)]
pub struct Exp2Histogram {
    buckets: BoundedCountingMap<u32>,
    max_slot: u32,
    sum: AtomicU64,
    count: AtomicU64,
}

impl Exp2Histogram {
    /// `max_slot` is clamped to [`MAX_SUPPORTED_SLOT`]
    #[must_use]
    pub fn new(max_slot: u32) -> Self {
        let max_slot = max_slot.min(MAX_SUPPORTED_SLOT);
        Self {
            buckets: BoundedCountingMap::new(max_slot as usize + 1),
            max_slot,
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn max_slot(&self) -> u32 {
        self.max_slot
    }

    /// Record one observation and return the bucket it landed in
    pub fn observe(&self, value: u64) -> u32 {
        let bucket = bucket_index(value, self.max_slot);
        self.buckets.increment(bucket, 1);
        self.count.fetch_add(1, Ordering::Relaxed);
        // Saturating add: fetch_update never fails with an always-Some closure
        let _ = self.sum.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |s| {
            Some(s.saturating_add(value))
        });
        bucket
    }

    /// Count in bucket `index`
    #[must_use]
    pub fn bucket_count(&self, index: u32) -> u64 {
        self.buckets.peek(&index).unwrap_or(0)
    }

    /// Dense snapshot with one entry per bucket, zeros included
    #[must_use]
    pub fn snapshot(&self) -> HistogramSnapshot {
        let mut counts = vec![0u64; self.max_slot as usize + 1];
        for (bucket, count) in self.buckets.snapshot() {
            if let Some(slot) = counts.get_mut(bucket as usize) {
                *slot = count;
            }
        }

        let buckets = counts
            .into_iter()
            .zip(0u32..)
            .map(|(count, index)| {
                let (lower, upper) = bucket_bounds(index, self.max_slot);
                BucketCount { index, lower, upper, count }
            })
            .collect();

        HistogramSnapshot {
            max_slot: self.max_slot,
            count: self.count.load(Ordering::Relaxed),
            sum: self.sum.load(Ordering::Relaxed),
            buckets,
        }
    }
}

/// Point-in-time copy of an [`Exp2Histogram`]
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct HistogramSnapshot {
    pub max_slot: u32,
    /// Number of observations
    pub count: u64,
    /// Saturating sum of observed values
    pub sum: u64,
    pub buckets: Vec<BucketCount>,
}

impl HistogramSnapshot {
    /// Largest bucket count (for scaling bar charts)
    #[must_use]
    pub fn peak(&self) -> u64 {
        self.buckets.iter().map(|b| b.count).max().unwrap_or(0)
    }

    /// Buckets between the first and last non-empty one
    #[must_use]
    pub fn occupied_range(&self) -> &[BucketCount] {
        let first = self.buckets.iter().position(|b| b.count > 0);
        let last = self.buckets.iter().rposition(|b| b.count > 0);
        match (first, last) {
            (Some(first), Some(last)) => &self.buckets[first..=last],
            _ => &[],
        }
    }
}

/// One bucket of a [`HistogramSnapshot`]
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct BucketCount {
    pub index: u32,
    /// Inclusive lower bound
    pub lower: u64,
    /// Exclusive upper bound; `None` for the overflow bucket
    pub upper: Option<u64>,
    pub count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_index_zero() {
        assert_eq!(bucket_index(0, DEFAULT_MAX_SLOT), 0);
    }

    #[test]
    fn test_bucket_index_powers_of_two() {
        assert_eq!(bucket_index(1, 22), 1);
        assert_eq!(bucket_index(2, 22), 2);
        assert_eq!(bucket_index(3, 22), 2);
        assert_eq!(bucket_index(4, 22), 3);
        assert_eq!(bucket_index(1023, 22), 10);
        assert_eq!(bucket_index(1024, 22), 11);
    }

    #[test]
    fn test_bucket_index_saturates() {
        assert_eq!(bucket_index(1 << 21, 22), 22);
        assert_eq!(bucket_index(1 << 30, 22), 22);
        assert_eq!(bucket_index(u64::MAX, 22), 22);
        assert_eq!(bucket_index(u64::MAX, 64), 64);
        assert_eq!(bucket_index(5, 0), 0);
    }

    #[test]
    fn test_bucket_bounds_clamp_out_of_range_index() {
        assert_eq!(bucket_bounds(65, 64), (1u64 << 63, None));
        assert_eq!(bucket_bounds(u32::MAX, u32::MAX), (1u64 << 63, None));
        assert_eq!(bucket_bounds(30, 22), (1u64 << 21, None));
    }

    #[test]
    fn test_bucket_bounds_contain_their_values() {
        let max_slot = 22;
        for value in [0u64, 1, 2, 3, 7, 8, 100, 4096, 1 << 20, (1 << 21) - 1] {
            let (lower, upper) = bucket_bounds(bucket_index(value, max_slot), max_slot);
            assert!(value >= lower, "{value} below bucket lower bound {lower}");
            if let Some(upper) = upper {
                assert!(value < upper, "{value} not below bucket upper bound {upper}");
            }
        }
        assert_eq!(bucket_bounds(22, 22), (1 << 21, None));
        assert_eq!(bucket_bounds(64, 64), (1 << 63, None));
    }

    #[test]
    fn test_observe_fills_buckets() {
        let hist = Exp2Histogram::new(4);
        for value in [0, 1, 3, 3, 100, 1_000_000] {
            hist.observe(value);
        }

        assert_eq!(hist.bucket_count(0), 1);
        assert_eq!(hist.bucket_count(1), 1);
        assert_eq!(hist.bucket_count(2), 2);
        assert_eq!(hist.bucket_count(3), 0);
        assert_eq!(hist.bucket_count(4), 2);

        let snapshot = hist.snapshot();
        assert_eq!(snapshot.buckets.len(), 5);
        assert_eq!(snapshot.count, 6);
        assert_eq!(snapshot.sum, 1_000_107);
        assert_eq!(snapshot.peak(), 2);
    }

    #[test]
    fn test_sum_saturates() {
        let hist = Exp2Histogram::new(22);
        hist.observe(u64::MAX);
        hist.observe(10);
        assert_eq!(hist.snapshot().sum, u64::MAX);
    }

    #[test]
    fn test_max_slot_is_clamped() {
        let hist = Exp2Histogram::new(100);
        assert_eq!(hist.max_slot(), MAX_SUPPORTED_SLOT);
        assert_eq!(hist.observe(u64::MAX), 64);
    }

    #[test]
    fn test_occupied_range() {
        let hist = Exp2Histogram::new(10);
        assert!(hist.snapshot().occupied_range().is_empty());

        hist.observe(4);
        hist.observe(64);
        let snapshot = hist.snapshot();
        let range = snapshot.occupied_range();
        assert_eq!(range.first().map(|b| b.index), Some(3));
        assert_eq!(range.last().map(|b| b.index), Some(7));
    }
}
