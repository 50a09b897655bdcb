//! # Event Aggregation Engine
//!
//! Bounded in-memory tables fed by probe events:
//!
//! - [`bounded_map`]: counting map with LRU eviction
//! - [`key`]: fixed-width keys and path normalization
//! - [`histogram`]: base-2 exponential bucketing
//! - [`correlation`]: request start/end pairing
//! - [`dispatcher`]: routes each event to one table
//!
//! Every table takes `&self` and is safe to share across threads; none of
//! them grows past its configured capacity.

pub mod bounded_map;
pub mod correlation;
pub mod dispatcher;
pub mod event;
pub mod histogram;
pub mod key;
pub mod snapshot;

pub use bounded_map::{BoundedCountingMap, BoundedMap};
pub use correlation::{CorrelationStats, RequestCorrelationTable};
pub use dispatcher::{Aggregates, Dispatcher, Outcome};
pub use event::{Event, EventKind, RequestInfo};
pub use histogram::{bucket_bounds, bucket_index, BucketCount, Exp2Histogram, HistogramSnapshot};
pub use key::{truncate_to_parent, ClassKey, FixedKey, KeyNormalizer, MethodKey, PathKey};
pub use snapshot::{CountEntry, DispatchStats, EngineSnapshot};
