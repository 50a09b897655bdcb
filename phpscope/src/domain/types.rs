//! Newtype wrappers for the identifiers flowing through the profiler
//!
//! Keeps PIDs, TIDs and timestamps from being mixed up in signatures.

use std::fmt;

/// Process ID (TGID in Linux terms)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Pid(pub i32);

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PID:{}", self.0)
    }
}

/// Thread ID; the identity that pairs request start and end events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tid(pub u32);

impl fmt::Display for Tid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TID:{}", self.0)
    }
}

/// Monotonic timestamp in nanoseconds (from `bpf_ktime_get_ns()`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// Nanoseconds elapsed since `earlier`, zero if the clock went backwards
    #[must_use]
    pub fn saturating_since(self, earlier: Timestamp) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pid_display() {
        assert_eq!(Pid(1234).to_string(), "PID:1234");
        assert_eq!(Tid(42).to_string(), "TID:42");
    }

    #[test]
    fn test_timestamp_saturating_since() {
        assert_eq!(Timestamp(1500).saturating_since(Timestamp(1000)), 500);
        assert_eq!(Timestamp(1000).saturating_since(Timestamp(1500)), 0);
    }
}
