//! Typed events decoded from raw probe records

use phpscope_common::{
    ProbeEvent, EVENT_EXCEPTION_CAUGHT, EVENT_EXCEPTION_THROWN, EVENT_FILE_COMPILE,
    EVENT_REQUEST_END, EVENT_REQUEST_START, EVENT_VALUE_OBSERVED,
};

use super::key::{ClassKey, MethodKey, PathKey};
use crate::domain::{Tid, Timestamp};

/// Discriminant of a probe record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    FileCompile,
    ExceptionThrown,
    ExceptionCaught,
    RequestStart,
    RequestEnd,
    ValueObserved,
}

impl EventKind {
    /// Map a wire `event_type`; unknown values yield `None`
    #[must_use]
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            EVENT_FILE_COMPILE => Some(Self::FileCompile),
            EVENT_EXCEPTION_THROWN => Some(Self::ExceptionThrown),
            EVENT_EXCEPTION_CAUGHT => Some(Self::ExceptionCaught),
            EVENT_REQUEST_START => Some(Self::RequestStart),
            EVENT_REQUEST_END => Some(Self::RequestEnd),
            EVENT_VALUE_OBSERVED => Some(Self::ValueObserved),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_raw(self) -> u32 {
        match self {
            Self::FileCompile => EVENT_FILE_COMPILE,
            Self::ExceptionThrown => EVENT_EXCEPTION_THROWN,
            Self::ExceptionCaught => EVENT_EXCEPTION_CAUGHT,
            Self::RequestStart => EVENT_REQUEST_START,
            Self::RequestEnd => EVENT_REQUEST_END,
            Self::ValueObserved => EVENT_VALUE_OBSERVED,
        }
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::FileCompile => "compile",
            Self::ExceptionThrown => "thrown",
            Self::ExceptionCaught => "caught",
            Self::RequestStart => "req-start",
            Self::RequestEnd => "req-end",
            Self::ValueObserved => "value",
        }
    }
}

/// Request boundary payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestInfo {
    pub identity: Tid,
    pub timestamp: Timestamp,
    pub uri: PathKey,
    pub method: MethodKey,
}

/// One observation routed by the dispatcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// `path` is the raw compiled filename; normalization happens at dispatch
    FileCompile { path: PathKey },
    ExceptionThrown { class: ClassKey },
    ExceptionCaught { class: ClassKey },
    RequestStart(RequestInfo),
    RequestEnd(RequestInfo),
    ValueObserved { magnitude: u64 },
}

impl Event {
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::FileCompile { .. } => EventKind::FileCompile,
            Self::ExceptionThrown { .. } => EventKind::ExceptionThrown,
            Self::ExceptionCaught { .. } => EventKind::ExceptionCaught,
            Self::RequestStart(_) => EventKind::RequestStart,
            Self::RequestEnd(_) => EventKind::RequestEnd,
            Self::ValueObserved { .. } => EventKind::ValueObserved,
        }
    }

    /// Decode a raw probe record. Returns `None` for unknown event types.
    ///
    /// String payloads are clamped to their key capacity and cut at the first
    /// NUL, so unterminated buffers are accepted.
    #[must_use]
    pub fn decode(raw: &ProbeEvent) -> Option<Self> {
        let kind = EventKind::from_raw(raw.event_type)?;
        let request = || RequestInfo {
            identity: Tid(raw.tid),
            timestamp: Timestamp(raw.timestamp_ns),
            uri: PathKey::from_bytes(&raw.text),
            method: MethodKey::from_bytes(&raw.method),
        };

        Some(match kind {
            EventKind::FileCompile => Self::FileCompile { path: PathKey::from_bytes(&raw.text) },
            EventKind::ExceptionThrown => {
                Self::ExceptionThrown { class: ClassKey::from_bytes(&raw.text) }
            }
            EventKind::ExceptionCaught => {
                Self::ExceptionCaught { class: ClassKey::from_bytes(&raw.text) }
            }
            EventKind::RequestStart => Self::RequestStart(request()),
            EventKind::RequestEnd => Self::RequestEnd(request()),
            EventKind::ValueObserved => Self::ValueObserved { magnitude: raw.value },
        })
    }
}
