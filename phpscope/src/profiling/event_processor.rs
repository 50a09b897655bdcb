//! # Event Processing
//!
//! Consumes records from the eBPF ring buffer and hands them to the
//! aggregation [`Dispatcher`].
//!
//! ## Output Modes
//!
//! - **Headless**: optional per-event trace lines on stdout (`--trace`)
//! - **Live TUI**: periodic [`EngineSnapshot`]s sent to the TUI thread
//! - **Export**: the final snapshot, written by the caller on exit

use crossbeam_channel::{Sender, TrySendError};
use log::warn;
use phpscope_common::ProbeEvent;

use super::event_display::display_event;
use crate::aggregation::{Dispatcher, EngineSnapshot, Event, Outcome};

/// Decode a ring buffer record; `None` if it is shorter than a [`ProbeEvent`]
#[must_use]
pub fn decode_record(bytes: &[u8]) -> Option<ProbeEvent> {
    if bytes.len() < std::mem::size_of::<ProbeEvent>() {
        return None;
    }
    // SAFETY: the length was checked above and ProbeEvent is plain old data
    // written by the probes with the same #[repr(C)] layout
    #[allow(unsafe_code)]
    let event = unsafe { std::ptr::read_unaligned(bytes.as_ptr().cast::<ProbeEvent>()) };
    Some(event)
}

/// Encapsulates event processing logic and state
pub struct EventProcessor {
    dispatcher: Dispatcher,
    trace: bool,

    pub event_count: u64,
    /// Records shorter than a `ProbeEvent` (dropped)
    pub short_records: u64,
    pub snapshots_sent: u64,
    /// Snapshots skipped because the TUI had not consumed the previous ones
    pub snapshots_dropped: u64,

    snapshot_tx: Option<Sender<EngineSnapshot>>,
}

impl EventProcessor {
    #[must_use]
    pub fn new(
        dispatcher: Dispatcher,
        trace: bool,
        snapshot_tx: Option<Sender<EngineSnapshot>>,
    ) -> Self {
        Self {
            dispatcher,
            trace,
            event_count: 0,
            short_records: 0,
            snapshots_sent: 0,
            snapshots_dropped: 0,
            snapshot_tx,
        }
    }

    #[must_use]
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Process one raw ring buffer record
    pub fn process_record(&mut self, bytes: &[u8]) -> Option<Outcome> {
        let Some(event) = decode_record(bytes) else {
            self.short_records += 1;
            warn!("Received incomplete event ({} bytes)", bytes.len());
            return None;
        };
        Some(self.process_event(&event))
    }

    /// Process a single decoded probe event
    pub fn process_event(&mut self, raw: &ProbeEvent) -> Outcome {
        self.event_count += 1;

        let Some(event) = Event::decode(raw) else {
            warn!("Unknown event type: {}", raw.event_type);
            return self.dispatcher.dispatch_raw(raw);
        };

        let outcome = self.dispatcher.dispatch(&event);
        if self.trace {
            display_event(raw.pid, &event, outcome);
        }
        outcome
    }

    #[must_use]
    pub fn snapshot(&self) -> EngineSnapshot {
        self.dispatcher.snapshot()
    }

    /// Send a fresh snapshot to the TUI without blocking.
    ///
    /// No snapshot is built while the channel is full. Returns `false` once
    /// the TUI has gone away.
    pub fn publish_snapshot(&mut self) -> bool {
        let Some(tx) = &self.snapshot_tx else {
            return true;
        };
        if tx.is_full() {
            self.snapshots_dropped += 1;
            return true;
        }
        match tx.try_send(self.dispatcher.snapshot()) {
            Ok(()) => {
                self.snapshots_sent += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                self.snapshots_dropped += 1;
                true
            }
            Err(TrySendError::Disconnected(_)) => {
                self.snapshot_tx = None;
                false
            }
        }
    }

    /// Drop the snapshot channel so the TUI thread can finish
    pub fn close_snapshots(&mut self) {
        self.snapshot_tx = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::{Aggregates, KeyNormalizer};
    use crossbeam_channel::bounded;
    use phpscope_common::{EVENT_REQUEST_END, EVENT_REQUEST_START};
    use std::sync::Arc;

    fn processor(tx: Option<Sender<EngineSnapshot>>) -> EventProcessor {
        let dispatcher = Dispatcher::new(Arc::new(Aggregates::default()), KeyNormalizer::Directory);
        EventProcessor::new(dispatcher, false, tx)
    }

    fn as_bytes(event: &ProbeEvent) -> Vec<u8> {
        let size = std::mem::size_of::<ProbeEvent>();
        // SAFETY: ProbeEvent is #[repr(C)] plain data
        #[allow(unsafe_code)]
        let bytes =
            unsafe { std::slice::from_raw_parts((event as *const ProbeEvent).cast::<u8>(), size) };
        bytes.to_vec()
    }

    #[test]
    fn test_short_record_is_dropped() {
        let mut p = processor(None);
        assert_eq!(p.process_record(&[0u8; 16]), None);
        assert_eq!(p.short_records, 1);
        assert_eq!(p.event_count, 0);
    }

    #[test]
    fn test_record_roundtrip_through_ring_bytes() {
        let mut p = processor(None);

        let mut start = ProbeEvent::empty(EVENT_REQUEST_START);
        start.tid = 42;
        start.timestamp_ns = 1_000;
        let mut end = start;
        end.event_type = EVENT_REQUEST_END;
        end.timestamp_ns = 1_500;

        assert_eq!(p.process_record(&as_bytes(&start)), Some(Outcome::Pending));
        assert_eq!(
            p.process_record(&as_bytes(&end)),
            Some(Outcome::Completed { elapsed_ns: 500 })
        );
        assert_eq!(p.event_count, 2);
    }

    #[test]
    fn test_unknown_type_counts_as_unroutable() {
        let mut p = processor(None);
        let outcome = p.process_event(&ProbeEvent::empty(42));
        assert_eq!(outcome, Outcome::Unroutable { raw_kind: 42 });
        assert_eq!(p.snapshot().dispatch.unroutable, 1);
    }

    #[test]
    fn test_publish_snapshot_never_blocks() {
        let (tx, rx) = bounded(1);
        let mut p = processor(Some(tx));

        assert!(p.publish_snapshot());
        assert!(p.publish_snapshot());
        assert_eq!(p.snapshots_sent, 1);
        assert_eq!(p.snapshots_dropped, 1);

        drop(rx);
        assert!(!p.publish_snapshot());
    }

    #[test]
    fn test_full_channel_keeps_queued_snapshot() {
        let (tx, rx) = bounded(1);
        let mut p = processor(Some(tx));

        assert!(p.publish_snapshot());
        p.process_event(&ProbeEvent::empty(EVENT_REQUEST_START));
        assert!(p.publish_snapshot());
        assert_eq!(p.snapshots_dropped, 1);

        let queued = rx.try_recv().unwrap();
        assert_eq!(queued.requests.started, 0);

        assert!(p.publish_snapshot());
        let fresh = rx.try_recv().unwrap();
        assert_eq!(fresh.requests.started, 1);
        assert_eq!(p.snapshots_sent, 2);
    }
}
