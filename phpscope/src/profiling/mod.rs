//! Probe plumbing around the aggregation engine
//!
//! - USDT note parsing and argument descriptors
//! - Process memory maps and probe semaphores
//! - eBPF program loading and attachment
//! - Ring buffer event processing
//! - Trace and summary formatting
//! - Probe-side diagnostics

pub mod diagnostics;
pub mod ebpf_setup;
pub mod event_display;
pub mod event_processor;
pub mod memory_maps;
pub mod usdt;

// Re-export common types
pub use diagnostics::{lost_events, print_ring_buffer_diagnostics};
pub use ebpf_setup::{
    attach_memcached_uprobe, attach_php_probes, init_ebpf_logger, load_ebpf_program,
    set_target_pid, AttachSummary, PHP_PROBES,
};
pub use event_display::{display_event, display_summary, format_event, format_summary};
pub use event_processor::{decode_record, EventProcessor};
pub use memory_maps::{library_mappings, MapEntry, SemaphoreSet};
pub use usdt::{probes_from_elf, read_probes, UsdtProbe};
