use anyhow::{Context, Result};
use aya::maps::HashMap;
use aya::Ebpf;

/// Events the probes could not submit because the ring buffer was full
///
/// # Errors
/// Returns an error if the `OUTPUT_FAILED` map cannot be accessed
pub fn lost_events(bpf: &Ebpf) -> Result<u64> {
    let failed_map: HashMap<_, u32, u64> =
        HashMap::try_from(bpf.map("OUTPUT_FAILED").context("OUTPUT_FAILED map not found")?)?;
    // Absent key: nothing was ever lost
    Ok(failed_map.get(&0u32, 0).unwrap_or(0))
}

/// Print probe-side delivery diagnostics
///
/// # Errors
/// Returns an error if the eBPF diagnostic maps cannot be accessed
pub fn print_ring_buffer_diagnostics(bpf: &Ebpf) -> Result<()> {
    let lost = lost_events(bpf)?;
    if lost > 0 {
        eprintln!("warning: {lost} events lost (ring buffer full)");
    }
    Ok(())
}
