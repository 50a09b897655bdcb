// Time conversions intentionally lose precision for display purposes
#![allow(clippy::cast_precision_loss)]

use std::fmt::Write as _;

use crate::aggregation::{Event, EngineSnapshot, HistogramSnapshot, Outcome};

/// Rows shown per table in headless summaries
pub const SUMMARY_TOP_N: usize = 10;

/// One trace line for a dispatched event
#[must_use]
pub fn format_event(pid: u32, event: &Event, outcome: Outcome) -> String {
    let label = event.kind().label();
    match (event, outcome) {
        (Event::FileCompile { path }, _) => format!("[{label}] pid={pid} file={path}"),
        (Event::ExceptionThrown { class } | Event::ExceptionCaught { class }, _) => {
            format!("[{label}] pid={pid} class={class}")
        }
        (Event::RequestStart(req), _) => format!(
            "[{label}] pid={pid} tid={} {} {}",
            req.identity.0, req.method, req.uri
        ),
        (Event::RequestEnd(req), Outcome::Completed { elapsed_ns }) => format!(
            "[{label}] pid={pid} tid={} {} {} elapsed={}us",
            req.identity.0,
            req.method,
            req.uri,
            elapsed_ns / 1_000
        ),
        (Event::RequestEnd(req), _) => format!(
            "[{label}] pid={pid} tid={} {} {} (no matching start)",
            req.identity.0, req.method, req.uri
        ),
        (Event::ValueObserved { magnitude }, Outcome::Bucketed { bucket }) => {
            format!("[{label}] pid={pid} length={magnitude} bucket={bucket}")
        }
        (Event::ValueObserved { magnitude }, _) => format!("[{label}] pid={pid} length={magnitude}"),
    }
}

/// Print a trace line for a dispatched event
pub fn display_event(pid: u32, event: &Event, outcome: Outcome) {
    println!("{}", format_event(pid, event, outcome));
}

/// Multi-line summary used by headless mode
#[must_use]
pub fn format_summary(snapshot: &EngineSnapshot, top_n: usize) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "── compiled files: {} total, {} keys, {} evicted",
        snapshot.total_compiles(),
        snapshot.compiled_files.len(),
        snapshot.compiled_files_evicted
    );
    for entry in snapshot.compiled_files.iter().take(top_n) {
        let _ = writeln!(out, "  {:>10}  {}", entry.count, entry.key);
    }

    let _ = writeln!(out, "── exceptions thrown: {}", snapshot.total_thrown());
    for entry in snapshot.exceptions_thrown.iter().take(top_n) {
        let _ = writeln!(out, "  {:>10}  {}", entry.count, entry.key);
    }
    let _ = writeln!(out, "── exceptions caught: {}", snapshot.total_caught());
    for entry in snapshot.exceptions_caught.iter().take(top_n) {
        let _ = writeln!(out, "  {:>10}  {}", entry.count, entry.key);
    }

    let req = &snapshot.requests;
    let _ = writeln!(
        out,
        "── requests: {} started, {} completed, {} pending, {} unmatched ends, {} overwritten",
        req.started, req.resolved, req.pending, req.unmatched_ends, req.overwritten_starts
    );
    format_histogram(&mut out, "request latency (us)", &snapshot.request_latency_us);
    format_histogram(&mut out, "memcached value length (bytes)", &snapshot.value_sizes);

    if snapshot.dispatch.unroutable > 0 {
        let _ = writeln!(out, "── unroutable events: {}", snapshot.dispatch.unroutable);
    }
    out
}

/// Print a headless summary
pub fn display_summary(snapshot: &EngineSnapshot) {
    print!("{}", format_summary(snapshot, SUMMARY_TOP_N));
}

const BAR_WIDTH: u64 = 40;

/// `bcc`-style histogram: one row per occupied bucket with a proportional bar
fn format_histogram(out: &mut String, title: &str, hist: &HistogramSnapshot) {
    let mean = if hist.count == 0 { 0.0 } else { hist.sum as f64 / hist.count as f64 };
    let _ = writeln!(out, "── {title}: {} samples, mean {mean:.1}", hist.count);

    let peak = hist.peak().max(1);
    for bucket in hist.occupied_range() {
        let range = match bucket.upper {
            Some(upper) => format!("{} -> {}", bucket.lower, upper.saturating_sub(1)),
            None => format!("{} -> inf", bucket.lower),
        };
        let bar = "*".repeat((bucket.count * BAR_WIDTH / peak) as usize);
        let _ = writeln!(out, "  {range:>24} : {:<10} |{bar:<40}|", bucket.count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::{Aggregates, ClassKey, Dispatcher, KeyNormalizer, PathKey};
    use std::sync::Arc;

    #[test]
    fn test_format_compile_event() {
        let event = Event::FileCompile { path: PathKey::from_bytes(b"/srv/app/index.php") };
        let line = format_event(12, &event, Outcome::Counted);
        assert_eq!(line, "[compile] pid=12 file=/srv/app/index.php");
    }

    #[test]
    fn test_summary_lists_top_entries() {
        let dispatcher = Dispatcher::new(Arc::new(Aggregates::default()), KeyNormalizer::Directory);
        let class = ClassKey::from_bytes(b"PDOException");
        dispatcher.dispatch(&Event::ExceptionThrown { class });
        dispatcher.dispatch(&Event::ValueObserved { magnitude: 512 });

        let summary = format_summary(&dispatcher.snapshot(), SUMMARY_TOP_N);
        assert!(summary.contains("exceptions thrown: 1"));
        assert!(summary.contains("PDOException"));
        assert!(summary.contains("512 -> 1023"));
    }
}
