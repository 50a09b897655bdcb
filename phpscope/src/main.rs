//! # phpscope - Main Entry Point
//!
//! Supports two operational modes:
//! - **Live TUI** (default): dashboard fed by periodic engine snapshots
//! - **Headless** (`--headless`): periodic text summaries on stdout
//!
//! Either mode can write the final snapshot with `--export FILE`.

// Main function is intentionally long for clarity
#![allow(clippy::too_many_lines)]

use anyhow::{Context, Result};
use aya::maps::RingBuf;
use clap::Parser;
use crossbeam_channel::bounded;
use log::info;
use std::sync::Arc;
use std::time::{Duration, Instant};

use phpscope::aggregation::{Aggregates, Dispatcher};
use phpscope::cli::Args;
use phpscope::config::Config;
use phpscope::export::{ExportMetadata, SnapshotExporter};
use phpscope::preflight::run_preflight_checks;
use phpscope::profiling::{
    attach_memcached_uprobe, attach_php_probes, display_summary, init_ebpf_logger,
    load_ebpf_program, lost_events, print_ring_buffer_diagnostics, set_target_pid, EventProcessor,
    SemaphoreSet,
};
use phpscope::tui;

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_USAGE: i32 = 2;
const EXIT_NOPERM: i32 = 77;

/// Snapshots buffered for the TUI before new ones are dropped
const SNAPSHOT_CHANNEL_DEPTH: usize = 4;

fn main() {
    env_logger::init();
    std::process::exit(match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            let code = exit_code_for(&e);
            eprintln!("error: {e:#}");
            code
        }
    });
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    if err.downcast_ref::<phpscope::domain::ConfigError>().is_some() {
        return EXIT_USAGE;
    }
    let msg = err.to_string().to_lowercase();
    if msg.contains("permission denied") || msg.contains("requires root") {
        EXIT_NOPERM
    } else {
        EXIT_ERROR
    }
}

#[tokio::main]
async fn run() -> Result<()> {
    let args = Args::parse();
    let config = Config::from_args(&args)?;
    let quiet = config.report.quiet;

    let memcached_ok = run_preflight_checks(&config.probes, quiet)?;

    if !quiet {
        println!("phpscope v{}", env!("CARGO_PKG_VERSION"));
        println!("php: {}", config.probes.php_lib.display());
        match config.probes.target_pid {
            Some(pid) => println!("pid: {}", pid.0),
            None => println!("pid: all"),
        }
    }

    // ── Load eBPF and attach probes ─────────────────────────────────────
    let mut bpf = load_ebpf_program()?;
    init_ebpf_logger(&mut bpf);
    set_target_pid(&mut bpf, config.probes.target_pid)?;

    // Released (decremented) on drop at the end of run()
    let mut semaphores = config.probes.target_pid.map(SemaphoreSet::new);
    let summary = attach_php_probes(
        &mut bpf,
        &config.probes.php_lib,
        config.probes.target_pid,
        semaphores.as_mut(),
    )?;

    let memcached_attached = match (&config.probes.memcached_lib, memcached_ok) {
        (Some(lib), true) => attach_memcached_uprobe(&mut bpf, lib, config.probes.target_pid),
        _ => false,
    };

    if !quiet {
        println!(
            "probes: {} attached ({} sites), {} missing",
            summary.attached.len(),
            summary.sites,
            summary.missing.len()
        );
        if !summary.disabled_by_semaphore.is_empty() {
            println!("semaphore-guarded: {}", summary.disabled_by_semaphore.join(", "));
        }
        println!("memcached: {}", if memcached_attached { "attached" } else { "off" });
        if let Some(ref export_path) = config.report.export {
            println!("export: {}", export_path.display());
        }
    }

    let mut ring_buf = RingBuf::try_from(bpf.take_map("EVENTS").context("EVENTS map not found")?)?;

    // ── Aggregation engine ──────────────────────────────────────────────
    let aggregates = Arc::new(Aggregates::new(&config.engine));
    let dispatcher = Dispatcher::new(aggregates, config.engine.normalizer);

    // Launch TUI in separate thread if not headless
    let (tui_handle, snapshot_tx) = if config.report.headless {
        (None, None)
    } else {
        let (snapshot_tx, snapshot_rx) = bounded(SNAPSHOT_CHANNEL_DEPTH);
        let tui_pid = config.probes.target_pid;
        let handle = std::thread::spawn(move || tui::run_live(snapshot_rx, tui_pid));
        (Some(handle), Some(snapshot_tx))
    };

    let mut processor = EventProcessor::new(dispatcher, config.report.trace, snapshot_tx);

    let mut last_status_time = Instant::now();
    let mut summary_timer = Instant::now();

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let profiling_start = Instant::now();
    let proc_path = config.probes.target_pid.map(|pid| format!("/proc/{}", pid.0));

    let mut exit_reason = "interrupted";

    loop {
        if let Some(limit) = config.report.duration_limit {
            if profiling_start.elapsed() >= limit {
                exit_reason = "duration limit reached";
                break;
            }
        }

        if let Some(ref path) = proc_path {
            if !std::path::Path::new(path).exists() {
                exit_reason = "process exited";
                break;
            }
        }

        if processor.event_count == 0 && last_status_time.elapsed() > config.report.summary_interval
        {
            info!("Still waiting for events... (no events received yet)");
            last_status_time = Instant::now();
        }

        while let Some(item) = ring_buf.next() {
            processor.process_record(&item);
        }

        // A full channel is not checked for disconnection, so watch the thread too
        let tui_finished = tui_handle.as_ref().is_some_and(std::thread::JoinHandle::is_finished);
        if tui_finished || !processor.publish_snapshot() {
            exit_reason = "dashboard closed";
            break;
        }

        if config.report.headless && summary_timer.elapsed() >= config.report.summary_interval {
            display_summary(&processor.snapshot());
            summary_timer = Instant::now();
        }

        tokio::select! {
            () = tokio::time::sleep(Duration::from_millis(100)) => {}
            _ = &mut ctrl_c => {
                break;
            }
        }
    }

    // Closing the channel ends the TUI loop
    processor.close_snapshots();
    if let Some(handle) = tui_handle {
        match handle.join() {
            Ok(result) => result.context("TUI failed")?,
            Err(_) => eprintln!("warning: TUI thread panicked"),
        }
    }

    let elapsed = profiling_start.elapsed();
    let final_snapshot = processor.snapshot();

    if config.report.headless {
        display_summary(&final_snapshot);
    }
    if !quiet || config.report.headless {
        eprintln!(
            "\n{}: {:.1}s, {} events ({} unroutable, {} short records, tui: {} sent / {} dropped)",
            exit_reason,
            elapsed.as_secs_f64(),
            processor.event_count,
            final_snapshot.dispatch.unroutable,
            processor.short_records,
            processor.snapshots_sent,
            processor.snapshots_dropped,
        );
    }

    print_ring_buffer_diagnostics(&bpf)?;

    if let Some(ref export_path) = config.report.export {
        let lost = lost_events(&bpf).unwrap_or(0);
        let exporter =
            SnapshotExporter::new(ExportMetadata::new(elapsed, config.probes.target_pid, lost));
        exporter
            .export_to_file(&final_snapshot, export_path)
            .context("Failed to export snapshot")?;

        if !quiet {
            println!("saved: {}", export_path.display());
        }
    }

    drop(semaphores);
    Ok(())
}
