//! # eBPF Program Loading and Attachment
//!
//! Loads compiled eBPF bytecode and attaches programs to the probe sites.
//!
//! ## Functions
//!
//! - [`load_ebpf_program()`] - Load eBPF bytecode from embedded binary
//! - [`set_target_pid()`] - Restrict probes to one process
//! - [`attach_php_probes()`] - Write USDT argument specs and attach the PHP probes
//! - [`attach_memcached_uprobe()`] - Attach the optional libmemcached uprobe
//!
//! ## Attachment Points
//!
//! - **USDT** (as uprobes at note offsets): `php:compile__file__entry`,
//!   `php:exception__thrown`, `php:exception__caught`, `php:request__startup`,
//!   `php:request__shutdown`
//! - **Uprobe**: `memcached_set()` in libmemcached

use anyhow::{Context, Result};
use aya::{
    include_bytes_aligned,
    maps::{Array, HashMap},
    programs::UProbe,
    Ebpf,
};
use aya_log::EbpfLogger;
use log::{debug, info, warn};
use phpscope_common::{
    UsdtSpec, CONFIG_TARGET_PID, PROBE_COMPILE_FILE, PROBE_EXCEPTION_CAUGHT,
    PROBE_EXCEPTION_THROWN, PROBE_REQUEST_SHUTDOWN, PROBE_REQUEST_STARTUP,
};
use std::collections::BTreeSet;
use std::path::Path;

use super::memory_maps::{library_mappings, runtime_address, SemaphoreSet};
use super::usdt::{read_probes, UsdtProbe};
use crate::domain::{Pid, ProfilerError};

/// USDT provider name of the PHP interpreter
pub const PHP_PROVIDER: &str = "php";

/// A PHP USDT probe and the program that handles it
#[derive(Debug, Clone, Copy)]
pub struct PhpProbe {
    pub usdt_name: &'static str,
    pub program: &'static str,
    /// Index into `USDT_SPECS`
    pub slot: u32,
}

pub const PHP_PROBES: [PhpProbe; 5] = [
    PhpProbe {
        usdt_name: "compile__file__entry",
        program: "compile_file_entry",
        slot: PROBE_COMPILE_FILE,
    },
    PhpProbe {
        usdt_name: "exception__thrown",
        program: "exception_thrown",
        slot: PROBE_EXCEPTION_THROWN,
    },
    PhpProbe {
        usdt_name: "exception__caught",
        program: "exception_caught",
        slot: PROBE_EXCEPTION_CAUGHT,
    },
    PhpProbe {
        usdt_name: "request__startup",
        program: "request_startup",
        slot: PROBE_REQUEST_STARTUP,
    },
    PhpProbe {
        usdt_name: "request__shutdown",
        program: "request_shutdown",
        slot: PROBE_REQUEST_SHUTDOWN,
    },
];

/// What [`attach_php_probes()`] managed to attach
#[derive(Debug, Default)]
pub struct AttachSummary {
    /// Probes with at least one attached site
    pub attached: Vec<&'static str>,
    /// Probes the library does not declare (or that failed to attach)
    pub missing: Vec<&'static str>,
    /// Attached probe sites across all probes
    pub sites: usize,
    /// Probes gated by a semaphore that nobody enabled
    pub disabled_by_semaphore: Vec<&'static str>,
}

/// Load the eBPF program binary
///
/// Always uses the release build: debug builds pull in formatting code that
/// the BPF target cannot link.
///
/// # Errors
/// Returns an error if the eBPF program binary cannot be loaded
pub fn load_ebpf_program() -> Result<Ebpf> {
    let bpf = Ebpf::load(include_bytes_aligned!(
        "../../../target/bpfel-unknown-none/release/phpscope"
    ))
    .map_err(|e| ProfilerError::EbpfLoadFailed(e.to_string()))?;
    Ok(bpf)
}

/// Initialize eBPF logger
pub fn init_ebpf_logger(bpf: &mut Ebpf) {
    if let Err(e) = EbpfLogger::init(bpf) {
        warn!("Failed to initialize eBPF logger: {e}");
    }
}

/// Set the TGID filter in `CONFIG` (`None` records every process)
///
/// # Errors
/// Returns an error if the `CONFIG` map is missing or the update fails
#[allow(clippy::cast_sign_loss)]
pub fn set_target_pid(bpf: &mut Ebpf, pid: Option<Pid>) -> Result<()> {
    let mut config: HashMap<_, u32, u64> =
        HashMap::try_from(bpf.map_mut("CONFIG").context("CONFIG map not found")?)?;
    let value = pid.map_or(0, |p| p.0 as u64);
    config.insert(CONFIG_TARGET_PID, value, 0)?;
    match pid {
        Some(pid) => info!("✓ Set target PID: {}", pid.0),
        None => info!("✓ No PID filter, recording every process"),
    }
    Ok(())
}

/// Attach every PHP probe declared by `php_lib`.
///
/// Probes the library lacks are skipped with a warning; attaching none at all
/// is an error. When `semaphores` is given, guarded probes are enabled in its
/// process.
///
/// # Errors
/// Returns an error if the library cannot be parsed, the specs cannot be
/// written, or no probe attaches
pub fn attach_php_probes(
    bpf: &mut Ebpf,
    php_lib: &Path,
    pid: Option<Pid>,
    semaphores: Option<&mut SemaphoreSet>,
) -> Result<AttachSummary> {
    let probes = read_probes(php_lib)?;
    let binary = php_lib.display().to_string();
    info!("Found {} USDT probes in {binary}", probes.len());

    // Pass 1: resolve sites and argument specs
    let mut plan: Vec<(PhpProbe, UsdtSpec, Vec<&UsdtProbe>)> = Vec::new();
    let mut summary = AttachSummary::default();
    for php_probe in PHP_PROBES {
        let Some((spec, sites)) = plan_probe(&probes, php_probe) else {
            warn!("⚠️  Probe {PHP_PROVIDER}:{} not found in {binary}", php_probe.usdt_name);
            summary.missing.push(php_probe.usdt_name);
            continue;
        };
        plan.push((php_probe, spec, sites));
    }

    {
        let mut specs: Array<_, UsdtSpec> =
            Array::try_from(bpf.map_mut("USDT_SPECS").context("USDT_SPECS map not found")?)?;
        for (php_probe, spec, _) in &plan {
            specs.set(php_probe.slot, *spec, 0)?;
        }
    }

    // Pass 2: attach programs
    for (php_probe, _, sites) in &plan {
        match attach_sites(bpf, php_probe, sites, php_lib, pid) {
            Ok(count) => {
                info!("✓ Attached USDT: {PHP_PROVIDER}:{} ({count} sites)", php_probe.usdt_name);
                summary.attached.push(php_probe.usdt_name);
                summary.sites += count;
            }
            Err(e) => {
                warn!("⚠️  {e}");
                summary.missing.push(php_probe.usdt_name);
            }
        }
    }

    if summary.attached.is_empty() {
        return Err(
            ProfilerError::NoProbesAttached { provider: PHP_PROVIDER.into(), binary }.into()
        );
    }

    let guarded: Vec<(&'static str, &UsdtProbe)> = plan
        .iter()
        .filter(|(p, _, _)| summary.attached.contains(&p.usdt_name))
        .flat_map(|(p, _, sites)| sites.iter().map(move |s| (p.usdt_name, *s)))
        .filter(|(_, s)| s.semaphore.is_some())
        .collect();
    summary.disabled_by_semaphore = enable_semaphores(&guarded, php_lib, pid, semaphores);

    Ok(summary)
}

/// Sites of one probe that share the first site's argument layout
fn plan_probe<'a>(
    probes: &'a [UsdtProbe],
    php_probe: PhpProbe,
) -> Option<(UsdtSpec, Vec<&'a UsdtProbe>)> {
    let mut matching =
        probes.iter().filter(|p| p.provider == PHP_PROVIDER && p.name == php_probe.usdt_name);

    // A probe with unparseable arguments is treated as absent
    let (first, spec) = matching.by_ref().find_map(|p| match p.spec() {
        Ok(spec) => Some((p, spec)),
        Err(e) => {
            warn!("⚠️  Skipping {} at 0x{:x}: {e}", p.qualified_name(), p.address);
            None
        }
    })?;

    let mut sites = vec![first];
    for site in matching {
        if site.spec().is_ok_and(|s| s == spec) {
            sites.push(site);
        } else {
            // USDT_SPECS holds one layout per probe
            warn!(
                "⚠️  Skipping {} site 0x{:x}: argument layout differs from first site",
                site.qualified_name(),
                site.address
            );
        }
    }
    Some((spec, sites))
}

fn attach_sites(
    bpf: &mut Ebpf,
    php_probe: &PhpProbe,
    sites: &[&UsdtProbe],
    php_lib: &Path,
    pid: Option<Pid>,
) -> Result<usize, ProfilerError> {
    let attach_failed = |error: String| ProfilerError::ProbeAttachFailed {
        probe: format!("{PHP_PROVIDER}:{}", php_probe.usdt_name),
        binary: php_lib.display().to_string(),
        error,
    };

    let program: &mut UProbe = bpf
        .program_mut(php_probe.program)
        .ok_or_else(|| attach_failed(format!("program {} not found", php_probe.program)))?
        .try_into()
        .map_err(|e: aya::programs::ProgramError| attach_failed(e.to_string()))?;
    program.load().map_err(|e| attach_failed(e.to_string()))?;

    let mut attached = 0;
    for site in sites {
        match program.attach(None, site.file_offset, php_lib, pid.map(|p| p.0)) {
            Ok(_) => {
                debug!("attached {} at file offset 0x{:x}", php_probe.program, site.file_offset);
                attached += 1;
            }
            Err(e) => warn!("⚠️  Site 0x{:x} of {}: {e}", site.address, php_probe.usdt_name),
        }
    }

    if attached == 0 {
        return Err(attach_failed("no site could be attached".into()));
    }
    Ok(attached)
}

/// Enable guarded probes; returns the probes left disabled
fn enable_semaphores(
    guarded: &[(&'static str, &UsdtProbe)],
    php_lib: &Path,
    pid: Option<Pid>,
    semaphores: Option<&mut SemaphoreSet>,
) -> Vec<&'static str> {
    let mut names: Vec<&'static str> = guarded.iter().map(|(name, _)| *name).collect();
    names.dedup();
    if guarded.is_empty() {
        return names;
    }

    let (Some(pid), Some(set)) = (pid, semaphores) else {
        warn!(
            "⚠️  {} probes are semaphore-guarded; without --pid they only fire if the \
             interpreter enables them itself (USE_ZEND_DTRACE=1)",
            names.len()
        );
        return names;
    };

    let mappings = match library_mappings(pid, php_lib) {
        Ok(m) => m,
        Err(e) => {
            warn!("⚠️  Cannot enable semaphores: {e}");
            return names;
        }
    };

    let offsets: BTreeSet<u64> =
        guarded.iter().filter_map(|(_, s)| s.semaphore.map(|sem| sem.file_offset)).collect();
    let mut failed = false;
    for offset in offsets {
        let Some(addr) = runtime_address(&mappings, offset) else {
            warn!("⚠️  Semaphore at file offset 0x{offset:x} is not mapped");
            failed = true;
            continue;
        };
        if let Err(e) = set.enable(addr) {
            warn!("⚠️  Failed to enable semaphore 0x{addr:x}: {e:#}");
            failed = true;
        }
    }

    info!("✓ Enabled {} probe semaphores in {}", set.len(), pid);
    if failed {
        names
    } else {
        Vec::new()
    }
}

/// Attach the `memcached_set` uprobe; returns whether it is active
pub fn attach_memcached_uprobe(bpf: &mut Ebpf, library: &Path, pid: Option<Pid>) -> bool {
    if !library.is_file() {
        warn!("⚠️  libmemcached not found at {}, value sizes unavailable", library.display());
        return false;
    }

    let Some(program) = bpf.program_mut("memcached_set") else {
        warn!("⚠️  memcached_set program not found");
        return false;
    };
    let program: &mut UProbe = match program.try_into() {
        Ok(program) => program,
        Err(e) => {
            warn!("⚠️  Failed to convert memcached_set: {e}");
            return false;
        }
    };
    if let Err(e) = program.load() {
        warn!("⚠️  Failed to load memcached_set: {e}");
        return false;
    }

    match program.attach(Some("memcached_set"), 0, library, pid.map(|p| p.0)) {
        Ok(_) => {
            info!("✓ Attached uprobe: memcached_set");
            true
        }
        Err(e) => {
            warn!("⚠️  Could not attach memcached_set: {e}");
            false
        }
    }
}
