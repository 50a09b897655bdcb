//! # eBPF Probe Programs
//!
//! Probe programs that capture PHP interpreter and libmemcached events and hand
//! them to userspace. No aggregation happens here: every probe copies its
//! arguments into a [`ProbeEvent`] and submits it to the ring buffer.
//!
//! ## Programs
//!
//! - **USDT** (attached as uprobes at note addresses): `compile_file_entry`,
//!   `exception_thrown`, `exception_caught`, `request_startup`, `request_shutdown`
//! - **Uprobe**: `memcached_set` - value length (5th argument)
//!
//! ## Maps (Shared with Userspace)
//!
//! - `EVENTS` - Ring buffer (1MB) for the event stream
//! - `USDT_SPECS` - Argument locations per USDT probe slot
//! - `CONFIG` - Runtime configuration (target PID)
//! - `OUTPUT_FAILED` - Ring buffer reservations that failed
//!
//! ## Build
//!
//! ```bash
//! cargo xtask build-ebpf --release
//! ```

#![no_std]
#![no_main]
#![allow(unused_unsafe)]

use aya_ebpf::{
    bindings::pt_regs,
    helpers::{
        bpf_get_current_pid_tgid, bpf_ktime_get_ns, bpf_probe_read_user,
        bpf_probe_read_user_str_bytes,
    },
    macros::{map, uprobe},
    maps::{Array, HashMap, RingBuf},
    programs::ProbeContext,
};
use aya_log_ebpf::debug;
use phpscope_common::{
    regs, ProbeEvent, UsdtArgSpec, CONFIG_TARGET_PID, EVENT_EXCEPTION_CAUGHT,
    EVENT_EXCEPTION_THROWN, EVENT_FILE_COMPILE, EVENT_REQUEST_END, EVENT_REQUEST_START,
    EVENT_VALUE_OBSERVED, MAX_CLASS_LEN, PROBE_COMPILE_FILE, PROBE_EXCEPTION_CAUGHT,
    PROBE_EXCEPTION_THROWN, PROBE_REQUEST_SHUTDOWN, PROBE_REQUEST_STARTUP, USDT_ARG_CONST,
    USDT_ARG_REG, USDT_ARG_REG_DEREF, USDT_PROBE_COUNT, UsdtSpec,
};

// ============================================================================
// eBPF Maps - Shared data structures between kernel and userspace
// ============================================================================

/// Ring buffer for sending events to userspace
///
/// - **Size**: 1MB (~3500 events at 296 bytes each)
/// - **Usage**: Probes `reserve()` + `submit()`, userspace reads with `ring_buf.next()`
#[map]
static EVENTS: RingBuf = RingBuf::with_byte_size(1024 * 1024, 0);

/// Map: probe slot (`PROBE_*`) → argument locations
///
/// Written by userspace from the library's `.note.stapsdt` section before the
/// probes are attached.
#[map]
static USDT_SPECS: Array<UsdtSpec> = Array::with_max_entries(USDT_PROBE_COUNT, 0);

/// Map: Config key → Config value
///
/// - **Key 0**: Target TGID (0 = no filter)
#[map]
static CONFIG: HashMap<u32, u64> = HashMap::with_max_entries(4, 0);

/// Number of events lost because the ring buffer was full
#[map]
static OUTPUT_FAILED: HashMap<u32, u64> = HashMap::with_max_entries(1, 0);

// ============================================================================
// USDT Hooks (PHP)
// ============================================================================

/// Hook: `php:compile__file__entry(char *compile_filename, char *filename)`
#[uprobe]
pub fn compile_file_entry(ctx: ProbeContext) -> u32 {
    match try_string_event(&ctx, PROBE_COMPILE_FILE, 1, EVENT_FILE_COMPILE, usize::MAX) {
        Ok(()) => 0,
        Err(_) => 1,
    }
}

/// Hook: `php:exception__thrown(char *classname)`
#[uprobe]
pub fn exception_thrown(ctx: ProbeContext) -> u32 {
    match try_string_event(&ctx, PROBE_EXCEPTION_THROWN, 0, EVENT_EXCEPTION_THROWN, MAX_CLASS_LEN)
    {
        Ok(()) => 0,
        Err(_) => 1,
    }
}

/// Hook: `php:exception__caught(char *classname)`
#[uprobe]
pub fn exception_caught(ctx: ProbeContext) -> u32 {
    match try_string_event(&ctx, PROBE_EXCEPTION_CAUGHT, 0, EVENT_EXCEPTION_CAUGHT, MAX_CLASS_LEN)
    {
        Ok(()) => 0,
        Err(_) => 1,
    }
}

/// Hook: `php:request__startup(char *file, char *request_uri, char *request_method)`
#[uprobe]
pub fn request_startup(ctx: ProbeContext) -> u32 {
    match try_request_event(&ctx, PROBE_REQUEST_STARTUP, EVENT_REQUEST_START) {
        Ok(()) => 0,
        Err(_) => 1,
    }
}

/// Hook: `php:request__shutdown(char *file, char *request_uri, char *request_method)`
#[uprobe]
pub fn request_shutdown(ctx: ProbeContext) -> u32 {
    match try_request_event(&ctx, PROBE_REQUEST_SHUTDOWN, EVENT_REQUEST_END) {
        Ok(()) => 0,
        Err(_) => 1,
    }
}

// ============================================================================
// Uprobe Hooks (libmemcached)
// ============================================================================

/// Hook: `memcached_set(memc, key, key_length, value, value_length, expiration, flags)`
#[uprobe]
pub fn memcached_set(ctx: ProbeContext) -> u32 {
    match try_memcached_set(&ctx) {
        Ok(()) => 0,
        Err(_) => 1,
    }
}

fn try_memcached_set(ctx: &ProbeContext) -> Result<(), i64> {
    let (pid, tid) = current_ids();
    if !pid_allowed(pid) {
        return Ok(());
    }

    let value_length: u64 = ctx.arg(4).ok_or(1i64)?;
    debug!(ctx, "memcached_set value length: {}", value_length);

    let mut entry = reserve_event()?;
    let event = unsafe { &mut *entry.as_mut_ptr() };
    *event = ProbeEvent::empty(EVENT_VALUE_OBSERVED);
    event.pid = pid;
    event.tid = tid;
    event.timestamp_ns = unsafe { bpf_ktime_get_ns() };
    event.value = value_length;
    entry.submit(0);

    Ok(())
}

// ============================================================================
// Event Builders
// ============================================================================

#[inline(always)]
fn try_string_event(
    ctx: &ProbeContext,
    probe: u32,
    arg: usize,
    event_type: u32,
    max_len: usize,
) -> Result<(), i64> {
    let (pid, tid) = current_ids();
    if !pid_allowed(pid) {
        return Ok(());
    }

    let ptr = usdt_arg(ctx, probe, arg)?;

    let mut entry = reserve_event()?;
    let event = unsafe { &mut *entry.as_mut_ptr() };
    *event = ProbeEvent::empty(event_type);
    event.pid = pid;
    event.tid = tid;
    event.timestamp_ns = unsafe { bpf_ktime_get_ns() };

    let limit = if max_len < event.text.len() { max_len } else { event.text.len() };
    // An unreadable string leaves the payload empty; the event still counts
    let _ = unsafe { bpf_probe_read_user_str_bytes(ptr as *const u8, &mut event.text[..limit]) };

    debug!(ctx, "probe {} fired (tid {})", probe, tid);
    entry.submit(0);

    Ok(())
}

fn try_request_event(ctx: &ProbeContext, probe: u32, event_type: u32) -> Result<(), i64> {
    let (pid, tid) = current_ids();
    if !pid_allowed(pid) {
        return Ok(());
    }

    let uri = usdt_arg(ctx, probe, 1)?;
    let method = usdt_arg(ctx, probe, 2)?;

    let mut entry = reserve_event()?;
    let event = unsafe { &mut *entry.as_mut_ptr() };
    *event = ProbeEvent::empty(event_type);
    event.pid = pid;
    event.tid = tid;
    event.timestamp_ns = unsafe { bpf_ktime_get_ns() };

    let _ = unsafe { bpf_probe_read_user_str_bytes(uri as *const u8, &mut event.text) };
    let _ = unsafe { bpf_probe_read_user_str_bytes(method as *const u8, &mut event.method) };

    debug!(ctx, "request probe {} tid {} ts {}", probe, tid, event.timestamp_ns);
    entry.submit(0);

    Ok(())
}

fn reserve_event() -> Result<aya_ebpf::maps::ring_buf::RingBufEntry<ProbeEvent>, i64> {
    match EVENTS.reserve::<ProbeEvent>(0) {
        Some(entry) => Ok(entry),
        None => {
            unsafe {
                let key = 0u32;
                let current = OUTPUT_FAILED.get(&key).copied().unwrap_or(0);
                let _ = OUTPUT_FAILED.insert(&key, &(current + 1), 0);
            }
            Err(1)
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Returns `(tgid, tid)` of the current task
fn current_ids() -> (u32, u32) {
    let pid_tgid = unsafe { bpf_get_current_pid_tgid() };
    ((pid_tgid >> 32) as u32, pid_tgid as u32)
}

fn pid_allowed(pid: u32) -> bool {
    let target = unsafe { CONFIG.get(&CONFIG_TARGET_PID).map(|v| *v as u32).unwrap_or(0) };
    target == 0 || target == pid
}

/// Read USDT argument `idx` of `probe` using the spec userspace wrote for it
fn usdt_arg(ctx: &ProbeContext, probe: u32, idx: usize) -> Result<u64, i64> {
    let spec = USDT_SPECS.get(probe).ok_or(1i64)?;
    if idx >= spec.args.len() || idx >= spec.arg_count as usize {
        return Err(1);
    }
    let arg: &UsdtArgSpec = &spec.args[idx];
    let regs = unsafe { &*ctx.regs };

    let raw = match arg.kind {
        USDT_ARG_CONST => arg.offset as u64,
        USDT_ARG_REG => read_reg(regs, arg.reg)?,
        USDT_ARG_REG_DEREF => {
            let addr = read_reg(regs, arg.reg)?.wrapping_add(arg.offset as u64);
            unsafe { bpf_probe_read_user(addr as *const u64) }?
        }
        _ => return Err(1),
    };

    Ok(narrow(raw, arg.size))
}

/// Truncate (and sign-extend for negative sizes) an operand to its declared width
fn narrow(raw: u64, size: i32) -> u64 {
    match size {
        1 => raw & 0xff,
        2 => raw & 0xffff,
        4 => raw & 0xffff_ffff,
        -1 => raw as i8 as i64 as u64,
        -2 => raw as i16 as i64 as u64,
        -4 => raw as i32 as i64 as u64,
        _ => raw,
    }
}

fn read_reg(regs: &pt_regs, reg: u32) -> Result<u64, i64> {
    let value = match reg {
        regs::RAX => regs.rax,
        regs::RBX => regs.rbx,
        regs::RCX => regs.rcx,
        regs::RDX => regs.rdx,
        regs::RSI => regs.rsi,
        regs::RDI => regs.rdi,
        regs::RBP => regs.rbp,
        regs::RSP => regs.rsp,
        regs::R8 => regs.r8,
        regs::R9 => regs.r9,
        regs::R10 => regs.r10,
        regs::R11 => regs.r11,
        regs::R12 => regs.r12,
        regs::R13 => regs.r13,
        regs::R14 => regs.r14,
        regs::R15 => regs.r15,
        regs::RIP => regs.rip,
        _ => return Err(1),
    };
    Ok(value as u64)
}

#[cfg(all(not(test), target_os = "none"))]
#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    unsafe { core::hint::unreachable_unchecked() }
}
