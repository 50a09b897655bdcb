//! # Shared Data Structures (eBPF ↔ Userspace)
//!
//! Defines the records and constants shared between the probe programs and the
//! userspace aggregation engine. All types use `#[repr(C)]` so both sides agree
//! on the memory layout of ring buffer records and map values.
//!
//! ## Key Types
//!
//! - [`ProbeEvent`] - One observed event, written to the `EVENTS` ring buffer
//! - [`UsdtSpec`] - Argument locations for one USDT probe, stored in `USDT_SPECS`
//! - [`UsdtArgSpec`] - Location of a single USDT argument (constant, register, memory)

#![no_std]

// ============================================================================
// Event Type Constants
// ============================================================================

/// PHP compiled a source file (`php:compile__file__entry`)
///
/// Payload: `text` holds the compiled file path.
pub const EVENT_FILE_COMPILE: u32 = 1;

/// PHP threw an exception (`php:exception__thrown`)
///
/// Payload: `text` holds the exception class name.
pub const EVENT_EXCEPTION_THROWN: u32 = 2;

/// PHP caught an exception (`php:exception__caught`)
///
/// Payload: `text` holds the exception class name.
pub const EVENT_EXCEPTION_CAUGHT: u32 = 3;

/// A request started (`php:request__startup`)
///
/// Payload: `text` holds the request URI, `method` the request method.
/// Paired with: `EVENT_REQUEST_END` on the same `tid`
pub const EVENT_REQUEST_START: u32 = 4;

/// A request finished (`php:request__shutdown`)
///
/// Payload: same as `EVENT_REQUEST_START`.
pub const EVENT_REQUEST_END: u32 = 5;

/// libmemcached stored a value (`memcached_set`)
///
/// Payload: `value` holds the value length in bytes.
pub const EVENT_VALUE_OBSERVED: u32 = 6;

// ============================================================================
// Buffer Capacities
// ============================================================================

/// Capacity of path and URI buffers (bytes, including the NUL terminator)
pub const MAX_STR_LEN: usize = 256;

/// Capacity of exception class name keys
pub const MAX_CLASS_LEN: usize = 128;

/// Capacity of the request method buffer
pub const MAX_METHOD_LEN: usize = 8;

/// Maximum number of USDT arguments read by any probe
///
/// `request__startup` / `request__shutdown` carry three (file, uri, method).
pub const USDT_MAX_ARGS: usize = 3;

// ============================================================================
// USDT Probe Slots (index into `USDT_SPECS`)
// ============================================================================

pub const PROBE_COMPILE_FILE: u32 = 0;
pub const PROBE_EXCEPTION_THROWN: u32 = 1;
pub const PROBE_EXCEPTION_CAUGHT: u32 = 2;
pub const PROBE_REQUEST_STARTUP: u32 = 3;
pub const PROBE_REQUEST_SHUTDOWN: u32 = 4;

/// Number of USDT probe slots
pub const USDT_PROBE_COUNT: u32 = 5;

// ============================================================================
// USDT Argument Kinds
// ============================================================================

/// Slot not described by the probe note
pub const USDT_ARG_NONE: u32 = 0;

/// Immediate value (`8@$5`): `offset` holds the constant
pub const USDT_ARG_CONST: u32 = 1;

/// Register value (`8@%rax`)
pub const USDT_ARG_REG: u32 = 2;

/// Memory operand (`8@-24(%rbp)`): read `size` bytes at `reg + offset`
pub const USDT_ARG_REG_DEREF: u32 = 3;

/// x86-64 general purpose registers, in the order the probe side switches over them
pub mod regs {
    pub const RAX: u32 = 0;
    pub const RBX: u32 = 1;
    pub const RCX: u32 = 2;
    pub const RDX: u32 = 3;
    pub const RSI: u32 = 4;
    pub const RDI: u32 = 5;
    pub const RBP: u32 = 6;
    pub const RSP: u32 = 7;
    pub const R8: u32 = 8;
    pub const R9: u32 = 9;
    pub const R10: u32 = 10;
    pub const R11: u32 = 11;
    pub const R12: u32 = 12;
    pub const R13: u32 = 13;
    pub const R14: u32 = 14;
    pub const R15: u32 = 15;
    pub const RIP: u32 = 16;
}

/// `CONFIG` map key: target TGID (0 = every process mapping the library)
pub const CONFIG_TARGET_PID: u32 = 0;

// ============================================================================
// Shared Data Structures
// ============================================================================

/// Event sent from a probe to userspace via the ring buffer
///
/// Strings are copied with `bpf_probe_read_user_str`, so they are
/// NUL-terminated and zero-padded. Too large for the eBPF stack; the probe
/// side fills it in place inside a reserved ring buffer slot.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct ProbeEvent {
    /// Event type (see `EVENT_*` constants)
    pub event_type: u32,

    /// Process ID (TGID in Linux terms)
    pub pid: u32,

    /// Thread ID; the request identity for start/end pairing
    pub tid: u32,

    /// Padding for 8-byte alignment
    #[allow(clippy::pub_underscore_fields)]
    pub _padding: u32,

    /// Timestamp in nanoseconds (from `bpf_ktime_get_ns()`)
    pub timestamp_ns: u64,

    /// Integer payload (`EVENT_VALUE_OBSERVED`: value length)
    pub value: u64,

    /// String payload: file path, class name or request URI
    pub text: [u8; MAX_STR_LEN],

    /// Request method (request events only)
    pub method: [u8; MAX_METHOD_LEN],
}

impl ProbeEvent {
    /// An all-zero event of the given type
    #[must_use]
    pub const fn empty(event_type: u32) -> Self {
        Self {
            event_type,
            pid: 0,
            tid: 0,
            _padding: 0,
            timestamp_ns: 0,
            value: 0,
            text: [0; MAX_STR_LEN],
            method: [0; MAX_METHOD_LEN],
        }
    }
}

/// Location of one USDT argument
#[repr(C)]
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub struct UsdtArgSpec {
    /// One of the `USDT_ARG_*` constants
    pub kind: u32,

    /// Register (see [`regs`]); unused for constants
    pub reg: u32,

    /// Constant value, or displacement for memory operands
    pub offset: i64,

    /// Operand size in bytes; negative for signed operands (`-4@%eax`)
    pub size: i32,

    /// Padding for 8-byte alignment
    #[allow(clippy::pub_underscore_fields)]
    pub _padding: u32,
}

/// Argument locations for one USDT probe
#[repr(C)]
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub struct UsdtSpec {
    pub args: [UsdtArgSpec; USDT_MAX_ARGS],

    /// Number of arguments described by the probe note
    pub arg_count: u32,

    /// Padding for 8-byte alignment
    #[allow(clippy::pub_underscore_fields)]
    pub _padding: u32,
}

#[cfg(feature = "user")]
use aya::Pod;

// Pod lets aya copy these types across the kernel/userspace boundary as plain bytes
#[cfg(feature = "user")]
#[allow(unsafe_code)]
unsafe impl Pod for ProbeEvent {}

#[cfg(feature = "user")]
#[allow(unsafe_code)]
unsafe impl Pod for UsdtArgSpec {}

#[cfg(feature = "user")]
#[allow(unsafe_code)]
unsafe impl Pod for UsdtSpec {}
