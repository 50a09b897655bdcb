//! # phpscope - eBPF event aggregation for PHP
//!
//! phpscope attaches to the USDT probes a DTrace-enabled PHP build exposes
//! (and optionally a uprobe on libmemcached's `memcached_set`) and folds the
//! resulting event stream into small, bounded in-memory tables.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                PHP interpreter (libphp.so)                      │
//! │  compile__file__entry, exception__thrown, exception__caught,    │
//! │  request__startup, request__shutdown     + memcached_set        │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ USDT / uprobe hits
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                eBPF programs (phpscope-ebpf)                    │
//! │  decode probe arguments from USDT_SPECS, copy strings,          │
//! │  submit one ProbeEvent per hit to the EVENTS ring buffer        │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ ring buffer records
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                 phpscope (this crate)                           │
//! │                                                                 │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐        │
//! │  │  Profiling   │──▶│  Dispatcher  │──▶│ Aggregates   │        │
//! │  │ (USDT, BPF)  │   │              │   │ maps, hists, │        │
//! │  └──────────────┘   └──────────────┘   │ correlation  │        │
//! │                                        └──────┬───────┘        │
//! │                                 snapshots     │                │
//! │                      ┌────────────────────────┼──────┐         │
//! │                      ▼                        ▼      ▼         │
//! │               ┌────────────┐   ┌──────────┐  ┌──────────┐      │
//! │               │    TUI     │   │ headless │  │  export  │      │
//! │               └────────────┘   └──────────┘  └──────────┘      │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! - [`aggregation`]: bounded LRU counting maps, key normalization, exp2
//!   histograms, request correlation and the event dispatcher. Pure Rust, no
//!   eBPF; everything here is unit tested.
//! - [`profiling`]: USDT note parsing, semaphores, eBPF loading/attachment and
//!   ring buffer processing
//! - [`tui`]: live dashboard
//! - [`export`]: JSON snapshot writer
//! - [`cli`] / [`config`]: argument parsing and validated configuration
//! - [`preflight`]: privilege, kernel and library checks
//! - [`domain`]: newtypes and error enums
//!
//! ## Typical Usage
//!
//! ```bash
//! # Watch every PHP process using the default Apache module
//! sudo USE_ZEND_DTRACE=1 apachectl restart
//! sudo phpscope
//!
//! # One FPM worker, headless, with a JSON dump after a minute
//! sudo phpscope --pid 4242 --php-lib /usr/lib/libphp.so --headless --duration 60 --export out.json
//! ```

// Expose modules for testing
pub mod aggregation;
pub mod cli;
pub mod config;
pub mod domain;
pub mod export;
pub mod preflight;
pub mod profiling;
pub mod tui;
