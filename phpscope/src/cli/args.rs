//! CLI argument definitions

use clap::Parser;
use std::path::PathBuf;

use crate::aggregation::histogram::DEFAULT_MAX_SLOT;
use crate::config::{
    DEFAULT_COMPILED_FILES_CAPACITY, DEFAULT_EXCEPTIONS_CAPACITY, DEFAULT_MEMCACHED_LIB,
    DEFAULT_PENDING_REQUESTS_CAPACITY, DEFAULT_PHP_LIB,
};

#[derive(Parser, Debug)]
#[command(
    name = "phpscope",
    about = "Aggregate PHP interpreter and libmemcached probe events",
    after_help = "\
EXAMPLES:
    sudo phpscope                               All PHP processes, default library paths
    sudo phpscope --pid 1234                    One process (enables guarded probes)
    sudo phpscope --headless --duration 60      Print summaries for a minute
    sudo phpscope --php-lib /usr/lib/php/libphp.so --export stats.json"
)]
pub struct Args {
    /// Only record events from this process
    #[arg(short, long)]
    pub pid: Option<i32>,

    /// PHP library or binary carrying the `php` USDT probes
    #[arg(long, value_name = "PATH", default_value = DEFAULT_PHP_LIB)]
    pub php_lib: PathBuf,

    /// libmemcached shared object for the `memcached_set` uprobe
    #[arg(long, value_name = "PATH", default_value = DEFAULT_MEMCACHED_LIB)]
    pub memcached_lib: PathBuf,

    /// Do not attach the libmemcached uprobe
    #[arg(long)]
    pub no_memcached: bool,

    /// Write the final aggregates as JSON to this file
    #[arg(long, value_name = "FILE")]
    pub export: Option<PathBuf>,

    /// Stop after N seconds (0 = unlimited)
    #[arg(long, default_value = "0")]
    pub duration: u64,

    /// Run without TUI and print periodic summaries
    #[arg(long)]
    pub headless: bool,

    /// Seconds between headless summaries
    #[arg(long, default_value = "10", value_name = "SECS")]
    pub interval: u64,

    /// Print one line per event (headless only)
    #[arg(long)]
    pub trace: bool,

    /// Suppress non-essential output
    #[arg(short, long)]
    pub quiet: bool,

    /// Count compiled files by full path instead of directory
    #[arg(long)]
    pub full_paths: bool,

    /// Maximum distinct compiled-file keys
    #[arg(long, value_name = "N", default_value_t = DEFAULT_COMPILED_FILES_CAPACITY)]
    pub files_capacity: usize,

    /// Maximum distinct exception classes (each for thrown and caught)
    #[arg(long, value_name = "N", default_value_t = DEFAULT_EXCEPTIONS_CAPACITY)]
    pub exceptions_capacity: usize,

    /// Maximum simultaneously pending requests
    #[arg(long, value_name = "N", default_value_t = DEFAULT_PENDING_REQUESTS_CAPACITY)]
    pub requests_capacity: usize,

    /// Highest histogram bucket (values of 2^(N-1) and above share it)
    #[arg(long, value_name = "N", default_value_t = DEFAULT_MAX_SLOT)]
    pub max_slot: u32,
}
