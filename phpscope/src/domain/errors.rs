//! Structured error types for phpscope
//!
//! Using thiserror for automatic Display implementation and error chaining.
//! The aggregation engine itself never fails; these cover setup and export.

use super::types::Pid;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProfilerError {
    #[error("Failed to load eBPF program: {0}")]
    EbpfLoadFailed(String),

    #[error("Process {0} not found")]
    ProcessNotFound(Pid),

    #[error("Library not found: {}", .0.display())]
    LibraryNotFound(PathBuf),

    #[error("No {provider} USDT probes could be attached to {binary}")]
    NoProbesAttached { provider: String, binary: String },

    #[error("Failed to attach {probe} to {binary}: {error}")]
    ProbeAttachFailed { probe: String, binary: String, error: String },

    #[error("Library {binary} is not mapped in process {pid}")]
    LibraryNotMapped { pid: Pid, binary: String },

    #[error(transparent)]
    Usdt(#[from] UsdtError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum UsdtError {
    #[error("Failed to parse ELF file: {0}")]
    InvalidElf(String),

    #[error("Malformed stapsdt note at offset {0}")]
    MalformedNote(usize),

    #[error("Invalid USDT argument descriptor: {0}")]
    InvalidArgSpec(String),

    #[error("Unsupported register in USDT argument: {0}")]
    UnknownRegister(String),

    #[error("Probe {0} declares more arguments than supported")]
    TooManyArgs(String),

    #[error("Address 0x{0:x} is not backed by any section in the file")]
    AddressNotMapped(u64),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} capacity must be at least 1")]
    ZeroCapacity { name: &'static str },

    #[error("Histogram max slot {0} exceeds 64")]
    MaxSlotTooLarge(u32),

    #[error("Refresh interval must be greater than zero")]
    ZeroInterval,

    #[error("--trace prints to stdout and requires --headless")]
    TraceRequiresHeadless,
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Failed to write snapshot file: {0}")]
    WriteFailed(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profiler_error_display() {
        let err = ProfilerError::ProcessNotFound(Pid(1234));
        assert_eq!(err.to_string(), "Process PID:1234 not found");
    }

    #[test]
    fn test_probe_attach_error() {
        let err = ProfilerError::ProbeAttachFailed {
            probe: "php:compile__file__entry".to_string(),
            binary: "/usr/lib/apache2/modules/libphp8.1.so".to_string(),
            error: "no such file".to_string(),
        };
        assert!(err.to_string().contains("compile__file__entry"));
        assert!(err.to_string().contains("libphp8.1.so"));
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::ZeroCapacity { name: "compiled files" };
        assert_eq!(err.to_string(), "compiled files capacity must be at least 1");
    }
}
