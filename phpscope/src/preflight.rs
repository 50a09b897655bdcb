//! Pre-flight checks for phpscope
//!
//! Validates system requirements before attempting to load eBPF programs.
//! Provides clear, actionable error messages when requirements aren't met.

#![allow(unsafe_code)] // geteuid() requires unsafe

use anyhow::{bail, Context, Result};
use log::warn;
use object::Object;
use std::path::Path;

use crate::config::ProbeConfig;
use crate::domain::{Pid, ProfilerError};

/// Minimum kernel version required for the eBPF ring buffer
const MIN_KERNEL_VERSION: (u32, u32) = (5, 8);

/// Run all pre-flight checks before eBPF loading
///
/// A missing or unusable memcached library is not fatal; it only disables
/// the value-size probe. Returns whether that library can be used.
pub fn run_preflight_checks(probes: &ProbeConfig, quiet: bool) -> Result<bool> {
    check_privileges()?;
    check_kernel_version()?;
    check_library_exists(&probes.php_lib)?;
    check_usdt_notes(&probes.php_lib, quiet)?;

    if let Some(pid) = probes.target_pid {
        check_process_exists(pid)?;
        check_proc_access(pid)?;
    }

    let memcached_ok = match &probes.memcached_lib {
        Some(lib) => match check_library_exists(lib) {
            Ok(()) => true,
            Err(e) => {
                warn!("memcached probe disabled: {e:#}");
                false
            }
        },
        None => false,
    };
    Ok(memcached_ok)
}

/// Check if running with sufficient privileges for eBPF
fn check_privileges() -> Result<()> {
    if unsafe { libc::geteuid() } == 0 {
        return Ok(());
    }

    bail!(
        "Permission denied: phpscope requires root privileges to load eBPF programs.\n\n\
         Run with: sudo phpscope ..."
    );
}

/// `(major, minor)` from a release string such as `6.1.0-arch1-1`
fn parse_kernel_release(release: &str) -> Option<(u32, u32)> {
    let mut parts = release.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts
        .next()?
        .chars()
        .take_while(char::is_ascii_digit)
        .collect::<String>()
        .parse()
        .ok()?;
    Some((major, minor))
}

fn check_kernel_version() -> Result<()> {
    let version_str = std::fs::read_to_string("/proc/version")
        .context("Failed to read kernel version from /proc/version")?;

    // "Linux version 5.15.0-generic ..."
    let release = version_str.split_whitespace().nth(2).unwrap_or("unknown");

    // Can't parse, assume it's fine
    let Some((major, minor)) = parse_kernel_release(release) else {
        return Ok(());
    };

    if (major, minor) < MIN_KERNEL_VERSION {
        bail!(
            "Kernel version {}.{} is too old.\n\n\
             phpscope requires Linux {}.{} or newer for eBPF ring buffer support.\n\
             Current kernel: {}",
            major,
            minor,
            MIN_KERNEL_VERSION.0,
            MIN_KERNEL_VERSION.1,
            release
        );
    }

    Ok(())
}

/// Check that a probe library exists and is a regular file
fn check_library_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        bail!(
            "Library not found: {}\n\n\
             Make sure the path is correct, or pass it with --php-lib / --memcached-lib.",
            path.display()
        );
    }
    if !path.is_file() {
        bail!(
            "Not a file: {}\n\n\
             Library paths must point to a shared object, not a directory.",
            path.display()
        );
    }
    Ok(())
}

/// Warn when the PHP library was built without DTrace support
fn check_usdt_notes(path: &Path, quiet: bool) -> Result<()> {
    if quiet {
        return Ok(());
    }

    let file_data = std::fs::read(path)
        .with_context(|| format!("Failed to read library: {}", path.display()))?;

    let Ok(obj) = object::File::parse(&*file_data) else {
        // Not a valid object file, let later stages handle it
        return Ok(());
    };

    if obj.section_by_name(".note.stapsdt").is_none() {
        eprintln!(
            "warning: {} has no .note.stapsdt section; PHP was likely built without --enable-dtrace",
            path.display()
        );
    }

    Ok(())
}

/// Check if the target process exists
pub fn check_process_exists(pid: Pid) -> Result<()> {
    let proc_path = format!("/proc/{}", pid.0);
    if !Path::new(&proc_path).exists() {
        return Err(ProfilerError::ProcessNotFound(pid).into());
    }
    Ok(())
}

/// Check if we can read the process's memory maps
pub fn check_proc_access(pid: Pid) -> Result<()> {
    let maps_path = format!("/proc/{}/maps", pid.0);
    std::fs::read_to_string(&maps_path).with_context(|| {
        format!(
            "Cannot read {maps_path}\n\n\
             This usually means:\n\
             - The process doesn't exist (check: ps -p {})\n\
             - Permission denied (run with sudo)\n\
             - /proc is not mounted",
            pid.0
        )
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_kernel_release() {
        assert_eq!(parse_kernel_release("5.15.0-generic"), Some((5, 15)));
        assert_eq!(parse_kernel_release("6.1rc2"), Some((6, 1)));
        assert_eq!(parse_kernel_release("unknown"), None);
    }

    #[test]
    fn test_library_not_found() {
        let result = check_library_exists(Path::new("/nonexistent/path/libphp.so"));
        let err = result.unwrap_err().to_string();
        assert!(err.contains("Library not found"));
    }

    #[test]
    fn test_directory_is_not_a_library() {
        let dir = tempfile::tempdir().unwrap();
        let err = check_library_exists(dir.path()).unwrap_err().to_string();
        assert!(err.contains("Not a file"));
    }

    #[test]
    fn test_process_not_found() {
        let err = check_process_exists(Pid(999_999_999)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ProfilerError>(),
            Some(ProfilerError::ProcessNotFound(Pid(999_999_999)))
        ));
    }
}
