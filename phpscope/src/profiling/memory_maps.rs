//! Process memory maps and USDT semaphores
//!
//! A semaphore-guarded probe only fires while its 16-bit enable counter in the
//! target's memory is non-zero. The counter's file offset comes from the probe
//! note; `/proc/<pid>/maps` tells where the library mapped that offset, and
//! `/proc/<pid>/mem` lets us bump it.

use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::fs::{self, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path;

use crate::domain::{Pid, ProfilerError};

/// One line of `/proc/<pid>/maps`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapEntry {
    pub start: u64,
    pub end: u64,
    /// File offset mapped at `start`
    pub offset: u64,
    pub perms: String,
    pub path: Option<String>,
}

impl MapEntry {
    /// Check if an address falls within this mapping
    #[must_use]
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.start && addr < self.end
    }

    /// Runtime address of `file_offset`, if this mapping covers it
    #[must_use]
    pub fn address_of(&self, file_offset: u64) -> Option<u64> {
        let delta = file_offset.checked_sub(self.offset)?;
        (delta < self.end - self.start).then(|| self.start + delta)
    }
}

/// Parse a maps line: "start-end perms offset dev inode pathname"
#[must_use]
pub fn parse_maps_line(line: &str) -> Option<MapEntry> {
    let mut parts = line.split_whitespace();
    let (start, end) = parts.next()?.split_once('-')?;
    let start = u64::from_str_radix(start, 16).ok()?;
    let end = u64::from_str_radix(end, 16).ok()?;
    let perms = parts.next()?.to_string();
    let offset = u64::from_str_radix(parts.next()?, 16).ok()?;
    let _dev = parts.next()?;
    let _inode = parts.next()?;
    let path = parts.next().map(str::to_string);

    if end < start {
        return None;
    }
    Some(MapEntry { start, end, offset, perms, path })
}

/// All mappings of `library` in process `pid`
///
/// # Errors
/// Returns an error if /proc/pid/maps cannot be read or the library is not mapped
pub fn library_mappings(pid: Pid, library: &Path) -> Result<Vec<MapEntry>> {
    let maps_path = format!("/proc/{}/maps", pid.0);
    let maps = fs::read_to_string(&maps_path).context(format!("Failed to read {maps_path}"))?;

    // Compare against the canonical path; maps shows resolved symlinks
    let wanted = fs::canonicalize(library).unwrap_or_else(|_| library.to_path_buf());
    let entries: Vec<MapEntry> = maps
        .lines()
        .filter_map(parse_maps_line)
        .filter(|e| e.path.as_deref().is_some_and(|p| Path::new(p) == wanted))
        .collect();

    if entries.is_empty() {
        return Err(ProfilerError::LibraryNotMapped {
            pid,
            binary: library.display().to_string(),
        }
        .into());
    }

    let start = entries.iter().map(|e| e.start).min().unwrap_or(0);
    let end = entries.iter().map(|e| e.end).max().unwrap_or(0);
    info!(
        "{} mapped at 0x{:x} - 0x{:x} (size: {} KB)",
        library.display(),
        start,
        end,
        (end - start) / 1024
    );
    Ok(entries)
}

/// Runtime address of a file offset across a library's mappings
#[must_use]
pub fn runtime_address(entries: &[MapEntry], file_offset: u64) -> Option<u64> {
    entries.iter().find_map(|e| e.address_of(file_offset))
}

/// Semaphores incremented in a target process, released on drop
#[derive(Debug)]
pub struct SemaphoreSet {
    pid: Pid,
    addresses: Vec<u64>,
}

impl SemaphoreSet {
    #[must_use]
    pub fn new(pid: Pid) -> Self {
        Self { pid, addresses: Vec::new() }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    /// Increment the semaphore at runtime address `addr`
    ///
    /// # Errors
    /// Returns an error if /proc/pid/mem cannot be opened, read or written
    pub fn enable(&mut self, addr: u64) -> Result<u16> {
        let value = adjust_semaphore(self.pid, addr, 1)?;
        self.addresses.push(addr);
        debug!("semaphore 0x{addr:x} now {value}");
        Ok(value)
    }

    /// Undo every increment made through this set
    pub fn release(&mut self) {
        for addr in self.addresses.drain(..) {
            if let Err(e) = adjust_semaphore(self.pid, addr, -1) {
                // The process may already be gone
                warn!("Failed to release semaphore 0x{addr:x}: {e}");
            }
        }
    }
}

impl Drop for SemaphoreSet {
    fn drop(&mut self) {
        self.release();
    }
}

fn adjust_semaphore(pid: Pid, addr: u64, delta: i16) -> Result<u16> {
    let mem_path = format!("/proc/{}/mem", pid.0);
    let mem = OpenOptions::new()
        .read(true)
        .write(true)
        .open(&mem_path)
        .with_context(|| format!("Failed to open {mem_path}"))?;

    let mut buf = [0u8; 2];
    mem.read_exact_at(&mut buf, addr)
        .with_context(|| format!("Failed to read semaphore at 0x{addr:x}"))?;
    let value = u16::from_ne_bytes(buf).saturating_add_signed(delta);
    mem.write_all_at(&value.to_ne_bytes(), addr)
        .with_context(|| format!("Failed to write semaphore at 0x{addr:x}"))?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIBPHP_MAPS: &str = "\
7f1a2c000000-7f1a2c200000 r--p 00000000 08:01 1311 /usr/lib/apache2/modules/libphp8.1.so
7f1a2c200000-7f1a2c800000 r-xp 00200000 08:01 1311 /usr/lib/apache2/modules/libphp8.1.so
7f1a2ca00000-7f1a2ca40000 rw-p 00a00000 08:01 1311 /usr/lib/apache2/modules/libphp8.1.so
7f1a2ca40000-7f1a2ca60000 rw-p 00000000 00:00 0";

    #[test]
    fn test_map_entry_contains() {
        let entry = MapEntry {
            start: 0x1000,
            end: 0x2000,
            offset: 0,
            perms: "r-xp".into(),
            path: None,
        };

        assert!(entry.contains(0x1000));
        assert!(entry.contains(0x1FFF));
        assert!(!entry.contains(0x0FFF));
        assert!(!entry.contains(0x2000));
    }

    #[test]
    fn test_parse_maps_lines() {
        let entries: Vec<_> = LIBPHP_MAPS.lines().filter_map(parse_maps_line).collect();
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[1].offset, 0x20_0000);
        assert_eq!(entries[1].perms, "r-xp");
        assert_eq!(entries[3].path, None);
    }

    #[test]
    fn test_runtime_address_of_data_offset() {
        let entries: Vec<_> = LIBPHP_MAPS.lines().filter_map(parse_maps_line).collect();

        assert_eq!(runtime_address(&entries, 0xa0_0010), Some(0x7f1a_2ca0_0010));
        assert_eq!(runtime_address(&entries, 0x20_0000), Some(0x7f1a_2c20_0000));
        // Anonymous mapping with offset 0 also matches low offsets; callers
        // filter to the library first
        assert_eq!(runtime_address(&entries[1..2], 0x10), None);
    }

    #[test]
    fn test_library_not_mapped_in_self() {
        let pid = Pid(std::process::id() as i32);
        let result = library_mappings(pid, Path::new("/nonexistent/libphp.so"));
        assert!(result.is_err());
    }
}
