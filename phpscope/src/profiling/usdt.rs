//! # USDT Probe Discovery
//!
//! Statically defined tracepoints (USDT, the SystemTap SDT format) are
//! described by `NT_STAPSDT` notes in the `.note.stapsdt` section of the
//! binary that carries them:
//!
//! ```text
//! n_namesz | n_descsz | n_type=3 | "stapsdt\0" | pc | base | semaphore | provider\0name\0args\0
//! ```
//!
//! `pc` is the probe site's link-time address. `base` is the link-time address
//! of `.stapsdt.base`; if the file was prelinked, the difference between that
//! and the section's current address shifts every `pc` and semaphore.
//!
//! `args` lists one GNU assembler operand per probe argument, prefixed by its
//! size in bytes (negative when signed):
//!
//! | Descriptor | Meaning |
//! |------------|---------|
//! | `8@$5` | constant 5 |
//! | `-4@%eax` | signed 32-bit value of `eax` |
//! | `8@-24(%rbp)` | 8 bytes at `rbp - 24` |
//!
//! The probe programs read arguments through these descriptors, converted to
//! [`UsdtArgSpec`] and stored per probe slot in `USDT_SPECS`.

use object::{Object, ObjectSection, ObjectSegment};
use phpscope_common::{
    regs, UsdtArgSpec, UsdtSpec, USDT_ARG_CONST, USDT_ARG_REG, USDT_ARG_REG_DEREF, USDT_MAX_ARGS,
};
use std::path::Path;

use crate::domain::{ProfilerError, UsdtError};

const NT_STAPSDT: u32 = 3;
const STAPSDT_OWNER: &[u8] = b"stapsdt";
const NOTE_HEADER_LEN: usize = 12;

/// One raw `NT_STAPSDT` note
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsdtNote {
    pub provider: String,
    pub name: String,
    pub pc: u64,
    pub base: u64,
    /// Link-time address of the probe's enable counter (0 if unguarded)
    pub semaphore: u64,
    pub arguments: String,
}

/// A `PT_LOAD` segment: where a range of virtual addresses lives in the file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadSegment {
    pub address: u64,
    pub file_offset: u64,
    pub file_size: u64,
}

impl LoadSegment {
    /// File offset of `addr`, if the segment's file image covers it
    #[must_use]
    pub fn file_offset_of(&self, addr: u64) -> Option<u64> {
        let delta = addr.checked_sub(self.address)?;
        (delta < self.file_size).then(|| self.file_offset + delta)
    }
}

/// Probe enable counter location
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Semaphore {
    pub address: u64,
    pub file_offset: u64,
}

/// A probe site ready for attachment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsdtProbe {
    pub provider: String,
    pub name: String,
    /// Virtual address of the probe site (prelink-adjusted)
    pub address: u64,
    /// Offset of the probe site in the file; the uprobe attach point
    pub file_offset: u64,
    pub semaphore: Option<Semaphore>,
    pub arguments: String,
}

impl UsdtProbe {
    #[must_use]
    pub fn qualified_name(&self) -> String {
        format!("{}:{}", self.provider, self.name)
    }

    /// Argument locations for the probe programs
    pub fn spec(&self) -> Result<UsdtSpec, UsdtError> {
        let parsed = parse_arg_list(&self.arguments)?;
        if parsed.len() > USDT_MAX_ARGS {
            return Err(UsdtError::TooManyArgs(self.qualified_name()));
        }

        let mut spec = UsdtSpec::default();
        spec.args[..parsed.len()].copy_from_slice(&parsed);
        spec.arg_count = parsed.len() as u32;
        Ok(spec)
    }
}

/// Read every USDT probe declared by the ELF file at `path`
pub fn read_probes(path: &Path) -> Result<Vec<UsdtProbe>, ProfilerError> {
    if !path.is_file() {
        return Err(ProfilerError::LibraryNotFound(path.to_path_buf()));
    }
    let data = std::fs::read(path)?;
    Ok(probes_from_elf(&data)?)
}

/// Extract USDT probes from an in-memory ELF image.
///
/// A file without `.note.stapsdt` yields an empty list.
pub fn probes_from_elf(data: &[u8]) -> Result<Vec<UsdtProbe>, UsdtError> {
    let file = object::File::parse(data).map_err(|e| UsdtError::InvalidElf(e.to_string()))?;
    if !file.is_64() {
        return Err(UsdtError::InvalidElf("only 64-bit objects are supported".into()));
    }

    let Some(section) = file.section_by_name(".note.stapsdt") else {
        return Ok(Vec::new());
    };
    let notes = section.data().map_err(|e| UsdtError::InvalidElf(e.to_string()))?;
    let notes = parse_stapsdt_notes(notes, file.is_little_endian())?;

    let stapsdt_base = file.section_by_name(".stapsdt.base").map(|s| s.address());
    let segments: Vec<LoadSegment> = file
        .segments()
        .map(|seg| {
            let (file_offset, file_size) = seg.file_range();
            LoadSegment { address: seg.address(), file_offset, file_size }
        })
        .collect();

    notes.iter().map(|note| resolve_probe(note, stapsdt_base, &segments)).collect()
}

/// Apply the prelink adjustment and translate addresses to file offsets
pub fn resolve_probe(
    note: &UsdtNote,
    stapsdt_base: Option<u64>,
    segments: &[LoadSegment],
) -> Result<UsdtProbe, UsdtError> {
    let shift = |addr: u64| match stapsdt_base {
        Some(actual) if note.base != 0 => addr.wrapping_add(actual.wrapping_sub(note.base)),
        _ => addr,
    };
    let to_offset = |addr: u64| {
        segments
            .iter()
            .find_map(|seg| seg.file_offset_of(addr))
            .ok_or(UsdtError::AddressNotMapped(addr))
    };

    let address = shift(note.pc);
    let file_offset = to_offset(address)?;

    let semaphore = if note.semaphore == 0 {
        None
    } else {
        let address = shift(note.semaphore);
        Some(Semaphore { address, file_offset: to_offset(address)? })
    };

    Ok(UsdtProbe {
        provider: note.provider.clone(),
        name: note.name.clone(),
        address,
        file_offset,
        semaphore,
        arguments: note.arguments.clone(),
    })
}

/// Parse the contents of a `.note.stapsdt` section (64-bit layout).
///
/// Notes of other owners or types are skipped.
pub fn parse_stapsdt_notes(data: &[u8], little_endian: bool) -> Result<Vec<UsdtNote>, UsdtError> {
    let read_u32 = |at: usize| -> Option<u32> {
        let bytes: [u8; 4] = data.get(at..at + 4)?.try_into().ok()?;
        Some(if little_endian { u32::from_le_bytes(bytes) } else { u32::from_be_bytes(bytes) })
    };

    let mut notes = Vec::new();
    let mut offset = 0;
    while offset + NOTE_HEADER_LEN <= data.len() {
        let malformed = || UsdtError::MalformedNote(offset);
        let namesz = read_u32(offset).ok_or_else(malformed)? as usize;
        let descsz = read_u32(offset + 4).ok_or_else(malformed)? as usize;
        let ntype = read_u32(offset + 8).ok_or_else(malformed)?;

        let name_start = offset + NOTE_HEADER_LEN;
        let desc_start = name_start + align4(namesz);
        let next = desc_start + align4(descsz);
        if next > data.len() {
            return Err(malformed());
        }

        let owner = trim_nul(&data[name_start..name_start + namesz]);
        if ntype == NT_STAPSDT && owner == STAPSDT_OWNER {
            let desc = &data[desc_start..desc_start + descsz];
            notes.push(parse_descriptor(desc, little_endian).ok_or_else(malformed)?);
        }
        offset = next;
    }
    Ok(notes)
}

fn parse_descriptor(desc: &[u8], little_endian: bool) -> Option<UsdtNote> {
    let read_u64 = |at: usize| -> Option<u64> {
        let bytes: [u8; 8] = desc.get(at..at + 8)?.try_into().ok()?;
        Some(if little_endian { u64::from_le_bytes(bytes) } else { u64::from_be_bytes(bytes) })
    };
    let pc = read_u64(0)?;
    let base = read_u64(8)?;
    let semaphore = read_u64(16)?;

    let mut strings = desc.get(24..)?.split(|&b| b == 0);
    let provider = String::from_utf8_lossy(strings.next()?).into_owned();
    let name = String::from_utf8_lossy(strings.next()?).into_owned();
    let arguments = strings.next().map(|s| String::from_utf8_lossy(s).into_owned());

    Some(UsdtNote { provider, name, pc, base, semaphore, arguments: arguments.unwrap_or_default() })
}

fn align4(n: usize) -> usize {
    (n + 3) & !3
}

fn trim_nul(bytes: &[u8]) -> &[u8] {
    bytes.split(|&b| b == 0).next().unwrap_or(bytes)
}

// ============================================================================
// Argument descriptors
// ============================================================================

/// Parse a whitespace-separated argument list (`8@%rdi -4@$1`)
pub fn parse_arg_list(arguments: &str) -> Result<Vec<UsdtArgSpec>, UsdtError> {
    arguments.split_whitespace().map(parse_arg_spec).collect()
}

/// Parse one `SIZE@OPERAND` descriptor
pub fn parse_arg_spec(desc: &str) -> Result<UsdtArgSpec, UsdtError> {
    let invalid = || UsdtError::InvalidArgSpec(desc.to_string());

    let (size, operand) = desc.split_once('@').ok_or_else(invalid)?;
    let size: i32 = size.parse().map_err(|_| invalid())?;
    if !matches!(size.unsigned_abs(), 1 | 2 | 4 | 8) {
        return Err(invalid());
    }
    let spec = |kind, reg, offset| UsdtArgSpec { kind, reg, offset, size, _padding: 0 };

    if let Some(imm) = operand.strip_prefix('$') {
        let value = parse_int(imm).ok_or_else(invalid)?;
        return Ok(spec(USDT_ARG_CONST, 0, value));
    }

    if let Some(reg) = operand.strip_prefix('%') {
        return Ok(spec(USDT_ARG_REG, register_id(reg)?, 0));
    }

    // disp(%reg); indexed forms like (%rax,%rbx,8) are not supported
    let (disp, rest) = operand.split_once('(').ok_or_else(invalid)?;
    let reg = rest.strip_suffix(')').and_then(|r| r.strip_prefix('%')).ok_or_else(invalid)?;
    if reg.contains(',') {
        return Err(invalid());
    }
    let offset = if disp.is_empty() { 0 } else { parse_int(disp).ok_or_else(invalid)? };
    Ok(spec(USDT_ARG_REG_DEREF, register_id(reg)?, offset))
}

/// Decimal or `0x` hex, optionally negative
fn parse_int(s: &str) -> Option<i64> {
    let (negative, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    let magnitude = match digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok()?,
        None => digits.parse::<u64>().ok()?,
    };
    // Large unsigned immediates keep their bit pattern
    let value = magnitude as i64;
    Some(if negative { value.wrapping_neg() } else { value })
}

/// Map an x86-64 register name (any width) to its `pt_regs` slot
pub fn register_id(name: &str) -> Result<u32, UsdtError> {
    let id = match name {
        "rax" | "eax" | "ax" | "al" => regs::RAX,
        "rbx" | "ebx" | "bx" | "bl" => regs::RBX,
        "rcx" | "ecx" | "cx" | "cl" => regs::RCX,
        "rdx" | "edx" | "dx" | "dl" => regs::RDX,
        "rsi" | "esi" | "si" | "sil" => regs::RSI,
        "rdi" | "edi" | "di" | "dil" => regs::RDI,
        "rbp" | "ebp" | "bp" | "bpl" => regs::RBP,
        "rsp" | "esp" | "sp" | "spl" => regs::RSP,
        "rip" => regs::RIP,
        _ => return numbered_register(name).ok_or_else(|| UsdtError::UnknownRegister(name.into())),
    };
    Ok(id)
}

/// `r8`..`r15` with optional `d`/`w`/`b` width suffix
fn numbered_register(name: &str) -> Option<u32> {
    let digits = name.strip_prefix('r')?;
    let digits = digits.strip_suffix(&['d', 'w', 'b'][..]).unwrap_or(digits);
    let n: u32 = digits.parse().ok()?;
    (8..=15).contains(&n).then(|| regs::R8 + (n - 8))
}

#[cfg(test)]
mod tests {
    use super::*;
    use phpscope_common::USDT_ARG_NONE;

    #[test]
    fn test_register_aliases() {
        assert_eq!(register_id("rdi"), Ok(regs::RDI));
        assert_eq!(register_id("esi"), Ok(regs::RSI));
        assert_eq!(register_id("r12"), Ok(regs::R12));
        assert_eq!(register_id("r9d"), Ok(regs::R9));
        assert_eq!(register_id("r15b"), Ok(regs::R15));
        assert_eq!(register_id("r16"), Err(UsdtError::UnknownRegister("r16".into())));
        assert_eq!(register_id("xmm0"), Err(UsdtError::UnknownRegister("xmm0".into())));
    }

    #[test]
    fn test_parse_int_forms() {
        assert_eq!(parse_int("24"), Some(24));
        assert_eq!(parse_int("-24"), Some(-24));
        assert_eq!(parse_int("0x10"), Some(16));
        assert_eq!(parse_int("-0x10"), Some(-16));
        assert_eq!(parse_int("foo"), None);
    }

    #[test]
    fn test_spec_fills_unused_slots() {
        let probe = UsdtProbe {
            provider: "php".into(),
            name: "exception__thrown".into(),
            address: 0x1000,
            file_offset: 0x1000,
            semaphore: None,
            arguments: "8@%rax".into(),
        };
        let spec = probe.spec().expect("valid arguments");

        assert_eq!(spec.arg_count, 1);
        assert_eq!(spec.args[0].kind, USDT_ARG_REG);
        assert_eq!(spec.args[1].kind, USDT_ARG_NONE);
    }

    #[test]
    fn test_spec_rejects_extra_arguments() {
        let probe = UsdtProbe {
            provider: "php".into(),
            name: "function__entry".into(),
            address: 0,
            file_offset: 0,
            semaphore: None,
            arguments: "8@%rax 8@%rdx 4@%ecx 8@%rsi 8@%rdi".into(),
        };
        assert_eq!(probe.spec(), Err(UsdtError::TooManyArgs("php:function__entry".into())));
    }

    #[test]
    fn test_segment_offset_translation() {
        let seg = LoadSegment { address: 0x20_0000, file_offset: 0x1_0000, file_size: 0x100 };
        assert_eq!(seg.file_offset_of(0x20_0010), Some(0x1_0010));
        assert_eq!(seg.file_offset_of(0x20_0100), None);
        assert_eq!(seg.file_offset_of(0x1f_ffff), None);
    }
}
