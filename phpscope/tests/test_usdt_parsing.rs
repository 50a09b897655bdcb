use phpscope::domain::UsdtError;
use phpscope::profiling::usdt::{
    parse_arg_list, parse_arg_spec, parse_stapsdt_notes, probes_from_elf, resolve_probe,
    LoadSegment, Semaphore, UsdtNote, UsdtProbe,
};
use phpscope_common::{regs, USDT_ARG_CONST, USDT_ARG_REG, USDT_ARG_REG_DEREF};

/// Encode one little-endian `NT_STAPSDT` note the way the assembler emits it
fn stapsdt_note(pc: u64, base: u64, semaphore: u64, provider: &str, name: &str, args: &str) -> Vec<u8> {
    let mut desc = Vec::new();
    desc.extend_from_slice(&pc.to_le_bytes());
    desc.extend_from_slice(&base.to_le_bytes());
    desc.extend_from_slice(&semaphore.to_le_bytes());
    for s in [provider, name, args] {
        desc.extend_from_slice(s.as_bytes());
        desc.push(0);
    }

    let owner = b"stapsdt\0";
    let mut note = Vec::new();
    note.extend_from_slice(&(owner.len() as u32).to_le_bytes());
    note.extend_from_slice(&(desc.len() as u32).to_le_bytes());
    note.extend_from_slice(&3u32.to_le_bytes());
    note.extend_from_slice(owner);
    note.extend_from_slice(&desc);
    while note.len() % 4 != 0 {
        note.push(0);
    }
    note
}

#[test]
fn test_parse_notes_from_section_bytes() {
    let mut section = stapsdt_note(0x1500, 0x1000, 0, "php", "compile__file__entry", "8@%rax 8@%rdx");
    section.extend(stapsdt_note(
        0x1600,
        0x1000,
        0x3010,
        "php",
        "request__startup",
        "8@%rdi 8@%rsi 8@-16(%rbp)",
    ));

    let notes = parse_stapsdt_notes(&section, true).unwrap();
    assert_eq!(notes.len(), 2);
    assert_eq!(notes[0].name, "compile__file__entry");
    assert_eq!(notes[0].pc, 0x1500);
    assert_eq!(notes[0].semaphore, 0);
    assert_eq!(notes[1].semaphore, 0x3010);
    assert_eq!(notes[1].arguments, "8@%rdi 8@%rsi 8@-16(%rbp)");
}

#[test]
fn test_truncated_note_is_malformed() {
    let section = stapsdt_note(0x1500, 0, 0, "php", "exception__thrown", "8@%rax");
    let err = parse_stapsdt_notes(&section[..section.len() - 8], true).unwrap_err();
    assert_eq!(err, UsdtError::MalformedNote(0));
}

#[test]
fn test_foreign_notes_are_skipped() {
    let mut section = Vec::new();
    // GNU build-id note: owner "GNU", type 3, 4-byte descriptor
    section.extend_from_slice(&4u32.to_le_bytes());
    section.extend_from_slice(&4u32.to_le_bytes());
    section.extend_from_slice(&3u32.to_le_bytes());
    section.extend_from_slice(b"GNU\0");
    section.extend_from_slice(&[0xde, 0xad, 0xbe, 0xef]);
    section.extend(stapsdt_note(0x10, 0, 0, "php", "exception__caught", "8@%rax"));

    let notes = parse_stapsdt_notes(&section, true).unwrap();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].name, "exception__caught");
}

#[test]
fn test_arg_descriptor_forms() {
    let reg = parse_arg_spec("-4@%esi").unwrap();
    assert_eq!((reg.kind, reg.reg, reg.size), (USDT_ARG_REG, regs::RSI, -4));

    let constant = parse_arg_spec("8@$0x10").unwrap();
    assert_eq!((constant.kind, constant.offset), (USDT_ARG_CONST, 16));

    let deref = parse_arg_spec("8@-24(%rbp)").unwrap();
    assert_eq!((deref.kind, deref.reg, deref.offset), (USDT_ARG_REG_DEREF, regs::RBP, -24));

    let bare = parse_arg_spec("8@(%r12)").unwrap();
    assert_eq!((bare.kind, bare.reg, bare.offset), (USDT_ARG_REG_DEREF, regs::R12, 0));
}

#[test]
fn test_arg_descriptor_errors() {
    assert!(matches!(parse_arg_spec("8%rax"), Err(UsdtError::InvalidArgSpec(_))));
    assert!(matches!(parse_arg_spec("3@%rax"), Err(UsdtError::InvalidArgSpec(_))));
    assert!(matches!(parse_arg_spec("8@(%rax,%rbx,8)"), Err(UsdtError::InvalidArgSpec(_))));
    assert!(matches!(parse_arg_spec("8@%xmm0"), Err(UsdtError::UnknownRegister(_))));
    assert_eq!(parse_arg_list("  ").unwrap(), vec![]);
}

#[test]
fn test_resolve_applies_prelink_shift() {
    let note = UsdtNote {
        provider: "php".into(),
        name: "request__shutdown".into(),
        pc: 0x1500,
        base: 0x1000,
        semaphore: 0x3000,
        arguments: "8@%rdi 8@%rsi 8@%rdx".into(),
    };
    let segments = [
        LoadSegment { address: 0x2000, file_offset: 0x1000, file_size: 0x1000 },
        LoadSegment { address: 0x4000, file_offset: 0x3000, file_size: 0x100 },
    ];

    // .stapsdt.base moved from 0x1000 to 0x2000
    let probe = resolve_probe(&note, Some(0x2000), &segments).unwrap();
    assert_eq!(probe.address, 0x2500);
    assert_eq!(probe.file_offset, 0x1500);
    assert_eq!(probe.semaphore, Some(Semaphore { address: 0x4000, file_offset: 0x3000 }));
    assert_eq!(probe.spec().unwrap().arg_count, 3);
}

#[test]
fn test_resolve_unmapped_address() {
    let note = UsdtNote {
        provider: "php".into(),
        name: "compile__file__entry".into(),
        pc: 0x9000,
        base: 0,
        semaphore: 0,
        arguments: String::new(),
    };
    let segments = [LoadSegment { address: 0x0, file_offset: 0x0, file_size: 0x1000 }];
    assert_eq!(resolve_probe(&note, None, &segments), Err(UsdtError::AddressNotMapped(0x9000)));
}

#[test]
fn test_too_many_arguments() {
    let probe = UsdtProbe {
        provider: "php".into(),
        name: "function__entry".into(),
        address: 0,
        file_offset: 0,
        semaphore: None,
        arguments: "8@%rdi 8@%rsi 8@%rdx 8@%rcx".into(),
    };
    assert_eq!(probe.spec(), Err(UsdtError::TooManyArgs("php:function__entry".into())));
}

#[test]
fn test_non_elf_input_is_rejected() {
    assert!(matches!(probes_from_elf(b"definitely not an ELF file"), Err(UsdtError::InvalidElf(_))));
}
