use bankpatch_core::{
    apply_jump_patch, build_dispatch, relocate_table, AddressingMode as AM, DispatchExtension,
    DispatchTarget, HookSite, Image, Instruction, MemoryMap, Mnemonic as M, Placement, PointerRef,
    RecordCodec, Routine, SpaceManager, TableRelocation,
};

const EFFECT_POINTER: usize = 0x01EB3E;
const EFFECT_TABLE: usize = 0x0C2A05;
const EFFECT_COUNT: usize = 0x39;

fn cartridge() -> Image {
    let mut data = vec![0xFF; 0x600000];

    // C1EB3D  BF 05 2A CC    LDA $CC2A05,X
    // C1EB41  85 20          STA $20
    // C1EB43  0A             ASL
    // C1EB44  AA             TAX
    // C1EB45  FC 61 FA       JSR ($FA61,X)
    // C1EB48  60             RTS
    data[0x01EB3D..0x01EB49].copy_from_slice(&[
        0xBF, 0x05, 0x2A, 0xCC, 0x85, 0x20, 0x0A, 0xAA, 0xFC, 0x61, 0xFA, 0x60,
    ]);
    for i in 0..EFFECT_COUNT * 3 {
        data[EFFECT_TABLE + i] = (i % 251) as u8;
    }

    let space = SpaceManager::with_free_ranges([0x410000..0x5F0000]);
    Image::with_space(data, MemoryMap::ExHiRom, space)
}

// Follow a JML written at `file` and return its target.
fn long_jump_target(image: &Image, file: usize) -> u32 {
    let bytes = image.read_at(file, 4).unwrap();
    assert_eq!(bytes[0], 0x5C, "expected JML at {file:#X}");
    u32::from_le_bytes([bytes[1], bytes[2], bytes[3], 0])
}

#[test]
fn effect_table_extended_by_two_records() {
    let mut image = cartridge();
    let original = RecordCodec::indirect(EFFECT_POINTER, 3, EFFECT_COUNT);
    let first_before = original.read(&image, 0).unwrap();

    let extra = vec![vec![0x43, 0x00, 0x00], vec![0x44, 0x00, 0x02]];
    let references = [
        PointerRef::new(0x01EB2E, 1),
        PointerRef::new(0x01EB36, 2),
        PointerRef::new(EFFECT_POINTER, 0),
    ];
    relocate_table(
        &mut image,
        &TableRelocation {
            source: &original,
            extra: &extra,
            references: &references,
            placement: Placement::within(0x10000).at_or_after(0x410000),
        },
    )
    .unwrap();

    // Fresh descriptor over the relocated table.
    let extended = RecordCodec::indirect(EFFECT_POINTER, 3, EFFECT_COUNT + 2);
    assert_eq!(extended.read(&image, 0x3A).unwrap(), vec![0x44, 0x00, 0x02]);
    assert_eq!(extended.read(&image, 0).unwrap(), first_before);
    assert_ne!(extended.base(&image).unwrap(), EFFECT_TABLE);

    // Byte-offset references point one and two bytes into the copy.
    let base_cpu = image.read_u24(EFFECT_POINTER).unwrap();
    assert_eq!(image.read_u24(0x01EB2E).unwrap(), base_cpu + 1);
    assert_eq!(image.read_u24(0x01EB36).unwrap(), base_cpu + 2);
}

#[test]
fn hooked_site_runs_routine_then_resumes_after_hook() {
    let mut image = cartridge();
    // Replace STA $20 / ASL / TAX (four bytes) and re-execute them.
    let hook = HookSite::new(0x01EB41, 4).unwrap();
    let resume_cpu = image.to_cpu(hook.address + 4).unwrap();
    let routine = Routine::new()
        .op(M::Inc, AM::Dir, 0x1E)
        .op(M::Sta, AM::Dir, 0x20)
        .implied(M::Asl)
        .implied(M::Tax)
        .op(M::Jml, AM::Lng, resume_cpu);

    let placed = apply_jump_patch(&routine, hook, &mut image, 0x10000).unwrap();

    let entry = long_jump_target(&image, hook.address);
    assert_eq!(entry, placed.cpu_addr);

    let body_file = image.to_file(entry).unwrap();
    let body = image.read_at(body_file, placed.len).unwrap();
    assert_eq!(&body[..6], &[0xE6, 0x1E, 0x85, 0x20, 0x0A, 0xAA]);

    let exit = long_jump_target(&image, body_file + placed.len - 4);
    assert_eq!(exit, 0xC1EB45);
    // The original code after the hook is untouched.
    let after = image.to_file(exit).unwrap();
    assert_eq!(image.read_at(after, 4).unwrap(), &[0xFC, 0x61, 0xFA, 0x60]);
}

#[test]
fn dispatch_with_three_original_and_two_added_entries() {
    let mut image = cartridge();
    let venus_bow = Routine::new()
        .op(M::Ldx, AM::Imm16, 777)
        .op(M::Stx, AM::Abs, 0xAD89)
        .implied(M::Rts);
    let crisis = Routine::new()
        .implied(M::Tdc)
        .op(M::Ldx, AM::Abs, 0xB1F4)
        .implied(M::Rts);

    let ext = DispatchExtension {
        split: 3,
        routines: vec![venus_bow.clone(), crisis],
        hook: HookSite::new(0x01EB41, 4).unwrap(),
        preamble: vec![Instruction::value(M::Sta, AM::Dir, 0x20).into()],
        passthrough: vec![
            Instruction::implied(M::Asl).into(),
            Instruction::implied(M::Tax).into(),
        ],
        resume: 0xC1EB45,
        rejoin: 0xC1EB48,
        placement: Placement::within(0x10000).at_or_after(0x410000),
    };
    let layout = build_dispatch(&mut image, &ext).unwrap();

    assert_eq!(layout.route(&image, 1).unwrap(), DispatchTarget::Original(1));

    match layout.route(&image, 3).unwrap() {
        DispatchTarget::Added { slot, address } => {
            assert_eq!(slot, 0);
            let file = image.to_file(address).unwrap();
            let expected = bankpatch_core::assemble(&venus_bow, address).unwrap().bytes;
            assert_eq!(image.read_at(file, expected.len()).unwrap(), &expected[..]);
        }
        other => panic!("index 3 routed to {other:?}"),
    }

    // Pointer table, routines and switch share one bank.
    let bank = image.to_cpu(layout.pointer_table).unwrap() >> 16;
    assert_eq!(image.to_cpu(layout.switch).unwrap() >> 16, bank);
    assert_eq!(long_jump_target(&image, 0x01EB41), image.to_cpu(layout.switch).unwrap());
}

#[test]
fn consecutive_patches_never_overlap() {
    let mut image = cartridge();
    let mut spans = Vec::new();
    for (i, hook) in [0x01EB41usize, 0x01EB3D].iter().enumerate() {
        let routine = Routine::new()
            .bytes(&vec![0xEA; 0x100 * (i + 1)])
            .op(M::Jml, AM::Lng, 0xC1EB45);
        let placed = apply_jump_patch(
            &routine,
            HookSite::new(*hook, 4).unwrap(),
            &mut image,
            0x10000,
        )
        .unwrap();
        spans.push(placed.file_addr..placed.file_addr + placed.len);
    }
    assert!(spans[0].end <= spans[1].start || spans[1].end <= spans[0].start);
}
