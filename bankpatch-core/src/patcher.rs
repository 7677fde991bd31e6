use std::collections::HashMap;

use crate::assemble::{assemble, assemble_with, Routine};
use crate::freespace::Placement;
use crate::image::{Image, WriteKind};
use crate::opcodes::{AddressingMode, Mnemonic};
use crate::{PatchError, Result};

/// Bytes overwritten by a hook: `JML $long`.
pub const JUMP_HOOK_LEN: usize = 4;

/// A spot in the original code that may be replaced by a long jump.
/// `consumable` is how many bytes, starting at `address`, belong to whole
/// instructions the caller is prepared to replace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HookSite {
    pub address: usize,
    pub consumable: usize,
}

impl HookSite {
    pub fn new(address: usize, consumable: usize) -> Result<Self> {
        if consumable < JUMP_HOOK_LEN {
            return Err(PatchError::HookTooSmall {
                address,
                available: consumable,
            });
        }
        Ok(HookSite {
            address,
            consumable,
        })
    }
}

/// A routine that has been written into free space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacedRoutine {
    pub file_addr: usize,
    pub cpu_addr: u32,
    pub len: usize,
    pub labels: HashMap<String, u32>,
}

/// Run `fill` against a block just reserved at `addr`. If it fails the block
/// goes back to the free list.
pub(crate) fn fill_reserved<T>(
    image: &mut Image,
    addr: usize,
    size: usize,
    fill: impl FnOnce(&mut Image) -> Result<T>,
) -> Result<T> {
    let result = fill(image);
    if result.is_err() {
        image.space_mut().mark_free(addr..addr + size);
    }
    result
}

/// Assemble `routine`, find room for it and write it there.
///
/// If encoding or writing fails the reserved space is handed back, so the
/// image and the free list are left as they were.
pub fn place_routine(
    routine: &Routine,
    image: &mut Image,
    placement: Placement,
    externals: &HashMap<String, u32>,
) -> Result<PlacedRoutine> {
    let size = routine.encoded_len()?;
    let file_addr = image.allocate(size, placement)?;

    let (cpu_addr, assembled) = fill_reserved(image, file_addr, size, |image| {
        let cpu = image.to_cpu(file_addr)?;
        let assembled = assemble_with(routine, cpu, externals)?;
        image.write_at(file_addr, &assembled.bytes, WriteKind::MarkUsed)?;
        Ok((cpu, assembled))
    })?;
    log::debug!(
        "placed {:#X}-byte routine at file {:#08X} (cpu {:#08X})",
        size,
        file_addr,
        cpu_addr
    );

    Ok(PlacedRoutine {
        file_addr,
        cpu_addr,
        len: size,
        labels: assembled.labels,
    })
}

/// Overwrite the hook with `JML target`.
pub fn write_long_jump(image: &mut Image, hook: HookSite, target: u32) -> Result<()> {
    let jump = Routine::new().op(Mnemonic::Jml, AddressingMode::Lng, target);
    let bytes = assemble(&jump, 0)?.bytes;
    debug_assert_eq!(bytes.len(), JUMP_HOOK_LEN);
    image.write_at(hook.address, &bytes, WriteKind::NoMark)?;
    log::debug!("hooked {:#08X} -> {:#08X}", hook.address, target);
    Ok(())
}

/// Write `routine` to free space and redirect `hook` into it.
///
/// The routine must end in an unconditional transfer, normally a jump back to
/// the first original instruction past the bytes it replaces.
pub fn apply_jump_patch(
    routine: &Routine,
    hook: HookSite,
    image: &mut Image,
    boundary: usize,
) -> Result<PlacedRoutine> {
    apply_jump_patch_at(routine, hook, image, Placement::within(boundary))
}

pub fn apply_jump_patch_at(
    routine: &Routine,
    hook: HookSite,
    image: &mut Image,
    placement: Placement,
) -> Result<PlacedRoutine> {
    apply_jump_patch_with(routine, hook, image, placement, &HashMap::new())
}

pub fn apply_jump_patch_with(
    routine: &Routine,
    hook: HookSite,
    image: &mut Image,
    placement: Placement,
    externals: &HashMap<String, u32>,
) -> Result<PlacedRoutine> {
    if !routine.ends_with_unconditional_transfer() {
        return Err(PatchError::MissingReturn {
            hook: hook.address,
        });
    }
    // Make sure the hook itself is writable before spending any space.
    image.read_at(hook.address, JUMP_HOOK_LEN)?;

    let placed = place_routine(routine, image, placement, externals)?;
    write_long_jump(image, hook, placed.cpu_addr)?;
    Ok(placed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assemble::AsmError;
    use crate::freespace::SpaceManager;
    use crate::image::MemoryMap;
    use crate::opcodes::AddressingMode as AM;
    use crate::opcodes::Mnemonic as M;

    // Original code at file 0x01E5D8 (CPU C1E5D8):
    //   C1E5D8  AE F4 B1   LDX $B1F4
    //   C1E5DB  BD 4B 5E   LDA $5E4B,X
    //   C1E5DE  89 40      BIT #$40
    fn test_image() -> Image {
        let mut data = vec![0xFF; 0x420000];
        data[0x01E5D8..0x01E5E0]
            .copy_from_slice(&[0xAE, 0xF4, 0xB1, 0xBD, 0x4B, 0x5E, 0x89, 0x40]);
        let space = SpaceManager::with_free_ranges([0x410000..0x420000]);
        Image::with_space(data, MemoryMap::ExHiRom, space)
    }

    fn crown_routine() -> Routine {
        Routine::new()
            .op(M::Lda, AM::AbsX, 0x5E51)
            .op(M::Bit, AM::Imm8, 0x80)
            .branch(M::Beq, "end")
            .op(M::Jsl, AM::Lng, 0xC1FDD3)
            .label("end")
            .op(M::Ldx, AM::Abs, 0xB1F4)
            .op(M::Lda, AM::AbsX, 0x5E4B)
            .op(M::Jml, AM::Lng, 0xC1E5DE)
    }

    #[test]
    fn hook_jumps_to_routine_which_returns_past_hook() {
        let mut image = test_image();
        let hook = HookSite::new(0x01E5D8, 6).unwrap();
        let placed = apply_jump_patch(&crown_routine(), hook, &mut image, 0x10000).unwrap();

        assert_eq!(placed.file_addr, 0x410000);
        assert_eq!(placed.cpu_addr, 0x410000);
        assert_eq!(
            image.read_at(0x01E5D8, 8).unwrap(),
            &[0x5C, 0x00, 0x00, 0x41, 0x4B, 0x5E, 0x89, 0x40]
        );

        let body = image.read_at(placed.file_addr, placed.len).unwrap();
        assert_eq!(&body[body.len() - 4..], &[0x5C, 0xDE, 0xE5, 0xC1]);
        // Execution resumes at BIT #$40, the first untouched instruction.
        let resume = image.to_file(0xC1E5DE).unwrap();
        assert_eq!(image.read_at(resume, 2).unwrap(), &[0x89, 0x40]);
        assert!(!image.space().is_free(placed.file_addr..placed.file_addr + placed.len));
    }

    #[test]
    fn short_hook_is_rejected() {
        assert!(matches!(
            HookSite::new(0x01E5D8, 3),
            Err(PatchError::HookTooSmall { available: 3, .. })
        ));
    }

    #[test]
    fn routine_without_return_is_rejected() {
        let mut image = test_image();
        let hook = HookSite::new(0x01E5D8, 4).unwrap();
        let routine = Routine::new().op(M::Lda, AM::Imm8, 0);
        assert!(matches!(
            apply_jump_patch(&routine, hook, &mut image, 0x10000),
            Err(PatchError::MissingReturn { .. })
        ));
    }

    #[test]
    fn encoding_failure_writes_nothing() {
        let mut image = test_image();
        let before = image.as_bytes().to_vec();
        let free_before = image.space().total_free();

        let mut routine = Routine::new().branch(M::Beq, "far");
        routine.push(crate::assemble::Item::Bytes(vec![0xEA; 200]));
        let routine = routine.label("far").op(M::Jml, AM::Lng, 0xC1E5DE);

        let hook = HookSite::new(0x01E5D8, 4).unwrap();
        let err = apply_jump_patch(&routine, hook, &mut image, 0x10000).unwrap_err();
        assert!(matches!(err, PatchError::Asm(_)));
        assert_eq!(image.as_bytes(), &before[..]);
        assert_eq!(image.space().total_free(), free_before);
    }

    #[test]
    fn external_branch_out_of_reach_returns_space() {
        let mut image = test_image();
        let free_before = image.space().total_free();
        let mut externals = HashMap::new();
        externals.insert("far".to_string(), 0x418000);

        let routine = Routine::new().branch(M::Bra, "far");
        let err = place_routine(&routine, &mut image, Placement::within(0x10000), &externals)
            .unwrap_err();
        assert!(matches!(err, PatchError::Asm(AsmError::BranchOutOfRange { .. })));
        assert_eq!(image.space().total_free(), free_before);

        // Within reach of the allocation it assembles fine.
        externals.insert("far".to_string(), 0x410010);
        let placed = place_routine(&routine, &mut image, Placement::within(0x10000), &externals)
            .unwrap();
        assert_eq!(image.read_at(placed.file_addr, 2).unwrap(), &[0x80, 0x0E]);
    }

    #[test]
    fn free_space_past_the_image_end_is_returned() {
        let mut image = test_image();
        image.space_mut().mark_free(0x500000..0x510000);
        let err = place_routine(
            &crown_routine(),
            &mut image,
            Placement::within(0x10000).at_or_after(0x500000),
            &HashMap::new(),
        )
        .unwrap_err();
        assert!(matches!(err, PatchError::Image(_)));
        assert!(image.space().is_free(0x500000..0x510000));
    }

    #[test]
    fn no_space_is_an_allocation_error() {
        let data = vec![0xFF; 0x20000];
        let mut image = Image::new(data, MemoryMap::HiRom);
        let hook = HookSite::new(0x100, 4).unwrap();
        let err = apply_jump_patch(&crown_routine(), hook, &mut image, 0x10000).unwrap_err();
        assert!(matches!(err, PatchError::Space(_)));
    }

    #[test]
    fn placed_routine_labels_are_absolute() {
        let mut image = test_image();
        let placed = place_routine(
            &crown_routine(),
            &mut image,
            Placement::within(0x10000).at_or_after(0x410000),
            &HashMap::new(),
        )
        .unwrap();
        assert_eq!(placed.labels["end"], 0x410000 + 3 + 2 + 2 + 4);
    }
}
