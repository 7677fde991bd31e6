use serde::{Deserialize, Serialize};

use crate::assemble::{assemble, AsmError, Item, Routine};
use crate::freespace::Placement;
use crate::image::{Image, WriteKind};
use crate::opcodes::{AddressingMode as AM, Mnemonic as M};
use crate::patcher::{fill_reserved, write_long_jump, HookSite, JUMP_HOOK_LEN};
use crate::records::{RecordCodec, RecordError};
use crate::{PatchError, Result};

/// A 3-byte CPU pointer in the original code that refers to a table, plus
/// the byte offset into the table it is meant to address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointerRef {
    #[serde(deserialize_with = "crate::layout::de_usize")]
    pub address: usize,
    #[serde(default, deserialize_with = "crate::layout::de_u32")]
    pub offset: u32,
}

impl PointerRef {
    pub fn new(address: usize, offset: u32) -> Self {
        PointerRef { address, offset }
    }
}

pub struct TableRelocation<'a> {
    pub source: &'a RecordCodec,
    pub extra: &'a [Vec<u8>],
    pub references: &'a [PointerRef],
    pub placement: Placement,
}

/// Copy a table to free space with `extra` records appended and point every
/// listed reference at the copy. Returns a codec for the new table.
pub fn relocate_table(image: &mut Image, relocation: &TableRelocation) -> Result<RecordCodec> {
    let source = relocation.source;
    let mut payload = Vec::with_capacity((source.count + relocation.extra.len()) * source.record_size);
    for record in source.read_all(image)? {
        payload.extend_from_slice(&record);
    }
    for record in relocation.extra {
        if record.len() != source.record_size {
            return Err(RecordError::SizeMismatch {
                expected: source.record_size,
                got: record.len(),
            }
            .into());
        }
        payload.extend_from_slice(record);
    }

    for reference in relocation.references {
        image.read_at(reference.address, 3)?;
    }

    let base = image.allocate(payload.len(), relocation.placement)?;
    let base_cpu = fill_reserved(image, base, payload.len(), |image| {
        let cpu = image.to_cpu(base)?;
        image.write_at(base, &payload, WriteKind::MarkUsed)?;
        Ok(cpu)
    })?;
    for reference in relocation.references {
        image.write_u24(reference.address, base_cpu + reference.offset, WriteKind::NoMark)?;
    }

    let count = source.count + relocation.extra.len();
    log::debug!(
        "relocated {}-record table to {:#08X} ({} references rewritten)",
        count,
        base,
        relocation.references.len()
    );
    Ok(RecordCodec::direct(base, source.record_size, count))
}

/// Bank size; the dispatch block must not leave one bank.
const BANK: usize = 0x10000;

/// Two-tier routing of an 8-bit index: values below `split` continue through
/// the original dispatch, the rest go through a new pointer table.
pub struct DispatchExtension {
    pub split: u8,
    pub routines: Vec<Routine>,
    pub hook: HookSite,
    /// Original instructions displaced by the hook that must run before the
    /// index is examined.
    pub preamble: Vec<Item>,
    /// Original instructions to run before resuming the original dispatch.
    pub passthrough: Vec<Item>,
    /// CPU address of the original dispatch to resume for old indices.
    pub resume: u32,
    /// CPU address to continue at after a new routine returns.
    pub rejoin: u32,
    pub placement: Placement,
}

impl DispatchExtension {
    // Entered with an 8-bit accumulator holding the index and 16-bit X.
    fn switch_routine(&self, pointer_table: u32) -> Routine {
        let mut rt = Routine::new();
        rt.extend(self.preamble.iter().cloned());
        let mut rt = rt
            .op(M::Cmp, AM::Imm8, u32::from(self.split))
            .branch(M::Bcs, "added");
        rt.extend(self.passthrough.iter().cloned());
        rt.op(M::Jml, AM::Lng, self.resume)
            .label("added")
            .implied(M::Sec)
            .op(M::Sbc, AM::Imm8, u32::from(self.split))
            .implied(M::Asl)
            .implied(M::Tax)
            .op(M::Jsr, AM::AbsIndX, pointer_table & 0xFFFF)
            .op(M::Jml, AM::Lng, self.rejoin)
    }
}

/// Where everything written by [`build_dispatch`] ended up (file offsets).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchLayout {
    pub split: u8,
    pub pointer_table: usize,
    pub routines: Vec<usize>,
    pub switch: usize,
    pub len: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchTarget {
    /// Handled by the original dispatch with the unchanged index.
    Original(u8),
    /// Handled by added routine `slot` at CPU address `address`.
    Added { slot: usize, address: u32 },
}

impl DispatchLayout {
    /// Follow the written tables the way the switch routine does at run time.
    pub fn route(&self, image: &Image, index: u8) -> Result<DispatchTarget> {
        if index < self.split {
            return Ok(DispatchTarget::Original(index));
        }
        let slot = usize::from(index - self.split);
        if slot >= self.routines.len() {
            return Err(RecordError::IndexOutOfBounds {
                index: slot,
                count: self.routines.len(),
            }
            .into());
        }
        let low = image.read_u16(self.pointer_table + slot * 2)?;
        let bank = image.to_cpu(self.switch)? & 0xFF_0000;
        Ok(DispatchTarget::Added {
            slot,
            address: bank | u32::from(low),
        })
    }
}

struct EncodedBlock {
    payload: Vec<u8>,
    routines: Vec<usize>,
    switch: usize,
    switch_cpu: u32,
}

fn encode_block(image: &Image, ext: &DispatchExtension, start: usize, lens: &[usize]) -> Result<EncodedBlock> {
    let table_len = ext.routines.len() * 2;
    let start_cpu = image.to_cpu(start)?;

    let mut payload = Vec::with_capacity(table_len);
    let mut bodies = Vec::new();
    let mut routines = Vec::with_capacity(ext.routines.len());
    let mut at = start + table_len;
    for (routine, len) in ext.routines.iter().zip(lens) {
        let cpu = image.to_cpu(at)?;
        bodies.extend_from_slice(&assemble(routine, cpu)?.bytes);
        payload.extend_from_slice(&((cpu & 0xFFFF) as u16).to_le_bytes());
        routines.push(at);
        at += len;
    }

    let switch = at;
    let switch_cpu = image.to_cpu(switch)?;
    payload.extend_from_slice(&bodies);
    payload.extend_from_slice(&assemble(&ext.switch_routine(start_cpu), switch_cpu)?.bytes);
    Ok(EncodedBlock {
        payload,
        routines,
        switch,
        switch_cpu,
    })
}

/// Write the added routines, their pointer table and a switch routine as one
/// bank-local block, then hook the original dispatch into the switch.
///
/// Layout: `[pointer table | routine 0 | routine 1 | ... | switch]`.
pub fn build_dispatch(image: &mut Image, ext: &DispatchExtension) -> Result<DispatchLayout> {
    if ext.routines.is_empty() {
        return Err(PatchError::Config("dispatch extension has no routines".to_string()));
    }
    // Both paths double the index with ASL on an 8-bit accumulator: the
    // original path for indices below the split, the added path for slots.
    if ext.split > 0x80 {
        return Err(PatchError::Config(format!(
            "split {:#X} leaves original indices that overflow when doubled",
            ext.split
        )));
    }
    if ext.routines.len() > 0x80 {
        return Err(PatchError::Config(format!(
            "{} added routines overflow an 8-bit slot when doubled",
            ext.routines.len()
        )));
    }
    if !ext.routines.iter().all(Routine::ends_with_unconditional_transfer) {
        return Err(PatchError::MissingReturn {
            hook: ext.hook.address,
        });
    }

    let lens = ext
        .routines
        .iter()
        .map(Routine::encoded_len)
        .collect::<std::result::Result<Vec<_>, AsmError>>()?;
    let table_len = ext.routines.len() * 2;
    let switch_len = ext.switch_routine(0).encoded_len()?;
    let total = table_len + lens.iter().sum::<usize>() + switch_len;

    image.read_at(ext.hook.address, JUMP_HOOK_LEN)?;

    let placement = Placement {
        boundary: ext.placement.boundary.min(BANK),
        ..ext.placement
    };
    let start = image.allocate(total, placement)?;
    let EncodedBlock {
        routines,
        switch,
        switch_cpu,
        ..
    } = fill_reserved(image, start, total, |image| {
        let block = encode_block(image, ext, start, &lens)?;
        debug_assert_eq!(block.payload.len(), total);
        image.write_at(start, &block.payload, WriteKind::MarkUsed)?;
        Ok(block)
    })?;

    write_long_jump(image, ext.hook, switch_cpu)?;

    log::debug!(
        "dispatch: {} routines from index {:#X}, switch at {:#08X}",
        routines.len(),
        ext.split,
        switch_cpu
    );

    Ok(DispatchLayout {
        split: ext.split,
        pointer_table: start,
        routines,
        switch,
        len: total,
    })
}
