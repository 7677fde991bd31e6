//! Patch engine for 65816 cartridge images: a free-space allocator, a
//! two-pass assembler, hook and dispatch-table builders, and an ordered
//! pipeline that runs them against one image.

use thiserror::Error;

pub mod assemble;
pub mod dispatch;
pub mod freespace;
pub mod image;
pub mod layout;
pub mod opcodes;
pub mod patcher;
pub mod pipeline;
pub mod plan;
pub mod records;

pub use assemble::{
    assemble, assemble_with, AsmError, AssembledRoutine, Instruction, Item, Operand, Routine,
};
pub use dispatch::{
    build_dispatch, relocate_table, DispatchExtension, DispatchLayout, DispatchTarget, PointerRef,
    TableRelocation,
};
pub use freespace::{Placement, Region, SpaceError, SpaceManager};
pub use image::{Image, ImageError, MemoryMap, WriteKind};
pub use layout::ImageLayout;
pub use opcodes::{AddressingMode, Mnemonic};
pub use patcher::{
    apply_jump_patch, apply_jump_patch_at, apply_jump_patch_with, place_routine, write_long_jump,
    HookSite, PlacedRoutine, JUMP_HOOK_LEN,
};
pub use pipeline::{PatchSession, PatchStep, Pipeline};
pub use plan::{PatchPlan, PlanStep};
pub use records::{FixedRecord, RecordCodec, RecordError, TableLocation};

#[derive(Debug, Error)]
pub enum PatchError {
    #[error("allocation failed: {0}")]
    Space(#[from] SpaceError),

    #[error("encoding failed: {0}")]
    Asm(#[from] AsmError),

    #[error("record access failed: {0}")]
    Record(#[from] RecordError),

    #[error("image access failed: {0}")]
    Image(#[from] ImageError),

    #[error("hook at {address:#08X} exposes {available} bytes, a long jump needs {}", JUMP_HOOK_LEN)]
    HookTooSmall { address: usize, available: usize },

    #[error("routine for hook at {hook:#08X} does not end in an unconditional jump or return")]
    MissingReturn { hook: usize },

    #[error("symbol '{0}' has not been defined by an earlier step")]
    UnknownSymbol(String),

    #[error("step '{step}' failed: {source}")]
    Step {
        step: String,
        #[source]
        source: Box<PatchError>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, PatchError>;
