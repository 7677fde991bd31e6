use std::ops::Range;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::freespace::{Placement, SpaceError, SpaceManager};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ImageError {
    #[error("access of {len:#X} bytes at {addr:#08X} is outside the {size:#X}-byte image")]
    OutOfBounds { addr: usize, len: usize, size: usize },

    #[error("CPU address {0:#08X} does not map into the image")]
    UnmappedCpu(u32),

    #[error("file offset {0:#08X} has no CPU address")]
    UnmappedFile(usize),
}

/// Cartridge memory map, used to translate between file offsets and the
/// 24-bit addresses the CPU sees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryMap {
    /// File offset and CPU address are the same number.
    Linear,
    /// 4 MiB HiROM: banks C0-FF hold the whole file.
    HiRom,
    /// Up to 8 MiB ExHiROM: banks C0-FF hold the first 4 MiB, banks 40-7D the
    /// rest.
    #[default]
    ExHiRom,
}

impl MemoryMap {
    pub fn to_cpu(self, file: usize) -> Result<u32, ImageError> {
        match self {
            MemoryMap::Linear if file <= 0xFF_FFFF => Ok(file as u32),
            MemoryMap::HiRom if file < 0x40_0000 => Ok(0xC0_0000 + file as u32),
            MemoryMap::ExHiRom if file < 0x40_0000 => Ok(0xC0_0000 + file as u32),
            MemoryMap::ExHiRom if file < 0x7E_0000 => Ok(file as u32),
            _ => Err(ImageError::UnmappedFile(file)),
        }
    }

    pub fn to_file(self, cpu: u32) -> Result<usize, ImageError> {
        let bank = cpu >> 16;
        let offset = cpu & 0xFFFF;
        let file = match self {
            MemoryMap::Linear => Some(cpu as usize),
            MemoryMap::HiRom => match bank {
                0xC0..=0xFF | 0x40..=0x7D => Some((cpu & 0x3F_FFFF) as usize),
                0x00..=0x3F | 0x80..=0xBF if offset >= 0x8000 => Some((cpu & 0x3F_FFFF) as usize),
                _ => None,
            },
            MemoryMap::ExHiRom => match bank {
                0xC0..=0xFF => Some((cpu - 0xC0_0000) as usize),
                0x40..=0x7D => Some(cpu as usize),
                0x80..=0xBF if offset >= 0x8000 => Some((cpu & 0x3F_FFFF) as usize),
                0x00..=0x3D if offset >= 0x8000 => Some((cpu & 0x3F_FFFF) as usize + 0x40_0000),
                _ => None,
            },
        };
        file.ok_or(ImageError::UnmappedCpu(cpu))
    }
}

/// How a write affects free-space bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    MarkUsed,
    MarkFree,
    NoMark,
}

/// The cartridge being patched: raw bytes, a cursor, the memory map and the
/// free-space manager that all allocations go through.
#[derive(Debug, Clone)]
pub struct Image {
    data: Vec<u8>,
    pos: usize,
    map: MemoryMap,
    space: SpaceManager,
}

impl Image {
    pub fn new(data: Vec<u8>, map: MemoryMap) -> Self {
        Image {
            data,
            pos: 0,
            map,
            space: SpaceManager::new(),
        }
    }

    pub fn with_space(data: Vec<u8>, map: MemoryMap, space: SpaceManager) -> Self {
        Image {
            data,
            pos: 0,
            map,
            space,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    pub fn map(&self) -> MemoryMap {
        self.map
    }

    pub fn space(&self) -> &SpaceManager {
        &self.space
    }

    pub fn space_mut(&mut self) -> &mut SpaceManager {
        &mut self.space
    }

    pub fn to_cpu(&self, file: usize) -> Result<u32, ImageError> {
        self.map.to_cpu(file)
    }

    pub fn to_file(&self, cpu: u32) -> Result<usize, ImageError> {
        self.map.to_file(cpu)
    }

    /// Reserve `size` bytes of free space inside the image.
    pub fn allocate(&mut self, size: usize, placement: Placement) -> Result<usize, SpaceError> {
        self.space.allocate(size, placement)
    }

    pub fn seek(&mut self, addr: usize) {
        self.pos = addr;
    }

    pub fn tell(&self) -> usize {
        self.pos
    }

    fn check(&self, addr: usize, len: usize) -> Result<Range<usize>, ImageError> {
        match addr.checked_add(len) {
            Some(end) if end <= self.data.len() => Ok(addr..end),
            _ => Err(ImageError::OutOfBounds {
                addr,
                len,
                size: self.data.len(),
            }),
        }
    }

    /// Read `len` bytes at the cursor and advance it.
    pub fn read(&mut self, len: usize) -> Result<&[u8], ImageError> {
        let range = self.check(self.pos, len)?;
        self.pos = range.end;
        Ok(&self.data[range])
    }

    /// Write `bytes` at the cursor and advance it.
    pub fn write(&mut self, bytes: &[u8], kind: WriteKind) -> Result<(), ImageError> {
        let range = self.check(self.pos, bytes.len())?;
        self.data[range.clone()].copy_from_slice(bytes);
        match kind {
            WriteKind::MarkUsed => self.space.mark_used(range.clone()),
            WriteKind::MarkFree => self.space.mark_free(range.clone()),
            WriteKind::NoMark => {}
        }
        self.pos = range.end;
        Ok(())
    }

    pub fn read_at(&self, addr: usize, len: usize) -> Result<&[u8], ImageError> {
        let range = self.check(addr, len)?;
        Ok(&self.data[range])
    }

    pub fn write_at(&mut self, addr: usize, bytes: &[u8], kind: WriteKind) -> Result<(), ImageError> {
        self.seek(addr);
        self.write(bytes, kind)
    }

    pub fn read_u16(&self, addr: usize) -> Result<u16, ImageError> {
        let b = self.read_at(addr, 2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_u24(&self, addr: usize) -> Result<u32, ImageError> {
        let b = self.read_at(addr, 3)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], 0]))
    }

    pub fn write_u24(&mut self, addr: usize, value: u32, kind: WriteKind) -> Result<(), ImageError> {
        let [lo, mid, hi, _] = value.to_le_bytes();
        self.write_at(addr, &[lo, mid, hi], kind)
    }
}
