use std::ops::Range;

use thiserror::Error;

/// Errors raised while handing out free space.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SpaceError {
    #[error("no free region can hold {size:#X} bytes within a {boundary:#X} boundary (search from {hint:#X})")]
    NoFit {
        size: usize,
        boundary: usize,
        hint: usize,
    },

    #[error("a {size:#X}-byte block can never fit inside a {boundary:#X} boundary")]
    Placement { size: usize, boundary: usize },
}

/// A contiguous byte range of the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub start: usize,
    pub len: usize,
}

impl Region {
    pub fn new(start: usize, len: usize) -> Self {
        Region { start, len }
    }

    pub fn end(&self) -> usize {
        self.start + self.len
    }
}

/// Where an allocation may land: no block may cross a multiple of
/// `boundary`, and the search starts at file offset `hint`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub boundary: usize,
    pub hint: usize,
}

impl Placement {
    pub fn within(boundary: usize) -> Self {
        Placement { boundary, hint: 0 }
    }

    pub fn at_or_after(self, hint: usize) -> Self {
        Placement { hint, ..self }
    }
}

/// Free-space bookkeeping for one image.
///
/// Free regions are kept sorted by address, coalesced and non-overlapping.
/// Everything not listed as free is considered used.
#[derive(Debug, Clone, Default)]
pub struct SpaceManager {
    free: Vec<Region>,
}

impl SpaceManager {
    pub fn new() -> Self {
        SpaceManager { free: Vec::new() }
    }

    pub fn with_free_ranges<I>(ranges: I) -> Self
    where
        I: IntoIterator<Item = Range<usize>>,
    {
        let mut space = SpaceManager::new();
        for range in ranges {
            space.mark_free(range);
        }
        space
    }

    pub fn free_regions(&self) -> &[Region] {
        &self.free
    }

    pub fn total_free(&self) -> usize {
        self.free.iter().map(|r| r.len).sum()
    }

    pub fn is_free(&self, range: Range<usize>) -> bool {
        range.is_empty()
            || self
                .free
                .iter()
                .any(|r| r.start <= range.start && range.end <= r.end())
    }

    /// First block of `size` bytes that does not straddle a multiple of
    /// `boundary`. The block is reserved before returning.
    pub fn get_free_addr(&mut self, size: usize, boundary: usize) -> Result<usize, SpaceError> {
        self.get_free_addr_from(size, boundary, 0)
    }

    /// Same as [`get_free_addr`](Self::get_free_addr), ignoring free space
    /// below `hint`.
    pub fn get_free_addr_from(
        &mut self,
        size: usize,
        boundary: usize,
        hint: usize,
    ) -> Result<usize, SpaceError> {
        if size == 0 || boundary == 0 || size > boundary {
            return Err(SpaceError::Placement { size, boundary });
        }

        let mut found = None;
        for region in &self.free {
            let mut start = region.start.max(hint);
            while start + size <= region.end() {
                if start / boundary == (start + size - 1) / boundary {
                    found = Some(start);
                    break;
                }
                // Straddles: leave the part below the boundary free and retry
                // from the boundary itself.
                start = (start / boundary + 1) * boundary;
            }
            if found.is_some() {
                break;
            }
        }

        match found {
            Some(addr) => {
                self.mark_used(addr..addr + size);
                log::debug!(
                    "allocated {:#X} bytes at {:#08X} (boundary {:#X})",
                    size,
                    addr,
                    boundary
                );
                Ok(addr)
            }
            None => Err(SpaceError::NoFit {
                size,
                boundary,
                hint,
            }),
        }
    }

    pub fn allocate(&mut self, size: usize, placement: Placement) -> Result<usize, SpaceError> {
        self.get_free_addr_from(size, placement.boundary, placement.hint)
    }

    /// Remove `range` from the free list. Already-used bytes are ignored.
    pub fn mark_used(&mut self, range: Range<usize>) {
        if range.is_empty() {
            return;
        }

        let mut kept = Vec::with_capacity(self.free.len() + 1);
        for region in self.free.drain(..) {
            if region.end() <= range.start || range.end <= region.start {
                kept.push(region);
                continue;
            }
            if region.start < range.start {
                kept.push(Region::new(region.start, range.start - region.start));
            }
            if range.end < region.end() {
                kept.push(Region::new(range.end, region.end() - range.end));
            }
        }
        self.free = kept;
    }

    /// Return `range` to the free list, merging with neighbours.
    pub fn mark_free(&mut self, range: Range<usize>) {
        if range.is_empty() {
            return;
        }

        let mut start = range.start;
        let mut end = range.end;
        let mut kept = Vec::with_capacity(self.free.len() + 1);
        for region in self.free.drain(..) {
            if region.end() < start || end < region.start {
                kept.push(region);
            } else {
                start = start.min(region.start);
                end = end.max(region.end());
            }
        }

        let pos = kept
            .iter()
            .position(|r| r.start > start)
            .unwrap_or(kept.len());
        kept.insert(pos, Region::new(start, end - start));
        self.free = kept;
    }
}
