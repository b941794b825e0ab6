// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Page-aligned address ranges and the arithmetic the memory map is built
//! from.

use core::ops::Range;

/// The granularity of every published range.
pub const PAGE_SIZE: u64 = 4096;
/// One MiB.
pub const MIB: u64 = 0x10_0000;
/// The 4GiB boundary.
pub const FOUR_GIB: u64 = 0x1_0000_0000;

/// A page-aligned span of guest physical address space, `[start, end)`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MemoryRange {
    start: u64,
    end: u64,
}

impl core::fmt::Display for MemoryRange {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:#x}-{:#x}", self.start, self.end)
    }
}

const fn is_page_aligned(value: u64) -> bool {
    value % PAGE_SIZE == 0
}

impl MemoryRange {
    /// Builds a range from constant bounds. Panics on unaligned or reversed
    /// bounds; values read at runtime go through [`Self::try_new`].
    pub const fn new(range: Range<u64>) -> Self {
        match Self::try_new(range) {
            Some(range) => range,
            None => panic!("unaligned or reversed memory range"),
        }
    }

    /// Returns `None` for unaligned or reversed bounds.
    pub const fn try_new(range: Range<u64>) -> Option<Self> {
        if !is_page_aligned(range.start) || !is_page_aligned(range.end) || range.start > range.end
        {
            return None;
        }
        Some(Self {
            start: range.start,
            end: range.end,
        })
    }

    /// The `len` bytes at `start`, or `None` if unaligned or past the end of
    /// the address space.
    pub fn from_base_len(start: u64, len: u64) -> Option<Self> {
        Self::try_new(start..start.checked_add(len)?)
    }

    /// The start address.
    pub const fn start(&self) -> u64 {
        self.start
    }

    /// The end address, exclusive.
    pub const fn end(&self) -> u64 {
        self.end
    }

    /// The length in bytes.
    pub const fn len(&self) -> u64 {
        self.end - self.start
    }

    /// Returns true if the range covers no bytes.
    pub const fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Returns whether the two ranges share a byte.
    pub fn overlaps(&self, other: &Self) -> bool {
        other.start < self.end && self.start < other.end
    }

    /// Returns whether `other` is a subrange of `self`.
    pub fn contains(&self, other: &Self) -> bool {
        (self.start..=self.end).contains(&other.start) && other.end <= self.end
    }
}

/// Rounds `value` down to a multiple of `align`, which must be a power of two.
pub const fn align_down(value: u64, align: u64) -> u64 {
    value & !(align - 1)
}

/// Returns the largest power of two that does not exceed `value`, or zero.
pub const fn pow2_floor(value: u64) -> u64 {
    if value == 0 {
        0
    } else {
        1 << (63 - value.leading_zeros())
    }
}

/// Returns true if the ranges are non-empty, sorted by address and do not
/// overlap.
pub fn is_sorted_disjoint<T>(items: &[T], getter: impl Fn(&T) -> &MemoryRange) -> bool {
    items.iter().all(|x| !getter(x).is_empty())
        && items.iter().zip(items.iter().skip(1)).all(|(x, y)| {
            let x = getter(x);
            let y = getter(y);
            x <= y && !x.overlaps(y)
        })
}

/// Splits `range` around `holes`, which must be sorted and disjoint.
///
/// Yields consecutive pieces that together cover `range` exactly. Each piece
/// is tagged with the index of the hole it falls in, or `None` for the parts
/// outside every hole. Holes that only partially overlap `range` are clipped.
pub fn split_around(range: MemoryRange, holes: &[MemoryRange]) -> SplitAround<'_> {
    SplitAround {
        rest: range,
        holes,
        index: 0,
    }
}

/// Iterator returned by [`split_around`].
#[derive(Debug, Clone)]
pub struct SplitAround<'a> {
    rest: MemoryRange,
    holes: &'a [MemoryRange],
    index: usize,
}

impl Iterator for SplitAround<'_> {
    type Item = (MemoryRange, Option<usize>);

    fn next(&mut self) -> Option<Self::Item> {
        if self.rest.is_empty() {
            return None;
        }

        while self
            .holes
            .get(self.index)
            .is_some_and(|hole| hole.end <= self.rest.start)
        {
            self.index += 1;
        }

        let start = self.rest.start;
        let (end, hole) = match self.holes.get(self.index) {
            Some(hole) if hole.start < self.rest.end => {
                if hole.start > start {
                    (hole.start, None)
                } else {
                    let end = hole.end.min(self.rest.end);
                    self.index += 1;
                    (end, Some(self.index - 1))
                }
            }
            _ => (self.rest.end, None),
        };

        self.rest.start = end;
        Some((MemoryRange { start, end }, hole))
    }
}
