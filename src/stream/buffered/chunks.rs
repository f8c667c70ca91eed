//! Fixed table of chunk slots backing a [`BufferedStream`](super::BufferedStream).

use std::ops::Range;

use crate::common::ChunkIndex;

/// What a slot currently holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Slot {
    /// Holds nothing; preferred over any resident slot when picking a victim.
    Unassigned,
    /// Holds the first `fill` bytes of `chunk`.
    ///
    /// `fill` never exceeds the chunk size and a dirty slot always has `fill > 0`.
    Resident {
        chunk: ChunkIndex,
        fill: usize,
        dirty: bool,
    },
}

#[derive(Debug, Clone, Copy)]
struct Descriptor {
    slot: Slot,
    last_access: u64,
}

/// The part of a request that falls into one chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ChunkSpan {
    pub(crate) chunk: ChunkIndex,
    /// Absolute offset of the first byte of `chunk`.
    pub(crate) chunk_offset: u64,
    /// Range of the caller's buffer covered by this span.
    pub(crate) request: Range<usize>,
    pub(crate) intra_begin: usize,
    pub(crate) intra_end: usize,
    /// Resident slot holding `chunk`, if any. Looking it up never loads anything.
    pub(crate) slot: Option<usize>,
}

impl ChunkSpan {
    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.intra_end - self.intra_begin
    }
}

/// Splits `[offset, offset + len)` at chunk boundaries. Slots are filled in by the caller.
#[derive(Debug, Clone)]
pub(crate) struct ChunkSpans {
    bits: u32,
    offset: u64,
    end: u64,
    consumed: usize,
}

impl Iterator for ChunkSpans {
    type Item = ChunkSpan;

    fn next(&mut self) -> Option<ChunkSpan> {
        if self.offset >= self.end {
            return None;
        }
        let chunk = self.offset >> self.bits;
        let chunk_offset = chunk << self.bits;
        let chunk_end = (chunk_offset + (1 << self.bits)).min(self.end);
        let intra_begin = (self.offset - chunk_offset) as usize;
        let intra_end = (chunk_end - chunk_offset) as usize;
        let len = intra_end - intra_begin;

        let span = ChunkSpan {
            chunk,
            chunk_offset,
            request: self.consumed..self.consumed + len,
            intra_begin,
            intra_end,
            slot: None,
        };
        self.consumed += len;
        self.offset = chunk_end;
        Some(span)
    }
}

/// A fixed number of equally sized slots carved out of one arena.
///
/// Slots are addressed by index, never by pointer into the arena.
#[derive(Debug)]
pub(crate) struct ChunkTable {
    descriptors: Box<[Descriptor]>,
    arena: Box<[u8]>,
    bits: u32,
    clock: u64,
}

impl ChunkTable {
    /// `buffer_size` must be a power of two and `buffer_count` non-zero.
    pub(crate) fn new(buffer_size: usize, buffer_count: usize) -> ChunkTable {
        debug_assert!(buffer_size.is_power_of_two());
        debug_assert!(buffer_count > 0);
        ChunkTable {
            descriptors: vec![
                Descriptor {
                    slot: Slot::Unassigned,
                    last_access: 0,
                };
                buffer_count
            ]
            .into_boxed_slice(),
            arena: vec![0u8; buffer_size * buffer_count].into_boxed_slice(),
            bits: buffer_size.trailing_zeros(),
            clock: 0,
        }
    }

    #[inline]
    pub(crate) fn buffer_size(&self) -> usize {
        1 << self.bits
    }

    #[inline]
    pub(crate) fn buffer_count(&self) -> usize {
        self.descriptors.len()
    }

    #[inline]
    pub(crate) fn chunk_of(&self, offset: u64) -> ChunkIndex {
        offset >> self.bits
    }

    #[inline]
    pub(crate) fn intra(&self, offset: u64) -> usize {
        (offset & ((1 << self.bits) - 1)) as usize
    }

    #[inline]
    pub(crate) fn chunk_offset(&self, chunk: ChunkIndex) -> u64 {
        chunk << self.bits
    }

    pub(crate) fn spans(&self, offset: u64, len: usize) -> ChunkSpans {
        ChunkSpans {
            bits: self.bits,
            offset,
            end: offset.saturating_add(len as u64),
            consumed: 0,
        }
    }

    /// Linear scan for the slot holding `chunk`.
    pub(crate) fn find(&self, chunk: ChunkIndex) -> Option<usize> {
        self.descriptors.iter().position(
            |d| matches!(d.slot, Slot::Resident { chunk: resident, .. } if resident == chunk),
        )
    }

    /// The least recently used slot. Ties go to the earliest slot in the table.
    pub(crate) fn victim(&self) -> usize {
        let mut victim = 0;
        for (index, descriptor) in self.descriptors.iter().enumerate().skip(1) {
            if descriptor.last_access < self.descriptors[victim].last_access {
                victim = index;
            }
        }
        victim
    }

    #[inline]
    pub(crate) fn touch(&mut self, slot: usize) {
        self.clock += 1;
        self.descriptors[slot].last_access = self.clock;
    }

    #[inline]
    pub(crate) fn slot(&self, slot: usize) -> Slot {
        self.descriptors[slot].slot
    }

    #[inline]
    pub(crate) fn set(&mut self, slot: usize, state: Slot) {
        self.descriptors[slot].slot = state;
    }

    /// Drops whatever `slot` holds and makes it the first eviction candidate.
    pub(crate) fn unassign(&mut self, slot: usize) {
        self.descriptors[slot] = Descriptor {
            slot: Slot::Unassigned,
            last_access: 0,
        };
    }

    pub(crate) fn unassign_all(&mut self) {
        for slot in 0..self.descriptors.len() {
            self.unassign(slot);
        }
    }

    /// Number of valid bytes in `slot`; `0` when unassigned.
    #[inline]
    pub(crate) fn fill(&self, slot: usize) -> usize {
        match self.slot(slot) {
            Slot::Resident { fill, .. } => fill,
            Slot::Unassigned => 0,
        }
    }

    #[inline]
    pub(crate) fn memory(&self, slot: usize) -> &[u8] {
        let size = self.buffer_size();
        &self.arena[slot * size..(slot + 1) * size]
    }

    #[inline]
    pub(crate) fn memory_mut(&mut self, slot: usize) -> &mut [u8] {
        let size = self.buffer_size();
        &mut self.arena[slot * size..(slot + 1) * size]
    }

    pub(crate) fn resident_chunks(&self) -> impl Iterator<Item = ChunkIndex> + '_ {
        self.descriptors.iter().filter_map(|d| match d.slot {
            Slot::Resident { chunk, .. } => Some(chunk),
            Slot::Unassigned => None,
        })
    }
}
