//! Bounded arena allocator
//!
//! All transport-engine allocations of one node are carved out of a single
//! caller-supplied byte buffer. Fragments are described by a fixed side table
//! linked by `u8` indices, address-ordered for O(1) coalescing, with
//! segregated power-of-two free bins and an occupancy bitmask for O(1)
//! allocation. The arena never grows and never touches a global allocator.
//!
//! Requested sizes are rounded up to a power of two (internal fragmentation
//! in exchange for deterministic latency), so the worst-case cost of both
//! `alloc` and `free` is a handful of index updates.

use crate::fmt::NoneError;

const ALIGN: usize = 8;
const MIN_FRAGMENT: usize = 16;
const SLOT_COUNT: usize = 128;
const BIN_COUNT: usize = 32;
const NO_FRAG: u8 = u8::MAX;

#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct OutOfMemory;

impl From<NoneError> for OutOfMemory {
    fn from(_: NoneError) -> Self {
        OutOfMemory
    }
}

/// A live allocation. Not `Copy`: exactly one `free` per block.
#[derive(Debug)]
pub(crate) struct Block {
    slot: u8,
    offset: usize,
    len: usize,
}

impl Block {
    pub(crate) fn len(&self) -> usize {
        self.len
    }
}

/// Allocator usage counters, stable across the arena lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Diagnostics {
    /// Usable bytes, `memory.len()` rounded down to the block alignment.
    pub capacity: usize,
    /// Bytes currently held by live blocks, including rounding slack.
    pub allocated: usize,
    /// High watermark of `allocated`.
    pub peak: usize,
    /// Allocation requests that failed.
    pub oom_count: u32,
}

#[derive(Debug, Clone, Copy)]
struct Fragment {
    offset: usize,
    size: usize,
    used: bool,
    prev_addr: u8,
    next_addr: u8,
    prev_free: u8,
    next_free: u8,
}

impl Fragment {
    const VACANT: Fragment = Fragment {
        offset: 0,
        size: 0,
        used: false,
        prev_addr: NO_FRAG,
        next_addr: NO_FRAG,
        prev_free: NO_FRAG,
        next_free: NO_FRAG,
    };
}

pub struct Arena<'a> {
    memory: &'a mut [u8],
    frags: [Fragment; SLOT_COUNT],
    /// Head fragment index per power-of-two size class.
    bins: [u8; BIN_COUNT],
    bin_mask: u32,
    /// Vacant descriptor slots, chained through `next_free`.
    vacant_head: u8,
    diag: Diagnostics,
}

impl<'a> Arena<'a> {
    pub fn new(memory: &'a mut [u8]) -> Self {
        let capacity = memory.len() & !(ALIGN - 1);
        let mut arena = Self {
            memory,
            frags: [Fragment::VACANT; SLOT_COUNT],
            bins: [NO_FRAG; BIN_COUNT],
            bin_mask: 0,
            vacant_head: NO_FRAG,
            diag: Diagnostics {
                capacity,
                allocated: 0,
                peak: 0,
                oom_count: 0,
            },
        };

        for slot in (1..SLOT_COUNT).rev() {
            arena.frags[slot].next_free = arena.vacant_head;
            arena.vacant_head = slot as u8;
        }

        if capacity >= MIN_FRAGMENT {
            arena.frags[0] = Fragment {
                offset: 0,
                size: capacity,
                ..Fragment::VACANT
            };
            arena.bin_insert(0);
        }
        arena
    }

    pub fn diagnostics(&self) -> Diagnostics {
        self.diag
    }

    pub(crate) fn alloc(&mut self, len: usize) -> Result<Block, OutOfMemory> {
        match self.try_alloc(len) {
            Ok(block) => Ok(block),
            Err(oom) => {
                self.diag.oom_count += 1;
                trace!("arena exhausted for {} byte request", len);
                Err(oom)
            }
        }
    }

    fn try_alloc(&mut self, len: usize) -> Result<Block, OutOfMemory> {
        let size = len
            .max(MIN_FRAGMENT)
            .checked_next_power_of_two()
            .ok_or(OutOfMemory)?;
        if size > self.diag.capacity {
            return Err(OutOfMemory);
        }

        let class = bin_index(size);
        let mask = self.bin_mask & (u32::MAX << class);
        if mask == 0 {
            return Err(OutOfMemory);
        }
        let frag = self.bins[mask.trailing_zeros() as usize];
        self.bin_remove(frag);

        let excess = self.frags[usize::from(frag)].size - size;
        if excess >= MIN_FRAGMENT {
            // Split off the tail, unless the descriptor table is exhausted in
            // which case the whole fragment is handed out.
            if let Some(tail) = self.take_vacant() {
                let next = self.frags[usize::from(frag)].next_addr;
                self.frags[usize::from(tail)] = Fragment {
                    offset: self.frags[usize::from(frag)].offset + size,
                    size: excess,
                    used: false,
                    prev_addr: frag,
                    next_addr: next,
                    prev_free: NO_FRAG,
                    next_free: NO_FRAG,
                };
                if next != NO_FRAG {
                    self.frags[usize::from(next)].prev_addr = tail;
                }
                self.frags[usize::from(frag)].next_addr = tail;
                self.frags[usize::from(frag)].size = size;
                self.bin_insert(tail);
            }
        }

        let entry = &mut self.frags[usize::from(frag)];
        entry.used = true;
        self.diag.allocated += entry.size;
        self.diag.peak = self.diag.peak.max(self.diag.allocated);

        Ok(Block {
            slot: frag,
            offset: self.frags[usize::from(frag)].offset,
            len,
        })
    }

    pub(crate) fn free(&mut self, block: Block) {
        let frag = usize::from(block.slot);
        debug_assert!(self.frags[frag].used);
        debug_assert_eq!(self.frags[frag].offset, block.offset);

        self.frags[frag].used = false;
        self.diag.allocated -= self.frags[frag].size;

        let next = self.frags[frag].next_addr;
        if next != NO_FRAG && !self.frags[usize::from(next)].used {
            self.bin_remove(next);
            self.frags[frag].size += self.frags[usize::from(next)].size;
            let after = self.frags[usize::from(next)].next_addr;
            self.frags[frag].next_addr = after;
            if after != NO_FRAG {
                self.frags[usize::from(after)].prev_addr = block.slot;
            }
            self.release_vacant(next);
        }

        let prev = self.frags[frag].prev_addr;
        let merged = if prev != NO_FRAG && !self.frags[usize::from(prev)].used {
            self.bin_remove(prev);
            self.frags[usize::from(prev)].size += self.frags[frag].size;
            let after = self.frags[frag].next_addr;
            self.frags[usize::from(prev)].next_addr = after;
            if after != NO_FRAG {
                self.frags[usize::from(after)].prev_addr = prev;
            }
            self.release_vacant(block.slot);
            prev
        } else {
            block.slot
        };

        self.bin_insert(merged);
    }

    pub(crate) fn get(&self, block: &Block) -> &[u8] {
        &self.memory[block.offset..block.offset + block.len]
    }

    pub(crate) fn get_mut(&mut self, block: &Block) -> &mut [u8] {
        &mut self.memory[block.offset..block.offset + block.len]
    }

    fn bin_insert(&mut self, frag: u8) {
        let class = bin_index(self.frags[usize::from(frag)].size);
        let head = self.bins[class];
        self.frags[usize::from(frag)].prev_free = NO_FRAG;
        self.frags[usize::from(frag)].next_free = head;
        if head != NO_FRAG {
            self.frags[usize::from(head)].prev_free = frag;
        }
        self.bins[class] = frag;
        self.bin_mask |= 1 << class;
    }

    fn bin_remove(&mut self, frag: u8) {
        let class = bin_index(self.frags[usize::from(frag)].size);
        let prev = self.frags[usize::from(frag)].prev_free;
        let next = self.frags[usize::from(frag)].next_free;
        if prev != NO_FRAG {
            self.frags[usize::from(prev)].next_free = next;
        } else {
            self.bins[class] = next;
            if next == NO_FRAG {
                self.bin_mask &= !(1 << class);
            }
        }
        if next != NO_FRAG {
            self.frags[usize::from(next)].prev_free = prev;
        }
    }

    fn take_vacant(&mut self) -> Option<u8> {
        let slot = self.vacant_head;
        if slot == NO_FRAG {
            return None;
        }
        self.vacant_head = self.frags[usize::from(slot)].next_free;
        Some(slot)
    }

    fn release_vacant(&mut self, slot: u8) {
        self.frags[usize::from(slot)] = Fragment::VACANT;
        self.frags[usize::from(slot)].next_free = self.vacant_head;
        self.vacant_head = slot;
    }
}

/// Floor of log2; every fragment of size `s` lives in bin `bin_index(s)`.
fn bin_index(size: usize) -> usize {
    debug_assert!(size >= MIN_FRAGMENT);
    (usize::BITS - 1 - size.leading_zeros()) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    const CAPACITY: usize = 4096;

    #[test]
    fn test_alloc_free_round_trip() {
        let mut memory = [0u8; CAPACITY];
        let mut arena = Arena::new(&mut memory);

        let block = arena.alloc(100).unwrap();
        assert_eq!(block.len(), 100);
        assert_eq!(arena.diagnostics().allocated, 128);

        arena.get_mut(&block).fill(0xaa);
        assert!(arena.get(&block).iter().all(|&b| b == 0xaa));

        arena.free(block);
        assert_eq!(arena.diagnostics().allocated, 0);
    }

    #[test]
    fn test_coalescing_restores_whole_arena() {
        let mut memory = [0u8; CAPACITY];
        let mut arena = Arena::new(&mut memory);

        let a = arena.alloc(64).unwrap();
        let b = arena.alloc(64).unwrap();
        let c = arena.alloc(64).unwrap();
        // Free out of order so both neighbor-merge directions are exercised.
        arena.free(b);
        arena.free(a);
        arena.free(c);

        let whole = arena.alloc(CAPACITY).unwrap();
        assert_eq!(whole.len(), CAPACITY);
        arena.free(whole);
    }

    #[test]
    fn test_allocated_never_exceeds_capacity() {
        let mut memory = [0u8; CAPACITY];
        let mut arena = Arena::new(&mut memory);

        let mut blocks = std::vec::Vec::new();
        loop {
            match arena.alloc(60) {
                Ok(block) => {
                    assert!(arena.diagnostics().allocated <= CAPACITY);
                    blocks.push(block);
                }
                Err(OutOfMemory) => break,
            }
        }
        assert_eq!(blocks.len(), CAPACITY / 64);
        assert_eq!(arena.diagnostics().oom_count, 1);

        for block in blocks {
            arena.free(block);
        }
        assert_eq!(arena.diagnostics().allocated, 0);
        assert_eq!(arena.diagnostics().peak, CAPACITY);
    }

    #[test]
    fn test_oversized_request_fails_cleanly() {
        let mut memory = [0u8; CAPACITY];
        let mut arena = Arena::new(&mut memory);

        assert!(arena.alloc(CAPACITY + 1).is_err());
        assert_eq!(arena.diagnostics().oom_count, 1);
        assert!(arena.alloc(16).is_ok());
    }

    #[test]
    fn test_zero_length_block() {
        let mut memory = [0u8; CAPACITY];
        let mut arena = Arena::new(&mut memory);

        let block = arena.alloc(0).unwrap();
        assert!(arena.get(&block).is_empty());
        arena.free(block);
    }

    #[test]
    fn test_tiny_arena_is_unusable_but_valid() {
        let mut memory = [0u8; 8];
        let mut arena = Arena::new(&mut memory);
        assert!(arena.alloc(1).is_err());
    }
}
