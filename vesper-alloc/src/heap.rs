//! Fixed-Block Kernel Heap
//!
//! The kernel heap is a contiguous region of 4 KiB blocks described by a
//! block table with one entry byte per block:
//!
//! - low nibble: `FREE` (0x0) or `TAKEN` (0x1)
//! - bit 7: `HAS_NEXT` — the allocation run continues in the next block
//! - bit 6: `IS_FIRST` — this block starts an allocation run
//!
//! A run of taken blocks therefore begins with `TAKEN | IS_FIRST`, every
//! non-terminal block carries `HAS_NEXT`, and only the first block has
//! `IS_FIRST`. Allocation is first-fit over contiguous free entries;
//! freeing walks forward from the block a pointer maps to while
//! `HAS_NEXT` is set.
//!
//! The heap never panics: allocation failure is `None` and freeing an
//! already-free block is a no-op.

use vesper_common::config::HEAP_BLOCK_SIZE;
use vesper_common::{KernelResult, Status};

/// Block table entry: free block.
pub const ENTRY_FREE: u8 = 0x00;
/// Block table entry: taken block.
pub const ENTRY_TAKEN: u8 = 0x01;
/// The allocation run continues in the next block.
pub const ENTRY_HAS_NEXT: u8 = 0x80;
/// The block starts an allocation run.
pub const ENTRY_IS_FIRST: u8 = 0x40;

/// Mask for the entry type nibble.
const ENTRY_TYPE_MASK: u8 = 0x0F;

/// Fixed-block heap over a borrowed block table.
///
/// `saddr` is the address of the first managed block; the table holds one
/// entry per block. The heap itself never touches the managed memory.
pub struct BlockHeap<'a> {
    table: &'a mut [u8],
    saddr: u64,
}

impl<'a> BlockHeap<'a> {
    /// Create a heap over `table`, managing blocks starting at `saddr`.
    ///
    /// `saddr` must be block-aligned. The whole table is reset to free.
    pub fn new(saddr: u64, table: &'a mut [u8]) -> KernelResult<Self> {
        if saddr % HEAP_BLOCK_SIZE as u64 != 0 || table.is_empty() {
            return Err(Status::InvArg);
        }

        table.fill(ENTRY_FREE);
        Ok(Self { table, saddr })
    }

    /// Number of blocks managed.
    #[must_use]
    pub fn total_blocks(&self) -> usize {
        self.table.len()
    }

    /// Number of currently taken blocks.
    #[must_use]
    pub fn used_blocks(&self) -> usize {
        self.table
            .iter()
            .filter(|&&e| e & ENTRY_TYPE_MASK == ENTRY_TAKEN)
            .count()
    }

    /// Address one past the managed region.
    #[must_use]
    pub fn end_addr(&self) -> u64 {
        self.saddr + (self.table.len() * HEAP_BLOCK_SIZE) as u64
    }

    /// Round a byte size up to whole blocks.
    #[must_use]
    pub const fn size_to_blocks(size: usize) -> usize {
        size.div_ceil(HEAP_BLOCK_SIZE)
    }

    /// Allocate `size` bytes, rounded up to whole blocks.
    ///
    /// Returns the address of the first block, or `None` if no run of
    /// free blocks is large enough. The search is first-fit, lowest
    /// address first.
    #[must_use]
    pub fn alloc(&mut self, size: usize) -> Option<u64> {
        if size == 0 {
            return None;
        }

        let blocks = Self::size_to_blocks(size);
        let start = self.find_free_run(blocks)?;
        self.mark_taken(start, blocks);
        Some(self.saddr + (start * HEAP_BLOCK_SIZE) as u64)
    }

    /// Free the allocation starting at `addr`.
    ///
    /// `addr` must be a value previously returned by [`BlockHeap::alloc`].
    /// Freeing an already-free allocation is tolerated as a no-op;
    /// addresses outside the managed region are ignored.
    pub fn free(&mut self, addr: u64) {
        if addr < self.saddr || addr >= self.end_addr() {
            return;
        }

        let start = ((addr - self.saddr) as usize) / HEAP_BLOCK_SIZE;
        for i in start..self.table.len() {
            let entry = self.table[i];
            self.table[i] = ENTRY_FREE;
            if entry & ENTRY_HAS_NEXT == 0 {
                break;
            }
        }
    }

    /// Find the first run of `blocks` contiguous free entries.
    fn find_free_run(&self, blocks: usize) -> Option<usize> {
        let mut run_start = 0;
        let mut run_len = 0;

        for (i, &entry) in self.table.iter().enumerate() {
            if entry & ENTRY_TYPE_MASK != ENTRY_FREE {
                run_len = 0;
                continue;
            }

            if run_len == 0 {
                run_start = i;
            }
            run_len += 1;

            if run_len == blocks {
                return Some(run_start);
            }
        }

        None
    }

    /// Mark `blocks` entries starting at `start` as one allocation run.
    fn mark_taken(&mut self, start: usize, blocks: usize) {
        let end = start + blocks - 1;

        let mut entry = ENTRY_TAKEN | ENTRY_IS_FIRST;
        if blocks > 1 {
            entry |= ENTRY_HAS_NEXT;
        }

        for i in start..=end {
            self.table[i] = entry;
            entry = ENTRY_TAKEN;
            if i != end {
                entry |= ENTRY_HAS_NEXT;
            }
        }
    }

    /// Verify the run-structure invariant over the whole table:
    /// every taken run starts with `IS_FIRST`, interior blocks carry
    /// `HAS_NEXT`, and only the first block of a run has `IS_FIRST`.
    ///
    /// O(n); intended for tests and debug assertions.
    #[must_use]
    pub fn verify_runs(&self) -> bool {
        let mut in_run = false;

        for &entry in self.table.iter() {
            let taken = entry & ENTRY_TYPE_MASK == ENTRY_TAKEN;
            let first = entry & ENTRY_IS_FIRST != 0;
            let has_next = entry & ENTRY_HAS_NEXT != 0;

            if !taken {
                // Free entries carry no flags and terminate any run.
                if entry != ENTRY_FREE || in_run {
                    return false;
                }
                continue;
            }

            if in_run {
                if first {
                    return false;
                }
            } else if !first {
                return false;
            }

            in_run = has_next;
        }

        !in_run
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLOCKS: usize = 64;
    const BASE: u64 = 0x4100_0000;

    fn heap(table: &mut [u8]) -> BlockHeap<'_> {
        BlockHeap::new(BASE, table).expect("heap creation failed")
    }

    #[test]
    fn rejects_unaligned_start() {
        let mut table = [0u8; 8];
        assert_eq!(
            BlockHeap::new(BASE + 1, &mut table).err(),
            Some(Status::InvArg)
        );
    }

    #[test]
    fn single_block_run_has_first_without_next() {
        let mut table = [0u8; BLOCKS];
        let mut h = heap(&mut table);

        let p = h.alloc(64).unwrap();
        assert_eq!(p, BASE);
        assert_eq!(h.used_blocks(), 1);
        drop(h);
        assert_eq!(table[0], ENTRY_TAKEN | ENTRY_IS_FIRST);
        assert_eq!(table[1], ENTRY_FREE);
    }

    #[test]
    fn multi_block_run_structure() {
        let mut table = [0u8; BLOCKS];
        let mut h = heap(&mut table);

        let p = h.alloc(3 * HEAP_BLOCK_SIZE).unwrap();
        assert_eq!(p, BASE);
        assert!(h.verify_runs());
        drop(h);
        assert_eq!(table[0], ENTRY_TAKEN | ENTRY_IS_FIRST | ENTRY_HAS_NEXT);
        assert_eq!(table[1], ENTRY_TAKEN | ENTRY_HAS_NEXT);
        assert_eq!(table[2], ENTRY_TAKEN);
        assert_eq!(table[3], ENTRY_FREE);
    }

    #[test]
    fn size_rounds_up_to_whole_blocks() {
        let mut table = [0u8; BLOCKS];
        let mut h = heap(&mut table);

        h.alloc(HEAP_BLOCK_SIZE + 1).unwrap();
        assert_eq!(h.used_blocks(), 2);
    }

    #[test]
    fn free_then_alloc_reuses_the_same_address() {
        let mut table = [0u8; BLOCKS];
        let mut h = heap(&mut table);

        let p1 = h.alloc(64).unwrap();
        h.free(p1);
        let p2 = h.alloc(64).unwrap();
        assert_eq!(p1, p2);
    }

    #[test]
    fn free_restores_table_byte_for_byte() {
        let mut table = [0u8; BLOCKS];
        let mut h = heap(&mut table);

        let before: [u8; BLOCKS] = core::array::from_fn(|_| ENTRY_FREE);
        let p = h.alloc(5 * HEAP_BLOCK_SIZE).unwrap();
        h.free(p);
        drop(h);
        assert_eq!(table, before);
    }

    #[test]
    fn oversized_allocation_fails() {
        let mut table = [0u8; BLOCKS];
        let mut h = heap(&mut table);

        assert!(h.alloc((BLOCKS + 1) * HEAP_BLOCK_SIZE).is_none());
        assert_eq!(h.used_blocks(), 0);
    }

    #[test]
    fn zero_size_allocation_fails() {
        let mut table = [0u8; BLOCKS];
        let mut h = heap(&mut table);
        assert!(h.alloc(0).is_none());
    }

    #[test]
    fn first_fit_skips_occupied_runs() {
        let mut table = [0u8; BLOCKS];
        let mut h = heap(&mut table);

        let a = h.alloc(HEAP_BLOCK_SIZE).unwrap();
        let b = h.alloc(2 * HEAP_BLOCK_SIZE).unwrap();
        let c = h.alloc(HEAP_BLOCK_SIZE).unwrap();
        assert_eq!(b, a + HEAP_BLOCK_SIZE as u64);
        assert_eq!(c, b + 2 * HEAP_BLOCK_SIZE as u64);

        // Free the middle run; a two-block request must land there,
        // a three-block request must go after `c`.
        h.free(b);
        assert_eq!(h.alloc(2 * HEAP_BLOCK_SIZE).unwrap(), b);
        h.free(b);
        assert_eq!(
            h.alloc(3 * HEAP_BLOCK_SIZE).unwrap(),
            c + HEAP_BLOCK_SIZE as u64
        );
    }

    #[test]
    fn free_walks_exactly_one_run() {
        let mut table = [0u8; BLOCKS];
        let mut h = heap(&mut table);

        let a = h.alloc(2 * HEAP_BLOCK_SIZE).unwrap();
        let b = h.alloc(2 * HEAP_BLOCK_SIZE).unwrap();
        h.free(a);
        assert_eq!(h.used_blocks(), 2);
        assert!(h.verify_runs());
        // The neighbouring run is untouched.
        assert_eq!(h.alloc(2 * HEAP_BLOCK_SIZE).unwrap(), a);
        let _ = b;
    }

    #[test]
    fn double_free_is_tolerated() {
        let mut table = [0u8; BLOCKS];
        let mut h = heap(&mut table);

        let a = h.alloc(2 * HEAP_BLOCK_SIZE).unwrap();
        let b = h.alloc(HEAP_BLOCK_SIZE).unwrap();
        h.free(a);
        h.free(a);
        assert_eq!(h.used_blocks(), 1);
        h.free(b);
        assert_eq!(h.used_blocks(), 0);
    }

    #[test]
    fn out_of_range_free_is_ignored() {
        let mut table = [0u8; BLOCKS];
        let mut h = heap(&mut table);

        let a = h.alloc(HEAP_BLOCK_SIZE).unwrap();
        h.free(BASE - HEAP_BLOCK_SIZE as u64);
        h.free(h.end_addr());
        assert_eq!(h.used_blocks(), 1);
        let _ = a;
    }
}
