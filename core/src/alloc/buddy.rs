//! Buddy allocator.
//!
//! Manages the range `[0, max_size)` as power-of-two blocks of
//! `min_block << order` bytes. A block of order `k` at `offset` always has
//! `offset % (min_block << k) == 0`, so its buddy is found by flipping one
//! bit: `offset ^ (min_block << k)`.
//!
//! ```text
//! order 2  [               0 .. 1024               ]
//! order 1  [    0 .. 512     ][    512 .. 1024     ]
//! order 0  [ 0..256 ][256..512][512..768][768..1024]
//! ```
//!
//! Free blocks are kept in one ordered set per order. Allocation takes the
//! lowest free offset of the smallest order that fits, splitting larger
//! blocks on the way down. Release merges a block with its buddy for as long
//! as the buddy is free.

use std::collections::{BTreeMap, BTreeSet};

use super::align_up_u32;

/// A block handed out by [`BuddyAllocator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BuddyBlock {
    /// Byte offset of the block start.
    pub offset: u32,
    /// Block order; the block spans `min_block << order` bytes.
    pub order: u32,
}

/// An allocation inside a [`BuddyBlock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BuddyAllocation {
    /// The block to pass back to [`BuddyAllocator::release`].
    pub block: BuddyBlock,
    /// Aligned byte offset of the usable region.
    pub offset: u32,
    /// Requested size in bytes.
    pub size: u32,
}

#[derive(Debug, Clone)]
pub struct BuddyAllocator {
    min_block: u32,
    max_order: u32,
    free_blocks: Vec<BTreeSet<u32>>,
    live: BTreeMap<u32, u32>,
    used_bytes: u64,
}

impl BuddyAllocator {
    /// Create an allocator over `[0, max_size)`.
    ///
    /// # Panics
    ///
    /// Panics if either size is not a power of two or `max_size < min_block`.
    pub fn new(min_block: u32, max_size: u32) -> Self {
        assert!(
            min_block.is_power_of_two() && max_size.is_power_of_two(),
            "buddy sizes must be powers of two (min {min_block}, max {max_size})"
        );
        assert!(max_size >= min_block, "buddy max size below min block");

        let max_order = (max_size / min_block).trailing_zeros();
        let mut free_blocks = vec![BTreeSet::new(); max_order as usize + 1];
        free_blocks[max_order as usize].insert(0);
        Self {
            min_block,
            max_order,
            free_blocks,
            live: BTreeMap::new(),
            used_bytes: 0,
        }
    }

    pub fn min_block(&self) -> u32 {
        self.min_block
    }

    pub fn max_order(&self) -> u32 {
        self.max_order
    }

    /// Total managed size in bytes.
    pub fn max_size(&self) -> u32 {
        self.min_block << self.max_order
    }

    /// Bytes held by live blocks (block sizes, not requested sizes).
    pub fn used_bytes(&self) -> u64 {
        self.used_bytes
    }

    /// Check if no blocks are live.
    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Size of a block of the given order.
    pub fn block_size(&self, order: u32) -> u32 {
        self.min_block << order
    }

    /// Order needed to serve `size` bytes at `align`, or `None` if even the
    /// whole range is too small.
    pub fn order_for(&self, size: u32, align: u32) -> Option<u32> {
        let mut needed = align_up_u32(size.max(1), self.min_block) as u64;
        if align > self.min_block {
            needed += align as u64;
        }
        let units = needed.div_ceil(self.min_block as u64);
        let order = units.next_power_of_two().trailing_zeros();
        (order <= self.max_order).then_some(order)
    }

    /// Allocate `size` bytes aligned to `align`.
    ///
    /// Returns `None` if no block of the required order can be produced.
    pub fn allocate(&mut self, size: u32, align: u32) -> Option<BuddyAllocation> {
        let order = self.order_for(size, align)?;
        let block_offset = self.take_block(order)?;
        let block_size = self.block_size(order);

        let offset = align_up_u32(block_offset, align.max(1));
        debug_assert!(
            (offset - block_offset) as u64 + size as u64 <= block_size as u64,
            "aligned buddy allocation overflows its block"
        );

        let block = BuddyBlock {
            offset: block_offset,
            order,
        };
        self.live.insert(block_offset, order);
        self.used_bytes += block_size as u64;
        log::trace!("buddy: allocated {size} bytes at {offset} (order {order})");
        Some(BuddyAllocation {
            block,
            offset,
            size,
        })
    }

    /// Return a block, merging it with free buddies.
    ///
    /// # Panics
    ///
    /// Panics if `block` is not live (double free or foreign block).
    pub fn release(&mut self, block: BuddyBlock) {
        match self.live.get(&block.offset) {
            Some(&order) if order == block.order => {
                self.live.remove(&block.offset);
            }
            _ => crate::contract_violation!(
                "buddy block at {} (order {}) is not allocated",
                block.offset,
                block.order
            ),
        }
        self.used_bytes -= self.block_size(block.order) as u64;

        let mut offset = block.offset;
        let mut order = block.order;
        while order < self.max_order {
            let buddy = offset ^ self.block_size(order);
            if !self.free_blocks[order as usize].remove(&buddy) {
                break;
            }
            offset = offset.min(buddy);
            order += 1;
        }
        self.free_blocks[order as usize].insert(offset);
    }

    /// Number of free blocks at `order`.
    pub fn free_count(&self, order: u32) -> usize {
        self.free_blocks
            .get(order as usize)
            .map_or(0, BTreeSet::len)
    }

    fn take_block(&mut self, order: u32) -> Option<u32> {
        let source = (order..=self.max_order).find(|&o| !self.free_blocks[o as usize].is_empty())?;
        let offset = self.free_blocks[source as usize].pop_first()?;

        // Keep the left half, push right halves down.
        let mut current = source;
        while current > order {
            current -= 1;
            let buddy = offset + self.block_size(current);
            self.free_blocks[current as usize].insert(buddy);
        }
        Some(offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequential_offsets() {
        let mut buddy = BuddyAllocator::new(256, 4096);

        let a = buddy.allocate(300, 1).unwrap();
        let b = buddy.allocate(600, 1).unwrap();
        let c = buddy.allocate(900, 1).unwrap();

        assert_eq!(a.offset, 0);
        assert_eq!(b.offset, 1024);
        assert_eq!(c.offset, 2048);
        assert_eq!(buddy.block_size(a.block.order), 512);
        assert_eq!(buddy.block_size(b.block.order), 1024);
        assert_eq!(buddy.block_size(c.block.order), 1024);
        assert_eq!(buddy.used_bytes(), 2560);
    }

    #[test]
    fn test_coalesce_back_to_max_order() {
        let mut buddy = BuddyAllocator::new(256, 4096);
        let blocks: Vec<_> = (0..16).map(|_| buddy.allocate(256, 1).unwrap()).collect();
        assert!(buddy.allocate(1, 1).is_none());

        for alloc in blocks.iter().rev() {
            buddy.release(alloc.block);
        }

        assert!(buddy.is_empty());
        let whole = buddy.allocate(4096, 1).unwrap();
        assert_eq!(whole.block.order, buddy.max_order());
        assert_eq!(whole.offset, 0);
    }

    #[test]
    fn test_coalesce_out_of_order() {
        let mut buddy = BuddyAllocator::new(64, 1024);
        let allocs: Vec<_> = (0..16).map(|_| buddy.allocate(64, 1).unwrap()).collect();
        for i in [3usize, 0, 15, 7, 1, 2, 8, 9, 14, 4, 5, 6, 10, 12, 11, 13] {
            buddy.release(allocs[i].block);
        }
        assert_eq!(buddy.free_count(buddy.max_order()), 1);
    }

    #[test]
    fn test_alignment_oversizes_request() {
        let mut buddy = BuddyAllocator::new(256, 8192);
        buddy.allocate(256, 1).unwrap();
        let aligned = buddy.allocate(256, 1024).unwrap();
        assert_eq!(aligned.offset % 1024, 0);
        assert!(buddy.block_size(aligned.block.order) >= 1024 + 256);
    }

    #[test]
    fn test_too_large_request_fails() {
        let mut buddy = BuddyAllocator::new(256, 1024);
        assert!(buddy.allocate(1025, 1).is_none());
        assert_eq!(buddy.order_for(1024, 1), Some(2));
        assert_eq!(buddy.order_for(1024, 512), None);
    }

    #[test]
    fn test_lowest_offset_first() {
        let mut buddy = BuddyAllocator::new(256, 2048);
        let a = buddy.allocate(256, 1).unwrap();
        let b = buddy.allocate(256, 1).unwrap();
        buddy.release(a.block);
        let c = buddy.allocate(256, 1).unwrap();
        assert_eq!(c.offset, 0);
        assert_eq!(b.offset, 256);
    }

    #[test]
    #[should_panic(expected = "is not allocated")]
    fn test_double_release_panics() {
        let mut buddy = BuddyAllocator::new(256, 1024);
        let a = buddy.allocate(10, 1).unwrap();
        buddy.release(a.block);
        buddy.release(a.block);
    }
}
