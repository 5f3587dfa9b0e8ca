//! Frame-persistent buffer sub-allocation over buddy pages.

use kiln_core::alloc::{MultiBuddyAllocation, MultiBuddyAllocator};
use kiln_core::{FenceValue, ReleaseQueue};

use super::page_pool::PagePool;
use super::slice::BufferSlice;
use crate::error::GraphicsError;
use crate::resources::{Resource, ResourceFactory};
use crate::types::{BufferUsage, HeapKind};

/// Smallest block handed out; matches constant-buffer placement alignment.
pub const CONSTANT_BLOCK_SIZE: u32 = 256;

/// A slice that stays valid until it is released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PersistentSlice {
    pub slice: BufferSlice,
    allocation: MultiBuddyAllocation,
}

#[derive(Debug)]
pub struct BuddyBufferAllocator {
    multi: MultiBuddyAllocator,
    pool: PagePool,
    pages: Vec<Resource>,
    pending: ReleaseQueue<MultiBuddyAllocation>,
}

impl BuddyBufferAllocator {
    pub fn new(factory: ResourceFactory, heap: HeapKind, usages: BufferUsage, page_size: u32, label: &'static str) -> Self {
        Self {
            multi: MultiBuddyAllocator::new(CONSTANT_BLOCK_SIZE, page_size),
            pool: PagePool::new(factory, heap, usages, page_size as u64, label),
            pages: Vec::new(),
            pending: ReleaseQueue::new(),
        }
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn used_bytes(&self) -> u64 {
        self.multi.used_bytes()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn allocate(&mut self, size: u32, align: u32) -> Result<PersistentSlice, GraphicsError> {
        let Self {
            multi, pool, pages, ..
        } = self;
        let allocation = multi.allocate(size, align.max(CONSTANT_BLOCK_SIZE), |_, page_size| {
            let page = if page_size as u64 == pool.page_size() {
                pool.acquire()?
            } else {
                pool.create(page_size as u64)?
            };
            pages.push(page);
            Ok::<_, GraphicsError>(())
        })?;

        let page = &self.pages[allocation.page];
        Ok(PersistentSlice {
            slice: BufferSlice {
                resource: page.raw(),
                gpu_address: page.gpu_address() + allocation.offset as u64,
                offset: allocation.offset as u64,
                size: size as u64,
            },
            allocation,
        })
    }

    /// Return `slice` once `fence` completes.
    pub fn release(&mut self, slice: PersistentSlice, fence: FenceValue) {
        self.pending.push(fence, slice.allocation);
    }

    pub fn drain(&mut self, completed: FenceValue) {
        for (_, allocation) in self.pending.drain(completed) {
            self.multi.release(&allocation);
        }
    }

    pub fn clear(&mut self) {
        for (_, allocation) in self.pending.drain_all() {
            self.multi.release(&allocation);
        }
        self.pages.clear();
        self.pool.clear();
        self.multi = MultiBuddyAllocator::new(self.multi.min_block(), self.pool.page_size() as u32);
    }
}
