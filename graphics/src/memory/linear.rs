//! Single-frame linear sub-allocation of buffer memory.

use kiln_core::FenceValue;
use kiln_core::alloc::LinearAllocator;

use super::page_pool::PagePool;
use super::slice::BufferSlice;
use crate::error::GraphicsError;
use crate::resources::{Resource, ResourceFactory};
use crate::types::{BufferUsage, HeapKind};

struct Page {
    resource: Resource,
    large: bool,
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.resource.raw(), if self.large { " (large)" } else { "" })
    }
}

/// Bump allocation over page buffers for data that lives one frame.
///
/// At [`end_frame`](Self::end_frame) every page used this frame is retired
/// with the frame fence and recycled once it completes. Oversized requests
/// get a dedicated *large* page that is never recycled.
#[derive(Debug)]
pub struct LinearBufferAllocator {
    allocator: LinearAllocator,
    pool: PagePool,
    pages: Vec<Page>,
}

impl LinearBufferAllocator {
    pub fn new(
        factory: ResourceFactory,
        heap: HeapKind,
        usages: BufferUsage,
        page_size: u64,
        label: &'static str,
    ) -> Self {
        Self {
            allocator: LinearAllocator::new(page_size),
            pool: PagePool::new(factory, heap, usages, page_size, label),
            pages: Vec::new(),
        }
    }

    pub fn page_size(&self) -> u64 {
        self.allocator.page_size()
    }

    /// Pages in use this frame, large ones included.
    pub fn active_pages(&self) -> usize {
        self.pages.len()
    }

    pub fn pool(&self) -> &PagePool {
        &self.pool
    }

    pub fn allocate(&mut self, size: u64, align: u64) -> Result<BufferSlice, GraphicsError> {
        let Self {
            allocator,
            pool,
            pages,
        } = self;
        let allocation = allocator.allocate(size, align, |page_size, large| {
            let resource = if large {
                log::warn!("linear buffer allocator: {size}-byte request exceeds the page size; using a large page");
                pool.create(page_size)?
            } else {
                pool.acquire()?
            };
            pages.push(Page { resource, large });
            Ok::<_, GraphicsError>(pages.len() - 1)
        })?;

        let page = &self.pages[allocation.page].resource;
        Ok(BufferSlice {
            resource: page.raw(),
            gpu_address: page.gpu_address() + allocation.offset,
            offset: allocation.offset,
            size,
        })
    }

    /// Retire this frame's pages with `fence`.
    pub fn end_frame(&mut self, fence: FenceValue) {
        for page in self.pages.drain(..) {
            if page.large {
                drop(page.resource);
            } else {
                self.pool.retire(page.resource, fence);
            }
        }
        self.allocator.reset();
    }

    /// Recycle pages whose frame completed.
    pub fn drain(&mut self, completed: FenceValue) {
        self.pool.drain(completed);
    }

    pub fn clear(&mut self) {
        self.pages.clear();
        self.allocator.reset();
        self.pool.clear();
    }
}
