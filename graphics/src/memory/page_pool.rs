//! Page buffers for sub-allocators.

use kiln_core::{FenceValue, ReleaseQueue};

use crate::error::GraphicsError;
use crate::resources::{Resource, ResourceFactory};
use crate::types::{BufferDesc, BufferUsage, HeapKind};

/// Creates, retires and recycles fixed-size page buffers of one heap kind.
///
/// Pages retired with a fence become reusable once that fence completes.
/// Pages of any other size are never pooled.
#[derive(Debug)]
pub struct PagePool {
    factory: ResourceFactory,
    heap: HeapKind,
    usages: BufferUsage,
    page_size: u64,
    label: &'static str,
    free: Vec<Resource>,
    retired: ReleaseQueue<Resource>,
    created: u64,
}

impl PagePool {
    pub fn new(
        factory: ResourceFactory,
        heap: HeapKind,
        usages: BufferUsage,
        page_size: u64,
        label: &'static str,
    ) -> Self {
        Self {
            factory,
            heap,
            usages,
            page_size,
            label,
            free: Vec::new(),
            retired: ReleaseQueue::new(),
            created: 0,
        }
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    pub fn heap(&self) -> HeapKind {
        self.heap
    }

    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    pub fn retired_count(&self) -> usize {
        self.retired.len()
    }

    /// Pages created so far, pooled or not.
    pub fn created_count(&self) -> u64 {
        self.created
    }

    /// A standard page: recycled if one is free, otherwise new.
    pub fn acquire(&mut self) -> Result<Resource, GraphicsError> {
        if let Some(page) = self.free.pop() {
            return Ok(page);
        }
        self.create(self.page_size)
    }

    /// A buffer of exactly `size` bytes with the pool's heap and usages.
    pub fn create(&mut self, size: u64) -> Result<Resource, GraphicsError> {
        let bytes = u32::try_from(size).map_err(|_| {
            GraphicsError::InvalidParameter(format!("{} page of {size} bytes is too large", self.label))
        })?;
        let desc = BufferDesc::bytes(bytes, self.usages).with_label(self.label);
        let page = self.factory.create_buffer(&desc, self.heap)?;
        self.created += 1;
        log::debug!("{}: created page {} ({size} bytes)", self.label, page.raw());
        Ok(page)
    }

    /// Hand a standard page back once `fence` completes.
    pub fn retire(&mut self, page: Resource, fence: FenceValue) {
        self.retired.push(fence, page);
    }

    /// Move pages whose fence completed to the free list.
    pub fn drain(&mut self, completed: FenceValue) {
        self.free
            .extend(self.retired.drain(completed).map(|(_, page)| page));
    }

    /// Drop every page. Dropped pages go through deferred release.
    pub fn clear(&mut self) {
        self.free.clear();
        self.retired.drain_all().for_each(drop);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::backend::DummyBackend;
    use crate::sync::ReleaseSink;

    #[test]
    fn test_retired_page_is_recycled_after_fence() {
        let factory = ResourceFactory::new(Arc::new(DummyBackend::new()), ReleaseSink::new());
        let mut pool = PagePool::new(factory, HeapKind::Upload, BufferUsage::CONSTANT, 4096, "test pages");

        let page = pool.acquire().unwrap();
        let raw = page.raw();
        pool.retire(page, 3);

        pool.drain(2);
        assert_eq!(pool.free_count(), 0);
        pool.drain(3);
        assert_eq!(pool.acquire().unwrap().raw(), raw);
        assert_eq!(pool.created_count(), 1);
    }
}
