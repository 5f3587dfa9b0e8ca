//! Shader-visible view descriptors as a ring.
//!
//! Each batch copies its CPU descriptors into one contiguous range of the
//! heap and records `(fence, length)`. Entries retire from the front once
//! their fence completes. When a batch does not fit in the tail, the tail is
//! recorded as a skip gap and the batch wraps to slot 0.
//!
//! ```text
//!            front                rear
//!              ▼                    ▼
//! [ free ... ][ live ][ live ][ live ][ free ... ]
//!
//!    rear          front
//!     ▼              ▼
//! [ live ][ free ][ live ][ live ][ gap ]
//! ```

use std::sync::Arc;

use kiln_core::{FenceValue, ReleaseQueue};

use super::heap::{CpuDescriptorHandle, DescriptorHeap, GpuDescriptorHandle};
use super::rollover::OnlineDescriptorAllocator;
use crate::backend::Backend;
use crate::error::GraphicsError;
use crate::resources::ResourceFactory;
use crate::types::DescriptorHeapType;

#[derive(Debug)]
pub struct OnlineViewRing {
    heap: DescriptorHeap,
    backend: Arc<dyn Backend>,
    front: u32,
    rear: u32,
    /// Slots held by live entries and gaps; tells a full ring from an empty one.
    used: u32,
    entries: ReleaseQueue<u32>,
}

impl OnlineViewRing {
    pub fn new(factory: &ResourceFactory, heap_type: DescriptorHeapType, capacity: u32) -> Result<Self, GraphicsError> {
        let heap = factory.create_descriptor_heap(heap_type, capacity, true)?;
        Ok(Self {
            heap,
            backend: factory.backend_arc().clone(),
            front: 0,
            rear: 0,
            used: 0,
            entries: ReleaseQueue::new(),
        })
    }

    pub fn front(&self) -> u32 {
        self.front
    }

    pub fn rear(&self) -> u32 {
        self.rear
    }

    pub fn used(&self) -> u32 {
        self.used
    }

    /// Live `(fence, length)` entries, oldest first. Gaps are included.
    pub fn entries(&self) -> impl Iterator<Item = (FenceValue, u32)> + '_ {
        self.entries.iter().map(|(fence, len)| (fence, *len))
    }

    /// Retire entries whose fence has completed.
    pub fn retire(&mut self, completed: FenceValue) {
        let capacity = self.heap.capacity();
        for (_, len) in self.entries.drain(completed) {
            self.front = (self.front + len) % capacity;
            self.used -= len;
        }
        if self.used == 0 {
            self.front = 0;
            self.rear = 0;
        }
    }

    /// Find room for `total` contiguous slots, recording a gap if the batch wraps.
    fn place(&mut self, fence: FenceValue, total: u32) -> Option<u32> {
        let capacity = self.heap.capacity();
        if total == 0 || total > capacity - self.used {
            return None;
        }

        let start = if self.rear > self.front || self.used == 0 {
            let tail = capacity - self.rear;
            if total <= tail {
                self.rear
            } else if total <= self.front {
                self.entries.push(fence, tail);
                self.used += tail;
                log::trace!("view ring: skip gap of {tail} at {}", self.rear);
                0
            } else {
                return None;
            }
        } else if self.front - self.rear >= total {
            self.rear
        } else {
            return None;
        };

        self.rear = (start + total) % capacity;
        self.used += total;
        self.entries.push(fence, total);
        Some(start)
    }
}

impl OnlineDescriptorAllocator for OnlineViewRing {
    const KIND: &'static str = "view ring";

    fn create(factory: &ResourceFactory, heap_type: DescriptorHeapType, capacity: u32) -> Result<Self, GraphicsError> {
        Self::new(factory, heap_type, capacity)
    }

    fn heap(&self) -> &DescriptorHeap {
        &self.heap
    }

    fn allocate_many(
        &mut self,
        fence: FenceValue,
        completed: FenceValue,
        blocks: &[&[CpuDescriptorHandle]],
    ) -> Option<Vec<GpuDescriptorHandle>> {
        self.retire(completed);

        let total: usize = blocks.iter().map(|b| b.len()).sum();
        let total = u32::try_from(total).ok()?;
        let start = self.place(fence, total)?;

        let mut handles = Vec::with_capacity(blocks.len());
        let mut cursor = start;
        let mut sources = Vec::new();
        for block in blocks {
            // An empty trailing block may sit one past the end; point it at the last slot.
            handles.push(self.heap.gpu_handle(cursor.min(self.heap.capacity() - 1)));
            if !block.is_empty() {
                sources.clear();
                sources.extend(block.iter().map(|h| (h.heap, h.index)));
                self.backend.copy_descriptors(self.heap.raw(), cursor, &sources);
            }
            cursor += block.len() as u32;
        }
        log::trace!("view ring: {total} slots at {start} for fence {fence}");
        Some(handles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DescriptorSource, DummyBackend, RawResource};
    use crate::descriptors::OfflineDescriptorAllocator;
    use crate::sync::ReleaseSink;

    struct Fixture {
        backend: Arc<DummyBackend>,
        factory: ResourceFactory,
        offline: OfflineDescriptorAllocator,
    }

    fn fixture() -> Fixture {
        let backend = Arc::new(DummyBackend::new());
        let factory = ResourceFactory::new(backend.clone(), ReleaseSink::new());
        let offline = OfflineDescriptorAllocator::new(factory.clone(), DescriptorHeapType::CbvSrvUav, 256);
        Fixture {
            backend,
            factory,
            offline,
        }
    }

    fn staged(offline: &mut OfflineDescriptorAllocator, count: u32) -> Vec<CpuDescriptorHandle> {
        (0..count)
            .map(|i| {
                offline
                    .allocate_with(&DescriptorSource::ShaderResource(RawResource(100 + i as u64)))
                    .unwrap()
            })
            .collect()
    }

    #[test]
    fn test_single_block_fills_from_zero() {
        let mut f = fixture();
        let mut ring = OnlineViewRing::new(&f.factory, DescriptorHeapType::CbvSrvUav, 64).unwrap();
        let block = staged(&mut f.offline, 3);

        let handles = ring.allocate_many(10, 0, &[&block]).unwrap();
        assert_eq!(handles.len(), 1);
        assert_eq!(handles[0].index, 0);
        assert_eq!(ring.entries().collect::<Vec<_>>(), vec![(10, 3)]);
        for (i, _) in block.iter().enumerate() {
            assert_eq!(
                f.backend.descriptor(ring.heap().raw(), i as u32),
                Some(DescriptorSource::ShaderResource(RawResource(100 + i as u64)))
            );
        }
    }

    #[test]
    fn test_blocks_are_contiguous() {
        let mut f = fixture();
        let mut ring = OnlineViewRing::new(&f.factory, DescriptorHeapType::CbvSrvUav, 64).unwrap();
        let a = staged(&mut f.offline, 2);
        let b = staged(&mut f.offline, 5);

        let handles = ring.allocate_many(1, 0, &[&a, &b]).unwrap();
        assert_eq!(handles[0].index, 0);
        assert_eq!(handles[1].index, 2);
        assert_eq!(ring.rear(), 7);
        assert_eq!(ring.entries().collect::<Vec<_>>(), vec![(1, 7)]);
    }

    #[test]
    fn test_wrap_needs_completed_front() {
        let mut f = fixture();
        let mut ring = OnlineViewRing::new(&f.factory, DescriptorHeapType::CbvSrvUav, 100).unwrap();
        let block = staged(&mut f.offline, 40);

        assert!(ring.allocate_many(1, 0, &[&block]).is_some());
        assert!(ring.allocate_many(2, 0, &[&block]).is_some());
        // Nothing retired: 20 slots of tail, 0 before front.
        assert!(ring.allocate_many(3, 0, &[&block]).is_none());

        // First batch done: wraps behind a 20-slot gap.
        let third = ring.allocate_many(3, 1, &[&block]).unwrap();
        assert_eq!(third[0].index, 0);
        assert_eq!(ring.used(), 100);
        assert_eq!(
            ring.entries().collect::<Vec<_>>(),
            vec![(2, 40), (3, 20), (3, 40)]
        );

        assert!(ring.allocate_many(4, 1, &[&block]).is_none());
        let fourth = ring.allocate_many(4, 2, &[&block]).unwrap();
        assert_eq!(fourth[0].index, 40);
        assert_eq!(ring.rear(), 80);
    }

    #[test]
    fn test_exact_fit_between_rear_and_front() {
        let mut f = fixture();
        let mut ring = OnlineViewRing::new(&f.factory, DescriptorHeapType::CbvSrvUav, 10).unwrap();
        let four = staged(&mut f.offline, 4);
        let six = staged(&mut f.offline, 6);

        ring.allocate_many(1, 0, &[&four]).unwrap();
        ring.allocate_many(2, 0, &[&six]).unwrap();
        assert_eq!(ring.rear(), 0);
        assert_eq!(ring.used(), 10);
        assert!(ring.allocate_many(3, 0, &[&four]).is_none());

        let again = ring.allocate_many(3, 1, &[&four]).unwrap();
        assert_eq!(again[0].index, 0);
        assert_eq!(ring.used(), 10);
    }

    #[test]
    fn test_empty_ring_resets_cursors() {
        let mut f = fixture();
        let mut ring = OnlineViewRing::new(&f.factory, DescriptorHeapType::CbvSrvUav, 16).unwrap();
        let block = staged(&mut f.offline, 5);
        ring.allocate_many(1, 0, &[&block]).unwrap();
        ring.allocate_many(2, 0, &[&block]).unwrap();

        ring.retire(2);
        assert_eq!((ring.front(), ring.rear(), ring.used()), (0, 0, 0));
    }

    #[test]
    fn test_oversized_batch_fails() {
        let mut f = fixture();
        let mut ring = OnlineViewRing::new(&f.factory, DescriptorHeapType::CbvSrvUav, 8).unwrap();
        let block = staged(&mut f.offline, 9);
        assert!(ring.allocate_many(1, 0, &[&block]).is_none());
        assert_eq!(ring.used(), 0);
    }
}
