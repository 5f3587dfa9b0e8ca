//! CPU-only descriptor staging.
//!
//! Offline descriptors are written once on the CPU and copied into
//! shader-visible heaps when a draw needs them. The allocator hands out one
//! slot at a time from fixed-size pages with an append-only cursor. Released
//! slots wait for their fence and then go to a free list; pages are never
//! freed.

use kiln_core::{FenceValue, ReleaseQueue};

use super::heap::{CpuDescriptorHandle, DescriptorHeap};
use crate::backend::DescriptorSource;
use crate::error::GraphicsError;
use crate::resources::ResourceFactory;
use crate::types::DescriptorHeapType;

/// Default number of descriptors per offline page.
pub const DEFAULT_OFFLINE_PAGE_SIZE: u32 = 256;

#[derive(Debug)]
struct OfflinePage {
    heap: DescriptorHeap,
    cursor: u32,
    versions: Vec<u32>,
    live: Vec<bool>,
}

#[derive(Debug)]
pub struct OfflineDescriptorAllocator {
    heap_type: DescriptorHeapType,
    page_capacity: u32,
    pages: Vec<OfflinePage>,
    free: Vec<(u32, u32)>,
    pending: ReleaseQueue<(u32, u32)>,
    factory: ResourceFactory,
    live_count: u32,
}

impl OfflineDescriptorAllocator {
    pub fn new(factory: ResourceFactory, heap_type: DescriptorHeapType, page_capacity: u32) -> Self {
        assert!(page_capacity > 0, "offline descriptor pages must hold at least one slot");
        Self {
            heap_type,
            page_capacity,
            pages: Vec::new(),
            free: Vec::new(),
            pending: ReleaseQueue::new(),
            factory,
            live_count: 0,
        }
    }

    pub fn heap_type(&self) -> DescriptorHeapType {
        self.heap_type
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Descriptors handed out and not yet released.
    pub fn live_count(&self) -> u32 {
        self.live_count
    }

    /// Released descriptors still waiting for their fence.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Hand out one descriptor slot.
    pub fn allocate(&mut self) -> Result<CpuDescriptorHandle, GraphicsError> {
        let (page, index) = match self.free.pop() {
            Some(slot) => slot,
            None => self.bump()?,
        };
        let entry = &mut self.pages[page as usize];
        entry.live[index as usize] = true;
        self.live_count += 1;

        let mut handle = entry.heap.cpu_handle(index);
        handle.version = entry.versions[index as usize];
        Ok(handle)
    }

    /// Point a descriptor at new contents, bumping its version.
    pub fn write(&mut self, handle: &mut CpuDescriptorHandle, source: &DescriptorSource) {
        let (page, index) = self.locate(handle);
        let entry = &mut self.pages[page];
        if !entry.live[index] {
            kiln_core::contract_violation!(
                "write to released {:?} descriptor {}",
                self.heap_type,
                handle.index
            );
        }
        let version = entry.versions[index].wrapping_add(1);
        entry.versions[index] = version;
        self.factory
            .backend()
            .write_descriptor(entry.heap.raw(), handle.index, source);
        handle.version = version;
    }

    /// Allocate and write in one step.
    pub fn allocate_with(&mut self, source: &DescriptorSource) -> Result<CpuDescriptorHandle, GraphicsError> {
        let mut handle = self.allocate()?;
        self.write(&mut handle, source);
        Ok(handle)
    }

    /// Current version of the slot behind `handle`.
    pub fn version(&self, handle: &CpuDescriptorHandle) -> u32 {
        let (page, index) = self.locate(handle);
        self.pages[page].versions[index]
    }

    /// Return a descriptor once `fence` completes.
    pub fn release(&mut self, handle: CpuDescriptorHandle, fence: FenceValue) {
        let (page, index) = self.locate(&handle);
        let entry = &mut self.pages[page];
        if !entry.live[index] {
            kiln_core::contract_violation!(
                "{:?} descriptor {} released twice",
                self.heap_type,
                handle.index
            );
        }
        entry.live[index] = false;
        self.live_count -= 1;
        self.pending.push(fence, (page as u32, index as u32));
    }

    /// Make released slots whose fence completed reusable.
    pub fn drain(&mut self, completed: FenceValue) -> usize {
        let before = self.free.len();
        self.free.extend(self.pending.drain(completed).map(|(_, slot)| slot));
        self.free.len() - before
    }

    /// Make every released slot reusable. Only valid once the GPU is idle.
    pub fn drain_all(&mut self) {
        self.free.extend(self.pending.drain_all().map(|(_, slot)| slot));
    }

    fn bump(&mut self) -> Result<(u32, u32), GraphicsError> {
        let needs_page = self
            .pages
            .last()
            .is_none_or(|page| page.cursor == self.page_capacity);
        if needs_page {
            let heap = self
                .factory
                .create_descriptor_heap(self.heap_type, self.page_capacity, false)?;
            log::debug!(
                "offline {:?} allocator: page {} ({} slots)",
                self.heap_type,
                self.pages.len(),
                self.page_capacity
            );
            self.pages.push(OfflinePage {
                heap,
                cursor: 0,
                versions: vec![0; self.page_capacity as usize],
                live: vec![false; self.page_capacity as usize],
            });
        }
        let page_index = self.pages.len() - 1;
        let page = &mut self.pages[page_index];
        let index = page.cursor;
        page.cursor += 1;
        Ok((page_index as u32, index))
    }

    fn locate(&self, handle: &CpuDescriptorHandle) -> (usize, usize) {
        match self.pages.iter().position(|p| p.heap.raw() == handle.heap) {
            Some(page) if handle.index < self.page_capacity => (page, handle.index as usize),
            _ => kiln_core::contract_violation!(
                "descriptor {:?} does not belong to the {:?} offline allocator",
                handle,
                self.heap_type
            ),
        }
    }
}
