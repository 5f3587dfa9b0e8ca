//! Heap rollover for online descriptor allocators.
//!
//! A shader-visible heap can fill up mid-frame when the GPU is far behind.
//! Instead of stalling, the full allocator is retired with the current frame
//! fence and a fresh one with a new heap takes its place. The retired
//! allocator (and its heap) is dropped once that fence completes.

use std::fmt;

use kiln_core::{FenceValue, ReleaseQueue};

use super::heap::{CpuDescriptorHandle, DescriptorHeap, GpuDescriptorHandle};
use crate::backend::RawDescriptorHeap;
use crate::error::GraphicsError;
use crate::resources::ResourceFactory;
use crate::types::DescriptorHeapType;

/// An allocator of shader-visible descriptor ranges.
pub trait OnlineDescriptorAllocator: Sized + fmt::Debug {
    /// Name used in log messages.
    const KIND: &'static str;

    fn create(factory: &ResourceFactory, heap_type: DescriptorHeapType, capacity: u32) -> Result<Self, GraphicsError>;

    fn heap(&self) -> &DescriptorHeap;

    /// Copy every block into the heap, returning one GPU handle per block.
    ///
    /// `fence` is the frame fence of the commands that will read the
    /// descriptors; `completed` the last completed frame fence. Returns
    /// `None` when the heap cannot hold the batch right now.
    fn allocate_many(
        &mut self,
        fence: FenceValue,
        completed: FenceValue,
        blocks: &[&[CpuDescriptorHandle]],
    ) -> Option<Vec<GpuDescriptorHandle>>;
}

#[derive(Debug)]
pub struct Rollover<A> {
    factory: ResourceFactory,
    heap_type: DescriptorHeapType,
    capacity: u32,
    current: A,
    retired: ReleaseQueue<A>,
    generation: u64,
}

impl<A: OnlineDescriptorAllocator> Rollover<A> {
    pub fn new(factory: ResourceFactory, heap_type: DescriptorHeapType, capacity: u32) -> Result<Self, GraphicsError> {
        let current = A::create(&factory, heap_type, capacity)?;
        Ok(Self {
            factory,
            heap_type,
            capacity,
            current,
            retired: ReleaseQueue::new(),
            generation: 0,
        })
    }

    pub fn current(&self) -> &A {
        &self.current
    }

    /// The heap descriptors are currently allocated from.
    pub fn heap_raw(&self) -> RawDescriptorHeap {
        self.current.heap().raw()
    }

    /// Number of times the heap was replaced.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn retired_count(&self) -> usize {
        self.retired.len()
    }

    /// Allocate a batch, rolling over to a fresh heap if the current one is full.
    ///
    /// Fails only if the batch cannot fit even into an empty heap, or if a
    /// new heap cannot be created.
    pub fn allocate_many(
        &mut self,
        fence: FenceValue,
        completed: FenceValue,
        blocks: &[&[CpuDescriptorHandle]],
    ) -> Result<Vec<GpuDescriptorHandle>, GraphicsError> {
        self.drain(completed);

        let requested: usize = blocks.iter().map(|b| b.len()).sum();
        if requested == 0 {
            // Nothing to copy; empty tables may point at any slot.
            let base = self.current.heap().gpu_handle(0);
            return Ok(vec![base; blocks.len()]);
        }
        let out_of_descriptors = || GraphicsError::OutOfDescriptors {
            heap_type: self.heap_type,
            requested: u32::try_from(requested).unwrap_or(u32::MAX),
            capacity: self.capacity,
        };
        if requested > self.capacity as usize {
            return Err(out_of_descriptors());
        }

        if let Some(handles) = self.current.allocate_many(fence, completed, blocks) {
            return Ok(handles);
        }

        log::warn!(
            "{} for {:?} is full ({} slots); rolling over to a new heap at fence {}",
            A::KIND,
            self.heap_type,
            self.capacity,
            fence
        );
        let fresh = A::create(&self.factory, self.heap_type, self.capacity)?;
        let full = std::mem::replace(&mut self.current, fresh);
        self.retired.push(fence, full);
        self.generation += 1;

        self.current
            .allocate_many(fence, completed, blocks)
            .ok_or_else(out_of_descriptors)
    }

    /// Drop retired allocators whose fence completed.
    pub fn drain(&mut self, completed: FenceValue) {
        for (fence, allocator) in self.retired.drain(completed) {
            log::debug!(
                "{}: releasing retired heap {} (fence {})",
                A::KIND,
                allocator.heap().raw(),
                fence
            );
        }
    }

    /// Drop every retired allocator. Only valid once the GPU is idle.
    pub fn drain_all(&mut self) {
        self.retired.drain_all().for_each(drop);
    }
}
