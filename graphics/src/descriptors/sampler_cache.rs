//! Content-addressed shader-visible sampler blocks.
//!
//! Sampler heaps are small, and the same few sampler tables are bound over
//! and over. Instead of streaming them through a ring, each distinct block of
//! CPU handles is copied once into a buddy-allocated range and reused for as
//! long as it stays in the cache. Blocks are keyed by the handles themselves
//! (heap, index, version), not by sampler contents.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use kiln_core::FenceValue;
use kiln_core::alloc::{BuddyAllocator, BuddyBlock};
use xxhash_rust::xxh3::Xxh3;

use super::heap::{CpuDescriptorHandle, DescriptorHeap, GpuDescriptorHandle};
use super::rollover::OnlineDescriptorAllocator;
use crate::backend::Backend;
use crate::error::GraphicsError;
use crate::resources::ResourceFactory;
use crate::types::DescriptorHeapType;

#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    block: BuddyBlock,
    /// Last fence that referenced the block.
    fence: FenceValue,
    tick: u64,
}

/// Hit/miss counters of a [`SamplerCache`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SamplerCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

#[derive(Debug)]
pub struct SamplerCache {
    heap: DescriptorHeap,
    backend: Arc<dyn Backend>,
    buddy: BuddyAllocator,
    entries: HashMap<u64, CacheEntry>,
    /// Use order: oldest tick first.
    lru: BTreeMap<u64, u64>,
    tick: u64,
    stats: SamplerCacheStats,
}

/// Cache key of a block of CPU handles.
pub fn block_key(block: &[CpuDescriptorHandle]) -> u64 {
    let mut hasher = Xxh3::new();
    hasher.update(&(block.len() as u64).to_le_bytes());
    for handle in block {
        hasher.update(&handle.heap.0.to_le_bytes());
        hasher.update(&handle.index.to_le_bytes());
        hasher.update(&handle.version.to_le_bytes());
    }
    hasher.digest()
}

impl SamplerCache {
    /// Create a cache over a new shader-visible heap.
    ///
    /// The buddy range covers the largest power of two not above `capacity`.
    pub fn new(factory: &ResourceFactory, heap_type: DescriptorHeapType, capacity: u32) -> Result<Self, GraphicsError> {
        if capacity == 0 {
            return Err(GraphicsError::InvalidParameter(
                "sampler cache capacity must be non-zero".into(),
            ));
        }
        let heap = factory.create_descriptor_heap(heap_type, capacity, true)?;
        let range = 1u32 << (31 - capacity.leading_zeros());
        Ok(Self {
            heap,
            backend: factory.backend_arc().clone(),
            buddy: BuddyAllocator::new(1, range),
            entries: HashMap::new(),
            lru: BTreeMap::new(),
            tick: 0,
            stats: SamplerCacheStats::default(),
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> SamplerCacheStats {
        self.stats
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn lookup(&mut self, key: u64, fence: FenceValue) -> Option<u32> {
        let tick = self.next_tick();
        let entry = self.entries.get_mut(&key)?;
        self.lru.remove(&entry.tick);
        entry.tick = tick;
        entry.fence = entry.fence.max(fence);
        self.lru.insert(tick, key);
        Some(entry.block.offset)
    }

    /// Evict the least recently used entry if its last use has completed.
    fn evict_one(&mut self, completed: FenceValue) -> bool {
        let Some((&tick, &key)) = self.lru.first_key_value() else {
            return false;
        };
        let Some(entry) = self.entries.get(&key).copied() else {
            return false;
        };
        if entry.fence > completed {
            return false;
        }
        self.lru.remove(&tick);
        self.entries.remove(&key);
        self.buddy.release(entry.block);
        self.stats.evictions += 1;
        true
    }

    fn insert(&mut self, key: u64, block: &[CpuDescriptorHandle], fence: FenceValue, completed: FenceValue) -> Option<u32> {
        let len = block.len() as u32;
        let allocation = loop {
            if let Some(allocation) = self.buddy.allocate(len, 1) {
                break allocation;
            }
            if !self.evict_one(completed) {
                return None;
            }
        };

        let sources: Vec<_> = block.iter().map(|h| (h.heap, h.index)).collect();
        self.backend
            .copy_descriptors(self.heap.raw(), allocation.offset, &sources);

        let tick = self.next_tick();
        self.entries.insert(
            key,
            CacheEntry {
                block: allocation.block,
                fence,
                tick,
            },
        );
        self.lru.insert(tick, key);
        Some(allocation.offset)
    }
}

impl OnlineDescriptorAllocator for SamplerCache {
    const KIND: &'static str = "sampler cache";

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
        let mut handles = Vec::with_capacity(blocks.len());
        for block in blocks {
            if block.is_empty() {
                handles.push(self.heap.gpu_handle(0));
                continue;
            }
            let key = block_key(block);
            let offset = match self.lookup(key, fence) {
                Some(offset) => {
                    self.stats.hits += 1;
                    offset
                }
                None => {
                    self.stats.misses += 1;
                    self.insert(key, block, fence, completed)?
                }
            };
            handles.push(self.heap.gpu_handle(offset));
        }
        Some(handles)
    }
}
