//! Reuse cache for transient textures.
//!
//! The pool keeps returned resources in a free list ordered by return time
//! (newest last). Renting scans the list front to back and takes the first
//! compatible entry; every incompatible entry passed over on the way counts
//! as a near miss and ages by one. Entries that keep missing are evicted
//! and their GPU memory released through the deferred-release path.

use crate::error::GraphicsError;
use crate::types::ResourceDesc;

use super::{Resource, ResourceFactory};

/// Default number of near misses after which a pooled resource is evicted.
pub const DEFAULT_STALE_LIMIT: u32 = 20;

/// A resource waiting in the pool.
#[derive(Debug)]
pub struct PooledResource {
    pub resource: Resource,
    pub stale_count: u32,
}

/// Pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

#[derive(Debug)]
pub struct ResourcePool {
    free: Vec<PooledResource>,
    stale_limit: u32,
    stats: PoolStats,
}

impl Default for ResourcePool {
    fn default() -> Self {
        Self::new(DEFAULT_STALE_LIMIT)
    }
}

impl ResourcePool {
    pub fn new(stale_limit: u32) -> Self {
        Self {
            free: Vec::new(),
            stale_limit: stale_limit.max(1),
            stats: PoolStats::default(),
        }
    }

    /// Take a compatible resource from the pool, or create one.
    pub fn rent(&mut self, desc: &ResourceDesc, factory: &ResourceFactory) -> Result<Resource, GraphicsError> {
        let mut index = 0;
        while index < self.free.len() {
            if self.free[index].resource.desc().is_compatible_with(desc) {
                let mut entry = self.free.remove(index);
                entry.stale_count = 0;
                self.stats.hits += 1;
                log::trace!("pool: reusing {:?} for {:?}", entry.resource.raw(), desc.label());
                return Ok(entry.resource);
            }

            let entry = &mut self.free[index];
            entry.stale_count += 1;
            if entry.stale_count >= self.stale_limit {
                let evicted = self.free.remove(index);
                self.stats.evictions += 1;
                log::debug!(
                    "pool: evicting {:?} ({:?}) after {} near misses",
                    evicted.resource.raw(),
                    evicted.resource.label(),
                    evicted.stale_count
                );
                continue;
            }
            index += 1;
        }

        self.stats.misses += 1;
        let resource = match desc {
            ResourceDesc::Texture(texture) => factory.create_texture(texture)?,
            ResourceDesc::Buffer(buffer) => {
                factory.create_buffer(buffer, crate::types::HeapKind::Default)?
            }
        };
        log::trace!("pool: created {:?} for {:?}", resource.raw(), desc.label());
        Ok(resource)
    }

    /// Put a resource back at the tail of the free list.
    pub fn give_back(&mut self, resource: Resource) {
        self.free.push(PooledResource {
            resource,
            stale_count: 0,
        });
    }

    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    /// Pooled entries, oldest first.
    pub fn entries(&self) -> &[PooledResource] {
        &self.free
    }

    pub fn max_stale_count(&self) -> u32 {
        self.free.iter().map(|e| e.stale_count).max().unwrap_or(0)
    }

    pub fn stats(&self) -> PoolStats {
        self.stats
    }

    /// Drop every pooled resource.
    pub fn clear(&mut self) {
        self.free.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::backend::DummyBackend;
    use crate::sync::ReleaseSink;
    use crate::types::{TextureDesc, TextureFlags, TextureFormat};

    fn factory() -> ResourceFactory {
        ResourceFactory::new(Arc::new(DummyBackend::new()), ReleaseSink::new())
    }

    fn rt(width: u32, format: TextureFormat) -> ResourceDesc {
        TextureDesc::new_2d(width, width, format, TextureFlags::RENDER_TARGET).into()
    }

    #[test]
    fn test_rent_reuses_returned() {
        let factory = factory();
        let mut pool = ResourcePool::default();

        let first = pool.rent(&rt(256, TextureFormat::Rgba8Unorm), &factory).unwrap();
        let raw = first.raw();
        pool.give_back(first);

        let again = pool.rent(&rt(128, TextureFormat::Rgba8Unorm), &factory).unwrap();
        assert_eq!(again.raw(), raw);
        assert_eq!(pool.stats().hits, 1);
        assert_eq!(pool.stats().misses, 1);
    }

    #[test]
    fn test_first_compatible_wins_and_near_misses_age() {
        let factory = factory();
        let mut pool = ResourcePool::default();

        let hdr = pool.rent(&rt(256, TextureFormat::Rgba16Float), &factory).unwrap();
        let ldr = pool.rent(&rt(256, TextureFormat::Rgba8Unorm), &factory).unwrap();
        let ldr_raw = ldr.raw();
        pool.give_back(hdr);
        pool.give_back(ldr);

        let got = pool.rent(&rt(256, TextureFormat::Rgba8Unorm), &factory).unwrap();
        assert_eq!(got.raw(), ldr_raw);
        assert_eq!(pool.entries()[0].stale_count, 1);
    }

    #[test]
    fn test_eviction_at_stale_limit() {
        let factory = factory();
        let mut pool = ResourcePool::new(3);

        let odd = pool.rent(&rt(64, TextureFormat::R32Float), &factory).unwrap();
        pool.give_back(odd);

        for _ in 0..3 {
            let tex = pool.rent(&rt(64, TextureFormat::Rgba8Unorm), &factory).unwrap();
            pool.give_back(tex);
        }

        assert_eq!(pool.stats().evictions, 1);
        assert!(pool
            .entries()
            .iter()
            .all(|e| e.resource.desc().as_texture().unwrap().format == TextureFormat::Rgba8Unorm));
        assert_eq!(factory.sink().len(), 1);
    }

    #[test]
    fn test_too_small_is_a_miss() {
        let factory = factory();
        let mut pool = ResourcePool::default();
        let small = pool.rent(&rt(64, TextureFormat::Rgba8Unorm), &factory).unwrap();
        let small_raw = small.raw();
        pool.give_back(small);

        let big = pool.rent(&rt(512, TextureFormat::Rgba8Unorm), &factory).unwrap();
        assert_ne!(big.raw(), small_raw);
        assert_eq!(pool.free_count(), 1);
    }
}
