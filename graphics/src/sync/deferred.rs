//! Deferred destruction of GPU objects.
//!
//! GPU commands execute asynchronously, one or more frames behind the CPU.
//! Objects can't be destroyed when their Rust owner drops them, because
//! command lists already submitted may still reference them.
//!
//! # Architecture
//!
//! ```text
//!  Drop(Resource) ──push──▶ ReleaseSink (mutex, any thread)
//!                                │
//!                 collect(frame fence value)
//!                                ▼
//!            ReleaseQueue<GpuObject>  [3: a][3: b][4: c] ...
//!                                │
//!                 drain(completed frame fence)
//!                                ▼
//!                      Backend::destroy_*
//! ```
//!
//! Owners never call the backend directly: a dropped [`Resource`] or
//! descriptor heap only pushes its raw handle into the shared sink. The
//! device moves sink contents into the fence-ordered queue once per frame
//! boundary, tagged with the frame fence value that covers every command
//! recorded so far.
//!
//! [`Resource`]: crate::resources::Resource

use std::sync::Arc;

use kiln_core::{FenceValue, ReleaseQueue};
use parking_lot::Mutex;

use crate::backend::{Backend, RawDescriptorHeap, RawFence, RawPipeline, RawResource};

/// A raw GPU object pending destruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuObject {
    Resource(RawResource),
    DescriptorHeap(RawDescriptorHeap),
    Pipeline(RawPipeline),
    Fence(RawFence),
}

impl GpuObject {
    /// Destroy the object immediately.
    ///
    /// The caller must ensure the GPU is no longer using it.
    pub fn destroy(self, backend: &dyn Backend) {
        match self {
            Self::Resource(raw) => backend.destroy_resource(raw),
            Self::DescriptorHeap(raw) => backend.destroy_descriptor_heap(raw),
            Self::Pipeline(raw) => backend.destroy_pipeline_state(raw),
            Self::Fence(raw) => backend.destroy_fence(raw),
        }
    }
}

/// Thread-safe inbox for objects whose owners were dropped.
#[derive(Debug, Clone, Default)]
pub struct ReleaseSink {
    inner: Arc<Mutex<Vec<GpuObject>>>,
}

impl ReleaseSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, object: GpuObject) {
        self.inner.lock().push(object);
    }

    /// Take everything pushed so far.
    pub fn take(&self) -> Vec<GpuObject> {
        std::mem::take(&mut *self.inner.lock())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

/// Fence-guarded destruction queue.
#[derive(Debug, Default)]
pub struct DeferredReleaser {
    queue: ReleaseQueue<GpuObject>,
    sink: ReleaseSink,
    destroyed: u64,
}

impl DeferredReleaser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sink to hand to object owners.
    pub fn sink(&self) -> &ReleaseSink {
        &self.sink
    }

    /// Queue `object` for destruction once `fence` completes.
    pub fn defer(&mut self, fence: FenceValue, object: GpuObject) {
        self.queue.push(fence, object);
    }

    /// Move dropped objects from the sink into the queue, guarded by `fence`.
    pub fn collect(&mut self, fence: FenceValue) -> usize {
        let dropped = self.sink.take();
        let count = dropped.len();
        for object in dropped {
            self.queue.push(fence, object);
        }
        count
    }

    /// Destroy every object whose fence is `<= completed`.
    pub fn drain(&mut self, completed: FenceValue, backend: &dyn Backend) -> usize {
        let mut count = 0;
        for (_, object) in self.queue.drain(completed) {
            object.destroy(backend);
            count += 1;
        }
        if count > 0 {
            log::trace!("destroyed {count} deferred GPU objects (completed fence {completed})");
        }
        self.destroyed += count as u64;
        count
    }

    /// Destroy everything, including objects still in the sink.
    ///
    /// Only valid once the GPU is idle.
    pub fn flush_all(&mut self, backend: &dyn Backend) -> usize {
        let mut count = 0;
        let queued: Vec<_> = self.queue.drain_all().map(|(_, object)| object).collect();
        for object in queued.into_iter().chain(self.sink.take()) {
            object.destroy(backend);
            count += 1;
        }
        self.destroyed += count as u64;
        count
    }

    /// Objects waiting for their fence.
    pub fn pending_count(&self) -> usize {
        self.queue.len()
    }

    pub fn destroyed_count(&self) -> u64 {
        self.destroyed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyBackend;
    use crate::types::{BufferDesc, BufferUsage, HeapKind, ResourceCreateInfo, ResourceState};

    fn make_buffer(backend: &DummyBackend) -> RawResource {
        backend
            .create_resource(&ResourceCreateInfo::new(
                BufferDesc::bytes(64, BufferUsage::COPY_SRC),
                HeapKind::Upload,
                ResourceState::GENERIC_READ,
            ))
            .unwrap()
    }

    #[test]
    fn test_release_after_fence() {
        let backend = DummyBackend::new();
        let mut releaser = DeferredReleaser::new();
        let a = make_buffer(&backend);
        let b = make_buffer(&backend);

        releaser.defer(1, GpuObject::Resource(a));
        releaser.defer(2, GpuObject::Resource(b));

        assert_eq!(releaser.drain(0, &backend), 0);
        assert_eq!(releaser.drain(1, &backend), 1);
        assert!(!backend.is_resource_alive(a));
        assert!(backend.is_resource_alive(b));
        assert_eq!(releaser.pending_count(), 1);
    }

    #[test]
    fn test_sink_collect_from_other_thread() {
        let backend = DummyBackend::new();
        let mut releaser = DeferredReleaser::new();
        let raw = make_buffer(&backend);

        let sink = releaser.sink().clone();
        std::thread::spawn(move || sink.push(GpuObject::Resource(raw)))
            .join()
            .unwrap();

        assert_eq!(releaser.collect(5), 1);
        assert_eq!(releaser.drain(4, &backend), 0);
        assert_eq!(releaser.drain(5, &backend), 1);
        assert!(!backend.is_resource_alive(raw));
    }

    #[test]
    fn test_flush_all_includes_sink() {
        let backend = DummyBackend::new();
        let mut releaser = DeferredReleaser::new();
        releaser.defer(100, GpuObject::Resource(make_buffer(&backend)));
        releaser.sink().push(GpuObject::Resource(make_buffer(&backend)));

        assert_eq!(releaser.flush_all(&backend), 2);
        assert_eq!(backend.live_resource_count(), 0);
        assert_eq!(releaser.destroyed_count(), 2);
    }
}
